use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

use crate::descriptors::ObjectDescriptor;

/// Per-descriptor selection flags for one detection run.
///
/// Indices refer to the descriptor list of the run that created the set; a new
/// detection run must build a new set rather than reuse this one.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SelectionSet {
    flags: Vec<bool>,
}

impl SelectionSet {
    pub fn new(len: usize) -> Self {
        Self {
            flags: vec![false; len],
        }
    }

    pub fn len(&self) -> usize {
        self.flags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }

    pub fn is_selected(&self, index: usize) -> bool {
        self.flags.get(index).copied().unwrap_or(false)
    }

    pub fn set(&mut self, index: usize, selected: bool) -> Result<()> {
        let len = self.flags.len();
        let Some(flag) = self.flags.get_mut(index) else {
            bail!("selection index {index} out of range (detected objects: {len})");
        };
        *flag = selected;
        Ok(())
    }

    pub fn select(&mut self, index: usize) -> Result<()> {
        self.set(index, true)
    }

    pub fn deselect(&mut self, index: usize) -> Result<()> {
        self.set(index, false)
    }

    pub fn select_all(&mut self) {
        self.flags.iter_mut().for_each(|flag| *flag = true);
    }

    pub fn deselect_all(&mut self) {
        self.flags.iter_mut().for_each(|flag| *flag = false);
    }

    pub fn selected_indices(&self) -> Vec<usize> {
        self.flags
            .iter()
            .enumerate()
            .filter(|(_, selected)| **selected)
            .map(|(index, _)| index)
            .collect()
    }

    pub fn selected_count(&self) -> usize {
        self.flags.iter().filter(|selected| **selected).count()
    }

    /// Copies the selected descriptors out, in index order. The copy is what a
    /// generation pass works on, so later selection changes cannot leak into
    /// a running pass.
    pub fn snapshot(&self, descriptors: &[ObjectDescriptor]) -> Vec<ObjectDescriptor> {
        descriptors
            .iter()
            .enumerate()
            .filter(|(index, _)| self.is_selected(*index))
            .map(|(_, descriptor)| descriptor.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use crate::descriptors::ObjectDescriptor;

    use super::SelectionSet;

    fn descriptors() -> Vec<ObjectDescriptor> {
        vec![
            ObjectDescriptor::new("木", "tree", "上", "upper"),
            ObjectDescriptor::new("木", "tree", "下", "lower"),
            ObjectDescriptor::new("空", "sky", "背景", "background"),
        ]
    }

    #[test]
    fn starts_with_nothing_selected() {
        let selection = SelectionSet::new(3);
        assert_eq!(selection.len(), 3);
        assert_eq!(selection.selected_count(), 0);
        assert!(selection.snapshot(&descriptors()).is_empty());
    }

    #[test]
    fn snapshot_preserves_index_order() -> anyhow::Result<()> {
        let mut selection = SelectionSet::new(3);
        selection.select(2)?;
        selection.select(0)?;
        let snapshot = selection.snapshot(&descriptors());
        assert_eq!(
            snapshot
                .iter()
                .map(ObjectDescriptor::composite_key)
                .collect::<Vec<_>>(),
            vec!["木_上", "空_背景"]
        );
        Ok(())
    }

    #[test]
    fn bulk_actions_flip_every_flag() {
        let mut selection = SelectionSet::new(3);
        selection.select_all();
        assert_eq!(selection.selected_indices(), vec![0, 1, 2]);
        selection.deselect_all();
        assert!(selection.selected_indices().is_empty());
    }

    #[test]
    fn out_of_range_index_is_rejected() {
        let mut selection = SelectionSet::new(2);
        let err = selection.select(5).err().map(|err| err.to_string());
        assert_eq!(
            err.as_deref(),
            Some("selection index 5 out of range (detected objects: 2)")
        );
        assert!(!selection.is_selected(5));
    }

    #[test]
    fn snapshot_is_detached_from_later_changes() -> anyhow::Result<()> {
        let mut selection = SelectionSet::new(3);
        selection.select(1)?;
        let snapshot = selection.snapshot(&descriptors());
        selection.deselect(1)?;
        selection.select(0)?;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].position_canonical, "lower");
        Ok(())
    }
}
