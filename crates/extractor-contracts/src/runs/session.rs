use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::descriptors::ObjectDescriptor;
use crate::events::now_utc_iso;
use crate::selection::SelectionSet;

pub const SESSION_FILE: &str = "session.json";
pub const RESULTS_FILE: &str = "results.json";
pub const EVENTS_FILE: &str = "events.jsonl";
pub const PASS_SUMMARY_FILE: &str = "pass_summary.json";

/// State tied to one detection run: the source image, the descriptors found
/// on it and the operator's selection over them.
///
/// Generated results are deliberately not part of this; re-running detection
/// replaces this whole record but leaves the result collection alone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionSession {
    pub session_id: String,
    pub source_image: PathBuf,
    pub detected_at: String,
    pub vision_model: String,
    pub descriptors: Vec<ObjectDescriptor>,
    pub selection: SelectionSet,
}

impl DetectionSession {
    pub fn new(
        source_image: impl Into<PathBuf>,
        vision_model: impl Into<String>,
        descriptors: Vec<ObjectDescriptor>,
    ) -> Self {
        let selection = SelectionSet::new(descriptors.len());
        Self {
            session_id: format!("session-{}", uuid::Uuid::new_v4().simple()),
            source_image: source_image.into(),
            detected_at: now_utc_iso(),
            vision_model: vision_model.into(),
            descriptors,
            selection,
        }
    }

    /// Snapshot of the selected descriptors, taken at pass start.
    pub fn selected_descriptors(&self) -> Vec<ObjectDescriptor> {
        self.selection.snapshot(&self.descriptors)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed reading {}", path.display()))?;
        let session: Self = serde_json::from_str(&raw)
            .with_context(|| format!("invalid session file {}", path.display()))?;
        if session.selection.len() != session.descriptors.len() {
            bail!(
                "session file {} has {} selection flags for {} descriptors",
                path.display(),
                session.selection.len(),
                session.descriptors.len()
            );
        }
        Ok(session)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)
            .with_context(|| format!("failed writing {}", path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::descriptors::ObjectDescriptor;

    use super::DetectionSession;

    fn trees() -> Vec<ObjectDescriptor> {
        vec![
            ObjectDescriptor::new("木", "tree", "上", "upper"),
            ObjectDescriptor::new("木", "tree", "下", "lower"),
        ]
    }

    #[test]
    fn new_session_has_empty_selection() {
        let session = DetectionSession::new("in.png", "gpt-4o", trees());
        assert!(session.session_id.starts_with("session-"));
        assert_eq!(session.selection.len(), 2);
        assert!(session.selected_descriptors().is_empty());
    }

    #[test]
    fn save_and_load_preserve_selection() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("session.json");
        let mut session = DetectionSession::new("in.png", "gpt-4o", trees());
        session.selection.select(1)?;
        session.save(&path)?;

        let loaded = DetectionSession::load(&path)?;
        assert_eq!(loaded, session);
        assert_eq!(loaded.selected_descriptors()[0].position_local, "下");
        Ok(())
    }

    #[test]
    fn load_rejects_mismatched_selection() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("session.json");
        let mut session = DetectionSession::new("in.png", "gpt-4o", trees());
        session.descriptors.pop();
        session.save(&path)?;

        let err = DetectionSession::load(&path).err().map(|err| err.to_string());
        assert!(err.unwrap_or_default().contains("2 selection flags for 1 descriptors"));
        Ok(())
    }
}
