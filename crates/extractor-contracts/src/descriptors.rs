use serde::{Deserialize, Serialize};

/// One detected object and where it sits on the source image, named twice:
/// once in the operator's locale and once in canonical English.
///
/// Only the canonical pair is sent to the synthesis model. The local pair is
/// what the operator sees and what results are keyed by.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectDescriptor {
    #[serde(rename = "object_ja")]
    pub label_local: String,
    #[serde(rename = "object_en")]
    pub label_canonical: String,
    #[serde(rename = "position_ja")]
    pub position_local: String,
    #[serde(rename = "position_en")]
    pub position_canonical: String,
}

impl ObjectDescriptor {
    pub fn new(
        label_local: impl Into<String>,
        label_canonical: impl Into<String>,
        position_local: impl Into<String>,
        position_canonical: impl Into<String>,
    ) -> Self {
        Self {
            label_local: label_local.into(),
            label_canonical: label_canonical.into(),
            position_local: position_local.into(),
            position_canonical: position_canonical.into(),
        }
    }

    /// Key used in the result collection. Not unique: two descriptors with the
    /// same local label and position map to the same key.
    pub fn composite_key(&self) -> String {
        format!("{}_{}", self.label_local, self.position_local)
    }

    pub fn has_canonical_fields(&self) -> bool {
        !self.label_canonical.trim().is_empty() && !self.position_canonical.trim().is_empty()
    }

    /// Operator-facing one-liner, e.g. `木 (位置: 上) [tree at upper]`.
    pub fn display_label(&self) -> String {
        format!(
            "{} (位置: {}) [{} at {}]",
            self.label_local, self.position_local, self.label_canonical, self.position_canonical
        )
    }
}
