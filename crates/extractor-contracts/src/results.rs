use std::path::Path;

use anyhow::{bail, Context, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Where a synthesized image can be fetched from.
///
/// `InlinePayload` holds a self-describing `data:` URI; `Url` a hosted
/// location. Both serialize as the plain string so result files stay readable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum GeneratedImageReference {
    Url(String),
    InlinePayload(String),
}

impl GeneratedImageReference {
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            bail!("empty image reference");
        }
        if trimmed.starts_with("data:") {
            return Ok(Self::InlinePayload(trimmed.to_string()));
        }
        Ok(Self::Url(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Url(url) => url,
            Self::InlinePayload(data_uri) => data_uri,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Url(_) => "url",
            Self::InlinePayload(_) => "inline",
        }
    }
}

impl From<GeneratedImageReference> for String {
    fn from(reference: GeneratedImageReference) -> Self {
        match reference {
            GeneratedImageReference::Url(url) => url,
            GeneratedImageReference::InlinePayload(data_uri) => data_uri,
        }
    }
}

impl TryFrom<String> for GeneratedImageReference {
    type Error = anyhow::Error;

    fn try_from(raw: String) -> Result<Self> {
        Self::parse(&raw)
    }
}

/// Composite key -> generated image. Later inserts under an existing key
/// replace the value in place.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResultCollection {
    entries: IndexMap<String, GeneratedImageReference>,
}

impl ResultCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the reference that was replaced, if the key was already taken.
    pub fn insert(
        &mut self,
        key: impl Into<String>,
        reference: GeneratedImageReference,
    ) -> Option<GeneratedImageReference> {
        self.entries.insert(key.into(), reference)
    }

    pub fn get(&self, key: &str) -> Option<&GeneratedImageReference> {
        self.entries.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &GeneratedImageReference)> {
        self.entries
            .iter()
            .map(|(key, reference)| (key.as_str(), reference))
    }

    /// Drops every entry. Only a caller starting a fresh pass should do this.
    pub fn reset(&mut self) {
        self.entries.clear();
    }

    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed reading {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("invalid results file {}", path.display()))
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
