use anyhow::{bail, Result};

use super::registry::{ModelRegistry, ModelSpec};

/// How a model ended up chosen for a pipeline role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSelection {
    pub model: ModelSpec,
    /// True when nothing was requested and the role's default was used.
    pub defaulted: bool,
}

/// Resolves a model name for one capability (`vision` or `edit`).
///
/// A name the operator typed is taken literally: if it is unknown or cannot
/// serve the capability the selection fails and lists what would work.
#[derive(Debug, Clone)]
pub struct ModelSelector {
    pub registry: ModelRegistry,
}

impl ModelSelector {
    pub fn new(registry: Option<ModelRegistry>) -> Self {
        Self {
            registry: registry.unwrap_or_else(|| ModelRegistry::new(None)),
        }
    }

    pub fn select(&self, requested: Option<&str>, capability: &str) -> Result<ModelSelection> {
        let candidates = self.registry.by_capability(capability);
        let requested = requested.map(str::trim).filter(|name| !name.is_empty());

        let Some(name) = requested else {
            let Some(model) = candidates.into_iter().next() else {
                bail!("no {capability} model is registered");
            };
            return Ok(ModelSelection {
                model,
                defaulted: true,
            });
        };

        if let Some(model) = candidates.iter().find(|model| model.name == name) {
            return Ok(ModelSelection {
                model: model.clone(),
                defaulted: false,
            });
        }
        let choices = candidate_names(&candidates);
        match self.registry.get(name) {
            Some(_) => bail!("model '{name}' cannot be used for {capability} (choose one of: {choices})"),
            None => bail!("unknown {capability} model '{name}' (choose one of: {choices})"),
        }
    }
}

fn candidate_names(candidates: &[ModelSpec]) -> String {
    if candidates.is_empty() {
        return "none registered".to_string();
    }
    candidates
        .iter()
        .map(|model| model.name.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}
