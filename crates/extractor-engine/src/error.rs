use thiserror::Error;

/// Failures the pipeline recovers from locally.
///
/// None of these abort a pass: each is reported and turned into "no result"
/// for the item (or detection run) that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractError {
    #[error("failed to parse object detection response: {0}")]
    DetectionParse(String),

    #[error("object detection request failed: {0}")]
    VisionRequest(String),

    #[error("image generation failed for '{key}': {message}")]
    Synthesis { key: String, message: String },

    #[error("image download failed: {0}")]
    Fetch(String),
}

impl ExtractError {
    pub fn kind(&self) -> &'static str {
        match self {
            ExtractError::DetectionParse(_) => "detection_parse",
            ExtractError::VisionRequest(_) => "vision_request",
            ExtractError::Synthesis { .. } => "synthesis",
            ExtractError::Fetch(_) => "fetch",
        }
    }
}

/// Flattens an anyhow chain into one line, dropping repeated causes.
pub(crate) fn error_chain_text(err: &anyhow::Error, max_chars: usize) -> String {
    let mut parts: Vec<String> = Vec::new();
    for cause in err.chain() {
        let text = cause.to_string();
        let trimmed = text.trim();
        if trimmed.is_empty() {
            continue;
        }
        if parts.last().is_some_and(|existing| existing == trimmed) {
            continue;
        }
        parts.push(trimmed.to_string());
    }
    if parts.is_empty() {
        return truncate_text(&err.to_string(), max_chars);
    }
    truncate_text(&parts.join(" | caused by: "), max_chars)
}

pub(crate) fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}
