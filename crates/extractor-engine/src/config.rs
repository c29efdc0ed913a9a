use std::env;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::blocking::Client as HttpClient;

use crate::orchestrator::DEFAULT_ITEM_DELAY;
use crate::providers::DEFAULT_API_BASE;

/// Settings the shell hands to the engine. The engine itself never reads the
/// environment; [`ExtractorConfig::from_env`] is a convenience for shells.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractorConfig {
    pub api_key: Option<String>,
    pub api_base: String,
    pub vision_model: Option<String>,
    pub edit_model: Option<String>,
    pub http_timeout: Option<Duration>,
    pub item_delay: Duration,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base: DEFAULT_API_BASE.to_string(),
            vision_model: None,
            edit_model: None,
            http_timeout: None,
            item_delay: DEFAULT_ITEM_DELAY,
        }
    }
}

impl ExtractorConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let value = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let mut config = Self {
            api_key: value("OPENAI_API_KEY"),
            vision_model: value("EXTRACTOR_VISION_MODEL"),
            edit_model: value("EXTRACTOR_EDIT_MODEL"),
            ..Self::default()
        };
        if let Some(base) = value("OPENAI_API_BASE") {
            config.api_base = base.trim_end_matches('/').to_string();
        }
        if let Some(raw) = value("EXTRACTOR_HTTP_TIMEOUT_SECS") {
            let secs: f64 = raw
                .parse()
                .with_context(|| format!("EXTRACTOR_HTTP_TIMEOUT_SECS must be a number, got '{raw}'"))?;
            if secs > 0.0 {
                let timeout = Duration::try_from_secs_f64(secs).with_context(|| {
                    format!("EXTRACTOR_HTTP_TIMEOUT_SECS is out of range, got '{raw}'")
                })?;
                config.http_timeout = Some(timeout);
            }
        }
        if let Some(raw) = value("EXTRACTOR_ITEM_DELAY_MS") {
            let millis: u64 = raw
                .parse()
                .with_context(|| format!("EXTRACTOR_ITEM_DELAY_MS must be an integer, got '{raw}'"))?;
            config.item_delay = Duration::from_millis(millis);
        }
        Ok(config)
    }

    /// Blocking client; without a configured timeout requests wait as long
    /// as the transport allows.
    pub fn http_client(&self) -> Result<HttpClient> {
        HttpClient::builder()
            .timeout(self.http_timeout)
            .build()
            .context("failed to build HTTP client")
    }
}
