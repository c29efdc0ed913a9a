use std::collections::BTreeMap;

use anyhow::Result;
use extractor_contracts::{ImageSize, Quality};

mod dryrun;
mod openai;

pub use dryrun::DryrunProvider;
pub use openai::{OpenAiProvider, DEFAULT_API_BASE};

/// One chat-style request carrying an inline image and a text instruction,
/// asking for a JSON object back.
#[derive(Debug, Clone)]
pub struct VisionRequest {
    pub model: String,
    pub instruction: String,
    pub image_data_uri: String,
    pub max_output_tokens: u64,
}

/// Image-edit request: always one PNG output with a transparent background.
#[derive(Debug, Clone)]
pub struct EditRequest {
    pub model: String,
    pub prompt: String,
    pub image_png: Vec<u8>,
    pub file_name: String,
    pub mime_type: String,
    pub size: ImageSize,
    pub quality: Quality,
    pub n: u32,
    pub output_format: String,
    pub background: String,
}

impl EditRequest {
    pub fn transparent_png(
        model: impl Into<String>,
        prompt: impl Into<String>,
        image_png: Vec<u8>,
        size: ImageSize,
        quality: Quality,
    ) -> Self {
        Self {
            model: model.into(),
            prompt: prompt.into(),
            image_png,
            file_name: "image.png".to_string(),
            mime_type: "image/png".to_string(),
            size,
            quality,
            n: 1,
            output_format: "png".to_string(),
            background: "transparent".to_string(),
        }
    }
}

/// One output slot of an edit response. Providers return either a hosted URL
/// or inline base64, occasionally neither.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EditOutput {
    pub url: Option<String>,
    pub b64_json: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct EditResponse {
    pub status_code: Option<u16>,
    pub request_id: Option<String>,
    pub outputs: Vec<EditOutput>,
}

pub trait VisionProvider: Send + Sync {
    fn name(&self) -> &str;
    /// Raw assistant text; may be empty when the model produced nothing.
    fn complete(&self, request: &VisionRequest) -> Result<String>;
}

pub trait EditProvider: Send + Sync {
    fn name(&self) -> &str;
    fn edit(&self, request: &EditRequest) -> Result<EditResponse>;
}

#[derive(Default)]
pub struct ProviderRegistry {
    vision: BTreeMap<String, Box<dyn VisionProvider>>,
    edit: BTreeMap<String, Box<dyn EditProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_vision<P: VisionProvider + 'static>(&mut self, provider: P) {
        self.vision
            .insert(provider.name().to_string(), Box::new(provider));
    }

    pub fn register_edit<P: EditProvider + 'static>(&mut self, provider: P) {
        self.edit
            .insert(provider.name().to_string(), Box::new(provider));
    }

    pub fn vision(&self, name: &str) -> Option<&dyn VisionProvider> {
        self.vision.get(name).map(|provider| provider.as_ref())
    }

    pub fn edit(&self, name: &str) -> Option<&dyn EditProvider> {
        self.edit.get(name).map(|provider| provider.as_ref())
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .vision
            .keys()
            .chain(self.edit.keys())
            .cloned()
            .collect();
        names.sort();
        names.dedup();
        names
    }
}
