use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use extractor_contracts::{GeneratedImageReference, ImageSize, ObjectDescriptor, Quality};
use image::DynamicImage;
use serde_json::json;

use crate::codec::{encode_png, to_data_uri};
use crate::error::{error_chain_text, ExtractError};
use crate::prompt::build_prompt;
use crate::providers::{EditOutput, EditProvider, EditRequest};
use crate::report::{payload, Reporter};

/// Picks the reference out of the first output: hosted URL first, inline
/// base64 second.
pub fn normalize_output(outputs: &[EditOutput]) -> Result<GeneratedImageReference, String> {
    let Some(first) = outputs.first() else {
        return Err("edit response contained no output images".to_string());
    };
    if let Some(url) = first.url.as_deref().filter(|url| !url.trim().is_empty()) {
        return Ok(GeneratedImageReference::Url(url.trim().to_string()));
    }
    if let Some(b64) = first.b64_json.as_deref().filter(|b64| !b64.trim().is_empty()) {
        let b64 = b64.trim();
        BASE64
            .decode(b64.as_bytes())
            .map_err(|err| format!("edit response carried invalid base64 image data: {err}"))?;
        return Ok(GeneratedImageReference::InlinePayload(to_data_uri(b64)));
    }
    Err("edit response output had neither url nor b64_json".to_string())
}

pub struct ObjectSynthesizer<'a> {
    provider: &'a dyn EditProvider,
    model: String,
}

impl<'a> ObjectSynthesizer<'a> {
    pub fn new(provider: &'a dyn EditProvider, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// One edit call for one descriptor. Failures are reported here and come
    /// back as `None`; they never propagate to the caller.
    pub fn synthesize(
        &self,
        source: &DynamicImage,
        descriptor: &ObjectDescriptor,
        quality: Quality,
        size: ImageSize,
        reporter: &dyn Reporter,
    ) -> Option<GeneratedImageReference> {
        let key = descriptor.composite_key();
        let prompt = build_prompt(descriptor);
        reporter.record(
            "synthesis_started",
            payload(json!({
                "key": key,
                "provider": self.provider.name(),
                "model": self.model,
                "quality": quality.as_str(),
                "size": size.as_str(),
            })),
        );
        match self.try_synthesize(source, &prompt, quality, size) {
            Ok((reference, request_id)) => {
                reporter.record(
                    "item_generated",
                    payload(json!({
                        "key": key,
                        "reference_kind": reference.kind(),
                        "request_id": request_id,
                    })),
                );
                Some(reference)
            }
            Err(message) => {
                let err = ExtractError::Synthesis {
                    key: key.clone(),
                    message,
                };
                reporter.error(&err);
                reporter.record(
                    "synthesis_diagnostics",
                    payload(json!({
                        "key": key,
                        "error": err.to_string(),
                        "prompt": prompt,
                    })),
                );
                None
            }
        }
    }

    fn try_synthesize(
        &self,
        source: &DynamicImage,
        prompt: &str,
        quality: Quality,
        size: ImageSize,
    ) -> Result<(GeneratedImageReference, Option<String>), String> {
        let image_png = encode_png(source).map_err(|err| error_chain_text(&err, 512))?;
        let request =
            EditRequest::transparent_png(self.model.clone(), prompt, image_png, size, quality);
        let response = self
            .provider
            .edit(&request)
            .map_err(|err| error_chain_text(&err, 1024))?;
        let reference = normalize_output(&response.outputs).map_err(|message| {
            match response.status_code {
                Some(code) => format!("{message} (status {code})"),
                None => message,
            }
        })?;
        Ok((reference, response.request_id))
    }
}
