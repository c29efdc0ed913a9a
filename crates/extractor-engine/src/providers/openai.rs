use anyhow::{bail, Context, Result};
use reqwest::blocking::multipart::{Form as MultipartForm, Part as MultipartPart};
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use serde_json::{json, Value};

use super::{EditOutput, EditProvider, EditRequest, EditResponse, VisionProvider, VisionRequest};
use crate::error::truncate_text;

pub const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";

pub struct OpenAiProvider {
    api_base: String,
    api_key: String,
    http: HttpClient,
}

impl OpenAiProvider {
    pub fn new(api_base: &str, api_key: impl Into<String>, http: HttpClient) -> Self {
        let api_base = api_base.trim().trim_end_matches('/');
        Self {
            api_base: if api_base.is_empty() {
                DEFAULT_API_BASE.to_string()
            } else {
                api_base.to_string()
            },
            api_key: api_key.into(),
            http,
        }
    }

    pub fn api_base(&self) -> &str {
        &self.api_base
    }
}

impl VisionProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn complete(&self, request: &VisionRequest) -> Result<String> {
        let endpoint = format!("{}/chat/completions", self.api_base);
        let payload = chat_payload(request);
        let response = self
            .http
            .post(&endpoint)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .with_context(|| format!("OpenAI request failed ({endpoint})"))?;
        let parsed = response_json_or_error("OpenAI chat", response)?;
        Ok(extract_message_text(&parsed))
    }
}

impl EditProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn edit(&self, request: &EditRequest) -> Result<EditResponse> {
        let endpoint = format!("{}/images/edits", self.api_base);
        let part = MultipartPart::bytes(request.image_png.clone())
            .file_name(request.file_name.clone())
            .mime_str(&request.mime_type)
            .with_context(|| format!("invalid mime '{}'", request.mime_type))?;
        let form = MultipartForm::new()
            .text("model", request.model.clone())
            .text("prompt", request.prompt.clone())
            .text("size", request.size.as_str())
            .text("quality", request.quality.as_str())
            .text("n", request.n.max(1).to_string())
            .text("output_format", request.output_format.clone())
            .text("background", request.background.clone())
            .part("image", part);

        let response = self
            .http
            .post(&endpoint)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .context("OpenAI edits request failed")?;
        let status_code = response.status().as_u16();
        let request_id = response
            .headers()
            .get("x-request-id")
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let parsed = response_json_or_error("OpenAI edits", response)?;

        Ok(EditResponse {
            status_code: Some(status_code),
            request_id,
            outputs: extract_edit_outputs(&parsed),
        })
    }
}

fn chat_payload(request: &VisionRequest) -> Value {
    json!({
        "model": request.model,
        "messages": [{
            "role": "user",
            "content": [
                {"type": "text", "text": request.instruction},
                {"type": "image_url", "image_url": {"url": request.image_data_uri}},
            ],
        }],
        "response_format": {"type": "json_object"},
        "max_tokens": request.max_output_tokens,
    })
}

fn extract_message_text(response: &Value) -> String {
    response
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|choices| choices.first())
        .and_then(|choice| choice.get("message"))
        .and_then(|message| message.get("content"))
        .and_then(Value::as_str)
        .map(|text| text.trim().to_string())
        .unwrap_or_default()
}

fn extract_edit_outputs(response: &Value) -> Vec<EditOutput> {
    let rows = response
        .get("data")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    rows.iter()
        .filter_map(Value::as_object)
        .map(|row| EditOutput {
            url: non_empty_str(row.get("url")),
            b64_json: non_empty_str(row.get("b64_json")),
        })
        .collect()
}

fn non_empty_str(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(str::to_string)
}

fn response_json_or_error(provider: &str, response: HttpResponse) -> Result<Value> {
    let status = response.status();
    let code = status.as_u16();
    let body = response
        .text()
        .with_context(|| format!("{provider} response body read failed"))?;
    if !status.is_success() {
        bail!(
            "{provider} request failed ({code}): {}",
            truncate_text(&body, 512)
        );
    }
    let parsed: Value = serde_json::from_str(&body)
        .with_context(|| format!("{provider} returned invalid JSON payload"))?;
    Ok(parsed)
}
