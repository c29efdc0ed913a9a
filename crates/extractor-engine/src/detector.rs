//! Turns a vision model's loosely-structured answer into validated
//! descriptors.

use std::collections::HashSet;

use extractor_contracts::ObjectDescriptor;
use image::DynamicImage;
use serde_json::{json, Map, Value};

use crate::codec::image_to_data_uri;
use crate::error::{error_chain_text, ExtractError};
use crate::providers::{VisionProvider, VisionRequest};
use crate::report::{payload, Reporter};

pub const DEFAULT_MAX_OUTPUT_TOKENS: u64 = 1000;

pub const DETECTION_INSTRUCTION: &str = "Analyze this image thoroughly and identify ALL visible objects, including both large and small items, details, and parts of objects. Be comprehensive and include: main objects, background elements, small details, accessories, decorative items, furniture parts, natural elements, etc. If there are multiple objects of the same type, list each one separately with specific positions (for example: if there are 2 trees, list them as 'upper tree' and 'lower tree'). Please respond in the following JSON format: {\"objects\": [{\"object_ja\": \"object name in Japanese\", \"object_en\": \"object name in English\", \"position_ja\": \"position in Japanese (e.g., 右上, 中央, 左下)\", \"position_en\": \"position in English (e.g., upper right, center, lower left)\"}, ...]}";

/// A way of finding the object array inside a parsed response.
pub type ExtractionStrategy = fn(&Value) -> Option<&Vec<Value>>;

/// Tried in order; the first hit wins.
pub const EXTRACTION_STRATEGIES: [(&str, ExtractionStrategy); 3] = [
    ("objects_key", objects_key),
    ("top_level_array", top_level_array),
    ("first_array_value", first_array_value),
];

pub fn objects_key(payload: &Value) -> Option<&Vec<Value>> {
    payload.get("objects").and_then(Value::as_array)
}

pub fn top_level_array(payload: &Value) -> Option<&Vec<Value>> {
    payload.as_array()
}

/// First top-level value that is an array, in document order.
pub fn first_array_value(payload: &Value) -> Option<&Vec<Value>> {
    payload.as_object()?.values().find_map(Value::as_array)
}

pub fn locate_object_array(payload: &Value) -> Option<(&'static str, &Vec<Value>)> {
    EXTRACTION_STRATEGIES
        .iter()
        .find_map(|(name, strategy)| strategy(payload).map(|items| (*name, items)))
}

/// Parses response text and returns the raw object array plus the name of
/// the strategy that found it.
pub fn parse_detection_response(text: &str) -> Result<(&'static str, Vec<Value>), ExtractError> {
    let body = strip_code_fence(text);
    if body.is_empty() {
        return Err(ExtractError::DetectionParse(
            "vision model returned an empty response".to_string(),
        ));
    }
    let parsed: Value = serde_json::from_str(&body)
        .map_err(|err| ExtractError::DetectionParse(format!("invalid JSON: {err}")))?;
    let Some((strategy, items)) = locate_object_array(&parsed) else {
        return Err(ExtractError::DetectionParse(
            "response contains no array of objects".to_string(),
        ));
    };
    Ok((strategy, items.clone()))
}

/// Maps raw items to descriptors, skipping invalid items and exact
/// duplicates with one warning each.
pub fn descriptors_from_items(items: &[Value], reporter: &dyn Reporter) -> Vec<ObjectDescriptor> {
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(items.len());
    for (index, item) in items.iter().enumerate() {
        let Some(descriptor) = item.as_object().and_then(descriptor_from_object) else {
            reporter.warning(&format!(
                "skipped detected object #{index}: missing English name or position"
            ));
            continue;
        };
        if !seen.insert(descriptor.clone()) {
            reporter.warning(&format!(
                "skipped duplicate detected object #{index}: {}",
                descriptor.display_label()
            ));
            continue;
        }
        out.push(descriptor);
    }
    out
}

fn descriptor_from_object(object: &Map<String, Value>) -> Option<ObjectDescriptor> {
    let field = |specific: &str, generic: &str| {
        text_field(object, specific)
            .or_else(|| text_field(object, generic))
            .unwrap_or_default()
    };
    let descriptor = ObjectDescriptor::new(
        field("object_ja", "object"),
        field("object_en", "object"),
        field("position_ja", "position"),
        field("position_en", "position"),
    );
    descriptor.has_canonical_fields().then_some(descriptor)
}

fn text_field(object: &Map<String, Value>, key: &str) -> Option<String> {
    object
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(str::to_string)
}

fn strip_code_fence(text: &str) -> String {
    let mut body = text.trim();
    if let Some(rest) = body.strip_prefix("```") {
        body = rest.trim_end().trim_end_matches("```").trim();
        if body.to_ascii_lowercase().starts_with("json") {
            body = body[4..].trim();
        }
    }
    body.to_string()
}

pub struct ObjectDetector<'a> {
    provider: &'a dyn VisionProvider,
    model: String,
    max_output_tokens: u64,
}

impl<'a> ObjectDetector<'a> {
    pub fn new(provider: &'a dyn VisionProvider, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            max_output_tokens: DEFAULT_MAX_OUTPUT_TOKENS,
        }
    }

    pub fn with_max_output_tokens(mut self, max_output_tokens: u64) -> Self {
        self.max_output_tokens = max_output_tokens.max(1);
        self
    }

    /// Never fails: any problem is reported once and yields an empty list.
    pub fn detect(&self, image: &DynamicImage, reporter: &dyn Reporter) -> Vec<ObjectDescriptor> {
        reporter.record(
            "detection_started",
            payload(json!({
                "provider": self.provider.name(),
                "model": self.model,
                "width": image.width(),
                "height": image.height(),
            })),
        );
        match self.try_detect(image, reporter) {
            Ok((strategy, descriptors)) => {
                reporter.record(
                    "detection_finished",
                    payload(json!({
                        "strategy": strategy,
                        "count": descriptors.len(),
                    })),
                );
                descriptors
            }
            Err(err) => {
                reporter.error(&err);
                Vec::new()
            }
        }
    }

    fn try_detect(
        &self,
        image: &DynamicImage,
        reporter: &dyn Reporter,
    ) -> Result<(&'static str, Vec<ObjectDescriptor>), ExtractError> {
        let image_data_uri = image_to_data_uri(image)
            .map_err(|err| ExtractError::VisionRequest(error_chain_text(&err, 512)))?;
        let request = VisionRequest {
            model: self.model.clone(),
            instruction: DETECTION_INSTRUCTION.to_string(),
            image_data_uri,
            max_output_tokens: self.max_output_tokens,
        };
        let text = self
            .provider
            .complete(&request)
            .map_err(|err| ExtractError::VisionRequest(error_chain_text(&err, 1024)))?;
        let (strategy, items) = parse_detection_response(&text)?;
        Ok((strategy, descriptors_from_items(&items, reporter)))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use anyhow::bail;
    use extractor_contracts::ObjectDescriptor;
    use serde_json::json;

    use super::{
        first_array_value, locate_object_array, objects_key, parse_detection_response,
        top_level_array, ObjectDetector, DETECTION_INSTRUCTION,
    };
    use crate::codec::tests::sample_image;
    use crate::error::ExtractError;
    use crate::providers::{VisionProvider, VisionRequest};
    use crate::report::MemoryReporter;

    struct ScriptedVision {
        reply: anyhow::Result<String>,
        seen: Mutex<Vec<VisionRequest>>,
    }

    impl ScriptedVision {
        fn replying(text: &str) -> Self {
            Self {
                reply: Ok(text.to_string()),
                seen: Mutex::new(Vec::new()),
            }
        }

        fn failing(message: &str) -> Self {
            Self {
                reply: Err(anyhow::anyhow!(message.to_string())),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    impl VisionProvider for ScriptedVision {
        fn name(&self) -> &str {
            "scripted"
        }

        fn complete(&self, request: &VisionRequest) -> anyhow::Result<String> {
            self.seen.lock().expect("seen lock").push(request.clone());
            match &self.reply {
                Ok(text) => Ok(text.clone()),
                Err(err) => bail!("{err}"),
            }
        }
    }

    fn detect_with(text: &str) -> (Vec<ObjectDescriptor>, MemoryReporter) {
        let vision = ScriptedVision::replying(text);
        let reporter = MemoryReporter::new();
        let found = ObjectDetector::new(&vision, "gpt-4o").detect(&sample_image(), &reporter);
        (found, reporter)
    }

    fn tree_items() -> serde_json::Value {
        json!([
            {"object_ja": "木", "object_en": "tree", "position_ja": "上", "position_en": "upper"},
            {"object_ja": "木", "object_en": "tree", "position_ja": "下", "position_en": "lower"},
        ])
    }

    fn trees() -> Vec<ObjectDescriptor> {
        vec![
            ObjectDescriptor::new("木", "tree", "上", "upper"),
            ObjectDescriptor::new("木", "tree", "下", "lower"),
        ]
    }

    #[test]
    fn objects_key_maps_field_for_field_in_order() {
        let (found, reporter) = detect_with(&json!({"objects": tree_items()}).to_string());
        assert_eq!(found, trees());
        assert!(reporter.errors().is_empty());
        assert!(reporter.warnings().is_empty());
    }

    #[test]
    fn top_level_array_is_accepted_unchanged() {
        let (found, reporter) = detect_with(&tree_items().to_string());
        assert_eq!(found, trees());
        assert!(reporter.errors().is_empty());
    }

    #[test]
    fn first_array_value_is_used_as_fallback() {
        let text = json!({
            "note": "two trees",
            "items": tree_items(),
            "other": [{"object_en": "sky", "position_en": "top"}],
        })
        .to_string();
        let (found, _) = detect_with(&text);
        assert_eq!(found, trees());
    }

    #[test]
    fn fallback_respects_document_order() {
        let text = r#"{"zeta": [{"object_en": "cat", "position_en": "left"}], "alpha": [{"object_en": "dog", "position_en": "right"}]}"#;
        let (found, _) = detect_with(text);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].label_canonical, "cat");
    }

    #[test]
    fn strategies_are_individually_addressable() {
        let keyed = json!({"objects": [1], "other": [2]});
        assert_eq!(objects_key(&keyed), Some(&vec![json!(1)]));
        assert_eq!(top_level_array(&keyed), None);
        assert_eq!(first_array_value(&keyed), Some(&vec![json!(1)]));

        let non_array_objects = json!({"objects": "none", "found": [3]});
        assert_eq!(objects_key(&non_array_objects), None);
        assert_eq!(
            locate_object_array(&non_array_objects),
            Some(("first_array_value", &vec![json!(3)]))
        );
        assert_eq!(locate_object_array(&json!([4])).map(|(name, _)| name), Some("top_level_array"));
    }

    #[test]
    fn malformed_json_reports_exactly_one_error() {
        let (found, reporter) = detect_with("{\"objects\": [");
        assert!(found.is_empty());
        let errors = reporter.errors();
        assert_eq!(errors.len(), 1);
        assert!(matches!(errors[0], ExtractError::DetectionParse(_)));
    }

    #[test]
    fn json_without_arrays_reports_one_error() {
        let (found, reporter) = detect_with(r#"{"objects": "none"}"#);
        assert!(found.is_empty());
        assert_eq!(reporter.errors().len(), 1);
    }

    #[test]
    fn empty_objects_array_is_a_valid_empty_result() {
        let (found, reporter) = detect_with(r#"{"objects": []}"#);
        assert!(found.is_empty());
        assert!(reporter.errors().is_empty());
        assert!(reporter.record_types().contains(&"detection_finished".to_string()));
    }

    #[test]
    fn code_fenced_json_is_accepted() {
        let text = format!("```json\n{}\n```", json!({"objects": tree_items()}));
        let (found, reporter) = detect_with(&text);
        assert_eq!(found, trees());
        assert!(reporter.errors().is_empty());
    }

    #[test]
    fn invalid_and_duplicate_items_are_skipped_with_warnings() {
        let text = json!({"objects": [
            {"object_ja": "木", "object_en": "tree", "position_ja": "上", "position_en": "upper"},
            {"object_ja": "空", "object_en": "", "position_ja": "上", "position_en": "top"},
            "just text",
            {"object_ja": "木", "object_en": "tree", "position_ja": "上", "position_en": "upper"},
        ]})
        .to_string();
        let (found, reporter) = detect_with(&text);
        assert_eq!(found, vec![ObjectDescriptor::new("木", "tree", "上", "upper")]);
        assert_eq!(reporter.warnings().len(), 3);
        assert!(reporter.errors().is_empty());
    }

    #[test]
    fn generic_keys_fill_both_locales() {
        let (found, _) = detect_with(r#"{"objects": [{"object": "lamp", "position": "left"}]}"#);
        assert_eq!(found, vec![ObjectDescriptor::new("lamp", "lamp", "left", "left")]);
    }

    #[test]
    fn transport_failure_degrades_to_empty_list() {
        let vision = ScriptedVision::failing("OpenAI chat request failed (500): upstream");
        let reporter = MemoryReporter::new();
        let found = ObjectDetector::new(&vision, "gpt-4o").detect(&sample_image(), &reporter);
        assert!(found.is_empty());
        let errors = reporter.errors();
        assert_eq!(errors.len(), 1);
        assert!(matches!(errors[0], ExtractError::VisionRequest(_)));
    }

    #[test]
    fn request_carries_instruction_image_and_token_cap() {
        let vision = ScriptedVision::replying(r#"{"objects": []}"#);
        let reporter = MemoryReporter::new();
        ObjectDetector::new(&vision, "gpt-4o")
            .with_max_output_tokens(500)
            .detect(&sample_image(), &reporter);
        let seen = vision.seen.lock().expect("seen lock");
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].instruction, DETECTION_INSTRUCTION);
        assert!(seen[0].image_data_uri.starts_with("data:image/png;base64,"));
        assert_eq!(seen[0].max_output_tokens, 500);
        assert_eq!(seen[0].model, "gpt-4o");
    }

    #[test]
    fn empty_text_is_a_parse_error() {
        assert!(matches!(
            parse_detection_response("   "),
            Err(ExtractError::DetectionParse(_))
        ));
    }
}
