use anyhow::Result;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::{DynamicImage, Rgba, RgbaImage};
use serde_json::json;
use sha2::{Digest, Sha256};

use super::{EditOutput, EditProvider, EditRequest, EditResponse, VisionProvider, VisionRequest};
use crate::codec::encode_png;

/// Offline stand-in for both model roles.
///
/// Detection always answers with the same two objects; edits return a PNG of
/// the requested size whose centre block is coloured from a hash of the
/// prompt and whose border is transparent.
pub struct DryrunProvider;

impl VisionProvider for DryrunProvider {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn complete(&self, _request: &VisionRequest) -> Result<String> {
        Ok(json!({
            "objects": [
                {
                    "object_ja": "被写体",
                    "object_en": "main subject",
                    "position_ja": "中央",
                    "position_en": "center",
                },
                {
                    "object_ja": "背景",
                    "object_en": "background",
                    "position_ja": "全体",
                    "position_en": "entire frame",
                },
            ]
        })
        .to_string())
    }
}

impl EditProvider for DryrunProvider {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn edit(&self, request: &EditRequest) -> Result<EditResponse> {
        let (width, height) = request.size.dims();
        let image = dryrun_cutout(width, height, &request.prompt);
        let png = encode_png(&image)?;
        let outputs = (0..request.n.max(1))
            .map(|_| EditOutput {
                url: None,
                b64_json: Some(BASE64.encode(&png)),
            })
            .collect();
        Ok(EditResponse {
            status_code: Some(200),
            request_id: Some(format!("dryrun-{}", short_id(&request.prompt))),
            outputs,
        })
    }
}

fn dryrun_cutout(width: u32, height: u32, prompt: &str) -> DynamicImage {
    let (r, g, b) = color_from_prompt(prompt);
    let (x0, x1) = (width / 4, width - width / 4);
    let (y0, y1) = (height / 4, height - height / 4);
    let image = RgbaImage::from_fn(width, height, |x, y| {
        if (x0..x1).contains(&x) && (y0..y1).contains(&y) {
            Rgba([r, g, b, 255])
        } else {
            Rgba([0, 0, 0, 0])
        }
    });
    DynamicImage::ImageRgba8(image)
}

fn color_from_prompt(prompt: &str) -> (u8, u8, u8) {
    let digest = Sha256::digest(prompt.as_bytes());
    (digest[0], digest[1], digest[2])
}

fn short_id(prompt: &str) -> String {
    let digest = Sha256::digest(prompt.as_bytes());
    hex::encode(&digest[..4])
}
