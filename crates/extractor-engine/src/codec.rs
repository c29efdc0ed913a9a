//! Conversions between in-memory images, base64 text, `data:` URIs and
//! hosted URLs.

use std::borrow::Cow;
use std::io::Cursor;

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use extractor_contracts::GeneratedImageReference;
use image::{DynamicImage, ImageFormat};
use reqwest::blocking::Client as HttpClient;

use crate::error::{truncate_text, ExtractError};
use crate::report::Reporter;

pub const PNG_DATA_URI_PREFIX: &str = "data:image/png;base64,";

/// Serializes `image` as PNG into a fresh buffer.
///
/// Float images are widened to 16-bit RGBA first since PNG has no float
/// sample type.
pub fn encode_png(image: &DynamicImage) -> Result<Vec<u8>> {
    let encodable: Cow<'_, DynamicImage> = match image {
        DynamicImage::ImageRgb32F(_) | DynamicImage::ImageRgba32F(_) => {
            Cow::Owned(DynamicImage::ImageRgba16(image.to_rgba16()))
        }
        _ => Cow::Borrowed(image),
    };
    let mut bytes = Vec::new();
    encodable
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .context("PNG encoding failed")?;
    Ok(bytes)
}

pub fn encode_to_base64(image: &DynamicImage) -> Result<String> {
    Ok(BASE64.encode(encode_png(image)?))
}

pub fn to_data_uri(base64_payload: &str) -> String {
    format!("{PNG_DATA_URI_PREFIX}{base64_payload}")
}

pub fn image_to_data_uri(image: &DynamicImage) -> Result<String> {
    Ok(to_data_uri(&encode_to_base64(image)?))
}

/// Decodes the payload after the first comma of a `data:` URI.
pub fn decode_data_uri(data_uri: &str) -> Result<Vec<u8>, ExtractError> {
    let Some((_, encoded)) = data_uri.split_once(',') else {
        return Err(ExtractError::Fetch(
            "data URI has no ',' separating header and payload".to_string(),
        ));
    };
    BASE64
        .decode(encoded.trim().as_bytes())
        .map_err(|err| ExtractError::Fetch(format!("invalid base64 payload in data URI: {err}")))
}

/// Bytes behind a reference string: decoded locally for `data:` URIs,
/// downloaded for anything else.
pub fn fetch_bytes(http: &HttpClient, reference: &str) -> Result<Vec<u8>, ExtractError> {
    if reference.trim_start().starts_with("data:") {
        return decode_data_uri(reference.trim());
    }
    download(http, reference.trim())
}

/// Like [`fetch_bytes`], but failures are reported and come back as `None`
/// so callers can skip the item.
pub fn fetch_bytes_reported(
    http: &HttpClient,
    reference: &str,
    reporter: &dyn Reporter,
) -> Option<Vec<u8>> {
    match fetch_bytes(http, reference) {
        Ok(bytes) => Some(bytes),
        Err(err) => {
            reporter.error(&err);
            None
        }
    }
}

pub trait Materialize {
    fn materialize(&self, http: &HttpClient) -> Result<Vec<u8>, ExtractError>;
}

impl Materialize for GeneratedImageReference {
    fn materialize(&self, http: &HttpClient) -> Result<Vec<u8>, ExtractError> {
        match self {
            GeneratedImageReference::InlinePayload(data_uri) => decode_data_uri(data_uri),
            GeneratedImageReference::Url(url) => download(http, url),
        }
    }
}

fn download(http: &HttpClient, url: &str) -> Result<Vec<u8>, ExtractError> {
    let response = http
        .get(url)
        .send()
        .map_err(|err| ExtractError::Fetch(format!("request to {url} failed: {err}")))?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().unwrap_or_default();
        return Err(ExtractError::Fetch(format!(
            "{url} returned {}: {}",
            status.as_u16(),
            truncate_text(&body, 512)
        )));
    }
    let bytes = response
        .bytes()
        .map_err(|err| ExtractError::Fetch(format!("failed reading body from {url}: {err}")))?;
    Ok(bytes.to_vec())
}

#[cfg(test)]
pub(crate) mod tests {
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread;

    use extractor_contracts::GeneratedImageReference;
    use image::{DynamicImage, Rgba, RgbaImage};
    use reqwest::blocking::Client as HttpClient;

    use super::{
        decode_data_uri, encode_png, encode_to_base64, fetch_bytes, fetch_bytes_reported,
        image_to_data_uri, to_data_uri, Materialize,
    };
    use crate::error::ExtractError;
    use crate::report::MemoryReporter;

    pub(crate) fn sample_image() -> DynamicImage {
        let mut image = RgbaImage::new(4, 3);
        for (x, y, pixel) in image.enumerate_pixels_mut() {
            *pixel = Rgba([(x * 60) as u8, (y * 80) as u8, 200, if x == 0 { 0 } else { 255 }]);
        }
        DynamicImage::ImageRgba8(image)
    }

    /// Serves one canned HTTP response on a random local port.
    pub(crate) fn serve_once(status_line: &'static str, body: Vec<u8>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind test listener");
        let addr = listener.local_addr().expect("listener addr");
        thread::spawn(move || {
            if let Ok((mut stream, _)) = listener.accept() {
                let mut buf = [0_u8; 4096];
                let _ = stream.read(&mut buf);
                let head = format!(
                    "HTTP/1.1 {status_line}\r\nContent-Length: {}\r\nContent-Type: image/png\r\nConnection: close\r\n\r\n",
                    body.len()
                );
                let _ = stream.write_all(head.as_bytes());
                let _ = stream.write_all(&body);
                let _ = stream.flush();
            }
        });
        format!("http://{addr}/image.png")
    }

    #[test]
    fn data_uri_round_trip_is_pixel_identical() -> anyhow::Result<()> {
        let image = sample_image();
        let data_uri = to_data_uri(&encode_to_base64(&image)?);
        assert!(data_uri.starts_with("data:image/png;base64,"));

        let bytes = fetch_bytes(&HttpClient::new(), &data_uri)?;
        let decoded = image::load_from_memory(&bytes)?;
        assert_eq!(decoded.to_rgba8(), image.to_rgba8());
        Ok(())
    }

    #[test]
    fn encode_png_uses_fresh_buffers() -> anyhow::Result<()> {
        let image = sample_image();
        let first = encode_png(&image)?;
        let second = encode_png(&image)?;
        assert_eq!(first, second);
        assert_eq!(&first[..8], b"\x89PNG\r\n\x1a\n");
        Ok(())
    }

    #[test]
    fn float_images_still_encode() -> anyhow::Result<()> {
        let image = DynamicImage::ImageRgba32F(sample_image().to_rgba32f());
        let bytes = encode_png(&image)?;
        let decoded = image::load_from_memory(&bytes)?;
        assert_eq!(decoded.width(), 4);
        Ok(())
    }

    #[test]
    fn decode_splits_on_first_comma_only() {
        assert_eq!(decode_data_uri("data:text/plain;base64,aGk="), Ok(b"hi".to_vec()));
        assert!(matches!(
            decode_data_uri("data:image/png;base64"),
            Err(ExtractError::Fetch(_))
        ));
        assert!(matches!(
            decode_data_uri("data:image/png;base64,not,base64"),
            Err(ExtractError::Fetch(_))
        ));
    }

    #[test]
    fn reported_fetch_returns_none_and_one_error() {
        let reporter = MemoryReporter::new();
        let bytes = fetch_bytes_reported(&HttpClient::new(), "data:image/png;base64,%%%", &reporter);
        assert!(bytes.is_none());
        assert_eq!(reporter.errors().len(), 1);
    }

    #[test]
    fn url_fetch_returns_body_on_success() -> anyhow::Result<()> {
        let url = serve_once("200 OK", b"png-bytes".to_vec());
        let bytes = fetch_bytes(&HttpClient::new(), &url)?;
        assert_eq!(bytes, b"png-bytes".to_vec());
        Ok(())
    }

    #[test]
    fn url_fetch_fails_on_error_status() {
        let url = serve_once("404 Not Found", b"missing".to_vec());
        let reporter = MemoryReporter::new();
        let bytes = fetch_bytes_reported(&HttpClient::new(), &url, &reporter);
        assert!(bytes.is_none());
        let errors = reporter.errors();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].to_string().contains("returned 404: missing"));
    }

    #[test]
    fn materialize_handles_both_reference_kinds() -> anyhow::Result<()> {
        let http = HttpClient::new();
        let inline = GeneratedImageReference::InlinePayload(image_to_data_uri(&sample_image())?);
        assert!(image::load_from_memory(&inline.materialize(&http)?).is_ok());

        let url = serve_once("200 OK", b"hosted".to_vec());
        let hosted = GeneratedImageReference::Url(url);
        assert_eq!(hosted.materialize(&http)?, b"hosted".to_vec());
        Ok(())
    }
}
