//! Sole photo normalization
//!
//! Turns a captured/uploaded data URI into a bounded-size JPEG ready for
//! upload. Checks run cheapest first: MIME type, payload size, then decode.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView};
use thiserror::Error;
use tracing::debug;

use reboot_common::config::ImageConfig;

/// Content type of every normalized image
pub const NORMALIZED_CONTENT_TYPE: &str = "image/jpeg";

/// Photo rejected during normalization
#[derive(Debug, Error)]
pub enum ImageError {
    #[error("Image could not be decoded: {0}")]
    Decode(String),

    #[error("Unsupported type: {0} is not an image")]
    UnsupportedType(String),

    #[error("Image payload of {size} bytes exceeds the {limit} byte limit")]
    Oversize { size: usize, limit: usize },

    #[error("Image could not be re-encoded: {0}")]
    Encode(String),
}

/// Normalization bounds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NormalizeOptions {
    pub max_width: u32,
    pub max_height: u32,
    /// JPEG quality, 1-100
    pub quality: u8,
    /// Ceiling on the decoded payload, in bytes
    pub max_bytes: usize,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self::from(&ImageConfig::default())
    }
}

impl From<&ImageConfig> for NormalizeOptions {
    fn from(config: &ImageConfig) -> Self {
        Self {
            max_width: config.max_width,
            max_height: config.max_height,
            quality: config.quality.clamp(1, 100),
            max_bytes: config.max_bytes,
        }
    }
}

/// Re-encoded photo
#[derive(Debug, Clone)]
pub struct NormalizedImage {
    pub bytes: Vec<u8>,
    pub content_type: &'static str,
    pub width: u32,
    pub height: u32,
}

impl NormalizedImage {
    pub fn to_data_uri(&self) -> String {
        format!("data:{};base64,{}", self.content_type, BASE64.encode(&self.bytes))
    }
}

/// Split a `data:<mime>;base64,<payload>` URI
///
/// Returns the MIME type and the still-encoded payload.
fn split_data_uri(data_uri: &str) -> Result<(String, &str), ImageError> {
    let rest = data_uri
        .trim()
        .strip_prefix("data:")
        .ok_or_else(|| ImageError::Decode("not a data URI".to_string()))?;

    let (header, payload) = rest
        .split_once(',')
        .ok_or_else(|| ImageError::Decode("data URI has no payload".to_string()))?;

    let mut parts = header.split(';');
    let mime = parts.next().unwrap_or_default().trim().to_ascii_lowercase();
    let is_base64 = parts.any(|p| p.trim().eq_ignore_ascii_case("base64"));

    if !mime.starts_with("image/") {
        let shown = if mime.is_empty() { "(none)".to_string() } else { mime };
        return Err(ImageError::UnsupportedType(shown));
    }
    if !is_base64 {
        return Err(ImageError::Decode("data URI is not base64 encoded".to_string()));
    }

    Ok((mime, payload))
}

/// Decode a data URI to raw bytes, enforcing the type and size limits
pub fn decode_data_uri(data_uri: &str, max_bytes: usize) -> Result<(String, Vec<u8>), ImageError> {
    let (mime, payload) = split_data_uri(data_uri)?;

    // Upper bound of the decoded length; rejects huge inputs before allocating
    let estimated = payload.len() / 4 * 3;
    if estimated > max_bytes.saturating_add(3) {
        return Err(ImageError::Oversize {
            size: estimated,
            limit: max_bytes,
        });
    }

    let bytes = BASE64
        .decode(payload.trim())
        .map_err(|e| ImageError::Decode(format!("invalid base64: {}", e)))?;

    if bytes.len() > max_bytes {
        return Err(ImageError::Oversize {
            size: bytes.len(),
            limit: max_bytes,
        });
    }

    Ok((mime, bytes))
}

/// Decodes, bounds and re-encodes sole photos
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageNormalizer {
    options: NormalizeOptions,
}

impl ImageNormalizer {
    pub fn new(options: NormalizeOptions) -> Self {
        Self { options }
    }

    /// Normalize a data URI into a JPEG no larger than the configured bounds
    pub fn normalize(&self, data_uri: &str) -> Result<NormalizedImage, ImageError> {
        let (mime, bytes) = decode_data_uri(data_uri, self.options.max_bytes)?;

        let decoded =
            image::load_from_memory(&bytes).map_err(|e| ImageError::Decode(e.to_string()))?;
        let (src_width, src_height) = decoded.dimensions();

        let bounded = self.fit_within_bounds(decoded);
        let (width, height) = bounded.dimensions();

        // JPEG has no alpha channel
        let rgb = DynamicImage::ImageRgb8(bounded.to_rgb8());
        let mut out = Vec::new();
        rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut out, self.options.quality))
            .map_err(|e| ImageError::Encode(e.to_string()))?;

        debug!(
            source_type = %mime,
            src_width,
            src_height,
            width,
            height,
            source_bytes = bytes.len(),
            output_bytes = out.len(),
            "Normalized sole photo"
        );

        Ok(NormalizedImage {
            bytes: out,
            content_type: NORMALIZED_CONTENT_TYPE,
            width,
            height,
        })
    }

    fn fit_within_bounds(&self, image: DynamicImage) -> DynamicImage {
        let (width, height) = image.dimensions();
        if width <= self.options.max_width && height <= self.options.max_height {
            return image;
        }
        // resize() keeps the aspect ratio and fits inside the box
        image.resize(self.options.max_width, self.options.max_height, FilterType::Triangle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, RgbImage};
    use std::io::Cursor;

    fn png_data_uri(width: u32, height: u32) -> String {
        let img = RgbImage::from_fn(width, height, |x, y| {
            image::Rgb([(x % 256) as u8, (y % 256) as u8, 128])
        });
        let mut bytes = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img)
            .write_to(&mut bytes, ImageFormat::Png)
            .unwrap();
        format!("data:image/png;base64,{}", BASE64.encode(bytes.into_inner()))
    }

    #[test]
    fn test_square_image_scaled_to_bounds() {
        let normalizer = ImageNormalizer::default();
        let out = normalizer.normalize(&png_data_uri(2000, 2000)).unwrap();

        assert_eq!((out.width, out.height), (800, 800));
        assert_eq!(out.content_type, "image/jpeg");
    }

    #[test]
    fn test_aspect_ratio_preserved() {
        let normalizer = ImageNormalizer::default();
        let out = normalizer.normalize(&png_data_uri(2000, 1000)).unwrap();

        assert_eq!((out.width, out.height), (800, 400));
    }

    #[test]
    fn test_small_image_not_upscaled() {
        let normalizer = ImageNormalizer::default();
        let out = normalizer.normalize(&png_data_uri(320, 240)).unwrap();

        assert_eq!((out.width, out.height), (320, 240));
    }

    #[test]
    fn test_output_decodes_as_jpeg() {
        let normalizer = ImageNormalizer::default();
        let out = normalizer.normalize(&png_data_uri(64, 32)).unwrap();

        let format = image::guess_format(&out.bytes).unwrap();
        assert_eq!(format, ImageFormat::Jpeg);
        assert!(out.to_data_uri().starts_with("data:image/jpeg;base64,"));
    }

    #[test]
    fn test_non_image_mime_rejected() {
        let normalizer = ImageNormalizer::default();
        let result = normalizer.normalize("data:text/plain;base64,aGVsbG8=");

        assert!(matches!(result, Err(ImageError::UnsupportedType(t)) if t == "text/plain"));
    }

    #[test]
    fn test_garbage_payload_is_decode_error() {
        let normalizer = ImageNormalizer::default();

        let not_base64 = normalizer.normalize("data:image/png;base64,@@@@");
        assert!(matches!(not_base64, Err(ImageError::Decode(_))));

        let not_an_image = normalizer.normalize("data:image/png;base64,aGVsbG8gd29ybGQ=");
        assert!(matches!(not_an_image, Err(ImageError::Decode(_))));

        let not_a_uri = normalizer.normalize("hello");
        assert!(matches!(not_a_uri, Err(ImageError::Decode(_))));
    }

    #[test]
    fn test_oversize_payload_rejected() {
        let normalizer = ImageNormalizer::new(NormalizeOptions {
            max_bytes: 1024,
            ..NormalizeOptions::default()
        });
        let payload = BASE64.encode(vec![0u8; 4096]);
        let result = normalizer.normalize(&format!("data:image/jpeg;base64,{}", payload));

        assert!(matches!(result, Err(ImageError::Oversize { limit: 1024, .. })));
    }
}
