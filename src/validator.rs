use bytes::Bytes;
use image::{codecs::jpeg::JpegEncoder, imageops::FilterType, DynamicImage, ImageFormat, RgbImage};
use tracing::{info, warn};

use crate::{error::ImageError, models::UploadedPhoto};

pub const MIN_DIMENSION: u32 = 100;
pub const MAX_ENCODED_BYTES: usize = 1_000_000;

/// (longest side, JPEG quality) steps tried in order until the payload fits.
const COMPRESSION_LADDER: [(u32, u8); 4] = [(800, 85), (800, 70), (600, 50), (400, 40)];

const ALLOWED_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

/// JPEG payload sent upstream.
#[derive(Debug, Clone)]
pub struct CompressedImage {
    pub jpeg: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub quality: u8,
}

impl CompressedImage {
    pub fn data_uri(&self) -> String {
        use base64::Engine;
        format!("data:image/jpeg;base64,{}", base64::engine::general_purpose::STANDARD.encode(&self.jpeg))
    }
}

pub fn validate_upload(bytes: Bytes, filename: &str) -> Result<UploadedPhoto, ImageError> {
    let ext = filename.rsplit_once('.').map(|(_, e)| e.to_ascii_lowercase()).unwrap_or_default();
    if !ALLOWED_EXTENSIONS.contains(&ext.as_str()) {
        return Err(ImageError::InvalidImage(format!("unsupported file type '{filename}'; use JPG, JPEG or PNG")));
    }

    let format = image::guess_format(&bytes)
        .map_err(|e| ImageError::InvalidImage(format!("unrecognized image data: {e}")))?;
    let mime_type = match format {
        ImageFormat::Jpeg => "image/jpeg",
        ImageFormat::Png => "image/png",
        other => return Err(ImageError::InvalidImage(format!("unsupported encoding {other:?}"))),
    };

    let decoded = image::load_from_memory_with_format(&bytes, format)
        .map_err(|e| ImageError::InvalidImage(format!("image may be corrupt or truncated: {e}")))?;
    let image = decoded.to_rgb8();
    let (width, height) = image.dimensions();
    if width < MIN_DIMENSION || height < MIN_DIMENSION {
        return Err(ImageError::InvalidImage(format!(
            "image is too small ({width}x{height}); minimum is {MIN_DIMENSION}x{MIN_DIMENSION}"
        )));
    }

    info!(filename, width, height, mime_type, size = bytes.len(), "Validated upload");
    Ok(UploadedPhoto { size: bytes.len(), mime_type, filename: filename.to_string(), width, height, image })
}

/// Shrinks and re-encodes the photo to fit upstream request limits.
pub fn compress_for_upload(image: &RgbImage) -> Result<CompressedImage, ImageError> {
    let source = DynamicImage::ImageRgb8(image.clone());
    let mut last = None;
    for (max_side, quality) in COMPRESSION_LADDER {
        let resized = fit_within(&source, max_side);
        let (width, height) = (resized.width(), resized.height());
        let mut jpeg = Vec::new();
        JpegEncoder::new_with_quality(&mut jpeg, quality)
            .encode_image(&resized)
            .map_err(|e| ImageError::InvalidImage(format!("re-encode failed: {e}")))?;
        info!(max_side, quality, kb = jpeg.len() / 1024, "Compressed image");
        let done = jpeg.len() <= MAX_ENCODED_BYTES;
        last = Some(CompressedImage { jpeg, width, height, quality });
        if done {
            break;
        }
        warn!("Image still too large, compressing further");
    }
    last.ok_or_else(|| ImageError::InvalidImage("nothing to compress".into()))
}

fn fit_within(image: &DynamicImage, max_side: u32) -> RgbImage {
    if image.width().max(image.height()) <= max_side {
        return image.to_rgb8();
    }
    image.resize(max_side, max_side, FilterType::Lanczos3).to_rgb8()
}
