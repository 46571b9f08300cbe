use super::ImagingError;
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use image::{DynamicImage, ImageFormat, RgbImage, codecs::jpeg::JpegEncoder};

pub const ENHANCED_JPEG_QUALITY: u8 = 92;

pub fn decode(bytes: &[u8]) -> Result<DynamicImage, ImagingError> {
    if bytes.is_empty() {
        return Err(ImagingError::Decode("empty buffer".into()));
    }
    image::load_from_memory(bytes).map_err(|err| ImagingError::Decode(err.to_string()))
}

/// Accepts either raw base64 or a `data:<mime>;base64,<payload>` URL, which is
/// what browser canvases hand over.
pub fn decode_base64(payload: &str) -> Result<Vec<u8>, ImagingError> {
    let trimmed = payload.trim();
    let body = match trimmed.split_once(',') {
        Some((header, rest)) if header.starts_with("data:") => rest,
        _ => trimmed,
    };
    BASE64
        .decode(body.as_bytes())
        .map_err(|err| ImagingError::Decode(format!("invalid base64: {err}")))
}

pub fn encode_base64(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}

pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>, ImagingError> {
    let mut out = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut out, quality);
    encoder
        .encode_image(image)
        .map_err(|err| ImagingError::Encode(err.to_string()))?;
    Ok(out)
}

pub fn sniff_format(bytes: &[u8]) -> Option<ImageFormat> {
    image::guess_format(bytes).ok()
}

pub fn extension_for(format: Option<ImageFormat>) -> &'static str {
    match format {
        Some(ImageFormat::Png) => "png",
        Some(ImageFormat::WebP) => "webp",
        Some(ImageFormat::Gif) => "gif",
        Some(ImageFormat::Tiff) => "tiff",
        Some(ImageFormat::Bmp) => "bmp",
        _ => "jpg",
    }
}

pub fn content_type_for(format: Option<ImageFormat>) -> &'static str {
    match format {
        Some(ImageFormat::Png) => "image/png",
        Some(ImageFormat::WebP) => "image/webp",
        Some(ImageFormat::Gif) => "image/gif",
        Some(ImageFormat::Tiff) => "image/tiff",
        Some(ImageFormat::Bmp) => "image/bmp",
        Some(ImageFormat::Jpeg) => "image/jpeg",
        _ => "application/octet-stream",
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn decode_rejects_garbage() {
        assert!(decode(b"definitely not an image").is_err());
        assert!(decode(&[]).is_err());
    }

    #[test]
    fn base64_accepts_data_urls() {
        let raw = encode_base64(b"coin");
        assert_eq!(decode_base64(&raw).unwrap(), b"coin");
        let url = format!("data:image/png;base64,{raw}");
        assert_eq!(decode_base64(&url).unwrap(), b"coin");
        assert!(decode_base64("%%%").is_err());
    }

    #[test]
    fn png_is_sniffed() {
        let bytes = png_bytes(&striped(8, 8, 2, [0, 0, 0], [255, 255, 255]));
        let format = sniff_format(&bytes);
        assert_eq!(format, Some(ImageFormat::Png));
        assert_eq!(extension_for(format), "png");
        assert_eq!(content_type_for(format), "image/png");
    }

    #[test]
    fn jpeg_output_decodes() {
        let image = striped(32, 24, 4, [200, 150, 90], [40, 40, 40]);
        let bytes = encode_jpeg(&image, ENHANCED_JPEG_QUALITY).expect("encode");
        let decoded = decode(&bytes).expect("decode");
        assert_eq!((decoded.width(), decoded.height()), (32, 24));
        assert_eq!(sniff_format(&bytes), Some(ImageFormat::Jpeg));
    }
}
