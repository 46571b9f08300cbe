use super::{codec, stats::PixelStats};
use image::DynamicImage;
use serde::Serialize;
use serde_with::skip_serializing_none;

pub const MIN_WIDTH: u32 = 800;
pub const MIN_HEIGHT: u32 = 600;
pub const MIN_ASPECT_RATIO: f64 = 0.8;
pub const MAX_ASPECT_RATIO: f64 = 1.5;
pub const MIN_BRIGHTNESS: f64 = 50.0;
pub const MAX_BRIGHTNESS: f64 = 200.0;
pub const MIN_CONTRAST: f64 = 30.0;
pub const MAX_SATURATION: f64 = 150.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    InvalidImage,
    ResolutionTooLow,
    UnusualAspectRatio,
    PoorLighting,
    TooBlurry,
    OverSaturated,
}

impl RejectReason {
    pub fn message(&self) -> &'static str {
        match self {
            RejectReason::InvalidImage => "Invalid image file",
            RejectReason::ResolutionTooLow => "Image resolution too low (minimum 800x600)",
            RejectReason::UnusualAspectRatio => "Image has an unusual aspect ratio",
            RejectReason::PoorLighting => "Image has poor lighting (too dark or too bright)",
            RejectReason::TooBlurry => "Image appears too blurry (insufficient contrast)",
            RejectReason::OverSaturated => "Image is over-saturated",
        }
    }
}

#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GateVerdict {
    pub is_valid: bool,
    pub reason: Option<String>,
    pub code: Option<RejectReason>,
}

impl GateVerdict {
    pub fn accept() -> Self {
        Self {
            is_valid: true,
            reason: None,
            code: None,
        }
    }

    pub fn reject(code: RejectReason) -> Self {
        Self {
            is_valid: false,
            reason: Some(code.message().to_string()),
            code: Some(code),
        }
    }
}

/// Decodes and validates an encoded image. Decode failures are rejections, not errors.
pub fn validate_bytes(bytes: &[u8]) -> GateVerdict {
    match codec::decode(bytes) {
        Ok(image) => validate_image(&image),
        Err(_) => GateVerdict::reject(RejectReason::InvalidImage),
    }
}

/// Runs the checks in order and stops at the first failure. Pixel statistics
/// are only gathered once the dimension checks pass.
pub fn validate_image(image: &DynamicImage) -> GateVerdict {
    let (width, height) = (image.width(), image.height());
    if let Some(code) = check_dimensions(width, height) {
        return GateVerdict::reject(code);
    }
    match check_pixels(&PixelStats::of(image)) {
        Some(code) => GateVerdict::reject(code),
        None => GateVerdict::accept(),
    }
}

fn check_dimensions(width: u32, height: u32) -> Option<RejectReason> {
    if width < MIN_WIDTH || height < MIN_HEIGHT {
        return Some(RejectReason::ResolutionTooLow);
    }
    let aspect = width as f64 / height as f64;
    if !(MIN_ASPECT_RATIO..=MAX_ASPECT_RATIO).contains(&aspect) {
        return Some(RejectReason::UnusualAspectRatio);
    }
    None
}

fn check_pixels(stats: &PixelStats) -> Option<RejectReason> {
    if !(MIN_BRIGHTNESS..=MAX_BRIGHTNESS).contains(&stats.mean_brightness) {
        return Some(RejectReason::PoorLighting);
    }
    if stats.contrast() < MIN_CONTRAST {
        return Some(RejectReason::TooBlurry);
    }
    // Same percentage the scorer reports; it tops out at 100, so this never
    // rejects on its own.
    if stats.mean_saturation * 100.0 > MAX_SATURATION {
        return Some(RejectReason::OverSaturated);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::codec::test_support::{png_bytes, striped};
    use image::{Rgb, RgbImage};

    // Brightness 100/140 around a mean of 120, spread 40 on the warm stripe.
    const WARM: [u8; 3] = [120, 80, 100];
    const LIGHT: [u8; 3] = [140, 140, 140];

    fn good(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(striped(width, height, 16, WARM, LIGHT))
    }

    #[test]
    fn accepts_well_lit_four_by_three() {
        let verdict = validate_image(&good(1024, 768));
        assert_eq!(verdict, GateVerdict::accept());
    }

    #[test]
    fn accepts_from_encoded_bytes() {
        let bytes = png_bytes(&striped(900, 700, 10, WARM, LIGHT));
        assert!(validate_bytes(&bytes).is_valid);
    }

    #[test]
    fn garbage_is_invalid_image() {
        let verdict = validate_bytes(b"not an image");
        assert!(!verdict.is_valid);
        assert_eq!(verdict.code, Some(RejectReason::InvalidImage));
        assert_eq!(verdict.reason.as_deref(), Some("Invalid image file"));
    }

    #[test]
    fn small_images_stop_at_resolution() {
        // Also too dark and flat; only the resolution reason may be reported.
        for (w, h) in [(799, 600), (800, 599), (100, 100)] {
            let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(w, h, Rgb([5, 5, 5])));
            let verdict = validate_image(&image);
            assert!(!verdict.is_valid);
            assert_eq!(verdict.code, Some(RejectReason::ResolutionTooLow), "{w}x{h}");
        }
    }

    #[test]
    fn rejects_panoramas_and_tall_frames() {
        assert_eq!(
            validate_image(&good(1920, 1080)).code,
            Some(RejectReason::UnusualAspectRatio)
        );
        assert_eq!(
            validate_image(&good(800, 1100)).code,
            Some(RejectReason::UnusualAspectRatio)
        );
    }

    #[test]
    fn aspect_bounds_are_inclusive() {
        assert!(validate_image(&good(1200, 800)).is_valid);
        assert!(validate_image(&good(800, 1000)).is_valid);
    }

    #[test]
    fn dark_image_is_poor_lighting() {
        let image = striped(1000, 800, 8, [10, 10, 10], [60, 60, 60]);
        let verdict = validate_image(&DynamicImage::ImageRgb8(image));
        assert_eq!(verdict.code, Some(RejectReason::PoorLighting));
    }

    #[test]
    fn flat_image_is_too_blurry() {
        let image = striped(1000, 800, 8, [120, 120, 120], [130, 130, 130]);
        let verdict = validate_image(&DynamicImage::ImageRgb8(image));
        assert_eq!(verdict.code, Some(RejectReason::TooBlurry));
    }

    #[test]
    fn fully_saturated_image_passes_when_otherwise_in_range() {
        // Brightness ~85 and ~170, saturation 100% on both stripes.
        let image = striped(1000, 800, 8, [255, 0, 0], [255, 255, 0]);
        let stats = PixelStats::compute(&image);
        assert!((stats.mean_saturation * 100.0 - 100.0).abs() < 1e-9);
        let verdict = validate_image(&DynamicImage::ImageRgb8(image));
        assert!(verdict.is_valid, "{verdict:?}");
        assert_eq!(verdict.code, None);
    }
}
