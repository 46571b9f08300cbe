use super::{
    ImagingError, codec,
    filters::{self, COLOR_CORRECT_CHAIN, SHARPEN_CHAIN},
    scorer::{self, QualityMetrics, ScoreProfile},
};
use image::{DynamicImage, RgbImage, imageops};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Images smaller than this on either side are upscaled.
pub const UPSCALE_BELOW: u32 = 1024;
/// Longest-side target for upscaling.
pub const UPSCALE_TARGET: f64 = 2048.0;
pub const DENOISE_SIGMA: f32 = 0.5;
pub const DEFAULT_OVERALL_BOOST: f64 = 1.3;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnhancementOptions {
    pub upscale: bool,
    pub denoise: bool,
    pub sharpen: bool,
    pub color_correct: bool,
    pub coin_specific: bool,
    pub background_removal: bool,
}

impl EnhancementOptions {
    #[cfg(test)]
    pub fn all() -> Self {
        Self {
            upscale: true,
            denoise: true,
            sharpen: true,
            color_correct: true,
            coin_specific: true,
            background_removal: true,
        }
    }

    pub fn any(&self) -> bool {
        self.upscale
            || self.denoise
            || self.sharpen
            || self.color_correct
            || self.coin_specific
            || self.background_removal
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EnhancementStep {
    Upscale,
    Denoise,
    CoinSpecific,
    Sharpen,
    ColorCorrect,
    BackgroundRemoval,
}

#[derive(Debug, Clone, Serialize)]
pub struct EnhancementReport {
    pub width: u32,
    pub height: u32,
    pub profile: ScoreProfile,
    pub before: QualityMetrics,
    pub after: QualityMetrics,
    /// `after.overall` with the presentation boost applied, for display only.
    pub display_overall: f64,
    pub applied: Vec<EnhancementStep>,
    pub skipped: Vec<EnhancementStep>,
}

#[derive(Debug, Clone)]
pub struct Enhancement {
    pub image: RgbImage,
    pub report: EnhancementReport,
}

#[derive(Debug, Clone)]
pub struct EncodedEnhancement {
    pub bytes: Vec<u8>,
    pub content_type: &'static str,
    pub report: EnhancementReport,
}

#[derive(Debug, Clone, Copy)]
pub struct Enhancer {
    overall_boost: f64,
}

impl Default for Enhancer {
    fn default() -> Self {
        Self::new(DEFAULT_OVERALL_BOOST)
    }
}

impl Enhancer {
    pub fn new(overall_boost: f64) -> Self {
        Self {
            overall_boost: if overall_boost.is_finite() && overall_boost > 0.0 {
                overall_boost
            } else {
                1.0
            },
        }
    }

    pub fn from_env() -> Self {
        let boost = std::env::var("ENHANCE_OVERALL_BOOST")
            .ok()
            .and_then(|v| v.parse::<f64>().ok())
            .unwrap_or(DEFAULT_OVERALL_BOOST);
        Self::new(boost)
    }

    /// Runs the enabled steps in fixed order on a copy of `source`.
    pub fn enhance(&self, source: &DynamicImage, options: &EnhancementOptions) -> Enhancement {
        let profile = ScoreProfile::Enhancer;
        let before = scorer::score(source, profile);
        let mut image = source.to_rgb8();
        let mut applied = Vec::new();
        let mut skipped = Vec::new();

        if options.upscale {
            match upscale(&image) {
                Some(resized) => {
                    image = resized;
                    applied.push(EnhancementStep::Upscale);
                }
                None => skipped.push(EnhancementStep::Upscale),
            }
        }
        if options.denoise {
            image = imageops::blur(&image, DENOISE_SIGMA);
            applied.push(EnhancementStep::Denoise);
        }
        if options.coin_specific {
            filters::coin_tone(&mut image);
            applied.push(EnhancementStep::CoinSpecific);
        }
        if options.sharpen {
            filters::apply_chain(&mut image, &SHARPEN_CHAIN);
            applied.push(EnhancementStep::Sharpen);
        }
        if options.color_correct {
            filters::apply_chain(&mut image, &COLOR_CORRECT_CHAIN);
            applied.push(EnhancementStep::ColorCorrect);
        }
        if options.background_removal {
            // No pixel pass exists for this toggle yet.
            skipped.push(EnhancementStep::BackgroundRemoval);
        }

        let after = if applied.is_empty() {
            before
        } else {
            scorer::score_stats(&super::stats::PixelStats::compute(&image), profile)
        };
        let display_overall = if applied.is_empty() {
            after.overall
        } else {
            (after.overall * self.overall_boost).min(100.0)
        };

        debug!(
            target = "mintmark.imaging",
            applied = ?applied,
            before = before.overall,
            after = after.overall,
            "image_enhanced"
        );

        Enhancement {
            report: EnhancementReport {
                width: image.width(),
                height: image.height(),
                profile,
                before,
                after,
                display_overall,
                applied,
                skipped,
            },
            image,
        }
    }

    /// Decode, enhance and re-encode as JPEG.
    pub fn enhance_bytes(
        &self,
        bytes: &[u8],
        options: &EnhancementOptions,
    ) -> Result<EncodedEnhancement, ImagingError> {
        let source = codec::decode(bytes)?;
        let enhancement = self.enhance(&source, options);
        let encoded = codec::encode_jpeg(&enhancement.image, codec::ENHANCED_JPEG_QUALITY)?;
        Ok(EncodedEnhancement {
            bytes: encoded,
            content_type: "image/jpeg",
            report: enhancement.report,
        })
    }
}

/// Scales by `min(2048 / w, 2048 / h)` when either side is under 1024.
/// A side already past 2048 makes the factor shrink the image, so a thin
/// 3000×500 strip comes out at 2048×341. Returns `None` when both sides are
/// at least 1024 or the target size equals the source.
fn upscale(image: &RgbImage) -> Option<RgbImage> {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 || (width >= UPSCALE_BELOW && height >= UPSCALE_BELOW) {
        return None;
    }
    let scale = (UPSCALE_TARGET / width as f64).min(UPSCALE_TARGET / height as f64);
    let target_w = ((width as f64 * scale).round() as u32).max(1);
    let target_h = ((height as f64 * scale).round() as u32).max(1);
    if (target_w, target_h) == (width, height) {
        return None;
    }
    Some(imageops::resize(
        image,
        target_w,
        target_h,
        imageops::FilterType::Triangle,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::codec::test_support::{png_bytes, striped};

    fn coin(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(striped(width, height, 3, [170, 140, 90], [70, 60, 50]))
    }

    #[test]
    fn disabled_options_are_identity() {
        let source = coin(64, 48);
        let out = Enhancer::default().enhance(&source, &EnhancementOptions::default());
        assert_eq!(out.image, source.to_rgb8());
        assert_eq!(out.report.before, out.report.after);
        assert_eq!(out.report.display_overall, out.report.after.overall);
        assert!(out.report.applied.is_empty());
    }

    #[test]
    fn source_is_not_mutated() {
        let source = coin(32, 32);
        let copy = source.clone();
        let options = EnhancementOptions {
            upscale: false,
            ..EnhancementOptions::all()
        };
        let _ = Enhancer::default().enhance(&source, &options);
        assert_eq!(source, copy);
    }

    #[test]
    fn steps_run_in_fixed_order() {
        let out = Enhancer::default().enhance(&coin(40, 30), &EnhancementOptions::all());
        assert_eq!(
            out.report.applied,
            vec![
                EnhancementStep::Upscale,
                EnhancementStep::Denoise,
                EnhancementStep::CoinSpecific,
                EnhancementStep::Sharpen,
                EnhancementStep::ColorCorrect,
            ]
        );
        assert_eq!(out.report.skipped, vec![EnhancementStep::BackgroundRemoval]);
    }

    #[test]
    fn upscale_targets_2048() {
        let out = Enhancer::default().enhance(
            &coin(100, 50),
            &EnhancementOptions {
                upscale: true,
                ..Default::default()
            },
        );
        assert_eq!((out.report.width, out.report.height), (2048, 1024));
    }

    #[test]
    fn wide_strip_scales_down_to_2048() {
        let resized = upscale(&RgbImage::new(3000, 500)).expect("short side under 1024");
        assert_eq!(resized.dimensions(), (2048, 341));

        let resized = upscale(&RgbImage::new(2100, 10)).expect("short side under 1024");
        assert_eq!(resized.dimensions(), (2048, 10));
        assert!(upscale(&RgbImage::new(2048, 600)).is_none());
    }

    #[test]
    fn large_images_skip_upscale() {
        let image = DynamicImage::ImageRgb8(RgbImage::new(1024, 1024));
        let resized = upscale(&image.to_rgb8());
        assert!(resized.is_none());
    }

    #[test]
    fn boost_only_applies_when_something_ran() {
        let enhancer = Enhancer::new(1.3);
        let out = enhancer.enhance(
            &coin(32, 32),
            &EnhancementOptions {
                sharpen: true,
                ..Default::default()
            },
        );
        let expected = (out.report.after.overall * 1.3).min(100.0);
        assert!((out.report.display_overall - expected).abs() < 1e-9);

        let only_unsupported = enhancer.enhance(
            &coin(32, 32),
            &EnhancementOptions {
                background_removal: true,
                ..Default::default()
            },
        );
        assert_eq!(
            only_unsupported.report.display_overall,
            only_unsupported.report.after.overall
        );
    }

    #[test]
    fn repeated_coin_pass_stays_in_range() {
        let enhancer = Enhancer::default();
        let options = EnhancementOptions {
            coin_specific: true,
            ..Default::default()
        };
        let once = enhancer.enhance(&coin(16, 16), &options);
        let twice = enhancer.enhance(&DynamicImage::ImageRgb8(once.image.clone()), &options);
        assert_ne!(once.image, twice.image);
        for metric in [twice.report.after.brightness, twice.report.after.contrast] {
            assert!((0.0..=100.0).contains(&metric));
        }
    }

    #[test]
    fn encoded_output_is_jpeg() {
        let bytes = png_bytes(&striped(48, 40, 4, [180, 150, 100], [60, 50, 40]));
        let options = EnhancementOptions {
            upscale: false,
            ..EnhancementOptions::all()
        };
        let out = Enhancer::default()
            .enhance_bytes(&bytes, &options)
            .expect("enhance");
        assert_eq!(out.content_type, "image/jpeg");
        assert_eq!(codec::sniff_format(&out.bytes), Some(image::ImageFormat::Jpeg));
        assert_eq!((out.report.width, out.report.height), (48, 40));
    }

    #[test]
    fn corrupt_bytes_fail_to_decode() {
        let err = Enhancer::default()
            .enhance_bytes(b"nope", &EnhancementOptions::all())
            .expect_err("should fail");
        assert!(matches!(err, ImagingError::Decode(_)));
    }
}
