use super::stats::PixelStats;
use image::DynamicImage;
use serde::{Deserialize, Serialize};

/// Megapixels at which the resolution score saturates.
pub const FULL_RESOLUTION_MP: f64 = 8.0;
/// Edge-density multiplier used by the analyzer's overall score.
pub const ANALYZER_CLARITY_GAIN: f64 = 15.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityMetrics {
    pub resolution: f64,
    pub clarity: f64,
    pub brightness: f64,
    pub contrast: f64,
    pub saturation: f64,
    pub noise: f64,
    pub overall: f64,
}

/// The two historical ways of folding component scores into `overall`.
///
/// They are not interchangeable: the analyzer weights clarity heavily, the
/// enhancer takes a flat mean. Every response names the profile it used.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreProfile {
    #[default]
    Analyzer,
    Enhancer,
}

pub fn score(image: &DynamicImage, profile: ScoreProfile) -> QualityMetrics {
    score_stats(&PixelStats::of(image), profile)
}

pub fn score_stats(stats: &PixelStats, profile: ScoreProfile) -> QualityMetrics {
    let resolution = pct((stats.megapixels() / FULL_RESOLUTION_MP).min(1.0) * 100.0);
    let clarity = pct(stats.edge_ratio * 100.0);
    let brightness = pct(stats.mean_brightness / 255.0 * 100.0);
    let contrast = pct(stats.contrast() / 255.0 * 100.0);
    let saturation = pct(stats.mean_saturation * 100.0);
    let noise = pct(stats.flat_delta / super::stats::EDGE_DELTA * 100.0);
    let exposure = exposure_balance(stats.mean_brightness);

    let overall = match profile {
        ScoreProfile::Analyzer => {
            0.20 * resolution
                + 0.30 * pct(clarity * ANALYZER_CLARITY_GAIN)
                + 0.20 * exposure
                + 0.15 * contrast
                + 0.15 * (100.0 - noise)
        }
        ScoreProfile::Enhancer => (resolution + clarity + contrast + exposure) / 4.0,
    };

    QualityMetrics {
        resolution,
        clarity,
        brightness,
        contrast,
        saturation,
        noise,
        overall: pct(overall),
    }
}

/// 100 at mid-grey, falling linearly to 0 at pure black or white.
fn exposure_balance(mean_brightness: f64) -> f64 {
    pct(100.0 - (mean_brightness - 127.5).abs() / 127.5 * 100.0)
}

fn pct(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 100.0)
    } else {
        0.0
    }
}
