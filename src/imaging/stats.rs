use image::{DynamicImage, RgbImage};
use serde::Serialize;

/// Brightness delta between successive pixels that counts as an edge.
pub const EDGE_DELTA: f64 = 20.0;

/// Raw statistics gathered in one linear pass over an image's pixels.
///
/// Brightness values use the 0–255 scale, saturation is the HSV-style
/// `(max − min) / max` ratio in 0–1 and `mean_spread` is the plain
/// `max − min` channel spread on the 0–255 scale.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PixelStats {
    pub width: u32,
    pub height: u32,
    pub pixel_count: u64,
    pub mean_brightness: f64,
    pub min_brightness: f64,
    pub max_brightness: f64,
    pub mean_saturation: f64,
    pub mean_spread: f64,
    pub edge_ratio: f64,
    /// Mean absolute brightness step between successive pixels that are not edges.
    pub flat_delta: f64,
}

impl PixelStats {
    pub fn of(image: &DynamicImage) -> Self {
        match image {
            DynamicImage::ImageRgb8(buffer) => Self::compute(buffer),
            other => Self::compute(&other.to_rgb8()),
        }
    }

    pub fn compute(image: &RgbImage) -> Self {
        let (width, height) = image.dimensions();
        let mut count: u64 = 0;
        let mut brightness_sum = 0.0;
        let mut saturation_sum = 0.0;
        let mut spread_sum = 0.0;
        let mut min_brightness = f64::MAX;
        let mut max_brightness = f64::MIN;
        let mut edges: u64 = 0;
        let mut flat_pairs: u64 = 0;
        let mut flat_sum = 0.0;
        let mut previous: Option<f64> = None;

        for pixel in image.pixels() {
            let [r, g, b] = pixel.0;
            let brightness = (r as f64 + g as f64 + b as f64) / 3.0;
            let hi = r.max(g).max(b) as f64;
            let lo = r.min(g).min(b) as f64;

            brightness_sum += brightness;
            spread_sum += hi - lo;
            if hi > 0.0 {
                saturation_sum += (hi - lo) / hi;
            }
            min_brightness = min_brightness.min(brightness);
            max_brightness = max_brightness.max(brightness);

            if let Some(prev) = previous {
                let delta = (brightness - prev).abs();
                if delta > EDGE_DELTA {
                    edges += 1;
                } else {
                    flat_pairs += 1;
                    flat_sum += delta;
                }
            }
            previous = Some(brightness);
            count += 1;
        }

        if count == 0 {
            return Self {
                width,
                height,
                pixel_count: 0,
                mean_brightness: 0.0,
                min_brightness: 0.0,
                max_brightness: 0.0,
                mean_saturation: 0.0,
                mean_spread: 0.0,
                edge_ratio: 0.0,
                flat_delta: 0.0,
            };
        }

        let n = count as f64;
        let pairs = (count - 1) as f64;
        Self {
            width,
            height,
            pixel_count: count,
            mean_brightness: brightness_sum / n,
            min_brightness,
            max_brightness,
            mean_saturation: saturation_sum / n,
            mean_spread: spread_sum / n,
            edge_ratio: if pairs > 0.0 { edges as f64 / pairs } else { 0.0 },
            flat_delta: if flat_pairs > 0 {
                flat_sum / flat_pairs as f64
            } else {
                0.0
            },
        }
    }

    /// Brightness range, the contrast measure used by the quality gate.
    pub fn contrast(&self) -> f64 {
        self.max_brightness - self.min_brightness
    }

    pub fn megapixels(&self) -> f64 {
        (self.width as f64 * self.height as f64) / 1_000_000.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::codec::test_support::striped;
    use image::{Rgb, RgbImage};

    #[test]
    fn flat_grey_has_no_edges_or_spread() {
        let image = RgbImage::from_pixel(10, 10, Rgb([90, 90, 90]));
        let stats = PixelStats::compute(&image);
        assert_eq!(stats.pixel_count, 100);
        assert_eq!(stats.mean_brightness, 90.0);
        assert_eq!(stats.contrast(), 0.0);
        assert_eq!(stats.mean_saturation, 0.0);
        assert_eq!(stats.mean_spread, 0.0);
        assert_eq!(stats.edge_ratio, 0.0);
        assert_eq!(stats.flat_delta, 0.0);
    }

    #[test]
    fn stripes_produce_edges_and_contrast() {
        // 4-pixel stripes on an 8-wide image: every row has a transition at x=4
        // and the wrap from x=7 to the next row's x=0 is another one.
        let image = striped(8, 2, 4, [80, 80, 80], [160, 160, 160]);
        let stats = PixelStats::compute(&image);
        assert_eq!(stats.contrast(), 80.0);
        assert_eq!(stats.mean_brightness, 120.0);
        assert!((stats.edge_ratio - 3.0 / 15.0).abs() < 1e-9);
    }

    #[test]
    fn saturation_uses_channel_ratio() {
        let image = RgbImage::from_pixel(4, 4, Rgb([200, 100, 100]));
        let stats = PixelStats::compute(&image);
        assert!((stats.mean_saturation - 0.5).abs() < 1e-9);
        assert_eq!(stats.mean_spread, 100.0);
    }

    #[test]
    fn black_pixels_do_not_divide_by_zero() {
        let image = RgbImage::from_pixel(3, 3, Rgb([0, 0, 0]));
        let stats = PixelStats::compute(&image);
        assert_eq!(stats.mean_saturation, 0.0);
        assert!(stats.mean_brightness.is_finite());
    }

    #[test]
    fn empty_image_is_all_zero() {
        let stats = PixelStats::compute(&RgbImage::new(0, 0));
        assert_eq!(stats.pixel_count, 0);
        assert_eq!(stats.edge_ratio, 0.0);
    }
}
