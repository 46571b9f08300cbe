//! Per-pixel colour operations on 8-bit RGB buffers.
//!
//! [`FilterOp`] follows the CSS filter-effects definitions (contrast around
//! mid-grey, multiplicative brightness, the saturate and hue-rotate colour
//! matrices), so a chain such as `contrast(110%) brightness(105%)` renders the
//! same way it would on a browser canvas.

use image::RgbImage;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FilterOp {
    /// Linear stretch around 127.5; `1.0` is identity.
    Contrast(f32),
    /// Channel multiplier; `1.0` is identity.
    Brightness(f32),
    /// `1.0` is identity, `0.0` is greyscale.
    Saturate(f32),
    /// Rotation in degrees.
    HueRotate(f32),
}

pub const SHARPEN_CHAIN: [FilterOp; 3] = [
    FilterOp::Contrast(1.10),
    FilterOp::Brightness(1.05),
    FilterOp::Saturate(1.10),
];

pub const COLOR_CORRECT_CHAIN: [FilterOp; 4] = [
    FilterOp::Contrast(1.05),
    FilterOp::Brightness(1.02),
    FilterOp::Saturate(1.05),
    FilterOp::HueRotate(2.0),
];

/// Threshold on mean(R,G,B) above which a pixel is treated as metal.
pub const METALLIC_THRESHOLD: f32 = 100.0;
pub const METALLIC_GAIN: f32 = 1.1;
pub const COIN_CONTRAST: f32 = 1.2;
pub const COIN_MIDPOINT: f32 = 128.0;

type Matrix = [[f32; 3]; 3];

impl FilterOp {
    fn apply(&self, rgb: [f32; 3]) -> [f32; 3] {
        match *self {
            FilterOp::Contrast(amount) => rgb.map(|v| clamp_channel((v - 127.5) * amount + 127.5)),
            FilterOp::Brightness(amount) => rgb.map(|v| clamp_channel(v * amount)),
            FilterOp::Saturate(amount) => multiply(&saturate_matrix(amount), rgb),
            FilterOp::HueRotate(degrees) => multiply(&hue_rotate_matrix(degrees), rgb),
        }
    }
}

/// Applies the operations left to right to every pixel, clamping after each one.
pub fn apply_chain(image: &mut RgbImage, ops: &[FilterOp]) {
    if ops.is_empty() {
        return;
    }
    for pixel in image.pixels_mut() {
        let mut rgb = pixel.0.map(|c| c as f32);
        for op in ops {
            rgb = op.apply(rgb);
        }
        pixel.0 = rgb.map(to_u8);
    }
}

/// Lifts bright (metallic) pixels by 10% then stretches contrast around 128.
/// Each step rounds back to 8 bits, so repeated passes compound.
pub fn coin_tone(image: &mut RgbImage) {
    for pixel in image.pixels_mut() {
        let [r, g, b] = pixel.0;
        let mean = (r as f32 + g as f32 + b as f32) / 3.0;
        if mean > METALLIC_THRESHOLD {
            pixel.0 = pixel.0.map(|c| to_u8(c as f32 * METALLIC_GAIN));
        }
        pixel.0 = pixel
            .0
            .map(|c| to_u8((c as f32 - COIN_MIDPOINT) * COIN_CONTRAST + COIN_MIDPOINT));
    }
}

fn saturate_matrix(s: f32) -> Matrix {
    [
        [0.213 + 0.787 * s, 0.715 - 0.715 * s, 0.072 - 0.072 * s],
        [0.213 - 0.213 * s, 0.715 + 0.285 * s, 0.072 - 0.072 * s],
        [0.213 - 0.213 * s, 0.715 - 0.715 * s, 0.072 + 0.928 * s],
    ]
}

fn hue_rotate_matrix(degrees: f32) -> Matrix {
    let (sin, cos) = degrees.to_radians().sin_cos();
    [
        [
            0.213 + cos * 0.787 - sin * 0.213,
            0.715 - cos * 0.715 - sin * 0.715,
            0.072 - cos * 0.072 + sin * 0.928,
        ],
        [
            0.213 - cos * 0.213 + sin * 0.143,
            0.715 + cos * 0.285 + sin * 0.140,
            0.072 - cos * 0.072 - sin * 0.283,
        ],
        [
            0.213 - cos * 0.213 - sin * 0.787,
            0.715 - cos * 0.715 + sin * 0.715,
            0.072 + cos * 0.928 + sin * 0.072,
        ],
    ]
}

fn multiply(m: &Matrix, rgb: [f32; 3]) -> [f32; 3] {
    let mut out = [0.0; 3];
    for (row, value) in m.iter().zip(out.iter_mut()) {
        *value = clamp_channel(row[0] * rgb[0] + row[1] * rgb[1] + row[2] * rgb[2]);
    }
    out
}

fn clamp_channel(v: f32) -> f32 {
    v.clamp(0.0, 255.0)
}

fn to_u8(v: f32) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}
