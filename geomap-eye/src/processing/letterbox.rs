//! Aspect-preserving resize with constant padding

use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};

/// Geometry of a letterboxed image, used to map model-space coordinates back
/// to the source image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    /// Source-to-model scale factor
    pub gain: f32,
    /// Left padding in model pixels
    pub pad_x: f32,
    /// Top padding in model pixels
    pub pad_y: f32,
    pub source_width: u32,
    pub source_height: u32,
}

impl Letterbox {
    /// Map a model-space point to source coordinates, clipped to the source
    /// extent (inclusive of the far edge).
    pub fn to_source(&self, x: f32, y: f32) -> (f32, f32) {
        let sx = (x - self.pad_x) / self.gain;
        let sy = (y - self.pad_y) / self.gain;
        (
            sx.clamp(0.0, self.source_width as f32),
            sy.clamp(0.0, self.source_height as f32),
        )
    }
}

/// Resize `image` to fit `target_width x target_height` and pad the rest with
/// `fill`, splitting the padding evenly between both sides.
pub fn letterbox(
    image: &RgbImage,
    target_width: u32,
    target_height: u32,
    fill: u8,
) -> (RgbImage, Letterbox) {
    let (width, height) = image.dimensions();
    let gain = (target_width as f32 / width.max(1) as f32)
        .min(target_height as f32 / height.max(1) as f32);

    let new_width = ((width as f32 * gain).round() as u32).clamp(1, target_width);
    let new_height = ((height as f32 * gain).round() as u32).clamp(1, target_height);

    let dw = (target_width - new_width) as f32 / 2.0;
    let dh = (target_height - new_height) as f32 / 2.0;
    let left = (dw - 0.1).round().max(0.0);
    let top = (dh - 0.1).round().max(0.0);

    let mut canvas = RgbImage::from_pixel(target_width, target_height, Rgb([fill; 3]));
    if (new_width, new_height) == (width, height) {
        imageops::replace(&mut canvas, image, left as i64, top as i64);
    } else {
        let resized = imageops::resize(image, new_width, new_height, FilterType::Triangle);
        imageops::replace(&mut canvas, &resized, left as i64, top as i64);
    }

    (
        canvas,
        Letterbox {
            gain,
            pad_x: left,
            pad_y: top,
            source_width: width,
            source_height: height,
        },
    )
}
