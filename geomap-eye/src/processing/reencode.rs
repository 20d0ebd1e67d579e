//! Single-channel re-encoding of masked crops

use image::{Rgb, RgbImage};

/// Channel of the re-encoded buffer that carries the intensity.
pub const INTENSITY_CHANNEL: usize = 2;

/// A masked crop collapsed to one intensity map and re-expanded to three
/// channels. Pixel triples are stored in blue-green-red order: channels 0 and
/// 1 are zero, channel 2 holds the intensity scaled to 0-255.
#[derive(Debug, Clone, PartialEq)]
pub struct ReencodedCrop {
    bgr: RgbImage,
}

impl ReencodedCrop {
    /// Per pixel: max over the three channels, clamped to [0, 1], times 255.
    ///
    /// Crop values are 0-255 integers, so any lit pixel saturates to 255 and
    /// only fully zeroed pixels stay at 0.
    pub fn from_crop(crop: &RgbImage) -> Self {
        let mut bgr = RgbImage::new(crop.width(), crop.height());
        for (dst, src) in bgr.pixels_mut().zip(crop.pixels()) {
            let peak = src.0.iter().copied().max().unwrap_or(0) as f32;
            let intensity = peak.clamp(0.0, 1.0);
            let mut out = [0u8; 3];
            out[INTENSITY_CHANNEL] = (intensity * 255.0) as u8;
            *dst = Rgb(out);
        }
        Self { bgr }
    }

    pub fn width(&self) -> u32 {
        self.bgr.width()
    }

    pub fn height(&self) -> u32 {
        self.bgr.height()
    }

    pub fn is_empty(&self) -> bool {
        self.bgr.width() == 0 || self.bgr.height() == 0
    }

    /// Raw buffer in blue-green-red order
    pub fn as_bgr(&self) -> &RgbImage {
        &self.bgr
    }

    /// Intensity at `(x, y)` (0-255)
    pub fn intensity(&self, x: u32, y: u32) -> u8 {
        self.bgr.get_pixel(x, y)[INTENSITY_CHANNEL]
    }

    /// Copy with channel order swapped to red-green-blue.
    pub fn to_rgb(&self) -> RgbImage {
        let mut rgb = self.bgr.clone();
        for pixel in rgb.pixels_mut() {
            pixel.0.swap(0, 2);
        }
        rgb
    }
}

pub fn reencode_all(crops: &[RgbImage]) -> Vec<ReencodedCrop> {
    crops.iter().map(ReencodedCrop::from_crop).collect()
}
