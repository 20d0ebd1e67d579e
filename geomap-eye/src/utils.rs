//! Tensor layout and artifact integrity helpers

use crate::error::VisionError;
use image::RgbImage;
use sha2::{Digest, Sha256};
use std::path::Path;
use tracing::info;

/// Write an RGB image into `out` as planar CHW floats, applying
/// `(value * scale - mean[c]) / std[c]` per channel.
///
/// `out` must hold exactly `3 * width * height` values.
pub fn rgb_to_chw(
    image: &RgbImage,
    scale: f32,
    mean: [f32; 3],
    std: [f32; 3],
    out: &mut [f32],
) -> Result<(), VisionError> {
    let (w, h) = image.dimensions();
    let plane = w as usize * h as usize;
    if out.len() != 3 * plane {
        return Err(VisionError::Shape(format!(
            "CHW buffer holds {} values, image {}x{} needs {}",
            out.len(),
            w,
            h,
            3 * plane
        )));
    }

    for (idx, pixel) in image.pixels().enumerate() {
        for c in 0..3 {
            out[c * plane + idx] = (pixel[c] as f32 * scale - mean[c]) / std[c];
        }
    }

    Ok(())
}

pub fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Hex SHA-256 of a file
pub fn file_sha256(path: &Path) -> Result<String, VisionError> {
    let bytes = std::fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(hex::encode(hasher.finalize()))
}

/// Fail unless the file at `path` hashes to `expected` (case-insensitive hex).
pub fn verify_checksum(path: &Path, expected: &str) -> Result<(), VisionError> {
    let computed = file_sha256(path)?;
    if !computed.eq_ignore_ascii_case(expected) {
        return Err(VisionError::Model(format!(
            "Checksum mismatch for {:?}: expected {}, got {}",
            path, expected, computed
        )));
    }
    info!("Verified checksum for {:?}", path);
    Ok(())
}
