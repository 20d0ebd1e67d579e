//! Pretrained model wrappers and the seams the pipeline is built on

pub mod embedding;
pub mod projection;
pub mod segmentation;

pub use embedding::{ImageProcessor, OnnxFeatureExtractor};
pub use projection::LinearProjection;
pub use segmentation::{BoundingBox, Detection, YoloSegModel};

use crate::config::{ModelSource, RuntimeConfig};
use crate::error::VisionError;
use crate::processing::ReencodedCrop;
use crate::utils::verify_checksum;
use image::RgbImage;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use tracing::{debug, info};

/// Instance segmentation: image in, ordered detections out.
#[cfg_attr(test, mockall::automock)]
pub trait Segmenter {
    fn segment(&mut self, image: &RgbImage) -> Result<Vec<Detection>, VisionError>;
}

/// Pooled feature vectors for re-encoded crops, one per crop, in order.
#[cfg_attr(test, mockall::automock)]
pub trait FeatureExtractor {
    fn extract(&mut self, crops: &[ReencodedCrop]) -> Result<Vec<Vec<f32>>, VisionError>;
}

/// Fitted dimensionality reduction applied to one feature vector.
#[cfg_attr(test, mockall::automock)]
pub trait Projector {
    fn input_dim(&self) -> usize;
    fn output_dim(&self) -> usize;
    fn project(&self, features: &[f32]) -> Result<Vec<f32>, VisionError>;
}

/// Open an ONNX Runtime session for `source`, verifying its checksum first
/// when one is configured.
pub(crate) fn load_session(
    source: &ModelSource,
    runtime: &RuntimeConfig,
    what: &str,
) -> Result<Session, VisionError> {
    if !source.path.is_file() {
        return Err(VisionError::Model(format!(
            "{} model not found at {:?}",
            what, source.path
        )));
    }
    if let Some(digest) = &source.sha256 {
        verify_checksum(&source.path, digest)?;
    }

    let mut builder = Session::builder()
        .map_err(|e| VisionError::ort("Failed to create session builder", e))?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .map_err(|e| VisionError::ort("Failed to set optimization level", e))?;
    if let Some(threads) = runtime.intra_threads {
        debug!("Using {} intra-op threads for {} model", threads, what);
        builder = builder
            .with_intra_threads(threads)
            .map_err(|e| VisionError::ort("Failed to set intra-op threads", e))?;
    }

    let session = builder
        .commit_from_file(&source.path)
        .map_err(|e| VisionError::ort(&format!("Failed to load {} model", what), e))?;

    info!("{} model loaded from {:?}", what, source.path);
    Ok(session)
}
