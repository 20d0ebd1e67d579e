//! Stand-in models for running the pipeline without ONNX files

#![allow(dead_code)]

use geomap_eye::config::EmbeddingConfig;
use geomap_eye::models::{FeatureExtractor, ImageProcessor, LinearProjection, Segmenter};
use geomap_eye::processing::ReencodedCrop;
use geomap_eye::{BoundingBox, Detection, VisionError};
use image::RgbImage;
use std::cell::RefCell;
use std::rc::Rc;

pub const FEATURES: usize = 4;

/// Returns the same detections for every image
pub struct FixedSegmenter {
    pub detections: Vec<Detection>,
}

impl Segmenter for FixedSegmenter {
    fn segment(&mut self, _image: &RgbImage) -> Result<Vec<Detection>, VisionError> {
        Ok(self.detections.clone())
    }
}

/// Channel means and lit fraction of the prepared network input. Keeps a copy
/// of every crop it sees.
pub struct MeanExtractor {
    processor: ImageProcessor,
    pub seen: Rc<RefCell<Vec<ReencodedCrop>>>,
}

impl MeanExtractor {
    pub fn new() -> Self {
        Self {
            processor: ImageProcessor::new(EmbeddingConfig::default()),
            seen: Rc::new(RefCell::new(Vec::new())),
        }
    }
}

impl FeatureExtractor for MeanExtractor {
    fn extract(&mut self, crops: &[ReencodedCrop]) -> Result<Vec<Vec<f32>>, VisionError> {
        self.seen.borrow_mut().extend(crops.iter().cloned());
        Ok(crops
            .iter()
            .map(|crop| {
                let prepared = self.processor.prepare(crop);
                let count = (prepared.width() * prepared.height()) as f32;
                let mut sums = [0.0f32; 3];
                let mut lit = 0.0f32;
                for pixel in prepared.pixels() {
                    for c in 0..3 {
                        sums[c] += pixel[c] as f32 / 255.0;
                    }
                    if pixel[0] > 0 {
                        lit += 1.0;
                    }
                }
                vec![sums[0] / count, sums[1] / count, sums[2] / count, lit / count]
            })
            .collect())
    }
}

/// 4 -> 2 projection
pub fn projection() -> LinearProjection {
    LinearProjection::from_parts(
        vec![0.5, 0.0, 0.0, 0.5],
        vec![vec![1.0, 0.0, 0.0, 0.0], vec![0.0, 0.0, 0.0, 1.0]],
        None,
        false,
    )
    .unwrap()
}

pub fn square(x: i32, y: i32, side: i32) -> Detection {
    Detection {
        bbox: BoundingBox::new(x, y, side, side),
        polygon: vec![
            [x, y],
            [x + side - 1, y],
            [x + side - 1, y + side - 1],
            [x, y + side - 1],
        ],
        class_id: 0,
        confidence: 0.9,
    }
}
