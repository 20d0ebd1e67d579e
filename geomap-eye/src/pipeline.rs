//! Image-to-embeddings pipeline: segment, crop, re-encode, embed, reduce

use crate::config::GeomapConfig;
use crate::error::VisionError;
use crate::models::{
    BoundingBox, Detection, FeatureExtractor, LinearProjection, OnnxFeatureExtractor, Projector,
    Segmenter, YoloSegModel,
};
use crate::processing::{crop_region, reencode_all, ReencodedCrop};
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// One detected region with its reduced embedding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionEmbedding {
    /// Position in detection order
    pub index: usize,
    pub bbox: BoundingBox,
    pub class_id: usize,
    pub confidence: f32,
    pub embedding: Vec<f32>,
}

/// Owns the three models for its whole lifetime and runs the stages in order.
pub struct GeomapPipeline<S = YoloSegModel, F = OnnxFeatureExtractor, P = LinearProjection> {
    segmenter: S,
    extractor: F,
    projector: P,
    crop_dump: Option<PathBuf>,
}

impl GeomapPipeline {
    /// Validate `config` and load every model it names.
    pub fn from_config(config: &GeomapConfig) -> Result<Self, VisionError> {
        config.validate().map_err(VisionError::Config)?;

        let segmenter = YoloSegModel::new(
            &config.models.segmentation,
            config.segmentation.clone(),
            &config.runtime,
        )?;
        let extractor = OnnxFeatureExtractor::new(
            &config.models.embedding,
            config.embedding.clone(),
            &config.runtime,
        )?;
        if let Some(digest) = &config.models.projection.sha256 {
            crate::utils::verify_checksum(&config.models.projection.path, digest)?;
        }
        let projector = LinearProjection::from_file(&config.models.projection.path)?;

        info!("Geomap pipeline ready");
        Ok(Self::new(segmenter, extractor, projector))
    }
}

impl<S, F, P> GeomapPipeline<S, F, P>
where
    S: Segmenter,
    F: FeatureExtractor,
    P: Projector,
{
    pub fn new(segmenter: S, extractor: F, projector: P) -> Self {
        Self {
            segmenter,
            extractor,
            projector,
            crop_dump: None,
        }
    }

    /// Write every masked crop and its re-encoding as PNG into `dir`.
    pub fn with_crop_dump(mut self, dir: impl Into<PathBuf>) -> Self {
        self.crop_dump = Some(dir.into());
        self
    }

    /// Length of every embedding this pipeline produces
    pub fn embedding_dim(&self) -> usize {
        self.projector.output_dim()
    }

    pub fn load_image(path: &Path) -> Result<RgbImage, VisionError> {
        let image = image::open(path)?.to_rgb8();
        debug!(
            "Loaded {:?} ({}x{})",
            path,
            image.width(),
            image.height()
        );
        Ok(image)
    }

    /// Segment the image at `path`
    pub fn detect(&mut self, path: &Path) -> Result<Vec<Detection>, VisionError> {
        let image = Self::load_image(path)?;
        self.segmenter.segment(&image)
    }

    /// Masked crop for each detection, in detection order
    pub fn crops(&self, image: &RgbImage, detections: &[Detection]) -> Vec<RgbImage> {
        detections
            .iter()
            .map(|detection| crop_region(image, detection))
            .collect()
    }

    pub fn reencode(&self, crops: &[RgbImage]) -> Vec<ReencodedCrop> {
        reencode_all(crops)
    }

    /// Features for each re-encoded crop, reduced by the projection
    pub fn embed_crops(&mut self, crops: &[ReencodedCrop]) -> Result<Vec<Vec<f32>>, VisionError> {
        if crops.is_empty() {
            return Ok(Vec::new());
        }

        let features = self.extractor.extract(crops)?;
        if features.len() != crops.len() {
            return Err(VisionError::Processing(format!(
                "Feature extractor returned {} vectors for {} crops",
                features.len(),
                crops.len()
            )));
        }

        let expected = self.projector.output_dim();
        let mut embeddings = Vec::with_capacity(features.len());
        for feature in &features {
            let embedding = self.projector.project(feature)?;
            if embedding.len() != expected {
                return Err(VisionError::Shape(format!(
                    "Projection returned {} values, expected {}",
                    embedding.len(),
                    expected
                )));
            }
            embeddings.push(embedding);
        }
        Ok(embeddings)
    }

    /// Run every stage on an in-memory image.
    pub fn embed_image(
        &mut self,
        image: &RgbImage,
    ) -> Result<(Vec<Detection>, Vec<Vec<f32>>), VisionError> {
        self.run(image, "image")
    }

    /// One embedding per detected object in the image at `path`, in detection
    /// order. An image with no detections gives an empty list.
    pub fn get_geomap_embeddings(&mut self, path: &Path) -> Result<Vec<Vec<f32>>, VisionError> {
        let image = Self::load_image(path)?;
        let (_, embeddings) = self.run(&image, &file_stem(path))?;
        Ok(embeddings)
    }

    /// Like [`get_geomap_embeddings`](Self::get_geomap_embeddings), keeping
    /// each detection's box, class and confidence alongside its embedding.
    pub fn analyze(&mut self, path: &Path) -> Result<Vec<RegionEmbedding>, VisionError> {
        let image = Self::load_image(path)?;
        let (detections, embeddings) = self.run(&image, &file_stem(path))?;
        Ok(detections
            .into_iter()
            .zip(embeddings)
            .enumerate()
            .map(|(index, (detection, embedding))| RegionEmbedding {
                index,
                bbox: detection.bbox,
                class_id: detection.class_id,
                confidence: detection.confidence,
                embedding,
            })
            .collect())
    }

    fn run(
        &mut self,
        image: &RgbImage,
        name: &str,
    ) -> Result<(Vec<Detection>, Vec<Vec<f32>>), VisionError> {
        let detections = self.segmenter.segment(image)?;
        debug!("{} detections", detections.len());
        if detections.is_empty() {
            return Ok((detections, Vec::new()));
        }

        let crops = self.crops(image, &detections);
        let reencoded = self.reencode(&crops);
        if let Some(dir) = &self.crop_dump {
            dump_crops(dir, name, &crops, &reencoded)?;
        }

        let embeddings = self.embed_crops(&reencoded)?;
        if embeddings.len() != detections.len() {
            return Err(VisionError::Processing(format!(
                "{} embeddings for {} detections",
                embeddings.len(),
                detections.len()
            )));
        }
        info!("Embedded {} regions", embeddings.len());
        Ok((detections, embeddings))
    }
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string())
}

fn dump_crops(
    dir: &Path,
    name: &str,
    crops: &[RgbImage],
    reencoded: &[ReencodedCrop],
) -> Result<(), VisionError> {
    std::fs::create_dir_all(dir)?;
    for (index, (crop, encoded)) in crops.iter().zip(reencoded).enumerate() {
        if encoded.is_empty() {
            warn!("Skipping dump of empty crop {} for {}", index, name);
            continue;
        }
        crop.save(dir.join(format!("{}_{}_crop.png", name, index)))?;
        encoded
            .to_rgb()
            .save(dir.join(format!("{}_{}_encoded.png", name, index)))?;
    }
    debug!("Dumped {} crops to {:?}", crops.len(), dir);
    Ok(())
}
