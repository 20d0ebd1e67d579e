//! Pooled CNN features for re-encoded crops

use crate::config::{EmbeddingConfig, ModelSource, RuntimeConfig};
use crate::error::VisionError;
use crate::models::{load_session, FeatureExtractor};
use crate::processing::ReencodedCrop;
use crate::utils::rgb_to_chw;
use image::imageops::{self, FilterType};
use image::RgbImage;
use ort::session::Session;
use ort::value::Tensor;
use tracing::debug;

/// Shortest edges at or above this size are resized directly, without a
/// centre crop.
const DIRECT_RESIZE_EDGE: u32 = 384;

/// Turns re-encoded crops into normalized network input.
#[derive(Debug, Clone)]
pub struct ImageProcessor {
    config: EmbeddingConfig,
}

impl ImageProcessor {
    pub fn new(config: EmbeddingConfig) -> Self {
        Self { config }
    }

    /// Side length of the square network input
    pub fn input_size(&self) -> u32 {
        self.config.shortest_edge
    }

    /// Number of floats one prepared crop occupies in the input tensor
    pub fn tensor_len(&self) -> usize {
        let edge = self.input_size() as usize;
        3 * edge * edge
    }

    /// Convert to RGB, shrink to the fixed crop size, then resize and centre
    /// crop to the network input. Empty crops become a black crop.
    pub fn prepare(&self, crop: &ReencodedCrop) -> RgbImage {
        let size = self.config.crop_size;
        let small = if crop.is_empty() {
            RgbImage::new(size, size)
        } else {
            imageops::resize(&crop.to_rgb(), size, size, FilterType::Triangle)
        };

        let edge = self.config.shortest_edge;
        if edge >= DIRECT_RESIZE_EDGE {
            return imageops::resize(&small, edge, edge, FilterType::CatmullRom);
        }

        let target = ((edge as f32 / self.config.crop_pct) as u32).max(edge);
        let (width, height) = small.dimensions();
        let (new_width, new_height) = if width <= height {
            (target, (height as f32 * target as f32 / width as f32) as u32)
        } else {
            ((width as f32 * target as f32 / height as f32) as u32, target)
        };
        let resized = imageops::resize(&small, new_width, new_height, FilterType::CatmullRom);

        let left = (new_width - edge) / 2;
        let top = (new_height - edge) / 2;
        imageops::crop_imm(&resized, left, top, edge, edge).to_image()
    }

    /// Write `image` into `out` as planar CHW, scaled to [0, 1], rescaled
    /// again by `rescale_factor`, then mean/std normalized.
    pub fn write_tensor(&self, image: &RgbImage, out: &mut [f32]) -> Result<(), VisionError> {
        let scale = self.config.rescale_factor / 255.0;
        rgb_to_chw(
            image,
            scale,
            self.config.image_mean,
            self.config.image_std,
            out,
        )
    }
}

/// ONNX feature extractor (ResNet-50 backbone, pooled output)
pub struct OnnxFeatureExtractor {
    session: Session,
    processor: ImageProcessor,
    config: EmbeddingConfig,
}

impl OnnxFeatureExtractor {
    pub fn new(
        source: &ModelSource,
        config: EmbeddingConfig,
        runtime: &RuntimeConfig,
    ) -> Result<Self, VisionError> {
        let session = load_session(source, runtime, "Embedding")?;
        Ok(Self {
            session,
            processor: ImageProcessor::new(config.clone()),
            config,
        })
    }

    /// One flattened feature vector per crop, in input order
    pub fn embed(&mut self, crops: &[ReencodedCrop]) -> Result<Vec<Vec<f32>>, VisionError> {
        let Self {
            session,
            processor,
            config,
        } = self;
        embed_in_batches(processor, crops, config.batch_size, |shape, data| {
            run_session(session, config, shape, data)
        })
    }
}

fn run_session(
    session: &mut Session,
    config: &EmbeddingConfig,
    shape: [usize; 4],
    data: Vec<f32>,
) -> Result<(Vec<usize>, Vec<f32>), VisionError> {
    let input = Tensor::from_array((shape, data.into_boxed_slice()))
        .map_err(|e| VisionError::ort("Failed to create embedding input", e))?;

    let outputs = session
        .run(ort::inputs![config.input_name.as_str() => input])
        .map_err(|e| VisionError::ort("Embedding inference failed", e))?;

    let value = outputs.get(config.output_name.as_str()).ok_or_else(|| {
        VisionError::Model(format!(
            "Model has no output named {:?}",
            config.output_name
        ))
    })?;
    let (out_shape, values) = value
        .try_extract_tensor::<f32>()
        .map_err(|e| VisionError::ort("Failed to extract embedding output", e))?;
    let dims: Vec<usize> = out_shape.iter().map(|&d| d.max(0) as usize).collect();
    debug!("Embedding output shape: {:?}", dims);

    Ok((dims, values.to_vec()))
}

/// Prepare `crops` in chunks of `batch_size`, hand each `[n, 3, h, w]` input
/// to `run` and split what it returns into one vector per crop.
pub fn embed_in_batches<R>(
    processor: &ImageProcessor,
    crops: &[ReencodedCrop],
    batch_size: usize,
    mut run: R,
) -> Result<Vec<Vec<f32>>, VisionError>
where
    R: FnMut([usize; 4], Vec<f32>) -> Result<(Vec<usize>, Vec<f32>), VisionError>,
{
    let edge = processor.input_size() as usize;
    let per_crop = processor.tensor_len();

    let mut features = Vec::with_capacity(crops.len());
    for chunk in crops.chunks(batch_size.max(1)) {
        let mut data = vec![0.0f32; per_crop * chunk.len()];
        for (crop, slot) in chunk.iter().zip(data.chunks_mut(per_crop)) {
            let prepared = processor.prepare(crop);
            processor.write_tensor(&prepared, slot)?;
        }

        let (dims, values) = run([chunk.len(), 3, edge, edge], data)?;
        features.extend(split_batch(&dims, &values, chunk.len())?);
    }
    Ok(features)
}

impl FeatureExtractor for OnnxFeatureExtractor {
    fn extract(&mut self, crops: &[ReencodedCrop]) -> Result<Vec<Vec<f32>>, VisionError> {
        self.embed(crops)
    }
}

/// Split a `[batch, ...]` output into one flattened vector per item.
pub fn split_batch(
    shape: &[usize],
    values: &[f32],
    batch: usize,
) -> Result<Vec<Vec<f32>>, VisionError> {
    if shape.first() != Some(&batch) {
        return Err(VisionError::Shape(format!(
            "Expected output batch of {}, got shape {:?}",
            batch, shape
        )));
    }
    let per_item: usize = shape[1..].iter().product();
    if per_item == 0 || values.len() != per_item * batch {
        return Err(VisionError::Shape(format!(
            "Output of shape {:?} holds {} values",
            shape,
            values.len()
        )));
    }
    Ok(values.chunks(per_item).map(<[f32]>::to_vec).collect())
}
