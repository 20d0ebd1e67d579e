//! YOLOv8-seg instance segmentation model

use crate::config::{ModelSource, RuntimeConfig, SegmentationConfig};
use crate::error::VisionError;
use crate::models::{load_session, Segmenter};
use crate::processing::{letterbox, Letterbox};
use crate::utils::{rgb_to_chw, sigmoid};
use image::imageops::{self, FilterType};
use image::{GrayImage, ImageBuffer, Luma, RgbImage};
use imageproc::contours::{find_contours, BorderType};
use ort::session::{Session, SessionOutputs};
use ort::value::Tensor;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use tracing::{debug, warn};

/// Box in source-image pixels as truncated centre-x, centre-y, width and
/// height. Crops are sliced from `(x, y)`, so they start at the box centre.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl BoundingBox {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

/// One segmented object instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub bbox: BoundingBox,
    /// Object outline in source-image pixels
    pub polygon: Vec<[i32; 2]>,
    pub class_id: usize,
    pub confidence: f32,
}

/// Raw tensors copied out of a segmentation run
#[derive(Debug, Clone)]
pub struct SegmentationOutputs {
    /// `[1, 4 + classes + masks, anchors]`
    pub preds: Vec<f32>,
    pub preds_shape: Vec<usize>,
    /// `[1, masks, mask_h, mask_w]`
    pub protos: Vec<f32>,
    pub protos_shape: Vec<usize>,
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    /// x1, y1, x2, y2 in model input space
    bbox: [f32; 4],
    confidence: f32,
    class_id: usize,
    anchor: usize,
}

/// YOLOv8-seg model for instance segmentation
pub struct YoloSegModel {
    session: Session,
    config: SegmentationConfig,
}

impl YoloSegModel {
    /// Load the segmentation graph
    pub fn new(
        source: &ModelSource,
        config: SegmentationConfig,
        runtime: &RuntimeConfig,
    ) -> Result<Self, VisionError> {
        let session = load_session(source, runtime, "Segmentation")?;
        Ok(Self { session, config })
    }

    /// Detect and outline objects in `image`
    pub fn detect(&mut self, image: &RgbImage) -> Result<Vec<Detection>, VisionError> {
        debug!(
            "Running segmentation on {}x{} image",
            image.width(),
            image.height()
        );

        let (input, geometry) = self.preprocess(image)?;
        let outputs = self.infer(input)?;
        let detections = decode(&outputs, &geometry, &self.config)?;

        debug!("Segmentation kept {} detections", detections.len());
        Ok(detections)
    }

    fn preprocess(&self, image: &RgbImage) -> Result<(Tensor<f32>, Letterbox), VisionError> {
        let (width, height) = (self.config.input_width, self.config.input_height);
        let (boxed, geometry) = letterbox(image, width, height, self.config.letterbox_fill);

        let mut data = vec![0.0f32; 3 * width as usize * height as usize];
        rgb_to_chw(&boxed, 1.0 / 255.0, [0.0; 3], [1.0; 3], &mut data)?;

        let shape = [1usize, 3, height as usize, width as usize];
        let tensor = Tensor::from_array((shape, data.into_boxed_slice()))
            .map_err(|e| VisionError::ort("Failed to create segmentation input", e))?;
        Ok((tensor, geometry))
    }

    fn infer(&mut self, input: Tensor<f32>) -> Result<SegmentationOutputs, VisionError> {
        let outputs = self
            .session
            .run(ort::inputs![self.config.input_name.as_str() => input])
            .map_err(|e| VisionError::ort("Segmentation inference failed", e))?;

        let (preds_shape, preds) = extract_output(&outputs, &self.config.detections_output)?;
        let (protos_shape, protos) = extract_output(&outputs, &self.config.protos_output)?;
        debug!(
            "Segmentation output shapes: {:?}, {:?}",
            preds_shape, protos_shape
        );

        Ok(SegmentationOutputs {
            preds,
            preds_shape,
            protos,
            protos_shape,
        })
    }
}

impl Segmenter for YoloSegModel {
    fn segment(&mut self, image: &RgbImage) -> Result<Vec<Detection>, VisionError> {
        self.detect(image)
    }
}

fn extract_output(
    outputs: &SessionOutputs,
    name: &str,
) -> Result<(Vec<usize>, Vec<f32>), VisionError> {
    let value = outputs
        .get(name)
        .ok_or_else(|| VisionError::Model(format!("Model has no output named {:?}", name)))?;
    let (shape, data) = value
        .try_extract_tensor::<f32>()
        .map_err(|e| VisionError::ort(&format!("Failed to extract output {:?}", name), e))?;
    let dims = shape.iter().map(|&d| d.max(0) as usize).collect();
    Ok((dims, data.to_vec()))
}

/// Turn raw segmentation tensors into detections in source-image space.
pub fn decode(
    outputs: &SegmentationOutputs,
    geometry: &Letterbox,
    config: &SegmentationConfig,
) -> Result<Vec<Detection>, VisionError> {
    let (channels, anchors) = match outputs.preds_shape.as_slice() {
        [1, c, n] => (*c, *n),
        other => {
            return Err(VisionError::Shape(format!(
                "Expected predictions of shape [1, C, N], got {:?}",
                other
            )))
        }
    };
    let (num_masks, mask_h, mask_w) = match outputs.protos_shape.as_slice() {
        [1, m, h, w] => (*m, *h, *w),
        other => {
            return Err(VisionError::Shape(format!(
                "Expected prototype masks of shape [1, M, H, W], got {:?}",
                other
            )))
        }
    };
    if channels <= 4 + num_masks {
        return Err(VisionError::Shape(format!(
            "Prediction rows ({}) leave no room for class scores with {} masks",
            channels, num_masks
        )));
    }
    if outputs.preds.len() != channels * anchors
        || outputs.protos.len() != num_masks * mask_h * mask_w
    {
        return Err(VisionError::Shape(
            "Output buffers do not match their declared shapes".to_string(),
        ));
    }

    let num_classes = channels - 4 - num_masks;
    let at = |row: usize, anchor: usize| outputs.preds[row * anchors + anchor];

    let mut candidates = Vec::new();
    for anchor in 0..anchors {
        let (class_id, confidence) = (0..num_classes)
            .map(|c| (c, at(4 + c, anchor)))
            .fold((0, f32::MIN), |best, cur| if cur.1 > best.1 { cur } else { best });
        if !(confidence > config.confidence_threshold) {
            continue;
        }

        let (cx, cy, w, h) = (at(0, anchor), at(1, anchor), at(2, anchor), at(3, anchor));
        if !(cx.is_finite() && cy.is_finite() && w.is_finite() && h.is_finite()) {
            continue;
        }

        candidates.push(Candidate {
            bbox: [cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0],
            confidence,
            class_id,
            anchor,
        });
    }
    debug!("{} candidates above confidence threshold", candidates.len());

    let kept = apply_nms(candidates, config.iou_threshold, config.max_detections);

    let input_size = (config.input_width, config.input_height);
    let mut detections = Vec::with_capacity(kept.len());
    for candidate in kept {
        let coeffs: Vec<f32> = (0..num_masks)
            .map(|k| at(4 + num_classes + k, candidate.anchor))
            .collect();
        let mask = render_mask(
            &coeffs,
            &outputs.protos,
            (mask_w, mask_h),
            &candidate.bbox,
            input_size,
        );
        let polygon = largest_outline(&mask, geometry);
        if polygon.is_empty() {
            warn!(
                "Detection at anchor {} has an empty mask",
                candidate.anchor
            );
        }

        let (x1, y1) = geometry.to_source(candidate.bbox[0], candidate.bbox[1]);
        let (x2, y2) = geometry.to_source(candidate.bbox[2], candidate.bbox[3]);
        let (cx, cy) = ((x1 + x2) / 2.0, (y1 + y2) / 2.0);
        detections.push(Detection {
            bbox: BoundingBox::new(cx as i32, cy as i32, (x2 - x1) as i32, (y2 - y1) as i32),
            polygon,
            class_id: candidate.class_id,
            confidence: candidate.confidence,
        });
    }

    Ok(detections)
}

/// Binary instance mask at model input resolution: prototype combination,
/// sigmoid, zeroed outside the box, bilinear upsample, threshold at 0.5.
fn render_mask(
    coeffs: &[f32],
    protos: &[f32],
    (mask_w, mask_h): (usize, usize),
    bbox: &[f32; 4],
    (input_w, input_h): (u32, u32),
) -> GrayImage {
    let plane = mask_w * mask_h;
    let sx = mask_w as f32 / input_w as f32;
    let sy = mask_h as f32 / input_h as f32;
    let (bx1, by1, bx2, by2) = (bbox[0] * sx, bbox[1] * sy, bbox[2] * sx, bbox[3] * sy);

    let mut probs = vec![0.0f32; plane];
    for row in 0..mask_h {
        let fy = row as f32;
        if fy < by1 || fy >= by2 {
            continue;
        }
        for col in 0..mask_w {
            let fx = col as f32;
            if fx < bx1 || fx >= bx2 {
                continue;
            }
            let p = row * mask_w + col;
            let logit: f32 = coeffs
                .iter()
                .enumerate()
                .map(|(k, w)| w * protos[k * plane + p])
                .sum();
            probs[p] = sigmoid(logit);
        }
    }

    let Some(small) = ImageBuffer::<Luma<f32>, Vec<f32>>::from_raw(mask_w as u32, mask_h as u32, probs)
    else {
        return GrayImage::new(input_w, input_h);
    };
    let upsampled = imageops::resize(&small, input_w, input_h, FilterType::Triangle);

    GrayImage::from_fn(input_w, input_h, |x, y| {
        if upsampled.get_pixel(x, y)[0] > 0.5 {
            Luma([255])
        } else {
            Luma([0])
        }
    })
}

/// Largest outer contour of `mask`, mapped to source pixels and truncated.
fn largest_outline(mask: &GrayImage, geometry: &Letterbox) -> Vec<[i32; 2]> {
    find_contours::<i32>(mask)
        .into_iter()
        .filter(|c| c.border_type == BorderType::Outer)
        .max_by_key(|c| c.points.len())
        .map(|contour| {
            contour
                .points
                .iter()
                .map(|p| {
                    let (x, y) = geometry.to_source(p.x as f32, p.y as f32);
                    [x as i32, y as i32]
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Class-aware Non-Maximum Suppression, highest confidence first
fn apply_nms(
    mut candidates: Vec<Candidate>,
    iou_threshold: f32,
    max_detections: usize,
) -> Vec<Candidate> {
    candidates.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(Ordering::Equal)
    });

    let mut keep = Vec::new();
    let mut suppressed = vec![false; candidates.len()];

    for i in 0..candidates.len() {
        if suppressed[i] {
            continue;
        }
        keep.push(candidates[i]);
        if keep.len() >= max_detections {
            break;
        }

        for j in (i + 1)..candidates.len() {
            if suppressed[j] || candidates[j].class_id != candidates[i].class_id {
                continue;
            }
            if compute_iou(&candidates[i].bbox, &candidates[j].bbox) > iou_threshold {
                suppressed[j] = true;
            }
        }
    }

    keep
}

/// IoU between two corner-format boxes
fn compute_iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let inter_w = (a[2].min(b[2]) - a[0].max(b[0])).max(0.0);
    let inter_h = (a[3].min(b[3]) - a[1].max(b[1])).max(0.0);
    let inter = inter_w * inter_h;
    if inter <= 0.0 {
        return 0.0;
    }

    let area_a = (a[2] - a[0]) * (a[3] - a[1]);
    let area_b = (b[2] - b[0]) * (b[3] - b[1]);
    let union = area_a + area_b - inter;
    if union <= 0.0 || !union.is_finite() {
        return 0.0;
    }
    inter / union
}
