//! Configuration for geomap-eye

use crate::error::VisionError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Location of one pretrained artifact on disk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSource {
    /// Path to the artifact file
    pub path: PathBuf,
    /// Expected SHA-256 of the file (hex). Verified at load when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

impl ModelSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            sha256: None,
        }
    }
}

/// The three pretrained artifacts the pipeline is built from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
    /// YOLOv8-seg style instance segmentation graph (ONNX)
    pub segmentation: ModelSource,
    /// Feature extractor exposing a pooled output (ONNX)
    pub embedding: ModelSource,
    /// Fitted linear projection exported as JSON
    pub projection: ModelSource,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            segmentation: ModelSource::new("nn_models/segmentation_net/yolov8n-seg.onnx"),
            embedding: ModelSource::new("nn_models/embedding_net/model.onnx"),
            projection: ModelSource::new("nn_models/pca.json"),
        }
    }
}

/// Segmentation model pre/post-processing parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentationConfig {
    pub input_width: u32,
    pub input_height: u32,
    pub input_name: String,
    /// Output holding boxes, class scores and mask coefficients
    pub detections_output: String,
    /// Output holding the prototype masks
    pub protos_output: String,
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
    pub max_detections: usize,
    /// Gray level used to pad the letterboxed input
    pub letterbox_fill: u8,
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        Self {
            input_width: 640,
            input_height: 640,
            input_name: "images".to_string(),
            detections_output: "output0".to_string(),
            protos_output: "output1".to_string(),
            confidence_threshold: 0.25,
            iou_threshold: 0.7,
            max_detections: 300,
            letterbox_fill: 114,
        }
    }
}

/// Feature extractor pre-processing parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Side of the square every re-encoded crop is first resized to
    pub crop_size: u32,
    /// Final side fed to the network after resize and centre crop
    pub shortest_edge: u32,
    /// Fraction of the resized image kept by the centre crop
    pub crop_pct: f32,
    /// Processor rescale, applied on top of the [0, 1] crop normalization
    pub rescale_factor: f32,
    pub image_mean: [f32; 3],
    pub image_std: [f32; 3],
    pub input_name: String,
    pub output_name: String,
    /// Crops stacked per inference call
    pub batch_size: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            crop_size: 32,
            shortest_edge: 224,
            crop_pct: 0.875,
            rescale_factor: 1.0 / 255.0,
            image_mean: [0.485, 0.456, 0.406],
            image_std: [0.229, 0.224, 0.225],
            input_name: "pixel_values".to_string(),
            output_name: "pooler_output".to_string(),
            batch_size: 1,
        }
    }
}

/// ONNX Runtime session settings
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Threads used inside a single operator; `None` leaves the runtime default
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intra_threads: Option<usize>,
}

/// Pipeline configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GeomapConfig {
    pub models: ModelsConfig,
    pub segmentation: SegmentationConfig,
    pub embedding: EmbeddingConfig,
    pub runtime: RuntimeConfig,
}

impl GeomapConfig {
    /// Parse a TOML document. Missing keys take their defaults.
    pub fn from_toml_str(content: &str) -> Result<Self, VisionError> {
        let config: GeomapConfig = toml::from_str(content)?;
        config.validate().map_err(VisionError::Config)?;
        Ok(config)
    }

    /// Load and validate a TOML config file
    pub fn from_file(path: &Path) -> Result<Self, VisionError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn to_toml_string(&self) -> Result<String, VisionError> {
        toml::to_string_pretty(self).map_err(|e| VisionError::Config(e.to_string()))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        for (name, source) in [
            ("segmentation", &self.models.segmentation),
            ("embedding", &self.models.embedding),
            ("projection", &self.models.projection),
        ] {
            if source.path.as_os_str().is_empty() {
                return Err(format!("Model path for {} must not be empty", name));
            }
            if let Some(digest) = &source.sha256 {
                if digest.len() != 64 || !digest.chars().all(|c| c.is_ascii_hexdigit()) {
                    return Err(format!("Checksum for {} model is not a SHA-256 hex digest", name));
                }
            }
        }

        let seg = &self.segmentation;
        if seg.input_width == 0 || seg.input_height == 0 {
            return Err("Segmentation input size must be non-zero".to_string());
        }
        if !(seg.confidence_threshold > 0.0 && seg.confidence_threshold <= 1.0) {
            return Err("Confidence threshold must be in (0, 1]".to_string());
        }
        if !(seg.iou_threshold > 0.0 && seg.iou_threshold <= 1.0) {
            return Err("IoU threshold must be in (0, 1]".to_string());
        }
        if seg.max_detections == 0 {
            return Err("Max detections must be at least 1".to_string());
        }

        let emb = &self.embedding;
        if emb.crop_size == 0 || emb.shortest_edge == 0 {
            return Err("Embedding sizes must be non-zero".to_string());
        }
        if !(emb.crop_pct > 0.0 && emb.crop_pct <= 1.0) {
            return Err("Crop percentage must be in (0, 1]".to_string());
        }
        if !emb.rescale_factor.is_finite() || emb.rescale_factor <= 0.0 {
            return Err("Rescale factor must be positive".to_string());
        }
        if emb.image_std.iter().any(|s| !s.is_finite() || *s == 0.0) {
            return Err("Normalization std must be finite and non-zero".to_string());
        }
        if emb.batch_size == 0 {
            return Err("Batch size must be at least 1".to_string());
        }

        if self.runtime.intra_threads == Some(0) {
            return Err("Intra-op thread count must be at least 1".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = GeomapConfig::default();
        assert_eq!(config.segmentation.input_width, 640);
        assert_eq!(config.segmentation.input_height, 640);
        assert_eq!(config.segmentation.confidence_threshold, 0.25);
        assert_eq!(config.segmentation.iou_threshold, 0.7);
        assert_eq!(config.embedding.crop_size, 32);
        assert_eq!(config.embedding.shortest_edge, 224);
        assert_eq!(config.embedding.batch_size, 1);
        assert_eq!(config.models.projection.path, PathBuf::from("nn_models/pca.json"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_partial_toml_uses_defaults() {
        let config = GeomapConfig::from_toml_str(
            r#"
            [segmentation]
            confidence_threshold = 0.5

            [embedding]
            batch_size = 8
            "#,
        )
        .unwrap();
        assert_eq!(config.segmentation.confidence_threshold, 0.5);
        assert_eq!(config.segmentation.iou_threshold, 0.7);
        assert_eq!(config.embedding.batch_size, 8);
        assert_eq!(config.embedding.output_name, "pooler_output");
    }

    #[test]
    fn test_config_toml_roundtrip() {
        let mut config = GeomapConfig::default();
        config.models.embedding.sha256 = Some("ab".repeat(32));
        config.runtime.intra_threads = Some(4);
        let text = config.to_toml_string().unwrap();
        let parsed = GeomapConfig::from_toml_str(&text).unwrap();
        assert_eq!(config, parsed);
    }

    #[test]
    fn test_config_validation_thresholds() {
        let mut config = GeomapConfig::default();
        config.segmentation.confidence_threshold = 0.0;
        assert!(config.validate().is_err());

        let mut config = GeomapConfig::default();
        config.segmentation.iou_threshold = 1.5;
        assert!(config.validate().is_err());

        let mut config = GeomapConfig::default();
        config.segmentation.confidence_threshold = f32::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_sizes() {
        let mut config = GeomapConfig::default();
        config.segmentation.input_width = 0;
        assert!(config.validate().is_err());

        let mut config = GeomapConfig::default();
        config.embedding.crop_size = 0;
        assert!(config.validate().is_err());

        let mut config = GeomapConfig::default();
        config.embedding.batch_size = 0;
        assert!(config.validate().is_err());

        let mut config = GeomapConfig::default();
        config.segmentation.max_detections = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_std_zero() {
        let mut config = GeomapConfig::default();
        config.embedding.image_std = [0.229, 0.0, 0.225];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_checksum_format() {
        let mut config = GeomapConfig::default();
        config.models.segmentation.sha256 = Some("not-a-digest".to_string());
        assert!(config.validate().is_err());

        config.models.segmentation.sha256 = Some("0".repeat(64));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation_empty_path() {
        let mut config = GeomapConfig::default();
        config.models.projection.path = PathBuf::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_invalid_toml_rejected() {
        let result = GeomapConfig::from_toml_str("[embedding]\nbatch_size = 0\n");
        assert!(matches!(result, Err(VisionError::Config(_))));

        let result = GeomapConfig::from_toml_str("[embedding\n");
        assert!(matches!(result, Err(VisionError::Toml(_))));
    }
}
