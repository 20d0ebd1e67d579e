//! Error types for geomap-eye

use thiserror::Error;

#[derive(Error, Debug)]
pub enum VisionError {
    #[error("Model error: {0}")]
    Model(String),

    #[error("Shape error: {0}")]
    Shape(String),

    #[error("Processing error: {0}")]
    Processing(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("ONNX Runtime error: {0}")]
    Ort(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, VisionError>;

impl VisionError {
    /// Wrap an ONNX Runtime failure with what was being attempted.
    pub(crate) fn ort(context: &str, err: impl std::fmt::Display) -> Self {
        VisionError::Ort(format!("{}: {}", context, err))
    }
}
