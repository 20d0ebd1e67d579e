//! Fitted linear dimensionality reduction (PCA)

use crate::error::VisionError;
use crate::models::Projector;
use ndarray::{Array1, Array2, ArrayView1};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

/// On-disk form of a fitted projection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectionFile {
    pub mean: Vec<f32>,
    pub components: Vec<Vec<f32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explained_variance: Option<Vec<f32>>,
    #[serde(default)]
    pub whiten: bool,
}

/// `y = components · (x - mean)`, optionally scaled by
/// `1 / sqrt(explained_variance)`.
#[derive(Debug, Clone, PartialEq)]
pub struct LinearProjection {
    mean: Array1<f32>,
    components: Array2<f32>,
    /// Per-component divisor when whitening
    scale: Option<Array1<f32>>,
}

impl LinearProjection {
    /// Load a projection from its JSON file
    pub fn from_file(path: &Path) -> Result<Self, VisionError> {
        if !path.is_file() {
            return Err(VisionError::Model(format!(
                "Projection file not found at {:?}",
                path
            )));
        }
        let content = std::fs::read_to_string(path)?;
        let file: ProjectionFile = serde_json::from_str(&content)?;
        let projection = Self::from_parts(
            file.mean,
            file.components,
            file.explained_variance,
            file.whiten,
        )?;
        info!(
            "Projection loaded from {:?} ({} -> {})",
            path,
            projection.input_dim(),
            projection.output_dim()
        );
        Ok(projection)
    }

    pub fn from_parts(
        mean: Vec<f32>,
        components: Vec<Vec<f32>>,
        explained_variance: Option<Vec<f32>>,
        whiten: bool,
    ) -> Result<Self, VisionError> {
        let n_features = mean.len();
        let n_components = components.len();
        if n_features == 0 || n_components == 0 {
            return Err(VisionError::Model(
                "Projection must have at least one feature and one component".to_string(),
            ));
        }
        if let Some(row) = components.iter().position(|c| c.len() != n_features) {
            return Err(VisionError::Model(format!(
                "Component {} has {} values, mean has {}",
                row,
                components[row].len(),
                n_features
            )));
        }

        let scale = if whiten {
            let variance = explained_variance.ok_or_else(|| {
                VisionError::Model("Whitening requires explained_variance".to_string())
            })?;
            if variance.len() != n_components {
                return Err(VisionError::Model(format!(
                    "Expected {} explained variances, got {}",
                    n_components,
                    variance.len()
                )));
            }
            if variance.iter().any(|v| !(*v > 0.0) || !v.is_finite()) {
                return Err(VisionError::Model(
                    "Explained variances must be positive".to_string(),
                ));
            }
            Some(Array1::from_iter(variance.into_iter().map(f32::sqrt)))
        } else {
            None
        };

        let flat: Vec<f32> = components.into_iter().flatten().collect();
        let components = Array2::from_shape_vec((n_components, n_features), flat)
            .map_err(|e| VisionError::Shape(e.to_string()))?;

        Ok(Self {
            mean: Array1::from_vec(mean),
            components,
            scale,
        })
    }

    pub fn is_whitened(&self) -> bool {
        self.scale.is_some()
    }
}

impl Projector for LinearProjection {
    fn input_dim(&self) -> usize {
        self.mean.len()
    }

    fn output_dim(&self) -> usize {
        self.components.nrows()
    }

    fn project(&self, features: &[f32]) -> Result<Vec<f32>, VisionError> {
        if features.len() != self.input_dim() {
            return Err(VisionError::Shape(format!(
                "Projection expects {} features, got {}",
                self.input_dim(),
                features.len()
            )));
        }

        let centered = &ArrayView1::from(features) - &self.mean;
        let mut reduced = self.components.dot(&centered);
        if let Some(scale) = &self.scale {
            reduced /= scale;
        }
        Ok(reduced.to_vec())
    }
}
