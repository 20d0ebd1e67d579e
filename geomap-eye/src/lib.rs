//! geomap-eye: region embeddings for geographic map images
//!
//! Segments every object in an image, cuts out each object's masked crop,
//! collapses it to a single intensity channel, embeds it with a pretrained
//! CNN and reduces the pooled features with a fitted linear projection.
//!
//! ```no_run
//! use geomap_eye::{GeomapConfig, GeomapPipeline};
//! use std::path::Path;
//!
//! let mut pipeline = GeomapPipeline::from_config(&GeomapConfig::default())?;
//! let embeddings = pipeline.get_geomap_embeddings(Path::new("map.png"))?;
//! println!("{} regions", embeddings.len());
//! # Ok::<(), geomap_eye::VisionError>(())
//! ```

pub mod config;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod processing;
mod utils;

pub use config::GeomapConfig;
pub use error::VisionError;
pub use models::{BoundingBox, Detection};
pub use pipeline::{GeomapPipeline, RegionEmbedding};
