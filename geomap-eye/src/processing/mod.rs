//! Image processing between model boundaries

pub mod crop;
pub mod letterbox;
pub mod reencode;

pub use crop::{crop_region, polygon_mask};
pub use letterbox::{letterbox, Letterbox};
pub use reencode::{reencode_all, ReencodedCrop};
