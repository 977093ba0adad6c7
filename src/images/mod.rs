//! Image downloading and optimization.
//!
//! A bounded concurrent pipeline that turns a product's image URLs into
//! validated, normalized JPEG files on disk, plus a reconciliation pass
//! that removes files no stored product references anymore.

mod pipeline;

// Re-export public API
pub use pipeline::{ImagePipeline, ImageResult, ProcessedImages};
