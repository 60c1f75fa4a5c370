//! Lossy image compression by principal component analysis.
//!
//! Each colour channel of an image is treated as a matrix whose rows are
//! samples and whose columns are features. Only the `k` directions of
//! largest variance are kept before the image is rebuilt and written out
//! as a JPEG.

pub mod linalg;
pub mod pca;
pub mod pipeline;

pub use pca::{reduce, ComponentCount, ComponentError};
pub use pipeline::{compress, compress_with, CompressOptions, Fault, PipelineError};
