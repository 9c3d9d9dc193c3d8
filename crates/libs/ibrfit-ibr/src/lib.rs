//! # ibrfit-ibr
//!
//! Multi-view image resources (cameras, lights, photographs, proxy mesh) and
//! the passes projecting the photographs into the texture space of the mesh.
#![warn(missing_docs)]

pub mod camera;
pub mod geometry;
pub mod gpu;
pub mod images;
pub mod observation;
pub mod projection;
mod resources;

pub use observation::{ObservationFrame, TexelObservation};
pub use projection::{ProjectionPass, RecordedProjectionPass, SoftwareProjectionPass};
pub use resources::IbrResources;

use base::{error::FitErrorKind, FitError};
use std::path::PathBuf;

/// Error raised while loading the multi-view resources.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    /// No file was found for a view image.
    #[error("view image '{name}' not found (tried {tried:?})")]
    MissingImage {
        /// Name of the image as listed in the view set.
        name: String,
        /// Paths tried.
        tried: Vec<PathBuf>,
    },
    /// A view image could not be decoded.
    #[error("failed to read image {path}: {source}")]
    Image {
        /// Path of the image.
        path: PathBuf,
        /// Decoding error.
        source: image::ImageError,
    },
    /// The proxy mesh is malformed.
    #[error("invalid proxy mesh: {0}")]
    Mesh(String),
    /// The number of images does not match the number of views.
    #[error("{views} views but {images} images")]
    ViewCount {
        /// Number of views.
        views: usize,
        /// Number of images.
        images: usize,
    },
    /// Images of different sizes, or similar.
    #[error(transparent)]
    Resource(#[from] gxtk::GxError),
}

impl From<LoadError> for FitError {
    fn from(err: LoadError) -> Self {
        let kind = match err {
            LoadError::MissingImage { .. } | LoadError::Image { .. } => FitErrorKind::Io,
            _ => FitErrorKind::InvalidInput,
        };
        FitError::new(kind, "Failed to load the multi-view resources", Some(Box::new(err)))
    }
}
