//! Graphics toolkit used by the fitting.
//!
//! Provides the small set of primitives the texture-space passes are built
//! from: CPU-resident textures with nearest/linear filtering, framebuffers
//! with several floating-point colour attachments and a full-screen program
//! abstraction, a triangle rasteriser with depth testing, and a headless wgpu
//! context with blocking readback of floating-point render targets.
#![warn(missing_docs)]

pub mod context;
pub mod error;
pub mod framebuffer;
pub mod raster;
pub mod readback;
pub mod texture;

pub use error::GxError;
pub use framebuffer::Framebuffer;
pub use texture::{Filter, Texel, Texture2d, TextureArray};
pub use wgpu;
