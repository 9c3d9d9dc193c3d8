//! # ibrfit-specfit
//!
//! Fits a spatially varying reflectance model to the observations produced by
//! a [`ProjectionPass`](ibr::ProjectionPass): a small set of shared basis
//! BRDFs (a diffuse albedo plus a tabulated specular lobe each), per-texel
//! blending weights, refined normals, and per-texel roughness and specular
//! reflectivity.
//!
//! The optimisation alternates between the shared and the per-texel
//! unknowns until the RMS error stops decreasing, see
//! [`SpecularOptimization`].

pub mod basis;
pub mod brdf;
pub mod diffuse;
pub mod driver;
pub mod error;
pub mod holefill;
pub mod kmeans;
pub mod matrix;
pub mod nnls;
pub mod normal;
pub mod output;
pub mod reflectance;
pub mod resources;
pub mod roughness;
pub mod solution;
pub mod weights;

pub use driver::{refine_normals, FitStage, NormalRefinement, SpecularFit, SpecularOptimization};
pub use error::{ErrorReport, ShaderBasedErrorCalculator};
pub use resources::SpecularFitResources;
pub use solution::SpecularFitSolution;

use std::ops::Range;

/// Splits `height` texel rows into consecutive blocks of at most `block_rows`
/// rows.
pub fn row_blocks(height: u32, block_rows: u32) -> impl Iterator<Item = Range<u32>> {
    let step = block_rows.max(1);
    (0..height)
        .step_by(step as usize)
        .map(move |start| start..(start + step).min(height))
}
