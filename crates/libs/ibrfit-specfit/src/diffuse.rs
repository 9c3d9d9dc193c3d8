//! Final per-texel diffuse albedo.
use crate::{reflectance::ReflectanceData, resources::SpecularFitResources, row_blocks, solution::SpecularFitSolution};
use base::{
    math::{DVec3, Vec3},
    FitError,
};
use ibr::{ObservationFrame, ProjectionPass};
use rayon::prelude::*;

/// Fits a free diffuse albedo per texel to what the specular model leaves
/// unexplained:
///
/// `d = max(0, Σ w g (y - s) / Σ w g²)` per channel,
///
/// with `g` the diffuse shading factor and `s` the predicted specular
/// reflectance. Texels without samples fall back to the albedo implied by
/// their basis weights.
#[derive(Debug, Clone, Copy)]
pub struct FinalDiffuseOptimization {
    block_rows: u32,
}

impl FinalDiffuseOptimization {
    pub fn new(block_rows: u32) -> Self { Self { block_rows } }

    /// Writes the diffuse map of `resources`. Returns, per texel, whether it
    /// was observed.
    pub fn optimize<P: ProjectionPass>(
        &self,
        pass: &P,
        solution: &SpecularFitSolution,
        resources: &mut SpecularFitResources,
    ) -> Result<Vec<bool>, FitError> {
        let width = pass.width() as usize;
        let mut diffuse = vec![Vec3::ZERO; resources.texel_count()];
        let mut observed = vec![false; resources.texel_count()];
        for rows in row_blocks(pass.height(), self.block_rows) {
            let frames = pass.render_all(rows.clone())?;
            let texels = rows.start as usize * width..rows.end as usize * width;
            let fitted: Vec<Option<DVec3>> = texels
                .clone()
                .into_par_iter()
                .map(|p| diffuse_texel(p, &frames, resources))
                .collect();
            for (p, albedo) in texels.zip(fitted) {
                observed[p] = albedo.is_some();
                diffuse[p] = albedo.unwrap_or_else(|| solution.mixed_albedo(p)).as_vec3();
            }
        }
        resources
            .diffuse_map_mut()
            .upload(&diffuse)
            .map_err(|err| FitError::graphics(err, "Failed to upload the diffuse map"))?;
        log::debug!(
            "Diffuse: {} of {} texels observed",
            observed.iter().filter(|o| **o).count(),
            observed.len()
        );
        Ok(observed)
    }
}

/// Diffuse albedo of one texel, or `None` when no sample constrains it.
pub fn diffuse_texel(texel: usize, frames: &[ObservationFrame], resources: &SpecularFitResources) -> Option<DVec3> {
    let normal = resources.normal(texel);
    let mut numerator = DVec3::ZERO;
    let mut denominator = 0.0;
    for frame in frames {
        let Some(data) = ReflectanceData::derive(frame.texel(texel), normal, resources.params()) else {
            continue;
        };
        let g = data.shading.diffuse;
        let residual = data.color - resources.predict_specular(texel, &data.shading);
        numerator += residual * (data.weight * g);
        denominator += data.weight * g * g;
    }
    (denominator > 0.0).then(|| (numerator / denominator).max(DVec3::ZERO))
}
