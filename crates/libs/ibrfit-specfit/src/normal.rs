//! Refinement of the per-texel shading normals.
//!
//! Normals are parameterised by their slopes `(x / z, y / z)` in the texel's
//! geometric tangent frame. One step runs a damped Gauss–Newton update of
//! the slopes of every texel against the full basis model.
use crate::{
    reflectance::{ReflectanceData, Shading},
    resources::SpecularFitResources,
    row_blocks,
};
use base::{math::DVec3, FitError, CHANNELS};
use glam::DVec2;
use ibr::{ObservationFrame, ProjectionPass, TexelObservation};
use rayon::prelude::*;

/// Central difference step on the slopes.
const SLOPE_STEP: f64 = 1.0e-4;
/// About 76 degrees away from the geometric normal.
const MAX_SLOPE: f64 = 4.0;
/// Largest change of the slopes in one step.
const MAX_SLOPE_CHANGE: f64 = 0.5;

/// Outcome of a normal refinement step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NormalStepStats {
    pub updated: usize,
    pub unchanged: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct NormalOptimization {
    block_rows: u32,
}

impl NormalOptimization {
    pub fn new(block_rows: u32) -> Self { Self { block_rows } }

    /// Runs one refinement step over the whole normal map. `damping` scales
    /// the diagonal of the Gauss–Newton system.
    pub fn step<P: ProjectionPass>(
        &self,
        pass: &P,
        resources: &mut SpecularFitResources,
        damping: f64,
    ) -> Result<NormalStepStats, FitError> {
        let width = pass.width() as usize;
        let mut normals = resources.normal_map().clone();
        let mut stats = NormalStepStats::default();
        for rows in row_blocks(pass.height(), self.block_rows) {
            let frames = pass.render_all(rows.clone())?;
            let texels = rows.start as usize * width..rows.end as usize * width;
            let refined: Vec<Option<DVec3>> = texels
                .clone()
                .into_par_iter()
                .map(|p| refine_texel(p, &frames, resources, damping))
                .collect();
            for (p, normal) in texels.zip(refined) {
                match normal {
                    Some(n) => {
                        normals.data_mut()[p] = n.as_vec3();
                        stats.updated += 1;
                    }
                    None => stats.unchanged += 1,
                }
            }
        }
        resources.upload_normals(&normals)?;
        log::debug!(
            "Normal step (damping {:.1e}): {} texels updated, {} unchanged",
            damping,
            stats.updated,
            stats.unchanged
        );
        Ok(stats)
    }
}

/// Slopes of a unit normal.
pub fn slopes(normal: DVec3) -> DVec2 {
    if normal.z <= f64::EPSILON {
        return DVec2::ZERO;
    }
    DVec2::new(normal.x / normal.z, normal.y / normal.z)
}

/// Unit normal of given slopes.
pub fn normal_from_slopes(slopes: DVec2) -> DVec3 { DVec3::new(slopes.x, slopes.y, 1.0).normalize() }

/// Weighted residuals of the samples of a texel under a candidate normal.
fn residuals(
    texel: usize,
    samples: &[TexelObservation],
    slopes: DVec2,
    resources: &SpecularFitResources,
    out: &mut Vec<f64>,
) {
    let normal = normal_from_slopes(slopes);
    out.clear();
    for obs in samples {
        let shading = Shading::evaluate(
            obs.light_dir.as_dvec3(),
            obs.view_dir.as_dvec3(),
            normal,
            resources.params(),
        );
        let residual = resources.predict(texel, &shading) - obs.radiance.as_dvec3();
        let scale = (obs.weight as f64).sqrt();
        out.extend((0..CHANNELS).map(|c| scale * residual[c]));
    }
}

fn squared_norm(v: &[f64]) -> f64 { v.iter().map(|r| r * r).sum() }

/// New normal of a texel, or `None` when the step does not lower the
/// texel's own residual.
pub fn refine_texel(
    texel: usize,
    frames: &[ObservationFrame],
    resources: &SpecularFitResources,
    damping: f64,
) -> Option<DVec3> {
    let n0 = resources.normal(texel);
    let samples: Vec<TexelObservation> = frames
        .iter()
        .map(|frame| *frame.texel(texel))
        .filter(|obs| ReflectanceData::derive(obs, n0, resources.params()).is_some())
        .collect();
    // Two slopes need at least as many scalar residuals.
    if samples.len() * CHANNELS < 2 {
        return None;
    }

    let s0 = slopes(n0);
    let mut r0 = Vec::new();
    residuals(texel, &samples, s0, resources, &mut r0);
    let cost0 = squared_norm(&r0);

    let mut plus = Vec::new();
    let mut minus = Vec::new();
    let jacobian: [Vec<f64>; 2] = std::array::from_fn(|axis| {
        let h = if axis == 0 {
            DVec2::new(SLOPE_STEP, 0.0)
        } else {
            DVec2::new(0.0, SLOPE_STEP)
        };
        residuals(texel, &samples, s0 + h, resources, &mut plus);
        residuals(texel, &samples, s0 - h, resources, &mut minus);
        plus.iter()
            .zip(&minus)
            .map(|(p, m)| (p - m) / (2.0 * SLOPE_STEP))
            .collect()
    });

    let dot = |a: &[f64], b: &[f64]| a.iter().zip(b).map(|(x, y)| x * y).sum::<f64>();
    let a = dot(&jacobian[0], &jacobian[0]) * (1.0 + damping) + 1.0e-12;
    let b = dot(&jacobian[0], &jacobian[1]);
    let c = dot(&jacobian[1], &jacobian[1]) * (1.0 + damping) + 1.0e-12;
    let g = DVec2::new(dot(&jacobian[0], &r0), dot(&jacobian[1], &r0));
    let det = a * c - b * b;
    if det <= 0.0 || !det.is_finite() {
        return None;
    }
    let delta = -DVec2::new(c * g.x - b * g.y, a * g.y - b * g.x) / det;
    let s1 = (s0 + delta.clamp_length_max(MAX_SLOPE_CHANGE)).clamp_length_max(MAX_SLOPE);

    let mut r1 = Vec::new();
    residuals(texel, &samples, s1, resources, &mut r1);
    (squared_norm(&r1) < cost0).then(|| normal_from_slopes(s1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{reflectance::ModelParams, solution::SpecularFitSolution};
    use approx::assert_relative_eq;
    use base::math::Vec3;

    /// One glossy basis seen under a tilted normal from several lights.
    fn setup(true_normal: DVec3) -> (SpecularFitResources, Vec<ObservationFrame>) {
        let params = ModelParams::new(0.0, 8);
        let mut solution = SpecularFitSolution::with_size(1, 1, 1, 8);
        solution.set_albedo(0, DVec3::splat(0.5));
        for c in 0..CHANNELS {
            let lobe: Vec<f64> = (0..=8).map(|i| 4.0 * (1.0 - i as f64 / 8.0).powi(3)).collect();
            solution.basis_mut(0, c).copy_from_slice(&lobe);
        }
        solution.weights_mut(0)[0] = 1.0;
        let mut resources = SpecularFitResources::with_size(1, 1, 1, params);
        resources.upload(&solution).unwrap();

        let lights = [
            Vec3::new(0.4, 0.1, 1.0),
            Vec3::new(-0.3, 0.5, 1.0),
            Vec3::new(0.2, -0.6, 1.0),
            Vec3::new(-0.5, -0.2, 1.0),
            Vec3::new(0.0, 0.0, 1.0),
        ];
        let frames = lights
            .iter()
            .enumerate()
            .map(|(view, l)| {
                let l = l.normalize();
                let v = Vec3::new(-l.x * 0.5, l.y * 0.3, 1.0).normalize();
                let shading = Shading::evaluate(l.as_dvec3(), v.as_dvec3(), true_normal, &params);
                let mut frame = ObservationFrame::empty(view, 1, 0..1);
                frame.texels[0] = TexelObservation {
                    radiance: resources.predict(0, &shading).as_vec3(),
                    light_dir: l,
                    view_dir: v,
                    weight: v.z,
                };
                frame
            })
            .collect();
        (resources, frames)
    }

    #[test]
    fn slope_parameterisation() {
        let n = DVec3::new(0.3, -0.2, 0.9).normalize();
        assert_relative_eq!(normal_from_slopes(slopes(n)), n, epsilon = 1e-12);
        assert_eq!(slopes(DVec3::X), DVec2::ZERO);
    }

    #[test]
    fn steps_move_towards_the_true_normal() {
        let truth = DVec3::new(0.15, -0.1, 1.0).normalize();
        let (mut resources, frames) = setup(truth);
        let initial = resources.normal(0).angle_between(truth);
        let mut steps = 0;
        for _ in 0..20 {
            let Some(n) = refine_texel(0, &frames, &resources, 1e-3) else {
                break;
            };
            let mut normals = resources.normal_map().clone();
            normals.data_mut()[0] = n.as_vec3();
            resources.upload_normals(&normals).unwrap();
            steps += 1;
        }
        let angle = resources.normal(0).angle_between(truth);
        assert!(steps > 0);
        assert!(angle < 0.25 * initial, "angle went from {} to {}", initial, angle);
    }

    #[test]
    fn texels_without_samples_are_unchanged() {
        let (resources, mut frames) = setup(DVec3::Z);
        frames.iter_mut().for_each(|f| f.texels[0].weight = 0.0);
        assert!(refine_texel(0, &frames, &resources, 1e-3).is_none());
    }
}
