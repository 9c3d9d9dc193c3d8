//! Per-texel roughness and specular reflectivity.
//!
//! The specular lobe of a texel (the weighted mixture of the basis lobes) is
//! approximated by `F0 · D(θh; α)` with `D` the GGX distribution. `α` is
//! fitted with Levenberg–Marquardt; `F0` follows in closed form per channel.
use crate::{reflectance::bin_angle, resources::SpecularFitResources, solution::SpecularFitSolution};
use base::{math::Vec3, CHANNELS};
use levenberg_marquardt::{LeastSquaresProblem, LevenbergMarquardt};
use nalgebra::{DVector, Dyn, Matrix, Owned, VecStorage, Vector, U1};
use rayon::prelude::*;
use std::f64::consts::PI;

pub const MIN_ROUGHNESS: f64 = 1.0e-3;
pub const MAX_ROUGHNESS: f64 = 2.0;
/// Number of candidates of the coarse search seeding the solver.
const SEARCH_STEPS: usize = 24;

/// GGX (Trowbridge–Reitz) normal distribution.
pub fn ggx(alpha: f64, cos_theta: f64) -> f64 {
    let a2 = alpha * alpha;
    let c2 = cos_theta * cos_theta;
    let d = (a2 - 1.0) * c2 + 1.0;
    a2 / (PI * d * d)
}

/// Fitted lobe of one texel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LobeFit {
    pub roughness: f64,
    pub reflectivity: [f64; CHANNELS],
}

/// Least squares fit of a GGX lobe to a tabulated one.
struct GgxLobeProblem<'a> {
    cosines: &'a [f64],
    lobe: &'a [Vec<f64>; CHANNELS],
    alpha: f64,
}

impl GgxLobeProblem<'_> {
    fn effective(alpha: f64) -> f64 { alpha.abs().clamp(MIN_ROUGHNESS, MAX_ROUGHNESS) }

    /// Best reflectivity per channel for a roughness.
    fn reflectivity(&self, alpha: f64) -> [f64; CHANNELS] {
        let a = Self::effective(alpha);
        let d2: f64 = self.cosines.iter().map(|c| ggx(a, *c).powi(2)).sum();
        std::array::from_fn(|ch| {
            if d2 <= 0.0 {
                return 0.0;
            }
            let ds: f64 = self
                .cosines
                .iter()
                .zip(&self.lobe[ch])
                .map(|(c, s)| ggx(a, *c) * s)
                .sum();
            (ds / d2).max(0.0)
        })
    }

    fn residual_vector(&self, alpha: f64) -> DVector<f64> {
        let a = Self::effective(alpha);
        let f0 = self.reflectivity(alpha);
        let n = self.cosines.len();
        DVector::from_fn(CHANNELS * n, |i, _| {
            let (ch, bin) = (i / n, i % n);
            f0[ch] * ggx(a, self.cosines[bin]) - self.lobe[ch][bin]
        })
    }

    fn cost(&self, alpha: f64) -> f64 { self.residual_vector(alpha).norm_squared() }
}

impl LeastSquaresProblem<f64, Dyn, U1> for GgxLobeProblem<'_> {
    type ResidualStorage = VecStorage<f64, Dyn, U1>;
    type JacobianStorage = Owned<f64, Dyn, U1>;
    type ParameterStorage = Owned<f64, U1, U1>;

    fn set_params(&mut self, x: &Vector<f64, U1, Self::ParameterStorage>) { self.alpha = x[0]; }

    fn params(&self) -> Vector<f64, U1, Self::ParameterStorage> {
        Vector::<f64, U1, Self::ParameterStorage>::new(self.alpha)
    }

    fn residuals(&self) -> Option<Matrix<f64, Dyn, U1, Self::ResidualStorage>> {
        Some(self.residual_vector(self.alpha))
    }

    fn jacobian(&self) -> Option<Matrix<f64, Dyn, U1, Self::JacobianStorage>> {
        let h = 1.0e-6 * self.alpha.abs().max(1.0e-2);
        let plus = self.residual_vector(self.alpha + h);
        let minus = self.residual_vector(self.alpha - h);
        Some((plus - minus) / (2.0 * h))
    }
}

/// Fits a GGX lobe to a tabulated lobe over the `M + 1` bins.
pub fn fit_lobe(lobe: &[Vec<f64>; CHANNELS], resolution: usize) -> Option<LobeFit> {
    if lobe.iter().all(|l| l.iter().all(|v| *v <= 0.0)) {
        return None;
    }
    let cosines: Vec<f64> = (0..=resolution)
        .map(|i| bin_angle(i as f64, resolution).cos())
        .collect();
    let problem = GgxLobeProblem {
        cosines: &cosines,
        lobe,
        alpha: 1.0,
    };

    // Coarse logarithmic search, then refinement.
    let ratio = (1.0 / 0.01f64).powf(1.0 / (SEARCH_STEPS - 1) as f64);
    let (seed, seed_cost) = (0..SEARCH_STEPS)
        .map(|i| 0.01 * ratio.powi(i as i32))
        .map(|alpha| (alpha, problem.cost(alpha)))
        .min_by(|a, b| a.1.total_cmp(&b.1))?;

    let problem = GgxLobeProblem { alpha: seed, ..problem };
    let solver = LevenbergMarquardt::new();
    let (result, report) = solver.minimize(problem);
    let alpha = if report.termination.was_successful() && result.cost(result.alpha) <= seed_cost {
        result.alpha
    } else {
        log::trace!("Roughness refinement rejected: {:?}", report.termination);
        seed
    };
    let roughness = GgxLobeProblem::effective(alpha);
    Some(LobeFit {
        roughness,
        reflectivity: result.reflectivity(roughness),
    })
}

/// Outcome of a roughness pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoughnessStats {
    pub fitted: usize,
    pub skipped: usize,
}

/// Fits the roughness and reflectivity maps from the current solution.
#[derive(Debug, Clone, Copy, Default)]
pub struct RoughnessOptimization;

impl RoughnessOptimization {
    /// Writes the roughness and specular maps of `resources`. Texels
    /// without a specular lobe get the roughest value and no reflectivity.
    pub fn optimize(&self, solution: &SpecularFitSolution, resources: &mut SpecularFitResources) -> RoughnessStats {
        let resolution = solution.resolution();
        let fits: Vec<Option<LobeFit>> = (0..solution.texel_count())
            .into_par_iter()
            .map(|p| {
                if !solution.is_valid(p) {
                    return None;
                }
                fit_lobe(&solution.mixed_specular(p), resolution)
            })
            .collect();

        let mut stats = RoughnessStats::default();
        let roughness = resources.roughness_map_mut().data_mut();
        for (texel, fit) in roughness.iter_mut().zip(&fits) {
            *texel = fit.map_or(1.0, |f| f.roughness as f32);
        }
        let specular = resources.specular_map_mut().data_mut();
        for (texel, fit) in specular.iter_mut().zip(&fits) {
            *texel = match fit {
                Some(f) => {
                    stats.fitted += 1;
                    Vec3::new(
                        f.reflectivity[0] as f32,
                        f.reflectivity[1] as f32,
                        f.reflectivity[2] as f32,
                    )
                }
                None => {
                    stats.skipped += 1;
                    Vec3::ZERO
                }
            };
        }
        log::debug!(
            "Roughness: {} texels fitted, {} skipped",
            stats.fitted,
            stats.skipped
        );
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn tabulate(alpha: f64, f0: [f64; CHANNELS], resolution: usize) -> [Vec<f64>; CHANNELS] {
        std::array::from_fn(|c| {
            (0..=resolution)
                .map(|i| f0[c] * ggx(alpha, bin_angle(i as f64, resolution).cos()))
                .collect()
        })
    }

    #[test]
    fn ggx_is_normalised() {
        // ∫ D cosθ dω = 1
        let n = 20000;
        let alpha = 0.3;
        let integral: f64 = (0..n)
            .map(|i| {
                let theta = (i as f64 + 0.5) / n as f64 * PI / 2.0;
                ggx(alpha, theta.cos()) * theta.cos() * theta.sin() * 2.0 * PI * (PI / 2.0 / n as f64)
            })
            .sum();
        assert_relative_eq!(integral, 1.0, epsilon = 1e-3);
    }

    #[test]
    fn recovers_a_ggx_lobe() {
        let lobe = tabulate(0.2, [0.04, 0.05, 0.06], 32);
        let fit = fit_lobe(&lobe, 32).unwrap();
        assert_relative_eq!(fit.roughness, 0.2, epsilon = 1e-3);
        assert_relative_eq!(fit.reflectivity[0], 0.04, epsilon = 1e-4);
        assert_relative_eq!(fit.reflectivity[2], 0.06, epsilon = 1e-4);
    }

    #[test]
    fn empty_lobes_are_skipped() {
        let lobe: [Vec<f64>; CHANNELS] = std::array::from_fn(|_| vec![0.0; 9]);
        assert!(fit_lobe(&lobe, 8).is_none());
    }

    #[test]
    fn writes_the_maps() {
        let mut solution = SpecularFitSolution::with_size(2, 1, 1, 16);
        let lobe = tabulate(0.5, [0.1, 0.1, 0.1], 16);
        for c in 0..CHANNELS {
            solution.basis_mut(0, c).copy_from_slice(&lobe[c]);
        }
        solution.weights_mut(0)[0] = 1.0;
        solution.set_valid(0, true);
        let mut resources = SpecularFitResources::new(&base::settings::SpecularFitSettings {
            width: 2,
            height: 1,
            basis_count: 1,
            microfacet_distribution_resolution: 16,
            ..Default::default()
        });
        let stats = RoughnessOptimization.optimize(&solution, &mut resources);
        assert_eq!(stats, RoughnessStats { fitted: 1, skipped: 1 });
        assert_relative_eq!(resources.roughness_map().data()[0], 0.5, epsilon = 1e-3);
        assert_eq!(resources.roughness_map().data()[1], 1.0);
        assert_relative_eq!(resources.specular_map().data()[0].x, 0.1, epsilon = 1e-4);
        assert_eq!(resources.specular_map().data()[1], Vec3::ZERO);
    }
}
