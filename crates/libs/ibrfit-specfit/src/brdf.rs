//! Reconstruction of the basis BRDFs from the assembled system.
use crate::{
    basis::BasisFamily,
    matrix::{unknown_count, MatrixSystem},
    nnls::nnls,
    solution::SpecularFitSolution,
};
use base::{settings::SpecularFitSettings, FitError, CHANNELS};
use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;

/// Ridge added to the reduced system, relative to its mean diagonal.
const RIDGE: f64 = 1.0e-10;

/// Solves the bin-space system in the span of a monotone function family.
///
/// Bin values are written `x = T c` with `c >= 0`: per basis, the diffuse
/// albedo maps to itself and the `M + 1` specular bins are a combination of
/// the family's `K` functions. Non-negative coefficients of non-increasing
/// functions give non-negative, non-increasing lobes.
#[derive(Debug, Clone, Copy)]
pub struct BrdfReconstruction {
    family: BasisFamily,
    basis_count: usize,
    resolution: usize,
}

impl BrdfReconstruction {
    pub fn new(family: BasisFamily, basis_count: usize, resolution: usize) -> Self {
        Self {
            family,
            basis_count,
            resolution,
        }
    }

    pub fn from_settings(settings: &SpecularFitSettings) -> Self {
        Self::new(
            BasisFamily::from_settings(settings),
            settings.basis_count,
            settings.microfacet_distribution_resolution,
        )
    }

    /// Number of reduced coefficients per basis.
    fn coefficient_stride(&self) -> usize { 1 + self.family.function_count(self.resolution) }

    /// Maps the reduced coefficients to the bin-space unknowns.
    pub fn transform(&self) -> DMatrix<f64> {
        let stride = self.resolution + 2;
        let cstride = self.coefficient_stride();
        let mut t = DMatrix::zeros(
            unknown_count(self.basis_count, self.resolution),
            self.basis_count * cstride,
        );
        let table = self.family.table(self.resolution);
        for b in 0..self.basis_count {
            t[(b * stride, b * cstride)] = 1.0;
            for (k, function) in table.iter().enumerate() {
                for (i, value) in function.iter().enumerate() {
                    t[(b * stride + 1 + i, b * cstride + 1 + k)] = *value;
                }
            }
        }
        t
    }

    /// Updates the albedos and basis tables of `solution` from the system.
    pub fn reconstruct(&self, system: &MatrixSystem, solution: &mut SpecularFitSolution) -> Result<(), FitError> {
        let n = unknown_count(self.basis_count, self.resolution);
        if system.dim() != n
            || solution.basis_count() != self.basis_count
            || solution.resolution() != self.resolution
        {
            return Err(FitError::invalid_input(format!(
                "reflectance system of {} unknowns does not match {} bases at resolution {}",
                system.dim(),
                self.basis_count,
                self.resolution
            )));
        }
        let t = self.transform();
        let mut reduced = t.tr_mul(&(&system.ata * &t));
        let dim = reduced.nrows();
        let ridge = RIDGE * reduced.trace() / dim as f64;
        if ridge > 0.0 {
            for i in 0..dim {
                reduced[(i, i)] += ridge;
            }
        }

        let coefficients = (0..CHANNELS)
            .into_par_iter()
            .map(|c| nnls(&reduced, &t.tr_mul(&system.aty[c])))
            .collect::<Result<Vec<_>, _>>()?;

        let stride = self.resolution + 2;
        for (c, coeffs) in coefficients.iter().enumerate() {
            let x: DVector<f64> = &t * coeffs;
            for b in 0..self.basis_count {
                let mut albedo = solution.albedo(b);
                albedo[c] = x[b * stride].max(0.0);
                solution.set_albedo(b, albedo);
                let base = b * stride + 1;
                for (dst, src) in solution
                    .basis_mut(b, c)
                    .iter_mut()
                    .zip(x.rows(base, self.resolution + 1).iter())
                {
                    *dst = src.max(0.0);
                }
            }
        }
        log::debug!(
            "Reconstructed {} basis BRDFs from {} samples",
            self.basis_count,
            system.sample_count
        );
        Ok(())
    }
}
