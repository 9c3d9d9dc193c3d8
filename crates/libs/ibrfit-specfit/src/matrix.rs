//! Normal equations of the basis BRDF reconstruction.
//!
//! Unknowns are laid out per basis: one diffuse column followed by `M + 1`
//! specular bin columns. A sample of weight `w` with design row `a` adds
//! `w a aᵀ` to `AᵀA` and `w a y` to `Aᵀy` (rows scaled by `√w`).
use crate::{
    reflectance::{split_bin, ReflectanceData},
    resources::SpecularFitResources,
    row_blocks,
};
use base::{math::DVec3, FitError, CHANNELS};
use ibr::{ObservationFrame, ProjectionPass};
use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;

/// Relative tolerance of the dense cross-check.
pub const VALIDATION_TOLERANCE: f64 = 1.0e-3;

/// Number of unknowns of the bin-space system.
pub fn unknown_count(basis_count: usize, resolution: usize) -> usize { basis_count * (resolution + 2) }

/// `AᵀA` and one `Aᵀy` per colour channel.
#[derive(Debug, Clone, PartialEq)]
pub struct MatrixSystem {
    pub ata: DMatrix<f64>,
    pub aty: [DVector<f64>; CHANNELS],
    /// Number of samples accumulated.
    pub sample_count: usize,
}

impl MatrixSystem {
    pub fn zeros(n: usize) -> Self {
        Self {
            ata: DMatrix::zeros(n, n),
            aty: std::array::from_fn(|_| DVector::zeros(n)),
            sample_count: 0,
        }
    }

    /// Number of unknowns.
    pub fn dim(&self) -> usize { self.ata.nrows() }

    /// Adds one sample given the non-zero entries of its design row.
    pub fn accumulate(&mut self, row: &[(usize, f64)], target: DVec3, weight: f64) {
        for &(j, aj) in row {
            let waj = weight * aj;
            for &(k, ak) in row {
                self.ata[(j, k)] += waj * ak;
            }
            for c in 0..CHANNELS {
                self.aty[c][j] += waj * target[c];
            }
        }
        self.sample_count += 1;
    }

    /// Sums two partial systems.
    pub fn merge(mut self, other: Self) -> Self {
        self.ata += other.ata;
        for (a, b) in self.aty.iter_mut().zip(other.aty) {
            *a += b;
        }
        self.sample_count += other.sample_count;
        self
    }

    /// Largest absolute difference with another system, relative to the
    /// largest entry of `reference`.
    pub fn relative_difference(&self, reference: &Self) -> f64 {
        let scale = reference
            .aty
            .iter()
            .map(|v| v.amax())
            .fold(reference.ata.amax(), f64::max);
        let diff = self
            .aty
            .iter()
            .zip(&reference.aty)
            .map(|(a, b)| (a - b).amax())
            .fold((&self.ata - &reference.ata).amax(), f64::max);
        if scale > 0.0 {
            diff / scale
        } else {
            diff
        }
    }
}

/// Assembles the [`MatrixSystem`] from observation frames under the current
/// weights and normals.
pub struct ReflectanceMatrixBuilder<'a> {
    resources: &'a SpecularFitResources,
    validate: bool,
}

impl<'a> ReflectanceMatrixBuilder<'a> {
    pub fn new(resources: &'a SpecularFitResources) -> Self {
        Self {
            resources,
            validate: false,
        }
    }

    /// Cross-checks every assembly against the dense product of the design
    /// matrix.
    pub fn with_validation(mut self, validate: bool) -> Self {
        self.validate = validate;
        self
    }

    pub fn unknown_count(&self) -> usize {
        unknown_count(self.resources.basis_count(), self.resources.params().resolution)
    }

    /// Renders every view block by block and accumulates the system.
    pub fn build<P: ProjectionPass>(&self, pass: &P, block_rows: u32) -> Result<MatrixSystem, FitError> {
        let mut system = MatrixSystem::zeros(self.unknown_count());
        for rows in row_blocks(pass.height(), block_rows) {
            let frames = pass.render_all(rows)?;
            system = system.merge(self.accumulate_frames(&frames)?);
        }
        log::debug!(
            "Assembled a {}x{} reflectance system from {} samples",
            system.dim(),
            system.dim(),
            system.sample_count
        );
        Ok(system)
    }

    /// Accumulates frames in parallel, one partial system per worker.
    pub fn accumulate_frames(&self, frames: &[ObservationFrame]) -> Result<MatrixSystem, FitError> {
        let n = self.unknown_count();
        let system = frames
            .par_iter()
            .fold(
                || MatrixSystem::zeros(n),
                |mut system, frame| {
                    self.accumulate_frame(&mut system, frame);
                    system
                },
            )
            .reduce(|| MatrixSystem::zeros(n), MatrixSystem::merge);

        if self.validate {
            let dense = self.dense_system(frames);
            let diff = system.relative_difference(&dense);
            if diff > VALIDATION_TOLERANCE {
                return Err(FitError::numerical(format!(
                    "Incremental reflectance system differs from the dense product by {:.3e}",
                    diff
                )));
            }
            log::debug!("Reflectance system validated, relative difference {:.3e}", diff);
        }
        Ok(system)
    }

    fn accumulate_frame(&self, system: &mut MatrixSystem, frame: &ObservationFrame) {
        let params = self.resources.params();
        let first = frame.first_texel();
        let mut row = Vec::with_capacity(3 * self.resources.basis_count());
        for (i, obs) in frame.texels.iter().enumerate() {
            let texel = first + i;
            let Some(data) = ReflectanceData::derive(obs, self.resources.normal(texel), params) else {
                continue;
            };
            self.design_row(texel, &data, &mut row);
            if !row.is_empty() {
                system.accumulate(&row, data.color, data.weight);
            }
        }
    }

    /// Non-zero entries of the design row of a sample.
    fn design_row(&self, texel: usize, data: &ReflectanceData, row: &mut Vec<(usize, f64)>) {
        row.clear();
        let resolution = self.resources.params().resolution;
        let stride = resolution + 2;
        let s = &data.shading;
        let (i, t) = split_bin(s.bin, resolution);
        for b in 0..self.resources.basis_count() {
            let w = self.resources.weight(texel, b);
            if w == 0.0 {
                continue;
            }
            let base = b * stride;
            let entries = [
                (base, w * s.diffuse),
                (base + 1 + i, w * s.geom_ratio * (1.0 - t)),
                (base + 2 + i, w * s.geom_ratio * t),
            ];
            row.extend(entries.into_iter().filter(|(_, v)| *v != 0.0));
        }
    }

    /// Same system computed from the explicit design matrix.
    fn dense_system(&self, frames: &[ObservationFrame]) -> MatrixSystem {
        let n = self.unknown_count();
        let params = self.resources.params();
        let mut a = Vec::new();
        let mut y: [Vec<f64>; CHANNELS] = Default::default();
        let mut row = Vec::new();
        for frame in frames {
            let first = frame.first_texel();
            for (i, obs) in frame.texels.iter().enumerate() {
                let texel = first + i;
                let Some(data) = ReflectanceData::derive(obs, self.resources.normal(texel), params) else {
                    continue;
                };
                self.design_row(texel, &data, &mut row);
                if row.is_empty() {
                    continue;
                }
                let scale = data.weight.sqrt();
                let mut dense = vec![0.0; n];
                for &(j, v) in &row {
                    dense[j] = v * scale;
                }
                a.extend(dense);
                for c in 0..CHANNELS {
                    y[c].push(data.color[c] * scale);
                }
            }
        }
        let rows = y[0].len();
        let mut system = MatrixSystem::zeros(n);
        if rows == 0 {
            return system;
        }
        let a = DMatrix::from_row_slice(rows, n, &a);
        system.ata = a.tr_mul(&a);
        for c in 0..CHANNELS {
            system.aty[c] = a.tr_mul(&DVector::from_column_slice(&y[c]));
        }
        system.sample_count = rows;
        system
    }
}
