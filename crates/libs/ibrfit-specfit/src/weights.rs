//! Per-texel optimisation of the blending weights with the basis BRDFs held
//! fixed.
use crate::{
    nnls::nnls,
    reflectance::ReflectanceData,
    resources::SpecularFitResources,
    row_blocks,
    solution::SpecularFitSolution,
};
use base::{math::DVec3, FitError};
use ibr::{ObservationFrame, ProjectionPass};
use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;

/// Singular values below this fraction of the largest one count as zero.
const RANK_TOLERANCE: f64 = 1.0e-9;

/// Outcome of the weight solve of one texel.
#[derive(Debug, Clone, PartialEq)]
pub enum TexelSolve {
    /// Non-negative weights, one per basis.
    Solved(Vec<f64>),
    /// The bases contributing at the texel are linearly dependent.
    Singular,
    /// No sample sees the texel.
    NoSamples,
}

/// Counts of the outcomes of a weight optimisation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WeightStats {
    pub solved: usize,
    pub singular: usize,
    pub empty: usize,
}

/// Solves `min Σ w ||Σ_b x_b q_b - y||²` subject to `x >= 0` for every
/// texel, where `q_b` is the reflectance predicted by basis `b` alone.
#[derive(Debug, Clone, Copy)]
pub struct SpecularWeightOptimization {
    block_rows: u32,
}

impl SpecularWeightOptimization {
    pub fn new(block_rows: u32) -> Self { Self { block_rows } }

    /// Updates the weights and validity flags of `solution`.
    ///
    /// Singular texels keep their previous weights and are flagged invalid,
    /// as are texels without samples.
    pub fn optimize<P: ProjectionPass>(
        &self,
        pass: &P,
        resources: &SpecularFitResources,
        solution: &mut SpecularFitSolution,
    ) -> Result<WeightStats, FitError> {
        let width = pass.width() as usize;
        let mut stats = WeightStats::default();
        for rows in row_blocks(pass.height(), self.block_rows) {
            let frames = pass.render_all(rows.clone())?;
            let texels = rows.start as usize * width..rows.end as usize * width;
            let results: Vec<TexelSolve> = texels
                .clone()
                .into_par_iter()
                .map(|p| solve_texel(p, &frames, resources))
                .collect();
            for (p, result) in texels.zip(results) {
                match result {
                    TexelSolve::Solved(weights) => {
                        solution.weights_mut(p).copy_from_slice(&weights);
                        solution.set_valid(p, true);
                        stats.solved += 1;
                    }
                    TexelSolve::Singular => {
                        log::warn!(
                            "Singular weight system at texel ({}, {}), weights left unchanged",
                            p % width,
                            p / width
                        );
                        solution.set_valid(p, false);
                        stats.singular += 1;
                    }
                    TexelSolve::NoSamples => {
                        solution.set_valid(p, false);
                        stats.empty += 1;
                    }
                }
            }
        }
        log::debug!(
            "Weights: {} solved, {} singular, {} without samples",
            stats.solved,
            stats.singular,
            stats.empty
        );
        Ok(stats)
    }
}

/// Solves the weights of one texel from the frames covering it.
pub fn solve_texel(texel: usize, frames: &[ObservationFrame], resources: &SpecularFitResources) -> TexelSolve {
    let n = resources.basis_count();
    let params = resources.params();
    let normal = resources.normal(texel);
    let mut q = DMatrix::<f64>::zeros(n, n);
    let mut r = DVector::<f64>::zeros(n);
    let mut columns = vec![DVec3::ZERO; n];
    let mut samples = 0usize;
    for frame in frames {
        let Some(data) = ReflectanceData::derive(frame.texel(texel), normal, params) else {
            continue;
        };
        let s = &data.shading;
        for (b, column) in columns.iter_mut().enumerate() {
            *column = resources.albedo(b) * s.diffuse + resources.specular(b, s.bin) * s.geom_ratio;
        }
        for i in 0..n {
            for j in 0..n {
                q[(i, j)] += data.weight * columns[i].dot(columns[j]);
            }
            r[i] += data.weight * columns[i].dot(data.color);
        }
        samples += 1;
    }
    if samples == 0 {
        return TexelSolve::NoSamples;
    }

    // Bases predicting nothing at this texel keep a zero weight.
    let max_diag = q.diagonal().max();
    let active: Vec<usize> = (0..n).filter(|&i| q[(i, i)] > RANK_TOLERANCE * max_diag).collect();
    if max_diag <= 0.0 || active.is_empty() {
        return TexelSolve::Singular;
    }
    let k = active.len();
    let sub = DMatrix::from_fn(k, k, |i, j| q[(active[i], active[j])]);
    let rhs = DVector::from_fn(k, |i, _| r[active[i]]);
    let singular_values = sub.clone().singular_values();
    let threshold = RANK_TOLERANCE * singular_values.max();
    if singular_values.iter().filter(|s| **s > threshold).count() < k {
        return TexelSolve::Singular;
    }
    match nnls(&sub, &rhs) {
        Ok(x) => {
            let mut weights = vec![0.0; n];
            for (i, &b) in active.iter().enumerate() {
                weights[b] = x[i];
            }
            TexelSolve::Solved(weights)
        }
        Err(_) => TexelSolve::Singular,
    }
}
