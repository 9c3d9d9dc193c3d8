//! Monotone function families parameterising the specular lobes.
//!
//! A basis lobe is written as a non-negative combination of `K` functions
//! of the microfacet bin, each non-increasing. Non-negative coefficients then
//! produce lobes that never grow away from the half vector.
use base::{
    math::smoothstep,
    settings::{BasisFamilyKind, SpecularFitSettings},
};

/// Function family used by the BRDF reconstruction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BasisFamily {
    /// `f_k(i) = 1` for `i <= k`, `0` beyond.
    Step,
    /// Steps blurred over `width` bins with a Hermite smooth step.
    SmoothStep {
        /// Width of the transition in bins.
        width: f64,
    },
}

impl BasisFamily {
    /// Family selected by the settings.
    pub fn from_settings(settings: &SpecularFitSettings) -> Self {
        match settings.basis_family {
            BasisFamilyKind::Step => Self::Step,
            BasisFamilyKind::SmoothStep => Self::SmoothStep {
                width: settings.smoothing_width(),
            },
        }
    }

    /// Number of functions `K` for a resolution `M`.
    ///
    /// The last bin is never reached by a step, which keeps every lobe at
    /// zero at grazing half angles.
    pub fn function_count(&self, resolution: usize) -> usize { resolution }

    /// Value of function `k` at bin `bin`.
    pub fn evaluate(&self, k: usize, bin: usize) -> f64 {
        match *self {
            Self::Step => {
                if bin <= k {
                    1.0
                } else {
                    0.0
                }
            }
            Self::SmoothStep { width } => {
                let half = 0.5 * width.max(0.0) + 0.5;
                let t = (k as f64 + 0.5 + half - bin as f64) / (2.0 * half);
                smoothstep(t)
            }
        }
    }

    /// Tabulates every function over the `M + 1` bins, function-major.
    pub fn table(&self, resolution: usize) -> Vec<Vec<f64>> {
        (0..self.function_count(resolution))
            .map(|k| (0..=resolution).map(|i| self.evaluate(k, i)).collect())
            .collect()
    }
}
