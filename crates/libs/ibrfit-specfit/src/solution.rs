//! CPU-side state of the fit.
use base::{math::DVec3, settings::SpecularFitSettings, CHANNELS};

/// Everything the fit solves for, in double precision.
///
/// Blending weights are stored texel-major (`B` consecutive weights per
/// texel). Basis tables hold `M + 1` specular values per basis and channel,
/// indexed by microfacet bin.
#[derive(Debug, Clone, PartialEq)]
pub struct SpecularFitSolution {
    width: u32,
    height: u32,
    basis_count: usize,
    resolution: usize,
    weights: Vec<f64>,
    valid: Vec<bool>,
    basis: Vec<f64>,
    albedo: Vec<DVec3>,
}

impl SpecularFitSolution {
    /// Creates an all-zero solution with every texel invalid.
    pub fn new(settings: &SpecularFitSettings) -> Self {
        Self::with_size(
            settings.width,
            settings.height,
            settings.basis_count,
            settings.microfacet_distribution_resolution,
        )
    }

    /// Creates an all-zero solution of the given dimensions.
    pub fn with_size(width: u32, height: u32, basis_count: usize, resolution: usize) -> Self {
        let texels = width as usize * height as usize;
        Self {
            width,
            height,
            basis_count,
            resolution,
            weights: vec![0.0; texels * basis_count],
            valid: vec![false; texels],
            basis: vec![0.0; basis_count * CHANNELS * (resolution + 1)],
            albedo: vec![DVec3::ZERO; basis_count],
        }
    }

    pub fn width(&self) -> u32 { self.width }

    pub fn height(&self) -> u32 { self.height }

    /// Number of basis BRDFs, `B`.
    pub fn basis_count(&self) -> usize { self.basis_count }

    /// Microfacet resolution, `M`.
    pub fn resolution(&self) -> usize { self.resolution }

    pub fn texel_count(&self) -> usize { self.valid.len() }

    /// Blending weights of a texel.
    #[inline]
    pub fn weights(&self, texel: usize) -> &[f64] {
        let b = self.basis_count;
        &self.weights[texel * b..(texel + 1) * b]
    }

    /// Mutable blending weights of a texel.
    #[inline]
    pub fn weights_mut(&mut self, texel: usize) -> &mut [f64] {
        let b = self.basis_count;
        &mut self.weights[texel * b..(texel + 1) * b]
    }

    #[inline]
    pub fn weight(&self, texel: usize, basis: usize) -> f64 { self.weights[texel * self.basis_count + basis] }

    /// All weights, texel-major.
    pub fn weight_data(&self) -> &[f64] { &self.weights }

    /// Whether the weights of a texel were solved successfully.
    #[inline]
    pub fn is_valid(&self, texel: usize) -> bool { self.valid[texel] }

    pub fn set_valid(&mut self, texel: usize, valid: bool) { self.valid[texel] = valid; }

    pub fn valid_flags(&self) -> &[bool] { &self.valid }

    pub fn valid_count(&self) -> usize { self.valid.iter().filter(|v| **v).count() }

    /// Weights and validity flags, mutably and at once.
    pub fn weights_and_flags_mut(&mut self) -> (&mut [f64], &mut [bool]) { (&mut self.weights, &mut self.valid) }

    /// Tabulated specular values of one basis and channel.
    #[inline]
    pub fn basis(&self, basis: usize, channel: usize) -> &[f64] {
        let n = self.resolution + 1;
        let i = (basis * CHANNELS + channel) * n;
        &self.basis[i..i + n]
    }

    #[inline]
    pub fn basis_mut(&mut self, basis: usize, channel: usize) -> &mut [f64] {
        let n = self.resolution + 1;
        let i = (basis * CHANNELS + channel) * n;
        &mut self.basis[i..i + n]
    }

    /// Specular value of a basis at bin `bin`, all channels.
    pub fn specular(&self, basis: usize, bin: usize) -> DVec3 {
        DVec3::new(
            self.basis(basis, 0)[bin],
            self.basis(basis, 1)[bin],
            self.basis(basis, 2)[bin],
        )
    }

    /// Diffuse albedo of a basis.
    #[inline]
    pub fn albedo(&self, basis: usize) -> DVec3 { self.albedo[basis] }

    pub fn set_albedo(&mut self, basis: usize, albedo: DVec3) { self.albedo[basis] = albedo; }

    /// Mixture of the specular lobes at a texel, per channel and bin.
    pub fn mixed_specular(&self, texel: usize) -> [Vec<f64>; CHANNELS] {
        let n = self.resolution + 1;
        let weights = self.weights(texel);
        std::array::from_fn(|c| {
            let mut lobe = vec![0.0; n];
            for (b, w) in weights.iter().enumerate().filter(|(_, w)| **w != 0.0) {
                for (dst, src) in lobe.iter_mut().zip(self.basis(b, c)) {
                    *dst += w * src;
                }
            }
            lobe
        })
    }

    /// Diffuse albedo implied by the weights of a texel.
    pub fn mixed_albedo(&self, texel: usize) -> DVec3 {
        self.weights(texel)
            .iter()
            .zip(&self.albedo)
            .fold(DVec3::ZERO, |acc, (w, a)| acc + *a * *w)
    }

    /// Fills the weights of invalid texels from their valid neighbours.
    /// Returns the number of passes run.
    pub fn fill_weight_holes(&mut self) -> usize {
        let (w, h, b) = (self.width, self.height, self.basis_count);
        crate::holefill::fill_holes(w, h, b, &mut self.weights, &mut self.valid)
    }
}
