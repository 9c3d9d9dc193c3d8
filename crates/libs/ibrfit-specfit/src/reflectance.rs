//! Reflectance model evaluated by every per-texel program.
//!
//! A texel's BRDF is a weighted sum of basis BRDFs. Basis `b` contributes a
//! diffuse albedo times a diffuse factor, plus a tabulated specular value
//! times the geometric ratio `G / (4 n·v)`. The table is indexed by the
//! microfacet bin `m = M sqrt(θh / (π/2))` of the half angle `θh`.
use base::{math::DVec3, settings::SpecularFitSettings};
use ibr::TexelObservation;
use std::f64::consts::{FRAC_PI_2, PI};

/// Constants of the reflectance model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelParams {
    /// Blend between the Lambertian and the specular geometric factor applied
    /// to the diffuse albedo.
    pub metallicity: f64,
    /// Microfacet resolution `M`.
    pub resolution: usize,
}

impl ModelParams {
    pub fn new(metallicity: f64, resolution: usize) -> Self {
        Self {
            metallicity,
            resolution,
        }
    }

    pub fn from_settings(settings: &SpecularFitSettings) -> Self {
        Self::new(
            settings.metallicity as f64,
            settings.microfacet_distribution_resolution,
        )
    }
}

/// Continuous microfacet bin of a half vector.
pub fn half_angle_bin(n_dot_h: f64, resolution: usize) -> f64 {
    let m = resolution as f64;
    let theta = n_dot_h.clamp(-1.0, 1.0).acos();
    (m * (theta / FRAC_PI_2).max(0.0).sqrt()).clamp(0.0, m)
}

/// Half angle of a microfacet bin, inverse of [`half_angle_bin`].
pub fn bin_angle(bin: f64, resolution: usize) -> f64 {
    let s = bin / resolution as f64;
    s * s * FRAC_PI_2
}

/// Splits a continuous bin into `(i, t)`: weight `1 - t` goes to bin `i`
/// and `t` to bin `i + 1`. The last bin takes all the weight.
#[inline]
pub fn split_bin(bin: f64, resolution: usize) -> (usize, f64) {
    let bin = bin.clamp(0.0, resolution as f64);
    let i = bin.floor() as usize;
    if i >= resolution {
        (resolution, 0.0)
    } else {
        (i, bin - i as f64)
    }
}

/// Geometric terms of a light/view configuration under a normal.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Shading {
    pub n_dot_l: f64,
    pub n_dot_v: f64,
    /// Continuous microfacet bin, in `[0, M]`.
    pub bin: f64,
    /// `G / (4 n·v)`, zero when the configuration is not lit or not seen.
    pub geom_ratio: f64,
    /// Factor applied to the diffuse albedo.
    pub diffuse: f64,
}

impl Shading {
    /// Evaluates the geometric terms. Directions are unit vectors pointing
    /// away from the surface.
    pub fn evaluate(light: DVec3, view: DVec3, normal: DVec3, params: &ModelParams) -> Self {
        let h = (light + view).try_normalize().unwrap_or(normal);
        let n_dot_l = normal.dot(light);
        let n_dot_v = normal.dot(view);
        let n_dot_h = normal.dot(h).clamp(0.0, 1.0);
        let bin = half_angle_bin(n_dot_h, params.resolution);
        if n_dot_l <= 0.0 || n_dot_v <= 0.0 {
            return Self {
                n_dot_l,
                n_dot_v,
                bin,
                ..Default::default()
            };
        }
        let v_dot_h = view.dot(h).max(1.0e-6);
        let masking = (2.0 * n_dot_h * n_dot_v / v_dot_h)
            .min(2.0 * n_dot_h * n_dot_l / v_dot_h)
            .min(1.0);
        let geom_ratio = masking / (4.0 * n_dot_v);
        let m = params.metallicity;
        Self {
            n_dot_l,
            n_dot_v,
            bin,
            geom_ratio,
            diffuse: (1.0 - m) * n_dot_l / PI + m * geom_ratio,
        }
    }

    /// Whether the surface is both lit and seen.
    #[inline]
    pub fn is_lit(&self) -> bool { self.n_dot_l > 0.0 && self.n_dot_v > 0.0 }
}

/// An observation prepared for the fit under a texel's current normal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReflectanceData {
    /// Observed radiance over irradiance.
    pub color: DVec3,
    /// Importance of the sample.
    pub weight: f64,
    pub shading: Shading,
}

impl ReflectanceData {
    /// Prepares an observation, or `None` when it does not constrain the
    /// model: not visible, or lit or seen from below the normal.
    pub fn derive(obs: &TexelObservation, normal: DVec3, params: &ModelParams) -> Option<Self> {
        if !obs.is_visible() {
            return None;
        }
        let shading = Shading::evaluate(
            obs.light_dir.as_dvec3(),
            obs.view_dir.as_dvec3(),
            normal,
            params,
        );
        shading.is_lit().then(|| Self {
            color: obs.radiance.as_dvec3(),
            weight: obs.weight as f64,
            shading,
        })
    }
}
