//! Texture-side copy of the fit state read by the per-texel programs.
use crate::{
    reflectance::{split_bin, ModelParams, Shading},
    solution::SpecularFitSolution,
};
use base::{
    math::{DVec3, Vec3},
    settings::SpecularFitSettings,
    FitError,
};
use gxtk::{Texture2d, TextureArray};

/// Single precision textures mirroring the solution, plus the maps owned by
/// the texture side (normals, roughness, specular reflectivity, final
/// diffuse).
///
/// Weights and basis tables are uploaded wholesale after every CPU update;
/// programs never read stale values between an update and its upload.
#[derive(Debug, Clone)]
pub struct SpecularFitResources {
    params: ModelParams,
    weights: TextureArray<f32>,
    /// `M + 1` columns, one row per basis.
    basis: Texture2d<Vec3>,
    albedo: Vec<Vec3>,
    normal_map: Texture2d<Vec3>,
    roughness_map: Texture2d<f32>,
    specular_map: Texture2d<Vec3>,
    diffuse_map: Texture2d<Vec3>,
}

impl SpecularFitResources {
    /// Allocates the textures. Normals start along the geometric normal.
    pub fn new(settings: &SpecularFitSettings) -> Self {
        Self::with_size(
            settings.width,
            settings.height,
            settings.basis_count,
            ModelParams::from_settings(settings),
        )
    }

    pub fn with_size(width: u32, height: u32, basis_count: usize, params: ModelParams) -> Self {
        Self {
            params,
            weights: TextureArray::new(width, height, basis_count),
            basis: Texture2d::new(params.resolution as u32 + 1, basis_count as u32),
            albedo: vec![Vec3::ZERO; basis_count],
            normal_map: Texture2d::filled(width, height, Vec3::Z),
            roughness_map: Texture2d::filled(width, height, 1.0),
            specular_map: Texture2d::new(width, height),
            diffuse_map: Texture2d::new(width, height),
        }
    }

    pub fn params(&self) -> &ModelParams { &self.params }

    pub fn width(&self) -> u32 { self.normal_map.width() }

    pub fn height(&self) -> u32 { self.normal_map.height() }

    pub fn texel_count(&self) -> usize { self.normal_map.len() }

    pub fn basis_count(&self) -> usize { self.albedo.len() }

    /// Copies the weights, basis tables and albedos of a solution.
    pub fn upload(&mut self, solution: &SpecularFitSolution) -> Result<(), FitError> {
        if solution.width() != self.width()
            || solution.height() != self.height()
            || solution.basis_count() != self.basis_count()
            || solution.resolution() != self.params.resolution
        {
            return Err(FitError::invalid_input(format!(
                "solution of {}x{} texels, {} bases and resolution {} does not match the resources",
                solution.width(),
                solution.height(),
                solution.basis_count(),
                solution.resolution()
            )));
        }
        let texels = solution.texel_count();
        let bins = self.params.resolution + 1;
        let mut layer = vec![0.0f32; texels];
        let mut table = Vec::with_capacity(bins * self.basis_count());
        for b in 0..self.basis_count() {
            for (p, w) in layer.iter_mut().enumerate() {
                *w = solution.weight(p, b) as f32;
            }
            self.weights
                .upload_layer(b, &layer)
                .map_err(|err| FitError::graphics(err, "Failed to upload the weight textures"))?;
            table.extend((0..bins).map(|i| solution.specular(b, i).as_vec3()));
            self.albedo[b] = solution.albedo(b).as_vec3();
        }
        self.basis
            .upload(&table)
            .map_err(|err| FitError::graphics(err, "Failed to upload the basis functions"))
    }

    #[inline]
    pub fn weight(&self, texel: usize, basis: usize) -> f64 { self.weights.layer(basis)[texel] as f64 }

    pub fn albedo(&self, basis: usize) -> DVec3 { self.albedo[basis].as_dvec3() }

    /// Specular value of a basis at a continuous bin, linearly interpolated.
    #[inline]
    pub fn specular(&self, basis: usize, bin: f64) -> DVec3 {
        let (i, t) = split_bin(bin, self.params.resolution);
        let y = basis as u32;
        let lo = self.basis.get(i as u32, y).as_dvec3();
        if t == 0.0 {
            lo
        } else {
            lo.lerp(self.basis.get(i as u32 + 1, y).as_dvec3(), t)
        }
    }

    /// Radiance over irradiance predicted at a texel.
    pub fn predict(&self, texel: usize, shading: &Shading) -> DVec3 {
        (0..self.basis_count()).fold(DVec3::ZERO, |acc, b| {
            let w = self.weight(texel, b);
            if w == 0.0 {
                acc
            } else {
                acc + (self.albedo(b) * shading.diffuse + self.specular(b, shading.bin) * shading.geom_ratio) * w
            }
        })
    }

    /// Specular part of [`SpecularFitResources::predict`].
    pub fn predict_specular(&self, texel: usize, shading: &Shading) -> DVec3 {
        (0..self.basis_count()).fold(DVec3::ZERO, |acc, b| {
            let w = self.weight(texel, b);
            if w == 0.0 {
                acc
            } else {
                acc + self.specular(b, shading.bin) * (shading.geom_ratio * w)
            }
        })
    }

    /// Shading normal of a texel in its geometric tangent frame.
    #[inline]
    pub fn normal(&self, texel: usize) -> DVec3 { self.normal_map.data()[texel].as_dvec3() }

    pub fn normal_map(&self) -> &Texture2d<Vec3> { &self.normal_map }

    /// Replaces the normal map wholesale, with a refined map or with a
    /// snapshot taken before a rejected refinement step.
    pub fn upload_normals(&mut self, normals: &Texture2d<Vec3>) -> Result<(), FitError> {
        self.normal_map
            .upload(normals.data())
            .map_err(|err| FitError::graphics(err, "Failed to upload the normal map"))
    }

    pub fn roughness_map(&self) -> &Texture2d<f32> { &self.roughness_map }

    pub fn roughness_map_mut(&mut self) -> &mut Texture2d<f32> { &mut self.roughness_map }

    /// Per-texel specular reflectivity at normal incidence.
    pub fn specular_map(&self) -> &Texture2d<Vec3> { &self.specular_map }

    pub fn specular_map_mut(&mut self) -> &mut Texture2d<Vec3> { &mut self.specular_map }

    /// Diffuse albedo map produced by the final diffuse fit.
    pub fn diffuse_map(&self) -> &Texture2d<Vec3> { &self.diffuse_map }

    pub fn diffuse_map_mut(&mut self) -> &mut Texture2d<Vec3> { &mut self.diffuse_map }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn solution() -> SpecularFitSolution {
        let mut solution = SpecularFitSolution::with_size(2, 1, 2, 4);
        solution.set_albedo(0, DVec3::new(0.5, 0.25, 0.125));
        solution.basis_mut(1, 0).copy_from_slice(&[4.0, 2.0, 1.0, 0.0, 0.0]);
        solution.weights_mut(0).copy_from_slice(&[1.0, 0.0]);
        solution.weights_mut(1).copy_from_slice(&[0.5, 0.5]);
        solution
    }

    #[test]
    fn upload_mirrors_the_solution() {
        let mut resources = SpecularFitResources::with_size(2, 1, 2, ModelParams::new(0.0, 4));
        resources.upload(&solution()).unwrap();
        assert_eq!(resources.weight(1, 1), 0.5);
        assert_relative_eq!(resources.albedo(0), DVec3::new(0.5, 0.25, 0.125));
        assert_relative_eq!(resources.specular(1, 1.5).x, 1.5);
        assert_relative_eq!(resources.specular(1, 4.0).x, 0.0);

        let mismatched = SpecularFitSolution::with_size(2, 1, 3, 4);
        assert!(resources.upload(&mismatched).is_err());
    }

    #[test]
    fn prediction_sums_the_weighted_bases() {
        let mut resources = SpecularFitResources::with_size(2, 1, 2, ModelParams::new(0.0, 4));
        resources.upload(&solution()).unwrap();
        let shading = Shading {
            n_dot_l: 1.0,
            n_dot_v: 1.0,
            bin: 1.0,
            geom_ratio: 0.25,
            diffuse: 0.5,
        };
        assert_relative_eq!(resources.predict(0, &shading), DVec3::new(0.25, 0.125, 0.0625));
        let expected = DVec3::new(0.125 + 0.25, 0.0625, 0.03125);
        assert_relative_eq!(resources.predict(1, &shading), expected, epsilon = 1e-7);
        assert_relative_eq!(resources.predict_specular(1, &shading), DVec3::new(0.25, 0.0, 0.0));
    }

    #[test]
    fn normals_can_be_restored() {
        let mut resources = SpecularFitResources::with_size(2, 2, 1, ModelParams::new(0.0, 4));
        let snapshot = resources.normal_map().clone();
        assert!(resources.upload_normals(&Texture2d::filled(2, 2, Vec3::X)).is_ok());
        assert_eq!(resources.normal(3), DVec3::X);
        resources.upload_normals(&snapshot).unwrap();
        assert_eq!(resources.normal(0), DVec3::Z);
        assert!(resources.upload_normals(&Texture2d::new(1, 1)).is_err());
    }
}
