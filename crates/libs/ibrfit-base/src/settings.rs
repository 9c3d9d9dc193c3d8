//! Settings of the specular basis fitting.
use crate::{error::FitErrorKind, FitError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Family of monotone functions used to parameterise the specular lobes.
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BasisFamilyKind {
    /// Hard steps: each lobe is a non-increasing staircase over the
    /// microfacet bins.
    #[default]
    Step,
    /// Steps blurred with a smooth step whose width is controlled by
    /// [`SpecularFitSettings::specular_smoothness`].
    SmoothStep,
}

/// Read-only key/value settings driving the fit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpecularFitSettings {
    /// Width of the fitted textures in texels.
    pub width: u32,
    /// Height of the fitted textures in texels.
    pub height: u32,
    /// Number of specular basis functions.
    pub basis_count: usize,
    /// Number of discretised half-angle bins minus one.
    pub microfacet_distribution_resolution: usize,
    /// Blend between the Lambertian and the specular geometric factor used by
    /// the diffuse albedo, in [0, 1].
    pub metallicity: f32,
    /// Width of the smooth step relative to the microfacet resolution, in
    /// [0, 1]. Only used by [`BasisFamilyKind::SmoothStep`].
    pub specular_smoothness: f32,
    /// Whether the per-texel normals are refined.
    pub normal_refinement: bool,
    /// Minimum decrease of the RMS error over a full outer iteration needed to
    /// keep iterating.
    pub convergence_tolerance: f64,
    /// Number of texel rows processed per block.
    pub weight_block_size: u32,
    /// Directory receiving the fitted maps.
    pub output_dir: PathBuf,
    /// Gamma of the input photographs.
    pub gamma: f32,
    /// Family of the specular basis functions.
    pub basis_family: BasisFamilyKind,
    /// Upper bound on the number of outer iterations.
    pub max_iterations: usize,
    /// Upper bound on the number of normal refinement steps per outer
    /// iteration.
    pub normal_max_iterations: usize,
    /// Number of Lloyd iterations of the k-means initialisation.
    pub kmeans_iterations: usize,
    /// Whether intermediate maps are written after each iteration.
    pub debug_output: bool,
    /// Whether the matrix assembly is cross-checked against a dense product.
    pub validate_matrices: bool,
}

impl Default for SpecularFitSettings {
    fn default() -> Self {
        Self {
            width: 512,
            height: 512,
            basis_count: 8,
            microfacet_distribution_resolution: 90,
            metallicity: 0.0,
            specular_smoothness: 0.0,
            normal_refinement: true,
            convergence_tolerance: 1.0e-4,
            weight_block_size: 64,
            output_dir: PathBuf::from("output"),
            gamma: 2.2,
            basis_family: BasisFamilyKind::Step,
            max_iterations: 32,
            normal_max_iterations: 4,
            kmeans_iterations: 32,
            debug_output: false,
            validate_matrices: false,
        }
    }
}

impl SpecularFitSettings {
    /// Loads the settings from a .toml file. Missing keys take their default
    /// value. A relative output directory is resolved against the directory
    /// of the file.
    pub fn load(path: &Path) -> Result<Self, FitError> {
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        let string = std::fs::read_to_string(path).map_err(|err| {
            FitError::from_io_error(
                err,
                format!("Failed to read settings file: {}", path.display()),
            )
        })?;
        let mut settings: SpecularFitSettings = toml::from_str(&string).map_err(|err| {
            FitError::new(
                FitErrorKind::InvalidInput,
                format!("Failed to parse settings file: {}", path.display()),
                Some(Box::new(err)),
            )
        })?;
        if settings.output_dir.is_relative() {
            settings.output_dir = base.join(&settings.output_dir);
        }
        settings.validate()?;
        log::info!("Loaded settings from {}", path.display());
        log::debug!("  - {:?}", settings);
        Ok(settings)
    }

    /// Serialises the settings to a TOML string.
    pub fn to_toml(&self) -> Result<String, FitError> {
        toml::to_string_pretty(self).map_err(|err| {
            FitError::new(
                FitErrorKind::InvalidInput,
                "Failed to serialise settings",
                Some(Box::new(err)),
            )
        })
    }

    /// Checks that the settings describe a solvable problem.
    pub fn validate(&self) -> Result<(), FitError> {
        if self.width == 0 || self.height == 0 {
            return Err(FitError::invalid_input(format!(
                "Texture size must be positive, got {}x{}",
                self.width, self.height
            )));
        }
        if self.basis_count == 0 {
            return Err(FitError::invalid_input("Basis count must be positive"));
        }
        if self.microfacet_distribution_resolution == 0 {
            return Err(FitError::invalid_input(
                "Microfacet distribution resolution must be positive",
            ));
        }
        if !(0.0..=1.0).contains(&self.metallicity) {
            return Err(FitError::invalid_input(format!(
                "Metallicity must lie in [0, 1], got {}",
                self.metallicity
            )));
        }
        if !(0.0..=1.0).contains(&self.specular_smoothness) {
            return Err(FitError::invalid_input(format!(
                "Specular smoothness must lie in [0, 1], got {}",
                self.specular_smoothness
            )));
        }
        if self.weight_block_size == 0 {
            return Err(FitError::invalid_input("Weight block size must be positive"));
        }
        if self.gamma <= 0.0 {
            return Err(FitError::invalid_input("Gamma must be positive"));
        }
        if self.max_iterations == 0 {
            return Err(FitError::invalid_input("At least one iteration is required"));
        }
        Ok(())
    }

    /// Number of texels of the fitted textures.
    pub fn texel_count(&self) -> usize { self.width as usize * self.height as usize }

    /// Number of tabulated values per basis function and channel.
    pub fn bin_count(&self) -> usize { self.microfacet_distribution_resolution + 1 }

    /// Width of the smooth step in microfacet bins.
    pub fn smoothing_width(&self) -> f64 {
        self.specular_smoothness as f64 * self.microfacet_distribution_resolution as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let settings = SpecularFitSettings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.bin_count(), 91);
        assert_eq!(settings.texel_count(), 512 * 512);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let settings: SpecularFitSettings = toml::from_str(
            r#"
            width = 64
            height = 32
            basis_count = 4
            basis_family = "smooth-step"
            specular_smoothness = 0.1
            "#,
        )
        .unwrap();
        assert_eq!(settings.width, 64);
        assert_eq!(settings.height, 32);
        assert_eq!(settings.basis_count, 4);
        assert_eq!(settings.basis_family, BasisFamilyKind::SmoothStep);
        assert_eq!(settings.gamma, 2.2);
        assert!((settings.smoothing_width() - 9.0).abs() < 1e-5);
    }

    #[test]
    fn rejects_invalid_settings() {
        let mut settings = SpecularFitSettings::default();
        settings.basis_count = 0;
        assert!(settings.validate().is_err());

        let mut settings = SpecularFitSettings::default();
        settings.metallicity = 1.5;
        assert!(settings.validate().is_err());

        let mut settings = SpecularFitSettings::default();
        settings.width = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn toml_round_trip() {
        let settings = SpecularFitSettings {
            basis_count: 3,
            normal_refinement: false,
            ..Default::default()
        };
        let text = settings.to_toml().unwrap();
        let parsed: SpecularFitSettings = toml::from_str(&text).unwrap();
        assert_eq!(parsed, settings);
    }
}
