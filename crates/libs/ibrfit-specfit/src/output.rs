//! Serialisation of the fitted maps.
use crate::{driver::SpecularFit, solution::SpecularFitSolution};
use base::{
    error::FitErrorKind,
    math::{linear_to_gamma, to_unorm8, Vec3},
    utils::format_duration,
    FitError, CHANNELS,
};
use image::{ImageBuffer, Luma, Rgb};
use std::{
    path::{Path, PathBuf},
    time::Duration,
};

/// Writes an 8-bit RGB PNG, `encode` mapping each texel to [0, 1].
pub fn write_rgb_png(
    path: &Path,
    width: u32,
    height: u32,
    texels: &[Vec3],
    encode: impl Fn(Vec3) -> Vec3,
) -> Result<(), FitError> {
    let data: Vec<u8> = texels
        .iter()
        .flat_map(|t| encode(*t).to_array().map(to_unorm8))
        .collect();
    ImageBuffer::<Rgb<u8>, _>::from_raw(width, height, data)
        .ok_or_else(|| FitError::invalid_input(format!("Texel count does not match a {}x{} image", width, height)))
        .and_then(|img| img.save(path).map_err(|err| FitError::from_image_error(err, path)))
}

/// Writes an 8-bit greyscale PNG of values in [0, 1].
pub fn write_grey_png(path: &Path, width: u32, height: u32, values: impl Iterator<Item = f32>) -> Result<(), FitError> {
    let data: Vec<u8> = values.map(to_unorm8).collect();
    ImageBuffer::<Luma<u8>, _>::from_raw(width, height, data)
        .ok_or_else(|| FitError::invalid_input(format!("Texel count does not match a {}x{} image", width, height)))
        .and_then(|img| img.save(path).map_err(|err| FitError::from_image_error(err, path)))
}

/// Writes one CSV row per (basis, channel) with the `M + 1` tabulated values.
pub fn write_basis_csv(path: &Path, solution: &SpecularFitSolution) -> Result<(), FitError> {
    let csv_error = |err: csv::Error| {
        FitError::new(
            FitErrorKind::Io,
            format!("Failed to write basis functions: {}", path.display()),
            Some(Box::new(err)),
        )
    };
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(path)
        .map_err(csv_error)?;
    for b in 0..solution.basis_count() {
        for c in 0..CHANNELS {
            writer
                .write_record(solution.basis(b, c).iter().map(|v| v.to_string()))
                .map_err(csv_error)?;
        }
    }
    writer.flush().map_err(|err| {
        FitError::from_io_error(err, format!("Failed to write basis functions: {}", path.display()))
    })
}

/// Writes the elapsed wall-clock time.
pub fn write_time(path: &Path, elapsed: Duration) -> Result<(), FitError> {
    std::fs::write(path, format!("{}\n", format_duration(elapsed)))
        .map_err(|err| FitError::from_io_error(err, format!("Failed to write {}", path.display())))
}

fn weights_file(basis: usize) -> String { format!("weights{:02}.png", basis) }

impl SpecularFit {
    /// Writes every output map into `dir`, creating it if needed.
    ///
    /// Failures do not stop the remaining writes; they are logged and
    /// returned.
    pub fn save(&self, dir: &Path, gamma: f32) -> Vec<FitError> {
        if let Err(err) = std::fs::create_dir_all(dir) {
            let err = FitError::from_io_error(err, format!("Failed to create {}", dir.display()));
            log::warn!("{}", err);
            return vec![err];
        }
        let (w, h) = (self.resources.width(), self.resources.height());
        let path = |name: &str| -> PathBuf { dir.join(name) };
        let mut results = vec![
            write_rgb_png(&path("diffuse.png"), w, h, self.resources.diffuse_map().data(), |d| {
                Vec3::new(linear_to_gamma(d.x, gamma), linear_to_gamma(d.y, gamma), linear_to_gamma(d.z, gamma))
            }),
            write_rgb_png(&path("specular.png"), w, h, self.resources.specular_map().data(), |s| {
                Vec3::new(linear_to_gamma(s.x, gamma), linear_to_gamma(s.y, gamma), linear_to_gamma(s.z, gamma))
            }),
            write_grey_png(
                &path("roughness.png"),
                w,
                h,
                self.resources.roughness_map().data().iter().copied(),
            ),
            write_basis_csv(&path("basisFunctions.csv"), &self.solution),
            write_time(&path("time.txt"), self.elapsed),
        ];
        results.extend(self.save_weights_and_normals(dir));
        let failures: Vec<FitError> = results.into_iter().filter_map(Result::err).collect();
        for err in &failures {
            log::warn!("{}", err);
        }
        if failures.is_empty() {
            log::info!("Wrote the fitted maps to {}", dir.display());
        }
        failures
    }

    /// Writes the normal and weight maps, the state refined every iteration.
    pub fn save_weights_and_normals(&self, dir: &Path) -> Vec<Result<(), FitError>> {
        let (w, h) = (self.resources.width(), self.resources.height());
        let mut results = vec![write_rgb_png(
            &dir.join("normal.png"),
            w,
            h,
            self.resources.normal_map().data(),
            |n| n * 0.5 + 0.5,
        )];
        results.extend((0..self.solution.basis_count()).map(|b| {
            write_grey_png(
                &dir.join(weights_file(b)),
                w,
                h,
                (0..self.solution.texel_count()).map(|p| self.solution.weight(p, b) as f32),
            )
        }));
        results
    }
}
