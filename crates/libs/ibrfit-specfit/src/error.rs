//! RMS error of the current model against the observations.
use crate::{reflectance::ReflectanceData, resources::SpecularFitResources, row_blocks};
use base::{error::FitErrorKind, math::Vec4, FitError, CHANNELS};
use gxtk::Framebuffer;
use ibr::ProjectionPass;

/// Current and previous RMS error of the fit.
///
/// Starts without measurement: both errors are infinite.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ErrorReport {
    error: f64,
    previous_error: f64,
    sample_count: f64,
}

impl Default for ErrorReport {
    fn default() -> Self {
        Self {
            error: f64::INFINITY,
            previous_error: f64::INFINITY,
            sample_count: 0.0,
        }
    }
}

impl ErrorReport {
    pub fn error(&self) -> f64 { self.error }

    pub fn previous_error(&self) -> f64 { self.previous_error }

    /// Sum of the weights of the samples of the last measurement.
    pub fn sample_count(&self) -> f64 { self.sample_count }

    /// Whether at least one measurement was taken.
    pub fn has_measurement(&self) -> bool { self.error.is_finite() }

    /// Records a new measurement; the current error becomes the previous one.
    pub fn record(&mut self, error: f64, sample_count: f64) {
        self.previous_error = self.error;
        self.error = error;
        self.sample_count = sample_count;
    }

    /// Discards the last measurement.
    pub fn reject(&mut self) { self.error = self.previous_error; }
}

/// Measures the error of the model by running an error program over every
/// texel of every view into a two-attachment framebuffer: weighted squared
/// error and weight.
#[derive(Debug, Clone, Default)]
pub struct ShaderBasedErrorCalculator {
    block_rows: u32,
    report: ErrorReport,
}

impl ShaderBasedErrorCalculator {
    pub fn new(block_rows: u32) -> Self {
        Self {
            block_rows,
            report: ErrorReport::default(),
        }
    }

    pub fn report(&self) -> &ErrorReport { &self.report }

    /// Measures the error and records it.
    ///
    /// Fails with [`FitErrorKind::NoValidSamples`] when no sample contributes,
    /// leaving the report untouched.
    pub fn update<P: ProjectionPass>(&mut self, pass: &P, resources: &SpecularFitResources) -> Result<f64, FitError> {
        let (squared_error, count) = self.measure(pass, resources)?;
        if count <= 0.0 {
            return Err(FitError::new(
                FitErrorKind::NoValidSamples,
                "No valid sample to measure the error",
                None,
            ));
        }
        let error = (squared_error / count).sqrt();
        self.report.record(error, count);
        log::debug!(
            "Error: {:.6} (previous {:.6}) over {:.1} samples",
            error,
            self.report.previous_error(),
            count
        );
        Ok(error)
    }

    /// Restores the error measured before the last update.
    pub fn reject(&mut self) { self.report.reject(); }

    /// Sum of the weighted squared errors and sum of the weights.
    pub fn measure<P: ProjectionPass>(
        &self,
        pass: &P,
        resources: &SpecularFitResources,
    ) -> Result<(f64, f64), FitError> {
        let params = resources.params();
        let width = pass.width();
        let mut squared_error = 0.0;
        let mut count = 0.0;
        for rows in row_blocks(pass.height(), self.block_rows) {
            let frames = pass.render_all(rows.clone())?;
            let mut framebuffer = Framebuffer::new(width, rows.len() as u32, rows.start, 2);
            framebuffer.clear(Vec4::ZERO);
            framebuffer.draw_fullscreen(|x, y, out| {
                let texel = (y * width + x) as usize;
                let normal = resources.normal(texel);
                let (mut sum, mut weight) = (0.0, 0.0);
                for frame in &frames {
                    let Some(data) = ReflectanceData::derive(frame.texel(texel), normal, params) else {
                        continue;
                    };
                    let residual = resources.predict(texel, &data.shading) - data.color;
                    sum += data.weight * residual.length_squared() / CHANNELS as f64;
                    weight += data.weight;
                }
                (out[0].x, out[0].y) = split_f64(sum);
                (out[1].x, out[1].y) = split_f64(weight);
            });
            let errors = framebuffer
                .read_back(0)
                .map_err(|err| FitError::graphics(err, "Failed to read back the error"))?;
            let weights = framebuffer
                .read_back(1)
                .map_err(|err| FitError::graphics(err, "Failed to read back the error weights"))?;
            squared_error += errors.iter().map(|e| join_f64(e.x, e.y)).sum::<f64>();
            count += weights.iter().map(|w| join_f64(w.x, w.y)).sum::<f64>();
        }
        Ok((squared_error, count))
    }
}

/// Splits a value into a single-precision head and the single-precision
/// remainder, so that a float attachment keeps about 48 bits of it.
fn split_f64(value: f64) -> (f32, f32) {
    let head = value as f32;
    (head, (value - head as f64) as f32)
}

fn join_f64(head: f32, tail: f32) -> f64 { head as f64 + tail as f64 }

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{reflectance::ModelParams, solution::SpecularFitSolution};
    use approx::assert_relative_eq;
    use base::math::{DVec3, Vec3};
    use ibr::{RecordedProjectionPass, TexelObservation};

    fn pass(radiance: f32, weight: f32) -> RecordedProjectionPass {
        let obs = TexelObservation {
            radiance: Vec3::splat(radiance),
            light_dir: Vec3::Z,
            view_dir: Vec3::Z,
            weight,
        };
        RecordedProjectionPass::new(2, 3, vec![vec![obs; 6]]).unwrap()
    }

    fn resources(albedo: f64) -> SpecularFitResources {
        let mut solution = SpecularFitSolution::with_size(2, 3, 1, 4);
        solution.set_albedo(0, DVec3::splat(albedo));
        (0..6).for_each(|p| solution.weights_mut(p)[0] = 1.0);
        let mut resources = SpecularFitResources::with_size(2, 3, 1, ModelParams::new(0.0, 4));
        resources.upload(&solution).unwrap();
        resources
    }

    #[test]
    fn report_state_machine() {
        let mut report = ErrorReport::default();
        assert!(!report.has_measurement());
        report.record(2.0, 1.0);
        report.record(1.5, 1.0);
        assert_eq!(report.previous_error(), 2.0);
        report.reject();
        assert_eq!(report.error(), 2.0);
    }

    #[test]
    fn rms_over_weighted_samples() {
        let pass = pass(0.5, 0.5);
        let resources = resources(std::f64::consts::PI);
        let mut calculator = ShaderBasedErrorCalculator::new(2);
        // Prediction is 1, observation 0.5.
        let error = calculator.update(&pass, &resources).unwrap();
        assert_relative_eq!(error, 0.5, epsilon = 1e-6);
        assert_relative_eq!(calculator.report().sample_count(), 3.0, epsilon = 1e-6);
        assert_eq!(calculator.report().previous_error(), f64::INFINITY);
    }

    #[test]
    fn no_samples_is_an_error() {
        let pass = pass(0.5, 0.0);
        let mut calculator = ShaderBasedErrorCalculator::new(2);
        let err = calculator.update(&pass, &resources(1.0)).unwrap_err();
        assert_eq!(err.kind(), FitErrorKind::NoValidSamples);
        assert!(!calculator.report().has_measurement());
    }

    #[test]
    fn sums_survive_float_attachments() {
        for value in [16_777_217.25, 0.1, 3.0e-9, 123_456.789_012_345] {
            let (head, tail) = split_f64(value);
            assert_relative_eq!(join_f64(head, tail), value, max_relative = 1e-13);
        }
        assert_ne!(16_777_217.25f64 as f32 as f64, 16_777_217.25);
    }
}
