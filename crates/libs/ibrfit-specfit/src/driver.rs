//! Outer loop of the specular fit.
use crate::{
    brdf::BrdfReconstruction,
    diffuse::FinalDiffuseOptimization,
    error::{ErrorReport, ShaderBasedErrorCalculator},
    kmeans::KMeansInitialization,
    matrix::ReflectanceMatrixBuilder,
    normal::NormalOptimization,
    resources::SpecularFitResources,
    roughness::RoughnessOptimization,
    solution::SpecularFitSolution,
    weights::SpecularWeightOptimization,
};
use base::{error::FitErrorKind, progress::ProgressMonitor, settings::SpecularFitSettings, FitError};
use ibr::ProjectionPass;
use std::time::{Duration, Instant};

/// Damping of the first normal refinement step.
const INITIAL_NORMAL_DAMPING: f64 = 1.0e-2;
const MAX_NORMAL_DAMPING: f64 = 1.0e6;

/// Stages of a fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FitStage {
    Initializing,
    Iterating,
    Finalizing,
    Done,
}

impl FitStage {
    pub fn name(&self) -> &'static str {
        match self {
            FitStage::Initializing => "Initializing",
            FitStage::Iterating => "Iterating",
            FitStage::Finalizing => "Finalizing",
            FitStage::Done => "Done",
        }
    }
}

/// Result of a fit.
#[derive(Debug, Clone)]
pub struct SpecularFit {
    pub solution: SpecularFitSolution,
    pub resources: SpecularFitResources,
    /// Error of the basis model measured after hole filling; its previous
    /// error is the one of the last iteration.
    pub error: ErrorReport,
    /// Number of outer iterations run.
    pub iterations: usize,
    pub elapsed: Duration,
    /// Error measured at the end of every outer iteration.
    pub error_history: Vec<f64>,
}

/// Alternating optimisation of the basis BRDFs, the blending weights and
/// the per-texel normals and roughness.
#[derive(Debug, Clone)]
pub struct SpecularOptimization {
    settings: SpecularFitSettings,
    stage: FitStage,
}

impl SpecularOptimization {
    pub fn new(settings: SpecularFitSettings) -> Result<Self, FitError> {
        settings.validate()?;
        Ok(Self {
            settings,
            stage: FitStage::Initializing,
        })
    }

    pub fn settings(&self) -> &SpecularFitSettings { &self.settings }

    pub fn stage(&self) -> FitStage { self.stage }

    fn enter(&mut self, stage: FitStage, progress: &mut dyn ProgressMonitor) {
        log::debug!("Fit stage: {:?} -> {:?}", self.stage, stage);
        self.stage = stage;
        progress.set_stage(stage.name());
    }

    /// Runs the fit and writes the maps into the output directory.
    ///
    /// Failures before the maps exist are reported to `progress` and
    /// returned; failures while writing are only logged.
    pub fn run<P: ProjectionPass>(&mut self, pass: &P, progress: &mut dyn ProgressMonitor) -> Result<SpecularFit, FitError> {
        match self.fit(pass, progress) {
            Ok(fit) => {
                let failures = fit.save(&self.settings.output_dir, self.settings.gamma);
                if !failures.is_empty() {
                    log::warn!("{} output files could not be written", failures.len());
                }
                self.enter(FitStage::Done, progress);
                progress.loading_complete();
                Ok(fit)
            }
            Err(err) => {
                log::error!("{}", err);
                progress.loading_failed(&err);
                Err(err)
            }
        }
    }

    /// Runs the fit without writing anything but debug output.
    pub fn fit<P: ProjectionPass>(&mut self, pass: &P, progress: &mut dyn ProgressMonitor) -> Result<SpecularFit, FitError> {
        let start = Instant::now();
        let settings = self.settings.clone();
        if pass.width() != settings.width || pass.height() != settings.height {
            return Err(FitError::invalid_input(format!(
                "Projection pass covers {}x{} texels, settings ask for {}x{}",
                pass.width(),
                pass.height(),
                settings.width,
                settings.height
            )));
        }
        if pass.view_count() == 0 {
            return Err(FitError::invalid_input("No view to fit"));
        }
        let block_rows = settings.weight_block_size;
        let basis_count = settings.basis_count;
        let iterate = basis_count > 1 || settings.normal_refinement;

        self.stage = FitStage::Initializing;
        progress.set_stage(self.stage.name());
        progress.set_maximum(if iterate { settings.max_iterations as f64 } else { 1.0 });
        progress.set_progress(0.0);

        let mut solution = SpecularFitSolution::new(&settings);
        let mut resources = SpecularFitResources::new(&settings);
        KMeansInitialization::new(block_rows, settings.kmeans_iterations).initialize(
            pass,
            &resources,
            &mut solution,
        )?;
        resources.upload(&solution)?;

        let brdf = BrdfReconstruction::from_settings(&settings);
        let weights = SpecularWeightOptimization::new(block_rows);
        let normals = NormalOptimization::new(block_rows);
        let mut calculator = ShaderBasedErrorCalculator::new(block_rows);
        let mut error_history = Vec::new();
        let mut last_iteration_error = f64::INFINITY;
        let mut iterations = 0;

        let debug_dir = settings.debug_output.then(|| settings.output_dir.join("debug"));
        self.enter(FitStage::Iterating, progress);
        loop {
            iterations += 1;
            log::info!("Iteration {}", iterations);

            let system = ReflectanceMatrixBuilder::new(&resources)
                .with_validation(settings.validate_matrices)
                .build(pass, block_rows)?;
            brdf.reconstruct(&system, &mut solution)?;
            resources.upload(&solution)?;

            if basis_count > 1 {
                weights.optimize(pass, &resources, &mut solution)?;
                resources.upload(&solution)?;
            }
            calculator.update(pass, &resources)?;

            if settings.normal_refinement {
                let outcome = refine_normals(
                    &normals,
                    pass,
                    &mut resources,
                    &mut calculator,
                    settings.normal_max_iterations,
                    settings.convergence_tolerance,
                )?;
                log::debug!(
                    "Normals: {} steps accepted, {} rejected",
                    outcome.accepted,
                    outcome.rejected
                );
            }

            // Roughness may raise the error; it is kept regardless.
            RoughnessOptimization.optimize(&solution, &mut resources);
            let error = calculator.update(pass, &resources)?;
            error_history.push(error);
            log::info!("Iteration {}: RMS error {:.6}", iterations, error);

            if let Some(dir) = &debug_dir {
                save_debug(dir, iterations, &solution, &resources);
            }
            progress.set_progress(iterations as f64);

            let improvement = last_iteration_error - error;
            last_iteration_error = error;
            if !iterate {
                break;
            }
            if improvement <= settings.convergence_tolerance {
                log::info!("Converged after {} iterations", iterations);
                break;
            }
            if iterations >= settings.max_iterations {
                log::warn!("Stopped after {} iterations without converging", iterations);
                break;
            }
        }

        self.enter(FitStage::Finalizing, progress);
        // Unobserved texels take their diffuse albedo from the filled weights.
        let valid_before = solution.valid_count();
        solution.fill_weight_holes();
        log::debug!(
            "Filled {} weight holes",
            solution.valid_count().saturating_sub(valid_before)
        );
        resources.upload(&solution)?;
        FinalDiffuseOptimization::new(block_rows).optimize(pass, &solution, &mut resources)?;

        let final_error = calculator.update(pass, &resources)?;
        log::info!(
            "Final RMS error {:.6} (last iteration {:.6})",
            final_error,
            last_iteration_error
        );

        let fit = SpecularFit {
            solution,
            resources,
            error: *calculator.report(),
            iterations,
            elapsed: start.elapsed(),
            error_history,
        };
        log::info!(
            "Fit finished in {} after {} iterations, RMS error {:.6}",
            base::utils::format_duration(fit.elapsed),
            fit.iterations,
            fit.error.error()
        );
        Ok(fit)
    }
}

/// Outcome of a guarded normal refinement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalRefinement {
    pub accepted: usize,
    pub rejected: usize,
    /// Error before the first step, then after every accepted step.
    pub errors: Vec<f64>,
}

/// Runs up to `max_steps` guarded normal steps: a step raising the error is
/// rolled back, both in the normal map and in the error report, and retried
/// with more damping. The error report must hold a measurement.
pub fn refine_normals<P: ProjectionPass>(
    normals: &NormalOptimization,
    pass: &P,
    resources: &mut SpecularFitResources,
    calculator: &mut ShaderBasedErrorCalculator,
    max_steps: usize,
    tolerance: f64,
) -> Result<NormalRefinement, FitError> {
    let mut damping = INITIAL_NORMAL_DAMPING;
    let mut outcome = NormalRefinement {
        errors: vec![calculator.report().error()],
        ..Default::default()
    };
    for step in 0..max_steps {
        let before = calculator.report().error();
        let snapshot = resources.normal_map().clone();
        normals.step(pass, resources, damping)?;
        let after = match calculator.update(pass, resources) {
            Ok(error) => error,
            Err(err) if err.kind() == FitErrorKind::NoValidSamples => f64::INFINITY,
            Err(err) => return Err(err),
        };
        if after > before {
            log::debug!(
                "Normal step {} rejected: error {:.6} -> {:.6}",
                step,
                before,
                after
            );
            if after.is_finite() {
                calculator.reject();
            }
            resources.upload_normals(&snapshot)?;
            outcome.rejected += 1;
            damping *= 10.0;
            if damping > MAX_NORMAL_DAMPING {
                break;
            }
            continue;
        }
        outcome.accepted += 1;
        outcome.errors.push(after);
        damping = (damping * 0.5).max(f64::EPSILON);
        if before - after <= tolerance {
            break;
        }
    }
    Ok(outcome)
}

fn save_debug(dir: &std::path::Path, iteration: usize, solution: &SpecularFitSolution, resources: &SpecularFitResources) {
    let dir = dir.join(format!("iteration{:02}", iteration));
    if let Err(err) = std::fs::create_dir_all(&dir) {
        log::warn!("Failed to create {}: {}", dir.display(), err);
        return;
    }
    let snapshot = SpecularFit {
        solution: solution.clone(),
        resources: resources.clone(),
        error: ErrorReport::default(),
        iterations: iteration,
        elapsed: Duration::ZERO,
        error_history: Vec::new(),
    };
    for err in snapshot.save_weights_and_normals(&dir).into_iter().filter_map(Result::err) {
        log::warn!("{}", err);
    }
    if let Err(err) = crate::output::write_basis_csv(&dir.join("basisFunctions.csv"), solution) {
        log::warn!("{}", err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base::progress::NoProgress;

    #[test]
    fn invalid_settings_are_rejected() {
        let settings = SpecularFitSettings {
            basis_count: 0,
            ..Default::default()
        };
        assert!(SpecularOptimization::new(settings).is_err());
    }

    #[test]
    fn pass_size_must_match_the_settings() {
        let settings = SpecularFitSettings {
            width: 4,
            height: 4,
            ..Default::default()
        };
        let pass = ibr::RecordedProjectionPass::new(2, 2, vec![vec![Default::default(); 4]]).unwrap();
        let mut optimization = SpecularOptimization::new(settings).unwrap();
        let err = optimization.fit(&pass, &mut NoProgress).unwrap_err();
        assert_eq!(err.kind(), FitErrorKind::InvalidInput);
        assert_eq!(optimization.stage(), FitStage::Initializing);
    }
}
