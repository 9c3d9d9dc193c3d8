//! End-to-end behaviour of the fit on small synthetic captures.
use approx::assert_relative_eq;
use base::{
    error::FitErrorKind,
    math::{DVec3, Vec3},
    progress::{NoProgress, ProgressMonitor},
    settings::SpecularFitSettings,
    FitError,
};
use ibr::{ProjectionPass, RecordedProjectionPass, TexelObservation};
use ibrfit_specfit::{
    basis::BasisFamily,
    brdf::BrdfReconstruction,
    matrix::ReflectanceMatrixBuilder,
    nnls::nnls,
    normal::NormalOptimization,
    refine_normals,
    reflectance::{ModelParams, Shading},
    weights::SpecularWeightOptimization,
    ShaderBasedErrorCalculator, SpecularFitResources, SpecularFitSolution, SpecularOptimization,
};
use nalgebra::{DMatrix, DVector};
use proptest::prelude::*;
use std::f32::consts::PI;

/// Direction in the upper hemisphere varying with `phase`.
fn direction(phase: f32) -> Vec3 { Vec3::new(0.5 * phase.sin(), 0.5 * (1.7 * phase).cos(), 1.0).normalize() }

/// Observations of a Lambertian surface lit and seen from a different
/// direction per texel and view.
fn lambertian_views(width: u32, height: u32, views: usize, albedo: Vec3) -> Vec<Vec<TexelObservation>> {
    (0..views)
        .map(|v| {
            (0..(width * height) as usize)
                .map(|p| {
                    let light = direction(1.3 * p as f32 + 2.1 * v as f32);
                    let view = direction(0.4 + 0.9 * p as f32 - 1.7 * v as f32);
                    TexelObservation {
                        radiance: albedo * light.z / PI,
                        light_dir: light,
                        view_dir: view,
                        weight: view.z,
                    }
                })
                .collect()
        })
        .collect()
}

fn settings(width: u32, height: u32, basis_count: usize) -> SpecularFitSettings {
    SpecularFitSettings {
        width,
        height,
        basis_count,
        microfacet_distribution_resolution: 4,
        normal_refinement: false,
        convergence_tolerance: 1.0e-6,
        weight_block_size: 1,
        max_iterations: 8,
        kmeans_iterations: 4,
        output_dir: std::env::temp_dir().join(format!("ibrfit-scenario-{}", std::process::id())),
        ..Default::default()
    }
}

/// Resources with every texel fully assigned to basis 0.
fn single_basis_resources(width: u32, height: u32) -> SpecularFitResources {
    let mut solution = SpecularFitSolution::with_size(width, height, 1, 4);
    solution.set_albedo(0, DVec3::splat(0.5));
    for p in 0..solution.texel_count() {
        solution.weights_mut(p)[0] = 1.0;
    }
    let mut resources = SpecularFitResources::with_size(width, height, 1, ModelParams::new(0.0, 4));
    resources.upload(&solution).unwrap();
    resources
}

#[test]
fn lambertian_albedo_is_recovered() {
    let albedo = Vec3::new(0.6, 0.4, 0.2);
    let views = lambertian_views(2, 2, 3, albedo);
    let pass = RecordedProjectionPass::new(2, 2, views.clone()).unwrap();
    let mut optimization = SpecularOptimization::new(settings(2, 2, 2)).unwrap();
    let fit = optimization.fit(&pass, &mut NoProgress).unwrap();

    let solution = &fit.solution;
    for p in 0..solution.texel_count() {
        assert!(solution.weights(p).iter().all(|w| *w >= 0.0));
        for b in (0..2).filter(|b| solution.weight(p, *b) > 0.5) {
            assert_relative_eq!(solution.albedo(b), albedo.as_dvec3(), epsilon = 0.05);
        }
    }
    for d in fit.resources.diffuse_map().data() {
        assert_relative_eq!(*d, albedo, epsilon = 0.05);
    }

    // The model reproduces every observation.
    let params = *fit.resources.params();
    for view in &views {
        for (p, obs) in view.iter().enumerate() {
            let shading = Shading::evaluate(
                obs.light_dir.as_dvec3(),
                obs.view_dir.as_dvec3(),
                fit.resources.normal(p),
                &params,
            );
            let predicted = fit.resources.predict(p, &shading);
            assert_relative_eq!(predicted, obs.radiance.as_dvec3(), epsilon = 0.05);
        }
    }
    assert!(fit.error.error() < 1.0e-3, "RMS error {}", fit.error.error());
}

#[test]
fn single_basis_without_normals_runs_once() {
    let views = lambertian_views(2, 2, 3, Vec3::splat(0.5));
    let pass = RecordedProjectionPass::new(2, 2, views).unwrap();
    let mut settings = settings(2, 2, 1);
    // Would keep iterating if the tolerance was consulted.
    settings.convergence_tolerance = -1.0e9;
    let mut optimization = SpecularOptimization::new(settings).unwrap();
    let fit = optimization.fit(&pass, &mut NoProgress).unwrap();
    assert_eq!(fit.iterations, 1);
    assert_eq!(fit.error_history.len(), 1);
}

#[test]
fn run_writes_the_maps() {
    let views = lambertian_views(2, 2, 3, Vec3::splat(0.5));
    let pass = RecordedProjectionPass::new(2, 2, views).unwrap();
    let mut settings = settings(2, 2, 2);
    settings.output_dir = std::env::temp_dir().join(format!("ibrfit-run-{}", std::process::id()));
    let dir = settings.output_dir.clone();
    let mut optimization = SpecularOptimization::new(settings).unwrap();
    optimization.run(&pass, &mut NoProgress).unwrap();
    for name in [
        "diffuse.png",
        "normal.png",
        "specular.png",
        "roughness.png",
        "weights00.png",
        "weights01.png",
        "basisFunctions.csv",
        "time.txt",
    ] {
        assert!(dir.join(name).is_file(), "missing {}", name);
    }
    std::fs::remove_dir_all(dir).ok();
}

#[test]
fn incremental_assembly_matches_dense_product() {
    let views = lambertian_views(4, 4, 2, Vec3::new(0.3, 0.5, 0.7));
    let pass = RecordedProjectionPass::new(4, 4, views).unwrap();
    let resources = single_basis_resources(4, 4);
    let builder = ReflectanceMatrixBuilder::new(&resources).with_validation(true);
    let blocked = builder.build(&pass, 1).unwrap();
    let whole = builder.build(&pass, 4).unwrap();
    assert_eq!(blocked.sample_count, 32);
    assert!(blocked.relative_difference(&whole) < 1.0e-9);
}

#[test]
fn invisible_view_adds_nothing() {
    let mut views = lambertian_views(4, 4, 2, Vec3::new(0.3, 0.5, 0.7));
    let seen = RecordedProjectionPass::new(4, 4, views.clone()).unwrap();
    let mut masked = lambertian_views(4, 4, 1, Vec3::ONE).remove(0);
    masked.iter_mut().for_each(|obs| obs.weight = 0.0);
    views.push(masked);
    let with_masked = RecordedProjectionPass::new(4, 4, views).unwrap();
    assert_eq!(with_masked.view_count(), 3);

    let resources = single_basis_resources(4, 4);
    let builder = ReflectanceMatrixBuilder::new(&resources);
    let reference = builder.build(&seen, 2).unwrap();
    let system = builder.build(&with_masked, 2).unwrap();
    assert_eq!(system.sample_count, reference.sample_count);
    assert!(system.relative_difference(&reference) < 1.0e-12);
}

#[test]
fn singular_texel_is_flagged_invalid() {
    let albedo = DVec3::new(0.5, 0.4, 0.3);
    let mut solution = SpecularFitSolution::with_size(1, 1, 2, 4);
    solution.set_albedo(0, albedo);
    solution.set_albedo(1, albedo);
    solution.weights_mut(0).copy_from_slice(&[0.3, 0.7]);
    solution.set_valid(0, true);
    let mut resources = SpecularFitResources::with_size(1, 1, 2, ModelParams::new(0.0, 4));
    resources.upload(&solution).unwrap();

    let pass = RecordedProjectionPass::new(1, 1, lambertian_views(1, 1, 3, Vec3::splat(0.4))).unwrap();
    let stats = SpecularWeightOptimization::new(1)
        .optimize(&pass, &resources, &mut solution)
        .unwrap();
    assert_eq!(stats.singular, 1);
    assert!(!solution.is_valid(0));
    assert_eq!(solution.weights(0), &[0.3, 0.7]);
}

#[test]
fn reconstructed_bases_are_non_negative() {
    // Glossy observations with a dark diffuse part.
    let mut views = lambertian_views(3, 3, 4, Vec3::new(0.05, 0.02, 0.01));
    for view in &mut views {
        for obs in view.iter_mut() {
            let h = (obs.light_dir + obs.view_dir).normalize();
            obs.radiance += Vec3::new(2.0, 1.0, 0.5) * h.z.powi(20);
        }
    }
    let pass = RecordedProjectionPass::new(3, 3, views).unwrap();
    let resources = single_basis_resources(3, 3);
    let system = ReflectanceMatrixBuilder::new(&resources).build(&pass, 3).unwrap();
    let mut solution = SpecularFitSolution::with_size(3, 3, 1, 4);
    BrdfReconstruction::new(BasisFamily::Step, 1, 4)
        .reconstruct(&system, &mut solution)
        .unwrap();
    for c in 0..3 {
        assert!(solution.basis(0, c).iter().all(|v| *v >= 0.0));
        assert!(solution.albedo(0)[c] >= 0.0);
    }
}

#[test]
fn accepted_normal_steps_never_raise_the_error() {
    let params = ModelParams::new(0.0, 8);
    let mut solution = SpecularFitSolution::with_size(2, 2, 1, 8);
    solution.set_albedo(0, DVec3::splat(0.3));
    for c in 0..3 {
        let lobe: Vec<f64> = (0..=8).map(|i| 3.0 * (1.0 - i as f64 / 8.0).powi(3)).collect();
        solution.basis_mut(0, c).copy_from_slice(&lobe);
    }
    for p in 0..4 {
        solution.weights_mut(p)[0] = 1.0;
    }
    let mut resources = SpecularFitResources::with_size(2, 2, 1, params);
    resources.upload(&solution).unwrap();

    let truths = [
        DVec3::new(0.1, 0.05, 1.0).normalize(),
        DVec3::new(-0.15, 0.1, 1.0).normalize(),
        DVec3::new(0.0, -0.2, 1.0).normalize(),
        DVec3::new(0.2, 0.2, 1.0).normalize(),
    ];
    let views = (0..6)
        .map(|v| {
            (0..4)
                .map(|p| {
                    let light = direction(0.7 * v as f32 + 0.3 * p as f32);
                    let view = direction(2.0 - 1.1 * v as f32 + 0.5 * p as f32);
                    let shading = Shading::evaluate(light.as_dvec3(), view.as_dvec3(), truths[p], &params);
                    TexelObservation {
                        radiance: resources.predict(p, &shading).as_vec3(),
                        light_dir: light,
                        view_dir: view,
                        weight: 1.0,
                    }
                })
                .collect()
        })
        .collect();
    let pass = RecordedProjectionPass::new(2, 2, views).unwrap();

    let mut calculator = ShaderBasedErrorCalculator::new(1);
    calculator.update(&pass, &resources).unwrap();
    let outcome = refine_normals(&NormalOptimization::new(1), &pass, &mut resources, &mut calculator, 8, 0.0).unwrap();
    assert!(outcome.accepted > 0);
    assert!(outcome.errors.windows(2).all(|e| e[1] <= e[0]), "{:?}", outcome.errors);
    assert_eq!(calculator.report().error(), *outcome.errors.last().unwrap());
}

/// Counts the completion notifications of a run.
#[derive(Debug, Default)]
struct Outcomes {
    completed: usize,
    failed: Vec<FitErrorKind>,
}

impl ProgressMonitor for Outcomes {
    fn set_maximum(&mut self, _maximum: f64) {}

    fn set_progress(&mut self, _progress: f64) {}

    fn loading_complete(&mut self) { self.completed += 1; }

    fn loading_failed(&mut self, err: &FitError) { self.failed.push(err.kind()); }
}

#[test]
fn unseen_texels_take_the_diffuse_of_their_neighbours() {
    let albedo = Vec3::new(0.6, 0.4, 0.2);
    let mut views = lambertian_views(3, 1, 8, albedo);
    for view in &mut views {
        view[1] = TexelObservation::default();
    }
    let pass = RecordedProjectionPass::new(3, 1, views).unwrap();
    let mut optimization = SpecularOptimization::new(settings(3, 1, 1)).unwrap();
    let fit = optimization.fit(&pass, &mut NoProgress).unwrap();

    assert!(fit.solution.is_valid(1));
    assert_relative_eq!(fit.solution.weights(1)[0], 1.0);
    let diffuse = fit.resources.diffuse_map().data();
    for d in diffuse {
        assert_relative_eq!(*d, albedo, epsilon = 0.05);
    }
}

#[test]
fn final_error_is_measured_after_finalisation() {
    let views = lambertian_views(2, 2, 3, Vec3::splat(0.5));
    let pass = RecordedProjectionPass::new(2, 2, views).unwrap();
    let mut optimization = SpecularOptimization::new(settings(2, 2, 2)).unwrap();
    let fit = optimization.fit(&pass, &mut NoProgress).unwrap();

    let last_iteration = *fit.error_history.last().unwrap();
    assert_eq!(fit.error.previous_error(), last_iteration);
    assert!(fit.error.has_measurement());
    assert!(fit.error.sample_count() > 0.0);
    let mut calculator = ShaderBasedErrorCalculator::new(1);
    let error = calculator.update(&pass, &fit.resources).unwrap();
    assert_relative_eq!(fit.error.error(), error, epsilon = 1e-12);
}

#[test]
fn unwritable_output_keeps_the_fit() {
    let views = lambertian_views(2, 2, 3, Vec3::splat(0.5));
    let pass = RecordedProjectionPass::new(2, 2, views).unwrap();
    let blocker = std::env::temp_dir().join(format!("ibrfit-blocker-{}", std::process::id()));
    std::fs::write(&blocker, "not a directory").unwrap();
    let mut settings = settings(2, 2, 2);
    settings.output_dir = blocker.clone();
    let mut optimization = SpecularOptimization::new(settings).unwrap();
    let mut outcomes = Outcomes::default();
    let fit = optimization.run(&pass, &mut outcomes).unwrap();
    std::fs::remove_file(&blocker).ok();

    assert!(fit.iterations >= 1);
    assert_eq!(outcomes.completed, 1);
    assert!(outcomes.failed.is_empty());
}

#[test]
fn unseen_capture_fails_without_output() {
    let views = vec![vec![TexelObservation::default(); 4]; 3];
    let pass = RecordedProjectionPass::new(2, 2, views).unwrap();
    let mut settings = settings(2, 2, 2);
    settings.output_dir = std::env::temp_dir().join(format!("ibrfit-unseen-{}", std::process::id()));
    let dir = settings.output_dir.clone();
    let mut optimization = SpecularOptimization::new(settings).unwrap();
    let mut outcomes = Outcomes::default();
    let err = optimization.run(&pass, &mut outcomes).unwrap_err();

    assert_eq!(err.kind(), FitErrorKind::NoValidSamples);
    assert_eq!(outcomes.failed, vec![FitErrorKind::NoValidSamples]);
    assert_eq!(outcomes.completed, 0);
    assert!(!dir.join("diffuse.png").exists());
}

proptest! {
    #[test]
    fn nnls_solutions_are_non_negative(
        entries in proptest::collection::vec(-1.0f64..1.0, 24),
        targets in proptest::collection::vec(-1.0f64..1.0, 6),
    ) {
        let a = DMatrix::from_vec(6, 4, entries);
        let y = DVector::from_vec(targets);
        let ata = a.tr_mul(&a) + DMatrix::identity(4, 4) * 1.0e-9;
        if let Ok(x) = nnls(&ata, &a.tr_mul(&y)) {
            prop_assert!(x.iter().all(|v| *v >= 0.0));
        }
    }
}
