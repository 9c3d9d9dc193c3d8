mod args;
mod logging;
mod project;

use crate::{args::CliArgs, project::Project};
use base::{progress::LogProgress, settings::SpecularFitSettings, FitError};
use gxtk::context::{GpuContext, WgpuConfig};
use ibr::{gpu::WgpuProjectionPass, ProjectionPass, SoftwareProjectionPass};
use specfit::SpecularOptimization;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let (args, launch_time) = logging::parse_args::<CliArgs>();
    let log_level = if args.verbose { 4 } else { args.log_level };
    logging::setup_logging(
        args.log_timestamp.then_some(launch_time),
        log_level,
        &logging::wgpu_filters(args.debug_wgpu),
    );
    log::info!(
        "ibrfit launched at {} on {}.",
        chrono::DateTime::<chrono::Local>::from(launch_time),
        std::env::consts::OS
    );

    let settings = effective_settings(&args)?;
    if args.print_settings {
        println!("{}", settings.to_toml()?);
        return Ok(());
    }

    let project = Project::load(&args.project)?;
    let resources = project.load_resources(settings.gamma)?;
    if args.gpu {
        let config = WgpuConfig {
            validation: args.debug_wgpu,
            ..Default::default()
        };
        let gpu = GpuContext::offscreen_blocking(&config)
            .map_err(|err| FitError::graphics(err, "Failed to create the GPU context"))?;
        let pass = WgpuProjectionPass::new(&gpu, &resources, settings.width, settings.height)?;
        fit(&pass, settings)
    } else {
        let pass = SoftwareProjectionPass::new(&resources, settings.width, settings.height);
        fit(&pass, settings)
    }
}

/// Settings file, if any, with the command line overrides applied.
fn effective_settings(args: &CliArgs) -> Result<SpecularFitSettings, FitError> {
    let mut settings = match &args.settings {
        Some(path) => SpecularFitSettings::load(path)?,
        None => SpecularFitSettings::default(),
    };
    if let Some(output) = &args.output {
        settings.output_dir = output.clone();
    }
    if let Some(count) = args.basis_count {
        settings.basis_count = count;
    }
    if let Some(family) = args.basis_family {
        settings.basis_family = family;
    }
    settings.normal_refinement &= !args.no_normals;
    settings.debug_output |= args.debug_output;
    settings.validate()?;
    Ok(settings)
}

fn fit<P: ProjectionPass>(pass: &P, settings: SpecularFitSettings) -> Result<(), Box<dyn std::error::Error>> {
    let mut progress = LogProgress::default();
    let mut optimization = SpecularOptimization::new(settings)?;
    let fit = optimization.run(pass, &mut progress)?;
    log::info!(
        "RMS error {:.6} after {} iterations",
        fit.error.error(),
        fit.iterations
    );
    Ok(())
}
