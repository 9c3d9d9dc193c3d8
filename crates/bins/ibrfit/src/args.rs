use base::settings::BasisFamilyKind;
use std::path::PathBuf;

/// ibrfit command line interface arguments.
#[derive(clap::Parser, Debug)]
#[clap(
    author,
    version,
    about = "Fits specular basis materials to multi-view photographs of an object."
)]
pub struct CliArgs {
    /// Project file describing the views, the photographs and the proxy mesh.
    #[clap(help = "Path to the project file (.yaml)")]
    pub project: PathBuf,

    /// Fit settings. Defaults are used when not given.
    #[clap(short, long, help = "Path to the settings file (.toml)")]
    pub settings: Option<PathBuf>,

    #[clap(short, long, help = "Directory receiving the fitted maps")]
    pub output: Option<PathBuf>,

    #[clap(short, long, help = "Number of specular basis functions")]
    pub basis_count: Option<usize>,

    #[clap(long, help = "Family of the specular basis functions")]
    pub basis_family: Option<BasisFamilyKind>,

    #[clap(long, help = "Disable the refinement of the normals")]
    pub no_normals: bool,

    #[clap(long, help = "Project the photographs on the GPU")]
    pub gpu: bool,

    #[clap(long, help = "Print the effective settings as TOML and exit")]
    pub print_settings: bool,

    /// Whether to print verbose information to stdout.
    #[clap(short, long, help = "Use verbose output (log level = 4)")]
    pub verbose: bool,

    /// Whether to show the timestamp in the log.
    #[clap(
        long,
        help = "Show timestamp for each log message in seconds since\nprogram starts"
    )]
    pub log_timestamp: bool,

    /// Verbosity level for the log.
    #[clap(
        long,
        help = "Setting logging verbosity level (higher for more\ndetails)\n  0 - error\n  1 - \
                warn + error\n  2 - info + warn + error\n  3 - debug + info + warn + error\n  4 - \
                trace + debug + info + warn + error\n\x08",
        default_value_t = 2
    )]
    pub log_level: u8,

    #[clap(long, help = "Enable debug messages from `wgpu-rs` and `naga`")]
    pub debug_wgpu: bool,

    #[clap(long, help = "Write the intermediate maps of every iteration")]
    pub debug_output: bool,
}
