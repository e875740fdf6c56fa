use crate::schemas::settings::DEFAULT_VARIANT_ENV;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Defines the command-line interface (CLI) for 'setup-toolchain'.
#[derive(Parser)]
#[command(name = "setup-toolchain", version)]
#[command(about = "Provision toolchains from a declarative manifest", long_about = None)]
pub struct Cli {
    /// Enables detailed debug output for troubleshooting.
    #[arg(short, long, global = true)]
    pub(crate) debug: bool,

    /// Only print warnings, errors and the final report.
    #[arg(short, long, global = true)]
    pub(crate) quiet: bool,

    #[command(subcommand)]
    pub(crate) command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show the current version of the tool.
    Version,
    /// Provision every entry of a manifest and print the report.
    Run {
        /// Manifest file (YAML, or TOML when the extension is `.toml`).
        #[arg(long, short)]
        manifest: PathBuf,
        /// Variant to select for variant-bearing entries (e.g. `cuda`).
        #[arg(long, env = DEFAULT_VARIANT_ENV)]
        variant: Option<String>,
        /// Directory binaries are installed into. Overrides `settings.bin_dir`.
        #[arg(long)]
        bin_dir: Option<PathBuf>,
        /// Directory holding `state.json` and environment prefixes. Overrides `settings.state_dir`.
        #[arg(long)]
        state_dir: Option<PathBuf>,
        /// Deadline for the whole run, in seconds.
        #[arg(long)]
        deadline_secs: Option<u64>,
        /// Also write the report as JSON to this path.
        #[arg(long)]
        report_json: Option<PathBuf>,
        /// Stop attempting entries after the first required failure.
        #[arg(long)]
        fail_fast: bool,
    },
    /// Validate a manifest without installing anything.
    Validate {
        /// Manifest file to check.
        #[arg(long, short)]
        manifest: PathBuf,
        /// Variant to resolve against, as `run` would.
        #[arg(long, env = DEFAULT_VARIANT_ENV)]
        variant: Option<String>,
    },
}
