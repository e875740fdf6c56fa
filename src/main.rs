mod cli;
mod commands;
mod installers;
mod libs;
mod logger;
mod schemas;

use clap::Parser;
use cli::cmd_enums::{Cli, Commands};
use colored::Colorize;
use commands::{run, validate, version};
use schemas::settings::SettingsOverrides;
use std::process::ExitCode;

/// Exit code when a required entry failed.
const EXIT_PROVISION_FAILED: u8 = 1;
/// Exit code when the manifest or the run configuration is unusable.
const EXIT_CONFIG_ERROR: u8 = 2;

fn main() -> ExitCode {
    let cli = Cli::parse();
    logger::init(cli.debug, cli.quiet);

    let outcome = match cli.command {
        Commands::Version => {
            version::run();
            Ok(true)
        }
        Commands::Validate { manifest, variant } => validate::run(&manifest, variant).map(|()| true),
        Commands::Run {
            manifest,
            variant,
            bin_dir,
            state_dir,
            deadline_secs,
            report_json,
            fail_fast,
        } => run::run(run::RunArgs {
            manifest,
            overrides: SettingsOverrides {
                bin_dir,
                state_dir,
                variant,
                fail_fast,
                deadline_secs,
            },
            report_json,
        }),
    };

    match outcome {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(EXIT_PROVISION_FAILED),
        Err(e) => {
            log_error!("{:#}", e);
            ExitCode::from(EXIT_CONFIG_ERROR)
        }
    }
}
