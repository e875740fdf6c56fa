// This file contains the primary logic for the `setup-toolchain run` command.
// It loads and validates the manifest, opens the state file, builds the provisioning
// context around the real fetcher and command runner, and hands the entries to the
// orchestrator. The report goes to stdout; JSON to `--report-json` when asked.

use crate::libs::context::ProvisionContext;
use crate::libs::manifest_loading::load_manifest;
use crate::libs::orchestrator;
use crate::libs::runner::SystemRunner;
use crate::libs::state_management::StateStore;
use crate::libs::utilities::fetch::HttpFetcher;
use crate::schemas::report::ProvisioningReport;
use crate::schemas::settings::SettingsOverrides;
use crate::{log_debug, log_info};
use anyhow::{Context, Result};
use colored::Colorize;
use std::fs;
use std::path::{Path, PathBuf};

pub struct RunArgs {
    pub manifest: PathBuf,
    pub overrides: SettingsOverrides,
    pub report_json: Option<PathBuf>,
}

/// Runs a full provisioning pass. `Ok(false)` means a required entry failed.
pub fn run(args: RunArgs) -> Result<bool> {
    log_debug!("[Run] Manifest: {}", args.manifest.display());
    let manifest = load_manifest(&args.manifest, &args.overrides)?;
    let settings = manifest.settings.clone();

    let mut state = StateStore::load(&settings.state_file())?;
    let fetcher = HttpFetcher::new(settings.fetch.clone());
    let runner = SystemRunner;
    let mut ctx = ProvisionContext::new(settings, &manifest.entries, &fetcher, &runner);
    if let Some(variant) = &ctx.settings.variant_override {
        log_info!("[Run] Variant override: {}", variant.bright_yellow());
    }

    let report = orchestrator::run(&manifest.entries, &mut ctx, &mut state);
    print!("{}", report.render());

    if let Some(path) = &args.report_json {
        write_json_report(&report, path)?;
    }
    Ok(report.is_success())
}

fn write_json_report(report: &ProvisioningReport, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(report).context("serializing report")?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating report directory {}", parent.display()))?;
    }
    fs::write(path, json).with_context(|| format!("writing report to {}", path.display()))?;
    log_info!(
        "[Run] JSON report written to {}",
        path.display().to_string().cyan()
    );
    Ok(())
}
