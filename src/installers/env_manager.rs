// Environment-manager installer (conda, mamba, micromamba).
//
// The environment is created at a prefix under the state directory, from the listed
// channels in priority order with `--override-channels`, so the user's own channel
// configuration cannot reorder or add sources. After creation the prefix's `bin/` is
// appended to the run's lookup path, and the manager's package cache is cleaned.

use crate::installers::{InstallOutcome, Installer};
use crate::libs::context::ProvisionContext;
use crate::libs::runner::run_checked;
use crate::schemas::errors::ProvisionError;
use crate::schemas::manifest::{EntrySource, EnvManagerSource, ManifestEntry};
use crate::schemas::state_file::InstallReceipt;
use crate::{log_debug, log_info, log_warn};
use colored::Colorize;
use std::path::{Path, PathBuf};

pub struct EnvManagerInstaller;

/// Arguments for `<manager> create`.
pub fn create_args(src: &EnvManagerSource, prefix: &Path) -> Vec<String> {
    let mut args = vec![
        "create".to_string(),
        "--yes".to_string(),
        "--prefix".to_string(),
        prefix.to_string_lossy().into_owned(),
    ];
    // No channels listed means the manager's own configuration applies.
    if !src.channels.is_empty() {
        args.push("--override-channels".to_string());
        for channel in &src.channels {
            args.push("--channel".to_string());
            args.push(channel.clone());
        }
    }
    args.extend(src.packages.iter().cloned());
    args
}

fn env_bin_dir(prefix: &Path) -> PathBuf {
    prefix.join("bin")
}

fn source_of(entry: &ManifestEntry) -> Result<&EnvManagerSource, ProvisionError> {
    match &entry.source {
        EntrySource::EnvManager(src) => Ok(src),
        _ => Err(ProvisionError::Config(format!(
            "'{}' is not an environment package set",
            entry.name
        ))),
    }
}

impl Installer for EnvManagerInstaller {
    fn is_provisioned(
        &self,
        entry: &ManifestEntry,
        receipt: &InstallReceipt,
        ctx: &ProvisionContext,
    ) -> bool {
        let Some(prefix) = entry.resolved_install_path(&ctx.settings) else {
            return false;
        };
        let bin_dir = receipt.bin_dir.clone().unwrap_or_else(|| env_bin_dir(&prefix));
        prefix.is_dir() && bin_dir.is_dir()
    }

    fn on_skip(&self, entry: &ManifestEntry, receipt: &InstallReceipt, ctx: &mut ProvisionContext) {
        let bin_dir = match (&receipt.bin_dir, entry.resolved_install_path(&ctx.settings)) {
            (Some(dir), _) => dir.clone(),
            (None, Some(prefix)) => env_bin_dir(&prefix),
            (None, None) => return,
        };
        log_debug!(
            "[EnvManagerInstaller] Reusing {} for {}",
            bin_dir.display(),
            entry.name
        );
        ctx.append_to_lookup_path(&bin_dir);
    }

    fn install(
        &self,
        entry: &ManifestEntry,
        ctx: &mut ProvisionContext,
    ) -> Result<InstallOutcome, ProvisionError> {
        let src = source_of(entry)?;
        let prefix = entry
            .resolved_install_path(&ctx.settings)
            .ok_or_else(|| ProvisionError::Config(format!("'{}' has no prefix", entry.name)))?;

        log_info!(
            "[EnvManagerInstaller] Creating environment {} with {} ({} package(s), channels: {})",
            src.environment.bold(),
            src.manager.cyan(),
            src.packages.len(),
            if src.channels.is_empty() {
                "manager defaults".to_string()
            } else {
                src.channels.join(" > ")
            }
        );
        run_checked(
            ctx.runner,
            &src.manager,
            &create_args(src, &prefix),
            ctx.lookup_path(),
            ctx.deadline(),
        )?;

        // Later entries (and smoke tests) find the environment's tools from here on.
        let bin_dir = env_bin_dir(&prefix);
        ctx.append_to_lookup_path(&bin_dir);
        log_info!(
            "[EnvManagerInstaller] {} added to the lookup path",
            bin_dir.display().to_string().green()
        );

        // Only disk space is at stake, so a failed clean is a warning.
        let clean = ["clean", "--all", "--yes"].map(String::from);
        if let Err(e) = run_checked(
            ctx.runner,
            &src.manager,
            &clean,
            ctx.lookup_path(),
            ctx.deadline(),
        ) {
            log_warn!(
                "[EnvManagerInstaller] Cache cleanup after {} failed: {}",
                src.environment.yellow(),
                e
            );
        }

        Ok(InstallOutcome {
            install_path: Some(prefix),
            bin_dir: Some(bin_dir),
            detail: Some(format!("environment {}", src.environment)),
            ..Default::default()
        })
    }
}
