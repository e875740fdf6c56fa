//! # Orchestrator
//!
//! Walks manifest entries strictly in declaration order, dispatching each to the installer
//! for its kind. Later entries may depend on lookup-path entries added by earlier ones,
//! so there is no parallelism. A failure is recorded and the run moves on; only with
//! `fail_fast` does a required failure stop it, and every entry after that is recorded
//! as aborted.
//!
//! After all entries have been attempted, entries installed in this run that declare a
//! smoke command are probed, and the outcomes are folded into the report.

use crate::installers::{InstallOutcome, installer_for};
use crate::libs::context::ProvisionContext;
use crate::libs::smoke_tester;
use crate::libs::state_management::{StateStore, fingerprint};
use crate::schemas::errors::ProvisionError;
use crate::schemas::manifest::ManifestEntry;
use crate::schemas::report::{FailureCause, ProvisionResult, ProvisioningReport, Status};
use crate::schemas::state_file::InstallReceipt;
use crate::{log_debug, log_error, log_info, log_warn};
use colored::Colorize;
use std::time::{Duration, Instant};

/// An entry's outcome before smoke testing.
struct Attempt<'m> {
    entry: &'m ManifestEntry,
    status: Status,
    duration_ms: u128,
    error: Option<FailureCause>,
    detail: Option<String>,
}

/// Provisions `entries` in order and returns the report for the run.
pub fn run(
    entries: &[ManifestEntry],
    ctx: &mut ProvisionContext,
    state: &mut StateStore,
) -> ProvisioningReport {
    let started_at = chrono::Utc::now().to_rfc3339();
    log_info!(
        "[Orchestrator] Provisioning {} entr{}",
        entries.len(),
        if entries.len() == 1 { "y" } else { "ies" }
    );

    let mut attempts: Vec<Attempt> = Vec::with_capacity(entries.len());
    let mut aborted_by: Option<&str> = None;

    for entry in entries {
        if let Some(culprit) = aborted_by {
            let err = ProvisionError::Aborted(culprit.to_string());
            attempts.push(Attempt {
                entry,
                status: Status::Failed,
                duration_ms: 0,
                error: Some(FailureCause::from(&err)),
                detail: None,
            });
            continue;
        }

        let started = Instant::now();
        let attempt = provision_entry(entry, ctx, state, started);
        if attempt.status == Status::Failed && entry.required && ctx.settings.fail_fast {
            log_error!(
                "[Orchestrator] Stopping: required entry {} failed",
                entry.name.red()
            );
            aborted_by = Some(entry.name.as_str());
        }
        attempts.push(attempt);
    }

    let results = smoke_test(attempts, ctx);
    ProvisioningReport::new(started_at, results)
}

fn provision_entry<'m>(
    entry: &'m ManifestEntry,
    ctx: &mut ProvisionContext,
    state: &mut StateStore,
    started: Instant,
) -> Attempt<'m> {
    let installer = installer_for(entry.kind);
    let fp = fingerprint(entry, ctx.variant_for(&entry.name));
    let elapsed = || started.elapsed().as_millis();

    if let Some(receipt) = state.receipt(&entry.name).cloned() {
        if receipt.fingerprint == fp && installer.is_provisioned(entry, &receipt, ctx) {
            installer.on_skip(entry, &receipt, ctx);
            log_info!(
                "[Orchestrator] {} is already provisioned; skipping",
                entry.name.cyan()
            );
            return Attempt {
                entry,
                status: Status::Skipped,
                duration_ms: elapsed(),
                error: None,
                detail: receipt.strategy.clone(),
            };
        }
        log_debug!(
            "[Orchestrator] Receipt for {} is stale; reinstalling",
            entry.name
        );
    }

    log_info!(
        "[Orchestrator] Installing {} ({})",
        entry.name.bold(),
        entry.kind.to_string().blue()
    );
    let outcome = ctx
        .check_deadline(&format!("installing '{}'", entry.name))
        .and_then(|()| installer.install(entry, ctx));

    match outcome {
        Ok(outcome) => {
            let detail = outcome.detail.clone();
            state.record(&entry.name, receipt_for(entry, fp, outcome));
            log_info!(
                "[Orchestrator] {} installed in {}",
                entry.name.green(),
                format_duration(started.elapsed())
            );
            Attempt {
                entry,
                status: Status::Installed,
                duration_ms: elapsed(),
                error: None,
                detail,
            }
        }
        Err(err) => {
            state.forget(&entry.name);
            if entry.required {
                log_error!("[Orchestrator] {} failed: {}", entry.name.red(), err);
            } else {
                log_warn!(
                    "[Orchestrator] Optional entry {} failed: {}",
                    entry.name.yellow(),
                    err
                );
            }
            Attempt {
                entry,
                status: Status::Failed,
                duration_ms: elapsed(),
                error: Some(FailureCause::from(&err)),
                detail: None,
            }
        }
    }
}

fn receipt_for(entry: &ManifestEntry, fingerprint: String, outcome: InstallOutcome) -> InstallReceipt {
    InstallReceipt {
        kind: entry.kind,
        fingerprint,
        install_path: outcome.install_path,
        installed_sha256: outcome.installed_sha256,
        aliases: outcome.aliases,
        bin_dir: outcome.bin_dir,
        strategy: outcome.strategy,
        installed_at: chrono::Utc::now().to_rfc3339(),
    }
}

/// Probes every entry installed in this run that declares a smoke command.
fn smoke_test(attempts: Vec<Attempt>, ctx: &ProvisionContext) -> Vec<ProvisionResult> {
    let timeout = Duration::from_secs(ctx.settings.smoke_timeout_secs);
    attempts
        .into_iter()
        .map(|a| {
            let smoke = (a.status == Status::Installed && !a.entry.smoke_command.is_empty())
                .then(|| {
                    let outcome = smoke_tester::verify(&a.entry.smoke_command, ctx.lookup_path(), timeout);
                    if outcome.ok() {
                        log_info!(
                            "[SmokeTester] {} {}",
                            a.entry.name.green(),
                            outcome.first_line().unwrap_or("(no output)")
                        );
                    }
                    outcome
                });
            ProvisionResult {
                name: a.entry.name.clone(),
                status: a.status,
                required: a.entry.required,
                duration_ms: a.duration_ms,
                smoke,
                error: a.error,
                detail: a.detail,
            }
        })
        .collect()
}

fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs >= 60 {
        format!("{}m{:02}s", secs / 60, secs % 60)
    } else {
        format!("{}.{:01}s", secs, d.subsec_millis() / 100)
    }
}
