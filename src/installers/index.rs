// Index installer: pinned requirements from a flat package index via `<python> -m pip`.
//
// Installation runs in up to three pip invocations:
// 1. the bootstrap tooling (pip, setuptools, wheel) at fixed versions;
// 2. every requirement not served by the variant, from the default index;
// 3. the variant-selected requirements, from the one index the variant chose.
//
// Step 3 uses `--index-url`, which replaces the default index instead of adding to it,
// and the non-selected alternatives are never passed to pip at all.
//
// Unless the manifest names an install path, the interpreter's site-packages directory
// is asked for afterwards and recorded. A later run only skips the set while that
// directory is still there, so a wiped environment is reinstalled even though its
// receipt survived.

use crate::installers::{InstallOutcome, Installer};
use crate::libs::context::{ProvisionContext, ResolvedVariant};
use crate::libs::manifest_loading::requirement_name;
use crate::libs::runner::run_checked;
use crate::schemas::errors::ProvisionError;
use crate::schemas::manifest::{EntrySource, ManifestEntry};
use crate::schemas::state_file::InstallReceipt;
use crate::{log_debug, log_info, log_warn};
use colored::Colorize;
use std::path::PathBuf;

/// Prints the directory pip installs pure-Python packages into.
const SITE_PACKAGES_QUERY: &str = "import sysconfig; print(sysconfig.get_paths()['purelib'])";

pub struct IndexInstaller;

/// Splits `requirements` into (served by the variant, everything else), keeping order.
pub fn split_variant<'r>(
    requirements: &'r [String],
    package_prefix: &str,
) -> (Vec<&'r String>, Vec<&'r String>) {
    let prefix = package_prefix.to_lowercase();
    requirements
        .iter()
        .partition(|r| requirement_name(r).starts_with(&prefix))
}

fn pip_install(python: &str, extra: &[&str], packages: &[&String]) -> Vec<String> {
    let mut args: Vec<String> = ["-m", "pip", "install", "--no-cache-dir"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    args.extend(extra.iter().map(|s| s.to_string()));
    args.extend(packages.iter().map(|p| p.to_string()));
    log_debug!("[IndexInstaller] {} {}", python, args.join(" "));
    args
}

/// Asks `python` where its site-packages live. `None` if it cannot say.
fn site_packages(python: &str, ctx: &ProvisionContext) -> Option<PathBuf> {
    let args = ["-c", SITE_PACKAGES_QUERY].map(String::from);
    match run_checked(ctx.runner, python, &args, ctx.lookup_path(), ctx.deadline()) {
        // The path is the last thing printed; anything before it is interpreter noise.
        Ok(out) => out
            .stdout
            .lines()
            .map(str::trim)
            .rfind(|l| !l.is_empty())
            .map(PathBuf::from),
        Err(e) => {
            log_warn!(
                "[IndexInstaller] Could not locate site-packages for {}: {}",
                python.yellow(),
                e
            );
            None
        }
    }
}

impl Installer for IndexInstaller {
    fn is_provisioned(
        &self,
        entry: &ManifestEntry,
        receipt: &InstallReceipt,
        ctx: &ProvisionContext,
    ) -> bool {
        // Without a path there is nothing on disk to check, so the receipt alone is
        // not trusted.
        match entry
            .resolved_install_path(&ctx.settings)
            .or_else(|| receipt.install_path.clone())
        {
            Some(path) => path.exists(),
            None => {
                log_debug!(
                    "[IndexInstaller] No install path recorded for {}",
                    entry.name
                );
                false
            }
        }
    }

    fn install(
        &self,
        entry: &ManifestEntry,
        ctx: &mut ProvisionContext,
    ) -> Result<InstallOutcome, ProvisionError> {
        let EntrySource::Index(src) = &entry.source else {
            return Err(ProvisionError::Config(format!(
                "'{}' is not an index package set",
                entry.name
            )));
        };
        let python = src.python.as_str();
        let variant: Option<ResolvedVariant> = ctx.variant_for(&entry.name).cloned();

        if !src.bootstrap.is_empty() {
            log_info!(
                "[IndexInstaller] Bootstrapping build tooling for {}",
                entry.name.bold()
            );
            let bootstrap: Vec<&String> = src.bootstrap.iter().collect();
            run_checked(
                ctx.runner,
                python,
                &pip_install(python, &[], &bootstrap),
                ctx.lookup_path(),
                ctx.deadline(),
            )?;
        }

        // With no variant every requirement comes from the default index.
        let (selected, remainder) = match &variant {
            Some(v) => split_variant(&src.requirements, &v.package),
            None => (Vec::new(), src.requirements.iter().collect()),
        };

        if !remainder.is_empty() {
            ctx.check_deadline("installing requirements")?;
            log_info!(
                "[IndexInstaller] Installing {} requirement(s) for {}",
                remainder.len(),
                entry.name.bold()
            );
            run_checked(
                ctx.runner,
                python,
                &pip_install(python, &[], &remainder),
                ctx.lookup_path(),
                ctx.deadline(),
            )?;
        }

        let mut detail = None;
        if let Some(v) = &variant {
            if !selected.is_empty() {
                ctx.check_deadline("installing variant requirements")?;
                log_info!(
                    "[IndexInstaller] Installing variant '{}' of {} from {}",
                    v.alternative.green(),
                    v.package.bold(),
                    v.source.cyan()
                );
                run_checked(
                    ctx.runner,
                    python,
                    &pip_install(python, &["--index-url", v.source.as_str()], &selected),
                    ctx.lookup_path(),
                    ctx.deadline(),
                )?;
            }
            detail = Some(format!("variant {}", v.alternative));
        }

        let install_path = entry
            .resolved_install_path(&ctx.settings)
            .or_else(|| site_packages(python, ctx));
        if let Some(path) = &install_path {
            log_debug!("[IndexInstaller] {} lives in {}", entry.name, path.display());
        }

        Ok(InstallOutcome {
            install_path,
            detail,
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::libs::runner::testing::RecordingRunner;
    use crate::libs::utilities::fetch::testing::StaticFetcher;
    use crate::libs::manifest_loading::{ManifestFormat, parse_manifest};
    use crate::schemas::settings::SettingsOverrides;

    const MANIFEST: &str = r#"
settings:
  bin_dir: /tmp/unused-bin
entries:
  - name: py
    kind: index_package_set
    source:
      requirements: ["numpy==1.26.4", "torch==2.3.0", "scipy==1.13.0", "torchvision==0.18.0"]
    variant:
      package: torch
      default: cpu
      alternatives:
        cpu: https://download.pytorch.org/whl/cpu
        cuda: https://download.pytorch.org/whl/cu121
"#;

    fn run_with(variant: Option<&str>, runner: &RecordingRunner) -> Result<InstallOutcome, ProvisionError> {
        let overrides = SettingsOverrides {
            variant: variant.map(str::to_string),
            ..Default::default()
        };
        let manifest = parse_manifest(MANIFEST, ManifestFormat::Yaml, &overrides).unwrap();
        let fetcher = StaticFetcher::default();
        let mut ctx = ProvisionContext::with_lookup_path(
            manifest.settings.clone(),
            &manifest.entries,
            &fetcher,
            runner,
            vec![],
        );
        IndexInstaller.install(&manifest.entries[0], &mut ctx)
    }

    #[test]
    fn split_is_by_name_prefix_and_keeps_order() {
        let reqs: Vec<String> = ["numpy==1", "torch==2", "Torchvision==3", "scipy==4"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let (sel, rest) = split_variant(&reqs, "torch");
        assert_eq!(sel, vec!["torch==2", "Torchvision==3"]);
        assert_eq!(rest, vec!["numpy==1", "scipy==4"]);
    }

    #[test]
    fn bootstrap_then_remainder_then_variant_from_selected_index_only() {
        let runner = RecordingRunner::default();
        let outcome = run_with(None, &runner).unwrap();
        assert_eq!(outcome.detail.as_deref(), Some("variant cpu"));

        let lines = runner.lines();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].contains("pip==24.0 setuptools==69.5.1 wheel==0.43.0"));
        assert!(lines[1].ends_with("numpy==1.26.4 scipy==1.13.0"));
        assert!(!lines[1].contains("--index-url"));
        assert!(lines[2].contains("--index-url https://download.pytorch.org/whl/cpu"));
        assert!(lines[2].ends_with("torch==2.3.0 torchvision==0.18.0"));
        assert!(lines.iter().all(|l| !l.contains("cu121")));
        assert!(lines[3].contains("sysconfig"));
    }

    #[test]
    fn override_selects_the_other_index_exclusively() {
        let runner = RecordingRunner::default();
        run_with(Some("cuda"), &runner).unwrap();
        let lines = runner.lines();
        assert!(lines.iter().any(|l| l.contains("whl/cu121")));
        assert!(lines.iter().all(|l| !l.contains("whl/cpu")));
    }

    #[test]
    fn failing_pip_is_an_installer_exit_error() {
        let runner = RecordingRunner::failing_on("scipy");
        let err = run_with(None, &runner).unwrap_err();
        assert_eq!(err.kind(), "InstallerExitError");
        // The variant phase never ran after the remainder failed.
        assert_eq!(runner.lines().len(), 2);
    }

    fn receipt_at(path: Option<PathBuf>) -> InstallReceipt {
        InstallReceipt {
            kind: crate::schemas::manifest::EntryKind::IndexPackageSet,
            fingerprint: "f".repeat(64),
            install_path: path,
            installed_sha256: None,
            aliases: vec![],
            bin_dir: None,
            strategy: None,
            installed_at: "2026-01-15T10:30:45+00:00".to_string(),
        }
    }

    #[test]
    fn install_records_site_packages_and_skips_only_while_it_exists() {
        let site = tempfile::tempdir().unwrap();
        let site_path = site.path().join("site-packages");
        std::fs::create_dir_all(&site_path).unwrap();
        let runner =
            RecordingRunner::default().replying("sysconfig", &site_path.display().to_string());

        let outcome = run_with(None, &runner).unwrap();
        assert_eq!(outcome.install_path.as_deref(), Some(site_path.as_path()));

        let manifest =
            parse_manifest(MANIFEST, ManifestFormat::Yaml, &SettingsOverrides::default()).unwrap();
        let fetcher = StaticFetcher::default();
        let ctx = ProvisionContext::with_lookup_path(
            manifest.settings.clone(),
            &manifest.entries,
            &fetcher,
            &runner,
            vec![],
        );
        let receipt = receipt_at(outcome.install_path);
        assert!(IndexInstaller.is_provisioned(&manifest.entries[0], &receipt, &ctx));

        std::fs::remove_dir_all(&site_path).unwrap();
        assert!(!IndexInstaller.is_provisioned(&manifest.entries[0], &receipt, &ctx));
        // A receipt that never recorded a path is not enough on its own.
        assert!(!IndexInstaller.is_provisioned(&manifest.entries[0], &receipt_at(None), &ctx));
    }

    #[cfg(unix)]
    #[test]
    fn hung_interpreter_is_stopped_by_the_run_deadline() {
        use crate::libs::runner::SystemRunner;
        use std::os::unix::fs::PermissionsExt;
        use std::time::{Duration, Instant};

        let dir = tempfile::tempdir().unwrap();
        let slowpy = dir.path().join("slowpy");
        std::fs::write(&slowpy, "#!/bin/sh\nexec sleep 4\n").unwrap();
        std::fs::set_permissions(&slowpy, std::fs::Permissions::from_mode(0o755)).unwrap();

        let yaml = r#"
entries:
  - name: py
    kind: index_package_set
    source:
      python: slowpy
      requirements: ["numpy==1.26.4"]
"#;
        let overrides = SettingsOverrides {
            deadline_secs: Some(1),
            ..Default::default()
        };
        let manifest = parse_manifest(yaml, ManifestFormat::Yaml, &overrides).unwrap();
        let fetcher = StaticFetcher::default();
        let mut ctx = ProvisionContext::with_lookup_path(
            manifest.settings.clone(),
            &manifest.entries,
            &fetcher,
            &SystemRunner,
            vec![dir.path().to_path_buf(), PathBuf::from("/bin"), PathBuf::from("/usr/bin")],
        );

        let started = Instant::now();
        let err = IndexInstaller
            .install(&manifest.entries[0], &mut ctx)
            .unwrap_err();
        assert_eq!(err.kind(), "DeadlineExceeded");
        assert!(started.elapsed() < Duration::from_secs(3));
    }
}
