// This file is the direct-binary installer.
//
// Drives one binary through fetch, verify, classify, extract, locate, install and probe.
// The payload is verified while still in memory, before anything touches the disk, and
// all extraction happens in a scratch directory that is removed whichever way the
// install ends. Only a verified, located binary is ever copied to the target path.

use crate::installers::{InstallOutcome, Installer};
use crate::libs::context::ProvisionContext;
use crate::libs::smoke_tester;
use crate::libs::utilities::binary::{self, LocateTier};
use crate::libs::utilities::compression::{classify, extract};
use crate::libs::utilities::digest::{self, sha256_file};
use crate::schemas::errors::ProvisionError;
use crate::schemas::manifest::{EntrySource, ManifestEntry};
use crate::schemas::report::SmokeOutcome;
use crate::schemas::state_file::InstallReceipt;
use crate::{log_debug, log_info, log_warn};
use colored::Colorize;
use std::fs;
use std::path::Path;
use std::time::Duration;

pub struct BinaryInstaller;

/// File-name prefixes tried when searching an extracted archive, most specific first.
pub fn search_patterns(entry: &ManifestEntry, target: &Path) -> Vec<String> {
    let mut patterns: Vec<String> = Vec::new();
    let mut push = |p: &str| {
        if !p.is_empty() && !patterns.iter().any(|q| q.eq_ignore_ascii_case(p)) {
            patterns.push(p.to_string());
        }
    };
    if let Some(p) = &entry.install.pattern {
        push(p);
    }
    if let Some(file_name) = target.file_name() {
        push(&file_name.to_string_lossy());
    }
    push(&entry.name);
    for alias in &entry.install.aliases {
        if let Some(file_name) = Path::new(alias).file_name() {
            push(&file_name.to_string_lossy());
        }
    }
    patterns
}

fn tier_label(tier: LocateTier) -> &'static str {
    match tier {
        LocateTier::Direct => "single file",
        LocateTier::Search => "archive search",
        LocateTier::Artifact => "raw artifact",
    }
}

impl Installer for BinaryInstaller {
    fn is_provisioned(
        &self,
        entry: &ManifestEntry,
        receipt: &InstallReceipt,
        ctx: &ProvisionContext,
    ) -> bool {
        let Some(target) = entry.resolved_install_path(&ctx.settings) else {
            return false;
        };
        let Some(recorded) = &receipt.installed_sha256 else {
            return false;
        };
        // The installed file must be byte-for-byte what we put there last time.
        match sha256_file(&target) {
            Ok(actual) if &actual == recorded => {}
            Ok(_) => {
                log_warn!(
                    "[BinaryInstaller] {} changed since it was installed; reinstalling",
                    target.display().to_string().yellow()
                );
                return false;
            }
            Err(_) => return false,
        }
        // Every alias must still exist (as a link or a file).
        receipt
            .aliases
            .iter()
            .all(|a| fs::symlink_metadata(a).is_ok())
    }

    fn on_skip(&self, entry: &ManifestEntry, receipt: &InstallReceipt, ctx: &mut ProvisionContext) {
        // Same directories a fresh install would have exposed, so later entries resolve
        // the binary the same way on every run.
        let target = receipt
            .install_path
            .clone()
            .or_else(|| entry.resolved_install_path(&ctx.settings));
        if let Some(parent) = target.as_deref().and_then(Path::parent) {
            ctx.append_to_lookup_path(parent);
        }
        for link in &receipt.aliases {
            if let Some(parent) = link.parent() {
                ctx.append_to_lookup_path(parent);
            }
        }
        log_debug!("[BinaryInstaller] Reusing installed {}", entry.name);
    }

    fn install(
        &self,
        entry: &ManifestEntry,
        ctx: &mut ProvisionContext,
    ) -> Result<InstallOutcome, ProvisionError> {
        let EntrySource::Binary { url } = &entry.source else {
            return Err(ProvisionError::Config(format!(
                "'{}' is not a direct binary",
                entry.name
            )));
        };
        let expected = entry.expected_digest.as_deref().ok_or_else(|| {
            ProvisionError::Config(format!("'{}' has no expected digest", entry.name))
        })?;
        let target = entry
            .resolved_install_path(&ctx.settings)
            .ok_or_else(|| ProvisionError::Config(format!("'{}' has no target", entry.name)))?;
        let file_name = target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| {
                ProvisionError::Config(format!("target {} has no file name", target.display()))
            })?;

        // 1-2. fetch and verify
        ctx.check_deadline("fetching")?;
        log_info!("[BinaryInstaller] Fetching {}", url.cyan());
        let payload = ctx.fetcher.fetch(url, ctx.deadline())?;
        digest::verify(url, &payload, expected)?;
        log_debug!("[BinaryInstaller] Digest verified for {}", entry.name);

        // 3-4. classify and extract in a scratch dir
        let work = tempfile::Builder::new()
            .prefix("setup-toolchain-")
            .tempdir()
            .map_err(|e| ProvisionError::io("creating scratch dir", e))?;
        // Classify from the bytes we verified, then persist them for the extractors.
        let format = classify(&payload);
        let artifact = work.path().join("artifact");
        fs::write(&artifact, &payload)
            .map_err(|e| ProvisionError::io(format!("writing {}", artifact.display()), e))?;
        // The artifact on disk is the copy from here on.
        drop(payload);

        let extraction = extract(format, &artifact, work.path(), &file_name)?;
        log_info!(
            "[BinaryInstaller] {} classified as {}, extracted via {}",
            entry.name.bold(),
            format.to_string().magenta(),
            extraction.strategy.to_string().magenta()
        );

        // 5. locate
        let patterns = search_patterns(entry, &target);
        let located = binary::locate(&extraction, &artifact, &patterns, ctx.settings.search_depth)?;
        log_debug!(
            "[BinaryInstaller] Using {} ({})",
            located.path.display(),
            tier_label(located.tier)
        );

        // 6. install and alias
        binary::install_binary(&located.path, &target)
            .map_err(|e| ProvisionError::io(format!("installing {}", target.display()), e))?;
        let mut aliases = Vec::with_capacity(entry.install.aliases.len());
        for alias in &entry.install.aliases {
            let link = binary::create_alias(&target, alias)
                .map_err(|e| ProvisionError::io(format!("creating alias '{}'", alias), e))?;
            aliases.push(link);
        }
        // Expose the target dir and every alias dir to later entries.
        if let Some(parent) = target.parent() {
            ctx.append_to_lookup_path(parent);
        }
        for link in &aliases {
            if let Some(parent) = link.parent() {
                ctx.append_to_lookup_path(parent);
            }
        }

        // 7. the installed name must resolve and start
        // Prefer the first alias: it is the name the user will type.
        let probe_name = aliases
            .first()
            .and_then(|a| a.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| file_name.clone());
        let probe = smoke_tester::verify(
            &[probe_name.clone(), "--help".to_string()],
            ctx.lookup_path(),
            Duration::from_secs(ctx.settings.smoke_timeout_secs),
        );
        match probe {
            SmokeOutcome::BinaryMissing { .. } => {
                return Err(ProvisionError::NotFound {
                    searched: ctx.lookup_path().to_vec(),
                });
            }
            SmokeOutcome::Timeout { after_secs } => log_warn!(
                "[BinaryInstaller] '{}' did not answer --help within {}s; keeping it",
                probe_name.yellow(),
                after_secs
            ),
            _ => log_debug!("[BinaryInstaller] '{}' starts", probe_name),
        }

        // Hash what is on disk now; this is what the next run compares against.
        let installed_sha256 = sha256_file(&target)
            .map_err(|e| ProvisionError::io(format!("hashing {}", target.display()), e))?;
        let detail = format!(
            "{} via {}, {}",
            format,
            extraction.strategy,
            tier_label(located.tier)
        );
        Ok(InstallOutcome {
            install_path: Some(target),
            installed_sha256: Some(installed_sha256),
            aliases,
            bin_dir: None,
            strategy: Some(extraction.strategy.to_string()),
            detail: Some(detail),
        })
    }
}

/// Paths under `dir`, for asserting that nothing was written.
#[cfg(test)]
pub(crate) fn files_under(dir: &Path) -> Vec<std::path::PathBuf> {
    walkdir::WalkDir::new(dir)
        .min_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .map(|e| e.into_path())
        .collect()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::libs::manifest_loading::{ManifestFormat, parse_manifest};
    use crate::libs::runner::testing::RecordingRunner;
    use crate::libs::utilities::compression::testing::{SCRIPT, gzip, tar_bytes, xz};
    use crate::libs::utilities::digest::sha256_hex;
    use crate::libs::utilities::fetch::testing::StaticFetcher;
    use crate::schemas::manifest::Manifest;
    use crate::schemas::settings::SettingsOverrides;
    use std::path::PathBuf;

    const URL: &str = "https://releases.example.org/aligner-1.0-linux.tar.gz";

    fn manifest(bin_dir: &Path, digest: &str, install: &str) -> Manifest {
        let yaml = format!(
            r#"
settings:
  bin_dir: {bin}
  state_dir: {bin}/../state
entries:
  - name: aligner
    kind: direct_binary
    source: {URL}
    expected_digest: "sha256:{digest}"
{install}
"#,
            bin = bin_dir.display(),
        );
        parse_manifest(&yaml, ManifestFormat::Yaml, &SettingsOverrides::default()).unwrap()
    }

    fn lookup() -> Vec<PathBuf> {
        vec![PathBuf::from("/bin"), PathBuf::from("/usr/bin")]
    }

    fn install(
        manifest: &Manifest,
        payload: Vec<u8>,
    ) -> (Result<InstallOutcome, ProvisionError>, Vec<PathBuf>) {
        let fetcher = StaticFetcher::default().with(URL, payload);
        let runner = RecordingRunner::default();
        let mut ctx = ProvisionContext::with_lookup_path(
            manifest.settings.clone(),
            &manifest.entries,
            &fetcher,
            &runner,
            lookup(),
        );
        let result = BinaryInstaller.install(&manifest.entries[0], &mut ctx);
        (result, ctx.lookup_path().to_vec())
    }

    #[test]
    fn nested_tar_gz_is_installed_with_aliases() {
        let root = tempfile::tempdir().unwrap();
        let bin = root.path().join("bin");
        let payload = gzip(&tar_bytes(&[
            ("aligner-1.0/README", 0o644, b"docs"),
            ("aligner-1.0/bin/aligner-avx2", 0o755, SCRIPT),
        ]));
        let m = manifest(
            &bin,
            &sha256_hex(&payload),
            "    install_path:\n      aliases: [aligner-avx2, align]",
        );

        let (result, path) = install(&m, payload);
        let outcome = result.unwrap();
        let target = bin.join("aligner");
        assert_eq!(outcome.install_path.as_deref(), Some(target.as_path()));
        assert_eq!(outcome.strategy.as_deref(), Some("tar-gz"));
        assert_eq!(fs::read(&target).unwrap(), SCRIPT);
        assert!(binary::is_executable(&target));
        assert_eq!(outcome.aliases, vec![bin.join("aligner-avx2"), bin.join("align")]);
        for alias in &outcome.aliases {
            assert_eq!(fs::canonicalize(alias).unwrap(), fs::canonicalize(&target).unwrap());
        }
        assert!(path.contains(&bin));
    }

    #[test]
    fn raw_xz_binary_is_recorded_as_raw() {
        let root = tempfile::tempdir().unwrap();
        let bin = root.path().join("bin");
        let payload = xz(SCRIPT);
        let m = manifest(&bin, &sha256_hex(&payload), "");

        let (result, _) = install(&m, payload);
        let outcome = result.unwrap();
        assert_eq!(outcome.strategy.as_deref(), Some("raw-xz"));
        assert!(outcome.detail.unwrap().contains("raw-xz"));
        assert_eq!(fs::read(bin.join("aligner")).unwrap(), SCRIPT);
    }

    #[test]
    fn tampered_payload_writes_nothing_to_target() {
        let root = tempfile::tempdir().unwrap();
        let bin = root.path().join("bin");
        let payload = gzip(&tar_bytes(&[("aligner", 0o755, SCRIPT)]));
        let m = manifest(&bin, &sha256_hex(b"something else"), "");

        let (result, _) = install(&m, payload);
        let err = result.unwrap_err();
        assert_eq!(err.kind(), "IntegrityError");
        assert!(!bin.exists() || files_under(&bin).is_empty());
    }

    #[test]
    fn archive_without_executable_is_not_found() {
        let root = tempfile::tempdir().unwrap();
        let bin = root.path().join("bin");
        let payload = gzip(&tar_bytes(&[("docs/README.md", 0o644, b"# nothing here")]));
        let m = manifest(&bin, &sha256_hex(&payload), "");

        let (result, _) = install(&m, payload);
        assert_eq!(result.unwrap_err().kind(), "NotFoundError");
        assert!(!bin.join("aligner").exists());
    }

    #[test]
    fn patterns_prefer_configured_then_target_then_name() {
        let root = tempfile::tempdir().unwrap();
        let m = manifest(
            root.path(),
            &"a".repeat(64),
            "    install_path:\n      path: /opt/tools/aligner2\n      pattern: aln\n      aliases: [aligner]",
        );
        let entry = &m.entries[0];
        let target = entry.resolved_install_path(&m.settings).unwrap();
        assert_eq!(search_patterns(entry, &target), vec!["aln", "aligner2", "aligner"]);
    }

    #[test]
    fn skip_exposes_the_same_directories_as_an_install() {
        let root = tempfile::tempdir().unwrap();
        let bin = root.path().join("bin");
        let opt = root.path().join("opt").join("aligner");
        let payload = gzip(&tar_bytes(&[("aligner", 0o755, SCRIPT)]));
        let m = manifest(
            &bin,
            &sha256_hex(&payload),
            &format!(
                "    install_path:\n      path: {}/aligner-1.0\n      pattern: aligner\n      aliases: [{}/aligner]",
                opt.display(),
                root.path().join("links").display()
            ),
        );
        let (result, installed_path) = install(&m, payload);
        let outcome = result.unwrap();

        let receipt = InstallReceipt {
            kind: crate::schemas::manifest::EntryKind::DirectBinary,
            fingerprint: "f".repeat(64),
            install_path: outcome.install_path.clone(),
            installed_sha256: outcome.installed_sha256.clone(),
            aliases: outcome.aliases.clone(),
            bin_dir: None,
            strategy: outcome.strategy.clone(),
            installed_at: "2026-01-15T10:30:45+00:00".to_string(),
        };
        let fetcher = StaticFetcher::default();
        let runner = RecordingRunner::default();
        let mut ctx = ProvisionContext::with_lookup_path(
            m.settings.clone(),
            &m.entries,
            &fetcher,
            &runner,
            lookup(),
        );
        assert!(BinaryInstaller.is_provisioned(&m.entries[0], &receipt, &ctx));
        BinaryInstaller.on_skip(&m.entries[0], &receipt, &mut ctx);

        assert_eq!(ctx.lookup_path(), installed_path.as_slice());
        assert!(ctx.lookup_path().contains(&opt));
        assert!(ctx.lookup_path().contains(&root.path().join("links")));
        assert!(fetcher.requested.borrow().is_empty());
    }
}
