// This file holds the Binary Locator and the helpers that place a binary on disk.
//
// Release archives do not reliably preserve executable bits or a predictable internal
// layout, so locating the tool is a two-tier search: first a bounded walk of the
// extraction directory for an executable whose name matches one of the patterns, then
// the downloaded artifact itself (made executable) if it is a usable executable.

use crate::libs::utilities::compression::{Extraction, is_usable_binary};
use crate::schemas::errors::ProvisionError;
use crate::{log_debug, log_info, log_warn};
use colored::Colorize;
use std::fs;
use std::io;
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Permission mode for installed binaries: rwx for owner, r-x for group and other.
pub const INSTALL_MODE: u32 = 0o755;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocateTier {
    /// The extraction produced exactly one file.
    Direct,
    /// Found by walking the extraction directory.
    Search,
    /// The downloaded artifact itself.
    Artifact,
}

#[derive(Debug, Clone)]
pub struct LocatedBinary {
    pub path: PathBuf,
    pub tier: LocateTier,
}

/// Finds the binary to install from an extraction.
///
/// `patterns` are file-name prefixes, matched case-insensitively, in order of preference.
pub fn locate(
    extraction: &Extraction,
    artifact: &Path,
    patterns: &[String],
    max_depth: usize,
) -> Result<LocatedBinary, ProvisionError> {
    // Tier 0: single-file strategies already know their output.
    if let Some(direct) = &extraction.direct_candidate {
        make_executable(direct)
            .map_err(|e| ProvisionError::io(format!("chmod {}", direct.display()), e))?;
        return Ok(LocatedBinary {
            path: direct.clone(),
            tier: LocateTier::Direct,
        });
    }

    // Tier 1: bounded walk of the extraction directory.
    if let Some(found) = find_executable(&extraction.dir, patterns, max_depth) {
        return Ok(LocatedBinary {
            path: found,
            tier: LocateTier::Search,
        });
    }

    log_warn!(
        "[BinaryLocator] No executable matching {:?} under {}; trying the downloaded artifact",
        patterns,
        extraction.dir.display()
    );
    // Tier 2: the download itself, if it is something the OS can run.
    if is_usable_binary(artifact) {
        make_executable(artifact)
            .map_err(|e| ProvisionError::io(format!("chmod {}", artifact.display()), e))?;
        return Ok(LocatedBinary {
            path: artifact.to_path_buf(),
            tier: LocateTier::Artifact,
        });
    }

    Err(ProvisionError::NotFound {
        searched: vec![extraction.dir.clone(), artifact.to_path_buf()],
    })
}

/// Walks `dir` (at most `max_depth` levels) for an executable file whose name starts with
/// one of `patterns`. Earlier patterns win, then shallower paths, then name order.
pub fn find_executable(dir: &Path, patterns: &[String], max_depth: usize) -> Option<PathBuf> {
    log_debug!(
        "[BinaryLocator] Searching {} for {:?}",
        dir.to_string_lossy().yellow(),
        patterns
    );
    let patterns: Vec<String> = patterns.iter().map(|p| p.to_lowercase()).collect();

    // Best match so far as (pattern rank, depth, path); lower tuples win.
    let mut best: Option<(usize, usize, PathBuf)> = None;
    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(max_depth.max(1))
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_lowercase();
        // Only the first (most preferred) matching pattern counts for ranking.
        let Some(rank) = patterns.iter().position(|p| name.starts_with(p.as_str())) else {
            continue;
        };
        if !is_executable(entry.path()) {
            log_debug!(
                "[BinaryLocator] Skipping {:?}: name matches but not executable",
                entry.path()
            );
            continue;
        }
        let key = (rank, entry.depth());
        if best.as_ref().is_none_or(|(r, d, _)| key < (*r, *d)) {
            best = Some((rank, entry.depth(), entry.path().to_path_buf()));
        }
    }

    match best {
        Some((_, _, path)) => {
            log_debug!("[BinaryLocator] Found executable: {}", path.display());
            Some(path)
        }
        None => None,
    }
}

#[cfg(unix)]
pub fn is_executable(path: &Path) -> bool {
    fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
pub fn is_executable(path: &Path) -> bool {
    path.is_file()
}

#[cfg(unix)]
pub fn make_executable(path: &Path) -> io::Result<()> {
    let mut perms = fs::metadata(path)?.permissions();
    perms.set_mode(INSTALL_MODE);
    fs::set_permissions(path, perms)
}

#[cfg(not(unix))]
pub fn make_executable(_path: &Path) -> io::Result<()> {
    Ok(())
}

/// Copies `candidate` to `target` with [`INSTALL_MODE`].
///
/// The copy goes to a sibling temp name first and is renamed into place, so a crash never
/// leaves a half-written binary under the target name.
pub fn install_binary(candidate: &Path, target: &Path) -> io::Result<()> {
    let parent = target
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "target has no parent"))?;
    fs::create_dir_all(parent)?;

    let file_name = target
        .file_name()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "target has no file name"))?;
    let staging = parent.join(format!(".{}.partial", file_name.to_string_lossy()));
    // Copy, chmod and rename as one step; on any failure the staging file is removed so
    // the target directory holds nothing but finished binaries.
    let placed = fs::copy(candidate, &staging)
        .and_then(|_| make_executable(&staging))
        .and_then(|()| fs::rename(&staging, target));
    if let Err(e) = placed {
        if fs::symlink_metadata(&staging).is_ok() {
            let _ = fs::remove_file(&staging);
        }
        return Err(e);
    }

    log_info!(
        "[BinaryInstaller] Installed {}",
        target.to_string_lossy().green()
    );
    Ok(())
}

/// Where an alias lands: absolute aliases as given, bare names next to the target.
pub fn alias_path(target: &Path, alias: &str) -> PathBuf {
    let p = Path::new(alias);
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        target
            .parent()
            .map(|dir| dir.join(alias))
            .unwrap_or_else(|| p.to_path_buf())
    }
}

/// Points `alias` at `target`, replacing whatever was there.
pub fn create_alias(target: &Path, alias: &str) -> io::Result<PathBuf> {
    let link = alias_path(target, alias);
    if link == target {
        return Ok(link);
    }
    if fs::symlink_metadata(&link).is_ok() {
        fs::remove_file(&link)?;
    }
    if let Some(parent) = link.parent() {
        fs::create_dir_all(parent)?;
    }
    #[cfg(unix)]
    std::os::unix::fs::symlink(target, &link)?;
    #[cfg(not(unix))]
    fs::copy(target, &link).map(|_| ())?;

    log_debug!(
        "[BinaryInstaller] Alias {} -> {}",
        link.display(),
        target.display()
    );
    Ok(link)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::libs::utilities::compression::ExtractionStrategy;

    fn write_file(path: &Path, mode: u32) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"#!/bin/sh\necho hi\n").unwrap();
        #[cfg(unix)]
        fs::set_permissions(path, fs::Permissions::from_mode(mode)).unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn search_requires_exec_bit_and_prefers_earlier_patterns() {
        let dir = tempfile::tempdir().unwrap();
        write_file(&dir.path().join("foldseek/README"), 0o644);
        write_file(&dir.path().join("foldseek/bin/foldseek"), 0o755);
        write_file(&dir.path().join("foldseek/foldseek.txt"), 0o644);
        write_file(&dir.path().join("tool-helper"), 0o755);

        let patterns = vec!["foldseek".to_string(), "tool".to_string()];
        let found = find_executable(dir.path(), &patterns, 4).unwrap();
        assert!(found.ends_with("foldseek/bin/foldseek"));
    }

    #[cfg(unix)]
    #[test]
    fn failed_install_leaves_no_staging_file() {
        let dir = tempfile::tempdir().unwrap();
        let candidate = dir.path().join("extracted/tool");
        write_file(&candidate, 0o755);
        // A directory squatting on the target name makes the final rename fail.
        let target = dir.path().join("bin/tool");
        write_file(&target.join("keep"), 0o644);

        assert!(install_binary(&candidate, &target).is_err());
        assert!(!dir.path().join("bin/.tool.partial").exists());
        assert!(target.join("keep").exists());
    }

    #[cfg(unix)]
    #[test]
    fn search_depth_is_bounded() {
        let dir = tempfile::tempdir().unwrap();
        write_file(&dir.path().join("a/b/c/d/e/tool"), 0o755);
        assert!(find_executable(dir.path(), &["tool".to_string()], 3).is_none());
        assert!(find_executable(dir.path(), &["tool".to_string()], 6).is_some());
    }

    #[cfg(unix)]
    #[test]
    fn locate_falls_back_to_artifact_then_reports_searched_paths() {
        let work = tempfile::tempdir().unwrap();
        let extracted = work.path().join("extracted");
        fs::create_dir_all(&extracted).unwrap();
        let extraction = Extraction {
            dir: extracted.clone(),
            strategy: ExtractionStrategy::TarGz,
            direct_candidate: None,
        };

        let artifact = work.path().join("download");
        write_file(&artifact, 0o644);
        let located = locate(&extraction, &artifact, &["tool".to_string()], 4).unwrap();
        assert_eq!(located.tier, LocateTier::Artifact);
        assert!(is_executable(&artifact));

        fs::write(&artifact, b"not an executable").unwrap();
        match locate(&extraction, &artifact, &["tool".to_string()], 4) {
            Err(ProvisionError::NotFound { searched }) => {
                assert_eq!(searched, vec![extracted, artifact]);
            }
            other => panic!("expected NotFound, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn install_sets_mode_and_aliases_resolve() {
        let src_dir = tempfile::tempdir().unwrap();
        let bin_dir = tempfile::tempdir().unwrap();
        let candidate = src_dir.path().join("foldseek");
        write_file(&candidate, 0o600);

        let target = bin_dir.path().join("foldseek-9");
        install_binary(&candidate, &target).unwrap();
        let mode = fs::metadata(&target).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, INSTALL_MODE);

        let link = create_alias(&target, "foldseek").unwrap();
        assert_eq!(fs::read_link(&link).unwrap(), target);
        // Re-creating an alias replaces the old link.
        let again = create_alias(&target, "foldseek").unwrap();
        assert_eq!(link, again);
    }
}
