//! # Manifest Loading and Validation
//!
//! Reads a manifest (YAML, or TOML when the file ends in `.toml`), merges its settings
//! with command-line overrides, and validates every entry before anything runs:
//!
//! - `name`, `kind` and `source` are present, and names are unique;
//! - direct binaries carry a well-formed SHA-256 `expected_digest` and an http(s) URL;
//! - index requirements (and bootstrap tools) are pinned with `==`;
//! - environment names, channels and package specs are well-formed;
//! - a `variant` appears only on index package sets, its default is one of its
//!   alternatives, and its package prefix matches at least one requirement.

use crate::libs::utilities::digest::{is_valid_sha256, normalize_digest};
use crate::libs::utilities::path_helpers::expand_path;
use crate::schemas::errors::ManifestError;
use crate::schemas::manifest::{
    BinarySourceSpec, EntryKind, EntrySource, EnvManagerSource, IndexSource, InstallTarget,
    Manifest, ManifestEntry, RawEntry, RawInstallPath, RawManifest,
};
use crate::schemas::settings::{
    DEFAULT_VARIANT_ENV, MIN_FETCH_ATTEMPTS, ManifestSettings, Settings, SettingsOverrides,
    default_bin_dir, default_state_dir,
};
use crate::{log_debug, log_info, log_warn};
use colored::Colorize;
use std::collections::HashSet;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestFormat {
    Yaml,
    Toml,
}

impl ManifestFormat {
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("toml") => ManifestFormat::Toml,
            _ => ManifestFormat::Yaml,
        }
    }
}

pub fn load_manifest(path: &Path, overrides: &SettingsOverrides) -> Result<Manifest, ManifestError> {
    log_info!(
        "[Manifest] Loading {}",
        path.display().to_string().blue()
    );
    let contents = fs::read_to_string(path).map_err(|source| ManifestError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_manifest(&contents, ManifestFormat::from_path(path), overrides).map_err(|e| match e {
        ManifestError::Parse { reason, .. } => ManifestError::Parse {
            path: path.to_path_buf(),
            reason,
        },
        other => other,
    })
}

pub fn parse_manifest(
    contents: &str,
    format: ManifestFormat,
    overrides: &SettingsOverrides,
) -> Result<Manifest, ManifestError> {
    let raw: RawManifest = match format {
        ManifestFormat::Yaml => serde_yaml::from_str(contents).map_err(|e| e.to_string()),
        ManifestFormat::Toml => toml::from_str(contents).map_err(|e| e.to_string()),
    }
    .map_err(|reason| ManifestError::Parse {
        path: Default::default(),
        reason,
    })?;

    let settings = resolve_settings(&raw.settings, overrides);
    log_debug!("[Manifest] Resolved settings: {:?}", settings);

    let mut seen = HashSet::new();
    let mut entries = Vec::with_capacity(raw.entries.len());
    for (i, raw_entry) in raw.entries.into_iter().enumerate() {
        let entry = validate_entry(i + 1, raw_entry)?;
        if !seen.insert(entry.name.clone()) {
            return Err(ManifestError::DuplicateName(entry.name));
        }
        entries.push(entry);
    }
    if entries.is_empty() {
        log_warn!("[Manifest] Manifest declares no entries; nothing to provision");
    }
    Ok(Manifest { settings, entries })
}

fn resolve_settings(raw: &ManifestSettings, overrides: &SettingsOverrides) -> Settings {
    let variant_env = raw
        .variant_env
        .clone()
        .unwrap_or_else(|| DEFAULT_VARIANT_ENV.to_string());
    let variant_override = overrides.variant.clone().or_else(|| {
        std::env::var(&variant_env)
            .ok()
            .filter(|v| !v.trim().is_empty())
    });

    let mut fetch = raw.fetch.clone();
    if fetch.attempts < MIN_FETCH_ATTEMPTS {
        log_warn!(
            "[Manifest] fetch.attempts={} raised to the minimum of {}",
            fetch.attempts,
            MIN_FETCH_ATTEMPTS
        );
        fetch.attempts = MIN_FETCH_ATTEMPTS;
    }

    Settings {
        bin_dir: overrides
            .bin_dir
            .clone()
            .or_else(|| raw.bin_dir.as_deref().map(expand_path))
            .unwrap_or_else(default_bin_dir),
        state_dir: overrides
            .state_dir
            .clone()
            .or_else(|| raw.state_dir.as_deref().map(expand_path))
            .unwrap_or_else(default_state_dir),
        variant_override,
        fetch,
        smoke_timeout_secs: raw.smoke_timeout_secs.unwrap_or(10),
        fail_fast: overrides.fail_fast || raw.fail_fast.unwrap_or(false),
        search_depth: raw.search_depth.unwrap_or(4),
        deadline_secs: overrides.deadline_secs,
    }
}

fn validate_entry(index: usize, raw: RawEntry) -> Result<ManifestEntry, ManifestError> {
    let name = raw
        .name
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .ok_or(ManifestError::MissingField { index, field: "name" })?;
    let kind = raw
        .kind
        .ok_or(ManifestError::MissingField { index, field: "kind" })?;
    let source_value = raw
        .source
        .ok_or(ManifestError::MissingField { index, field: "source" })?;

    let invalid = |reason: String| ManifestError::InvalidEntry {
        name: name.clone(),
        reason,
    };

    let source = match kind {
        EntryKind::IndexPackageSet => {
            let src: IndexSource = serde_json::from_value(source_value)
                .map_err(|e| invalid(format!("bad index source: {}", e)))?;
            validate_index_source(&name, &src)?;
            EntrySource::Index(src)
        }
        EntryKind::EnvManagerPackageSet => {
            let src: EnvManagerSource = serde_json::from_value(source_value)
                .map_err(|e| invalid(format!("bad environment source: {}", e)))?;
            validate_env_source(&name, &src)?;
            EntrySource::EnvManager(src)
        }
        EntryKind::DirectBinary => {
            let spec: BinarySourceSpec = serde_json::from_value(source_value)
                .map_err(|e| invalid(format!("bad binary source: {}", e)))?;
            let url = validate_url(&name, spec.url())?;
            EntrySource::Binary { url }
        }
    };

    let expected_digest = match (kind, raw.expected_digest) {
        (EntryKind::DirectBinary, None) => return Err(ManifestError::MissingDigest(name)),
        (EntryKind::DirectBinary, Some(d)) if d.trim().is_empty() => {
            return Err(ManifestError::MissingDigest(name));
        }
        (EntryKind::DirectBinary, Some(d)) => {
            if !is_valid_sha256(&d) {
                return Err(ManifestError::MalformedDigest { name, digest: d });
            }
            Some(normalize_digest(&d))
        }
        (_, Some(_)) => {
            log_warn!(
                "[Manifest] '{}': expected_digest only applies to direct binaries; ignored",
                name.yellow()
            );
            None
        }
        (_, None) => None,
    };

    if let Some(variant) = &raw.variant {
        let EntrySource::Index(src) = &source else {
            return Err(invalid("variants are only supported on index package sets".to_string()));
        };
        if !variant.alternatives.contains_key(&variant.default) {
            return Err(ManifestError::UnknownVariantDefault {
                name,
                default: variant.default.clone(),
            });
        }
        let prefix = variant.package.to_lowercase();
        if !src
            .requirements
            .iter()
            .any(|r| requirement_name(r).starts_with(&prefix))
        {
            return Err(invalid(format!(
                "variant package '{}' matches no requirement",
                variant.package
            )));
        }
    }

    let install = match raw.install_path {
        None => InstallTarget::default(),
        Some(RawInstallPath::Plain(p)) => InstallTarget {
            path: Some(expand_path(&p)),
            ..Default::default()
        },
        Some(RawInstallPath::Detailed {
            path,
            aliases,
            pattern,
        }) => InstallTarget {
            path: path.as_deref().map(expand_path),
            aliases,
            pattern,
        },
    };
    if kind != EntryKind::DirectBinary && !install.aliases.is_empty() {
        return Err(invalid("aliases are only supported on direct binaries".to_string()));
    }
    if let Some(alias) = install.aliases.iter().find(|a| a.trim().is_empty()) {
        return Err(invalid(format!("empty alias '{}'", alias)));
    }

    Ok(ManifestEntry {
        name,
        kind,
        source,
        variant: raw.variant,
        expected_digest,
        install,
        smoke_command: raw.smoke_command,
        required: raw.required.unwrap_or(true),
    })
}

/// Lowercased distribution name of a `name==version` requirement.
pub fn requirement_name(requirement: &str) -> String {
    let end = requirement
        .find(|c: char| matches!(c, '=' | '<' | '>' | '!' | '~' | '[' | ';' | ' '))
        .unwrap_or(requirement.len());
    requirement[..end].trim().to_lowercase()
}

fn validate_index_source(name: &str, src: &IndexSource) -> Result<(), ManifestError> {
    if src.requirements.is_empty() {
        return Err(ManifestError::InvalidEntry {
            name: name.to_string(),
            reason: "requirements list is empty".to_string(),
        });
    }
    for req in src.requirements.iter().chain(src.bootstrap.iter()) {
        let pinned = req
            .split_once("==")
            .is_some_and(|(pkg, ver)| !pkg.trim().is_empty() && !ver.trim().is_empty());
        if !pinned {
            return Err(ManifestError::UnpinnedRequirement {
                name: name.to_string(),
                requirement: req.clone(),
            });
        }
    }
    Ok(())
}

fn is_plain_name(s: &str) -> bool {
    !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

/// Package spec such as `mafft`, `mafft=7.525` or `samtools>=1.19,<2`.
fn is_package_spec(s: &str) -> bool {
    let name_end = s
        .find(|c: char| matches!(c, '=' | '<' | '>' | '!'))
        .unwrap_or(s.len());
    let (pkg, constraint) = s.split_at(name_end);
    is_plain_name(pkg)
        && constraint
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "=<>!.,*_+-".contains(c))
}

fn validate_env_source(name: &str, src: &EnvManagerSource) -> Result<(), ManifestError> {
    let bad = |what: &'static str, value: &str| ManifestError::InvalidName {
        name: name.to_string(),
        what,
        value: value.to_string(),
    };
    if !is_plain_name(&src.environment) {
        return Err(bad("environment name", &src.environment));
    }
    if !is_plain_name(&src.manager) {
        return Err(bad("environment manager", &src.manager));
    }
    if src.channels.is_empty() {
        return Err(ManifestError::InvalidEntry {
            name: name.to_string(),
            reason: "at least one channel is required".to_string(),
        });
    }
    for channel in &src.channels {
        // Channels may be URLs or `owner/label` paths.
        let ok = !channel.is_empty()
            && channel
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || "-_./:".contains(c));
        if !ok {
            return Err(bad("channel", channel));
        }
    }
    if src.packages.is_empty() {
        return Err(ManifestError::InvalidEntry {
            name: name.to_string(),
            reason: "packages list is empty".to_string(),
        });
    }
    if let Some(pkg) = src.packages.iter().find(|p| !is_package_spec(p)) {
        return Err(bad("package", pkg));
    }
    Ok(())
}

fn validate_url(name: &str, url: &str) -> Result<String, ManifestError> {
    let url = url.trim();
    let reason = if !url.starts_with("http://") && !url.starts_with("https://") {
        Some("URL must start with http:// or https://")
    } else if url.contains(char::is_whitespace) {
        Some("URL contains whitespace")
    } else {
        None
    };
    match reason {
        Some(r) => Err(ManifestError::InvalidEntry {
            name: name.to_string(),
            reason: format!("{}: '{}'", r, url),
        }),
        None => Ok(url.to_string()),
    }
}
