//! # Manifest Schema
//!
//! A manifest is a declarative, ordered list of install actions. Entries are executed in
//! declaration order; there is no implicit dependency graph.
//!
//! ```yaml
//! settings:
//!   bin_dir: /usr/local/bin
//! entries:
//!   - name: python-stack
//!     kind: index_package_set
//!     source:
//!       requirements: ["numpy==1.26.4", "scipy==1.13.0", "torch==2.3.0"]
//!     variant:
//!       package: torch
//!       default: cpu
//!       alternatives:
//!         cpu: https://download.pytorch.org/whl/cpu
//!         cuda: https://download.pytorch.org/whl/cu121
//!     smoke_command: ["python3", "-c", "import torch; print(torch.__version__)"]
//!
//!   - name: aligners
//!     kind: env_manager_package_set
//!     source:
//!       environment: aligners
//!       channels: [conda-forge, bioconda]
//!       packages: [mafft, muscle, clustalw, famsa]
//!     smoke_command: ["mafft", "--version"]
//!
//!   - name: foldseek
//!     kind: direct_binary
//!     source: https://example.org/foldseek-linux.tar.gz
//!     expected_digest: "<sha256>"
//!     install_path:
//!       path: /usr/local/bin/foldseek-9
//!       aliases: [foldseek]
//!     smoke_command: ["foldseek", "--help"]
//! ```
//!
//! The raw (`Raw*`) types mirror the file as written, with every field optional, so that
//! load-time validation can name exactly which field is missing. The loader in
//! `libs::manifest_loading` turns them into the validated types below.

use crate::schemas::settings::{ManifestSettings, Settings};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

// ============================================================================
// VALIDATED TYPES
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    IndexPackageSet,
    EnvManagerPackageSet,
    DirectBinary,
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EntryKind::IndexPackageSet => "index_package_set",
            EntryKind::EnvManagerPackageSet => "env_manager_package_set",
            EntryKind::DirectBinary => "direct_binary",
        };
        write!(f, "{}", s)
    }
}

/// Source of an `index_package_set` entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct IndexSource {
    /// Exact pins, `name==version`.
    pub requirements: Vec<String>,
    /// Base build tooling installed first, also pinned.
    #[serde(default = "default_bootstrap")]
    pub bootstrap: Vec<String>,
    /// Interpreter used as `<python> -m pip`.
    #[serde(default = "default_python")]
    pub python: String,
}

fn default_bootstrap() -> Vec<String> {
    vec![
        "pip==24.0".to_string(),
        "setuptools==69.5.1".to_string(),
        "wheel==0.43.0".to_string(),
    ]
}

fn default_python() -> String {
    "python3".to_string()
}

/// Source of an `env_manager_package_set` entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct EnvManagerSource {
    /// Environment manager executable (`conda`, `mamba`, `micromamba`).
    #[serde(default = "default_manager")]
    pub manager: String,
    pub environment: String,
    /// Channels in priority order, highest first.
    pub channels: Vec<String>,
    pub packages: Vec<String>,
}

fn default_manager() -> String {
    "conda".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum BinarySourceSpec {
    Url(String),
    Detailed { url: String },
}

impl BinarySourceSpec {
    pub fn url(&self) -> &str {
        match self {
            BinarySourceSpec::Url(u) => u,
            BinarySourceSpec::Detailed { url } => url,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EntrySource {
    Index(IndexSource),
    EnvManager(EnvManagerSource),
    Binary { url: String },
}

/// Mutually exclusive alternatives for one entry, e.g. a CPU-only index and a GPU index.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct VariantSpec {
    /// Name prefix of the requirements served by the selected alternative.
    pub package: String,
    pub default: String,
    /// Alternative name to index URL.
    pub alternatives: BTreeMap<String, String>,
}

/// Where an entry lands on disk.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct InstallTarget {
    /// site-packages dir, environment prefix, or the installed binary file.
    pub path: Option<PathBuf>,
    /// Symlink names (or absolute paths) pointing at a direct binary.
    pub aliases: Vec<String>,
    /// File name prefix used when searching an extracted archive.
    pub pattern: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ManifestEntry {
    pub name: String,
    pub kind: EntryKind,
    pub source: EntrySource,
    pub variant: Option<VariantSpec>,
    /// Lowercased hex SHA-256; always present for direct binaries.
    pub expected_digest: Option<String>,
    pub install: InstallTarget,
    pub smoke_command: Vec<String>,
    pub required: bool,
}

impl ManifestEntry {
    /// Target path, defaulted per kind when the manifest left it out.
    pub fn resolved_install_path(&self, settings: &Settings) -> Option<PathBuf> {
        if let Some(p) = &self.install.path {
            return Some(p.clone());
        }
        match &self.source {
            EntrySource::Index(_) => None,
            EntrySource::EnvManager(src) => {
                Some(settings.state_dir.join("envs").join(&src.environment))
            }
            EntrySource::Binary { .. } => Some(settings.bin_dir.join(&self.name)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Manifest {
    pub settings: Settings,
    pub entries: Vec<ManifestEntry>,
}

// ============================================================================
// RAW (AS-WRITTEN) TYPES
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawManifest {
    #[serde(default)]
    pub settings: ManifestSettings,
    #[serde(default)]
    pub entries: Vec<RawEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawEntry {
    pub name: Option<String>,
    pub kind: Option<EntryKind>,
    /// Kept untyped until `kind` is known.
    pub source: Option<serde_json::Value>,
    pub variant: Option<VariantSpec>,
    pub expected_digest: Option<String>,
    pub install_path: Option<RawInstallPath>,
    #[serde(default)]
    pub smoke_command: Vec<String>,
    pub required: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum RawInstallPath {
    Plain(String),
    Detailed {
        path: Option<String>,
        #[serde(default)]
        aliases: Vec<String>,
        pattern: Option<String>,
    },
}
