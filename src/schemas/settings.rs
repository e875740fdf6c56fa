//! Run-wide settings: the optional `settings:` block of a manifest, merged with CLI flags.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Name of the environment variable consulted for the variant override when the
/// manifest does not name another one.
pub const DEFAULT_VARIANT_ENV: &str = "PROVISION_VARIANT";

/// Lower bound on fetch attempts. Manifests asking for fewer are raised to this.
pub const MIN_FETCH_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct FetchSettings {
    pub attempts: u32,
    pub timeout_secs: u64,
    pub backoff_ms: u64,
}

impl Default for FetchSettings {
    fn default() -> Self {
        FetchSettings {
            attempts: MIN_FETCH_ATTEMPTS,
            timeout_secs: 300,
            backoff_ms: 500,
        }
    }
}

/// The `settings:` block as written in a manifest. Every field is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ManifestSettings {
    pub bin_dir: Option<String>,
    pub state_dir: Option<String>,
    pub variant_env: Option<String>,
    pub fetch: FetchSettings,
    pub smoke_timeout_secs: Option<u64>,
    pub fail_fast: Option<bool>,
    pub search_depth: Option<usize>,
}

/// Values supplied on the command line; they take precedence over the manifest.
#[derive(Debug, Clone, Default)]
pub struct SettingsOverrides {
    pub bin_dir: Option<PathBuf>,
    pub state_dir: Option<PathBuf>,
    pub variant: Option<String>,
    pub fail_fast: bool,
    pub deadline_secs: Option<u64>,
}

/// Fully resolved settings for one run.
#[derive(Debug, Clone)]
pub struct Settings {
    pub bin_dir: PathBuf,
    pub state_dir: PathBuf,
    /// The variant override in effect, from the CLI or the manifest's variant env var.
    pub variant_override: Option<String>,
    pub fetch: FetchSettings,
    pub smoke_timeout_secs: u64,
    pub fail_fast: bool,
    pub search_depth: usize,
    pub deadline_secs: Option<u64>,
}

impl Settings {
    pub fn state_file(&self) -> PathBuf {
        self.state_dir.join("state.json")
    }
}

pub fn default_state_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("setup-toolchain")
}

pub fn default_bin_dir() -> PathBuf {
    PathBuf::from("/usr/local/bin")
}
