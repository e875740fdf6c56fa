//! # Error Taxonomy
//!
//! Two error families exist:
//!
//! - [`ManifestError`]: raised while loading and validating a manifest, before anything
//!   is installed. A manifest error aborts the run with a configuration exit code.
//! - [`ProvisionError`]: raised while provisioning a single entry. It never aborts the
//!   run; the orchestrator folds it into that entry's `Failed` result.
//!
//! Smoke-test outcomes are deliberately not errors; see `schemas::report::SmokeOutcome`.

use std::path::PathBuf;
use thiserror::Error;

/// Load-time validation failures.
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("failed to read manifest {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse manifest {path}: {reason}")]
    Parse { path: PathBuf, reason: String },

    #[error("entry #{index}: missing required field '{field}'")]
    MissingField { index: usize, field: &'static str },

    #[error("entry '{name}': {reason}")]
    InvalidEntry { name: String, reason: String },

    #[error("duplicate entry name '{0}'")]
    DuplicateName(String),

    #[error("entry '{0}': direct binaries require a non-empty expected_digest")]
    MissingDigest(String),

    #[error("entry '{name}': expected_digest '{digest}' is not a 64-character hex SHA-256")]
    MalformedDigest { name: String, digest: String },

    #[error("entry '{name}': requirement '{requirement}' is not pinned with '=='")]
    UnpinnedRequirement { name: String, requirement: String },

    #[error("entry '{name}': invalid {what} '{value}'")]
    InvalidName {
        name: String,
        what: &'static str,
        value: String,
    },

    #[error("entry '{name}': variant default '{default}' is not one of its alternatives")]
    UnknownVariantDefault { name: String, default: String },
}

/// Per-entry provisioning failures.
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// Retryable transport failure; surfaced only once retries are exhausted.
    #[error("network error fetching {url} after {attempts} attempt(s): {reason}")]
    Network {
        url: String,
        attempts: u32,
        reason: String,
    },

    /// Digest mismatch. Fatal and never retried.
    #[error("integrity check failed for {url}: expected sha256 {expected}, got {actual}")]
    Integrity {
        url: String,
        expected: String,
        actual: String,
    },

    #[error("unrecognized archive layout: {0}")]
    Format(String),

    #[error("no executable candidate found; searched: {}", display_paths(.searched))]
    NotFound { searched: Vec<PathBuf> },

    #[error("`{program}` exited with {code}: {stderr}")]
    InstallerExit {
        program: String,
        code: String,
        stderr: String,
    },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("run deadline exceeded before {0}")]
    DeadlineExceeded(String),

    #[error("not attempted: run stopped after required entry '{0}' failed")]
    Aborted(String),
}

impl ProvisionError {
    /// Stable short name of the failure class, used in reports.
    pub fn kind(&self) -> &'static str {
        match self {
            ProvisionError::Network { .. } => "NetworkError",
            ProvisionError::Integrity { .. } => "IntegrityError",
            ProvisionError::Format(_) => "FormatError",
            ProvisionError::NotFound { .. } => "NotFoundError",
            ProvisionError::InstallerExit { .. } => "InstallerExitError",
            ProvisionError::Config(_) => "ConfigError",
            ProvisionError::Io { .. } => "IoError",
            ProvisionError::DeadlineExceeded(_) => "DeadlineExceeded",
            ProvisionError::Aborted(_) => "Aborted",
        }
    }

    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        ProvisionError::Io {
            context: context.into(),
            source,
        }
    }
}

fn display_paths(paths: &[PathBuf]) -> String {
    if paths.is_empty() {
        return "<nothing>".to_string();
    }
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
