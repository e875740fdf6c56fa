//! # Provisioning State File (`state.json`)
//!
//! The state file is the run-to-run memory that makes provisioning idempotent. Each
//! successfully installed entry leaves a receipt; on the next run an entry whose receipt
//! still matches the manifest and the filesystem is reported as `Skipped`.
//!
//! ## Example
//! ```json
//! {
//!   "receipts": {
//!     "foldseek": {
//!       "kind": "direct_binary",
//!       "fingerprint": "5e2b7c0d41a9...",
//!       "install_path": "/usr/local/bin/foldseek-9",
//!       "installed_sha256": "9a0b...",
//!       "aliases": ["/usr/local/bin/foldseek"],
//!       "strategy": "tar-gz",
//!       "installed_at": "2026-01-15T10:30:45+00:00"
//!     }
//!   }
//! }
//! ```
//!
//! `fingerprint` is the SHA-256 hex of the entry's inputs (kind, source, pinned digest,
//! aliases and chosen variant) joined by newlines, so any manifest edit that changes what
//! would be installed invalidates the receipt.
//!
//! The file is managed by the tool; editing it by hand only forces or prevents reinstalls.

use crate::schemas::manifest::EntryKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ProvisionState {
    #[serde(default)]
    pub receipts: BTreeMap<String, InstallReceipt>,
}

/// Record of one successful install.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InstallReceipt {
    pub kind: EntryKind,
    /// Digest of the entry inputs that determine what gets installed.
    pub fingerprint: String,
    pub install_path: Option<PathBuf>,
    /// SHA-256 of the installed binary file (direct binaries only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub installed_sha256: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aliases: Vec<PathBuf>,
    /// Binary directory appended to the lookup path (environment sets only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bin_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<String>,
    pub installed_at: String,
}
