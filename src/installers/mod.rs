// Installers: one per manifest entry kind.
//
// Every installer implements `Installer`, so the orchestrator can drive an entry without
// knowing which package ecosystem backs it. Installers do the ecosystem-specific work
// and report what they put on disk; receipts, timing and result bookkeeping stay with
// the orchestrator.

use crate::libs::context::ProvisionContext;
use crate::schemas::errors::ProvisionError;
use crate::schemas::manifest::{EntryKind, ManifestEntry};
use crate::schemas::state_file::InstallReceipt;
use std::path::PathBuf;

/// Installs a set of pinned requirements from a package index, with the variant-selected
/// requirements coming from the index picked by the run's variant.
pub(crate) mod index;

/// Creates an isolated environment with an environment manager (conda, mamba,
/// micromamba) from prioritized channels and exposes its `bin/` on the lookup path.
pub(crate) mod env_manager;

/// Fetches, verifies, extracts and installs a single released executable.
pub(crate) mod direct_binary;

/// What an installer left behind on success.
#[derive(Debug, Clone, Default)]
pub struct InstallOutcome {
    pub install_path: Option<PathBuf>,
    pub installed_sha256: Option<String>,
    pub aliases: Vec<PathBuf>,
    pub bin_dir: Option<PathBuf>,
    pub strategy: Option<String>,
    /// Human-readable note carried into the report.
    pub detail: Option<String>,
}

pub trait Installer {
    /// Whether the filesystem still matches `receipt`, whose fingerprint the caller has
    /// already matched against the entry.
    fn is_provisioned(
        &self,
        entry: &ManifestEntry,
        receipt: &InstallReceipt,
        ctx: &ProvisionContext,
    ) -> bool;

    /// Side effects an already-provisioned entry still owes the run (e.g. lookup path).
    fn on_skip(&self, _entry: &ManifestEntry, _receipt: &InstallReceipt, _ctx: &mut ProvisionContext) {}

    fn install(
        &self,
        entry: &ManifestEntry,
        ctx: &mut ProvisionContext,
    ) -> Result<InstallOutcome, ProvisionError>;
}

pub fn installer_for(kind: EntryKind) -> &'static dyn Installer {
    match kind {
        EntryKind::IndexPackageSet => &index::IndexInstaller,
        EntryKind::EnvManagerPackageSet => &env_manager::EnvManagerInstaller,
        EntryKind::DirectBinary => &direct_binary::BinaryInstaller,
    }
}
