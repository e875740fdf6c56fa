//! # Provisioning Context
//!
//! The explicit environment object threaded through a run. It owns the process-wide
//! lookup path (which installers append to and smoke tests read), the variant selections
//! (resolved once, before the first entry runs, and immutable afterwards), the run
//! deadline, and the seams to the network and to external commands.

use crate::libs::runner::CommandRunner;
use crate::libs::utilities::fetch::Fetcher;
use crate::libs::utilities::path_helpers::process_lookup_path;
use crate::log_warn;
use crate::schemas::errors::ProvisionError;
use crate::schemas::manifest::ManifestEntry;
use crate::schemas::settings::Settings;
use colored::Colorize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// One alternative picked for one entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedVariant {
    pub alternative: String,
    /// Index URL (or other source) of the chosen alternative.
    pub source: String,
    /// Requirement name prefix served from `source`.
    pub package: String,
}

pub struct ProvisionContext<'a> {
    pub settings: Settings,
    lookup_path: Vec<PathBuf>,
    variants: BTreeMap<String, ResolvedVariant>,
    deadline: Option<Instant>,
    pub fetcher: &'a dyn Fetcher,
    pub runner: &'a dyn CommandRunner,
}

impl<'a> ProvisionContext<'a> {
    /// Builds the context: lookup path from the process `PATH` plus the target bin dir,
    /// variants resolved for every entry, deadline started now.
    pub fn new(
        settings: Settings,
        entries: &[ManifestEntry],
        fetcher: &'a dyn Fetcher,
        runner: &'a dyn CommandRunner,
    ) -> Self {
        Self::with_lookup_path(settings, entries, fetcher, runner, process_lookup_path())
    }

    pub fn with_lookup_path(
        settings: Settings,
        entries: &[ManifestEntry],
        fetcher: &'a dyn Fetcher,
        runner: &'a dyn CommandRunner,
        initial_path: Vec<PathBuf>,
    ) -> Self {
        let variants = resolve_variants(entries, settings.variant_override.as_deref());
        // A deadline too far out to represent as an `Instant` is the same as none.
        let deadline = settings
            .deadline_secs
            .and_then(|secs| Instant::now().checked_add(Duration::from_secs(secs)));
        let bin_dir = settings.bin_dir.clone();
        let mut ctx = ProvisionContext {
            settings,
            lookup_path: initial_path,
            variants,
            deadline,
            fetcher,
            runner,
        };
        ctx.append_to_lookup_path(&bin_dir);
        ctx
    }

    pub fn lookup_path(&self) -> &[PathBuf] {
        &self.lookup_path
    }

    /// Appends `dir` unless already present. Existing entries are never replaced or reordered.
    pub fn append_to_lookup_path(&mut self, dir: &Path) {
        if !self.lookup_path.iter().any(|p| p == dir) {
            self.lookup_path.push(dir.to_path_buf());
        }
    }

    pub fn variant_for(&self, entry_name: &str) -> Option<&ResolvedVariant> {
        self.variants.get(entry_name)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn check_deadline(&self, before: &str) -> Result<(), ProvisionError> {
        match self.deadline {
            Some(d) if Instant::now() >= d => Err(ProvisionError::DeadlineExceeded(before.to_string())),
            _ => Ok(()),
        }
    }
}

/// Picks one alternative per variant-bearing entry: the override when the entry offers
/// it, the entry's declared default otherwise.
pub fn resolve_variants(
    entries: &[ManifestEntry],
    override_name: Option<&str>,
) -> BTreeMap<String, ResolvedVariant> {
    let mut resolved = BTreeMap::new();
    for entry in entries {
        let Some(spec) = &entry.variant else {
            continue;
        };
        let chosen = match override_name {
            Some(name) if spec.alternatives.contains_key(name) => name,
            Some(name) => {
                log_warn!(
                    "[Variants] '{}' does not offer variant '{}'; using default '{}'",
                    entry.name.yellow(),
                    name,
                    spec.default
                );
                spec.default.as_str()
            }
            None => spec.default.as_str(),
        };
        // Validation guarantees the default is one of the alternatives.
        if let Some(source) = spec.alternatives.get(chosen) {
            resolved.insert(
                entry.name.clone(),
                ResolvedVariant {
                    alternative: chosen.to_string(),
                    source: source.clone(),
                    package: spec.package.clone(),
                },
            );
        }
    }
    resolved
}
