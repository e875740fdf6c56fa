// Loading and saving the provisioning state file (`state.json`), and the fingerprints
// that tie a receipt to the manifest inputs it was produced from.

use crate::libs::context::ResolvedVariant;
use crate::libs::utilities::digest::{normalize_digest, sha256_hex};
use crate::schemas::manifest::{EntrySource, ManifestEntry};
use crate::schemas::state_file::{InstallReceipt, ProvisionState};
use crate::{log_debug, log_info, log_warn};
use anyhow::{Context, Result};
use colored::Colorize;
use std::fs;
use std::path::{Path, PathBuf};

pub struct StateStore {
    path: PathBuf,
    state: ProvisionState,
}

impl StateStore {
    /// Loads `state.json`, or starts empty when it does not exist yet.
    pub fn load(path: &Path) -> Result<Self> {
        let state = if path.exists() {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("reading state file {}", path.display()))?;
            let state: ProvisionState = serde_json::from_str(&contents).with_context(|| {
                format!(
                    "invalid state file {}; fix or delete it to start fresh",
                    path.display()
                )
            })?;
            log_info!(
                "[State] Using state file: {} ({} receipt(s))",
                path.display().to_string().cyan(),
                state.receipts.len()
            );
            state
        } else {
            log_debug!(
                "[State] No state file at {}; starting fresh",
                path.display().to_string().yellow()
            );
            ProvisionState::default()
        };
        Ok(StateStore {
            path: path.to_path_buf(),
            state,
        })
    }

    pub fn receipt(&self, name: &str) -> Option<&InstallReceipt> {
        self.state.receipts.get(name)
    }

    /// Records a receipt and persists immediately. A failed write only costs idempotence
    /// on the next run, so it is reported but not fatal.
    pub fn record(&mut self, name: &str, receipt: InstallReceipt) {
        self.state.receipts.insert(name.to_string(), receipt);
        if let Err(e) = self.save() {
            log_warn!(
                "[State] Could not persist {}: {:#}",
                self.path.display().to_string().yellow(),
                e
            );
        }
    }

    pub fn forget(&mut self, name: &str) {
        if self.state.receipts.remove(name).is_some() {
            if let Err(e) = self.save() {
                log_warn!("[State] Could not persist state after dropping '{}': {:#}", name, e);
            }
        }
    }

    fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating state dir {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(&self.state)?;
        let staging = self.path.with_extension("json.partial");
        fs::write(&staging, json).with_context(|| format!("writing {}", staging.display()))?;
        fs::rename(&staging, &self.path)
            .with_context(|| format!("replacing {}", self.path.display()))?;
        log_debug!("[State] Saved {}", self.path.display());
        Ok(())
    }
}

/// Digest of everything in `entry` that decides what ends up installed.
pub fn fingerprint(entry: &ManifestEntry, variant: Option<&ResolvedVariant>) -> String {
    let mut parts: Vec<String> = vec![entry.kind.to_string()];
    match &entry.source {
        EntrySource::Index(src) => {
            parts.push(src.python.clone());
            parts.extend(src.bootstrap.iter().cloned());
            parts.push("--".to_string());
            parts.extend(src.requirements.iter().cloned());
        }
        EntrySource::EnvManager(src) => {
            parts.push(src.manager.clone());
            parts.push(src.environment.clone());
            parts.extend(src.channels.iter().map(|c| format!("channel:{}", c)));
            parts.extend(src.packages.iter().cloned());
        }
        EntrySource::Binary { url } => {
            parts.push(url.clone());
            if let Some(d) = &entry.expected_digest {
                parts.push(format!("sha256:{}", normalize_digest(d)));
            }
            parts.extend(entry.install.aliases.iter().map(|a| format!("alias:{}", a)));
        }
    }
    if let Some(v) = variant {
        parts.push(format!("variant:{}={}", v.alternative, v.source));
    }
    sha256_hex(parts.join("\n").as_bytes())
}
