// `setup-toolchain validate`: load-time validation only. Prints one line per entry with
// its kind and, for variant-bearing entries, the alternative a run would select.

use crate::libs::context::resolve_variants;
use crate::libs::manifest_loading::load_manifest;
use crate::log_info;
use crate::schemas::settings::SettingsOverrides;
use anyhow::Result;
use colored::Colorize;
use std::path::Path;

pub fn run(manifest_path: &Path, variant: Option<String>) -> Result<()> {
    let overrides = SettingsOverrides {
        variant,
        ..Default::default()
    };
    let manifest = load_manifest(manifest_path, &overrides)?;
    let variants = resolve_variants(
        &manifest.entries,
        manifest.settings.variant_override.as_deref(),
    );

    for entry in &manifest.entries {
        let mut line = format!("{}  {}", entry.name.bold(), entry.kind);
        if let Some(v) = variants.get(&entry.name) {
            line.push_str(&format!("  variant={} ({})", v.alternative, v.source));
        }
        if !entry.required {
            line.push_str("  optional");
        }
        println!("{}", line);
    }
    log_info!(
        "[Validate] {} is valid ({} entr{})",
        manifest_path.display().to_string().green(),
        manifest.entries.len(),
        if manifest.entries.len() == 1 { "y" } else { "ies" }
    );
    Ok(())
}
