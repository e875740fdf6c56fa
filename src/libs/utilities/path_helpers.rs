use crate::log_warn;
use colored::Colorize;
use std::env;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Expands `~`, `$VAR` and `${VAR}` in a manifest path.
///
/// Undefined variables are left as written (with a warning) rather than failing the load;
/// the resulting path simply will not exist.
pub fn expand_path(path: &str) -> PathBuf {
    match shellexpand::full(path) {
        Ok(expanded) => PathBuf::from(expanded.as_ref()),
        Err(e) => {
            log_warn!(
                "[Paths] Could not expand '{}': {}. Using tilde expansion only.",
                path.yellow(),
                e
            );
            PathBuf::from(shellexpand::tilde(path).as_ref())
        }
    }
}

/// Splits the process `PATH` into its entries; the starting lookup path of every run.
pub fn process_lookup_path() -> Vec<PathBuf> {
    env::var_os("PATH")
        .map(|p| env::split_paths(&p).collect())
        .unwrap_or_default()
}

/// Joins lookup path entries into a `PATH` value for child processes.
pub fn join_lookup_path(entries: &[PathBuf]) -> OsString {
    env::join_paths(entries).unwrap_or_else(|_| {
        // An entry containing the separator cannot be represented; drop such entries.
        let usable: Vec<&Path> = entries
            .iter()
            .map(PathBuf::as_path)
            .filter(|p| env::join_paths([*p]).is_ok())
            .collect();
        env::join_paths(usable).unwrap_or_default()
    })
}
