// Data definitions shared across the crate: the manifest as read from disk, run settings,
// the persisted install state, the end-of-run report, and the error taxonomy.

pub mod errors;
pub mod manifest;
pub mod report;
pub mod settings;
pub mod state_file;
