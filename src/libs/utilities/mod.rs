// Leaf helpers used by the installers: fetching, digest verification, archive
// classification and extraction, binary location and placement, path handling.

pub mod binary;
pub mod compression;
pub mod digest;
pub mod fetch;
pub mod path_helpers;
