// Register application subcommands.
// Each module corresponds to a specific `setup-toolchain` command-line action.

// Provisions every entry of a manifest.
pub mod run;
// Load-time validation of a manifest.
pub mod validate;
// Displays the version of the tool.
pub mod version;
