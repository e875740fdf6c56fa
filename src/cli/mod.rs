// Command-line surface: argument and subcommand definitions.
pub mod cmd_enums;
