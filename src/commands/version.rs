// `setup-toolchain version`: prints the version this binary was built from.

use crate::log_debug;
use colored::Colorize;

pub fn run() {
    log_debug!("[Version] Reporting compiled-in package version");
    println!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
}
