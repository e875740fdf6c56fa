// Smoke Tester: a liveness probe for freshly installed tools.
//
// Many command-line tools print their help to stderr and exit non-zero, so neither the
// exit status nor the output channel counts. The probe is `ok` once the process has
// started; only a binary missing from the lookup path, or a timeout, is a failure.

use crate::libs::runner::{POLL_INTERVAL, drain, join_drain};
use crate::libs::utilities::path_helpers::join_lookup_path;
use crate::schemas::report::{SmokeOutcome, first_line_truncated};
use crate::{log_debug, log_warn};
use colored::Colorize;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

/// Runs `command` against `lookup_path`, bounded by `timeout`.
pub fn verify(command: &[String], lookup_path: &[PathBuf], timeout: Duration) -> SmokeOutcome {
    let Some((program, args)) = command.split_first() else {
        return SmokeOutcome::BinaryMissing {
            program: String::new(),
        };
    };

    let path_value = join_lookup_path(lookup_path);
    let resolved = match std::env::current_dir()
        .ok()
        .and_then(|cwd| which::which_in(program, Some(&path_value), cwd).ok())
    {
        Some(p) => p,
        None => {
            log_warn!(
                "[SmokeTester] '{}' is not on the lookup path",
                program.yellow()
            );
            return SmokeOutcome::BinaryMissing {
                program: program.clone(),
            };
        }
    };

    log_debug!(
        "[SmokeTester] Probing {} {}",
        resolved.display(),
        args.join(" ")
    );
    let mut child = match Command::new(&resolved)
        .args(args)
        .env("PATH", &path_value)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
    {
        Ok(c) => c,
        Err(e) => {
            log_warn!("[SmokeTester] Could not start '{}': {}", program.yellow(), e);
            return SmokeOutcome::BinaryMissing {
                program: program.clone(),
            };
        }
    };

    // Drain both pipes on their own threads so a chatty tool cannot block on a full pipe.
    let stdout = child.stdout.take().map(drain);
    let stderr = child.stderr.take().map(drain);

    let started = Instant::now();
    loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                log_debug!("[SmokeTester] '{}' exited with {}", program, status);
                break;
            }
            Ok(None) if started.elapsed() >= timeout => {
                let _ = child.kill();
                let _ = child.wait();
                log_warn!(
                    "[SmokeTester] '{}' did not finish within {:?}",
                    program.yellow(),
                    timeout
                );
                return SmokeOutcome::Timeout {
                    after_secs: timeout.as_secs(),
                };
            }
            Ok(None) => thread::sleep(POLL_INTERVAL),
            Err(e) => {
                log_warn!("[SmokeTester] Waiting on '{}' failed: {}", program, e);
                break;
            }
        }
    }

    let mut combined = stdout.map(join_drain).unwrap_or_default();
    combined.push_str(&stderr.map(join_drain).unwrap_or_default());
    match first_line_truncated(&combined) {
        Some(first_line) => SmokeOutcome::Passed { first_line },
        None => SmokeOutcome::Silent,
    }
}
