// This file runs the external package-manager commands (pip, conda, ...).
//
// Installers never spawn processes directly; they go through `CommandRunner`, which runs
// the program against the provisioning lookup path rather than whatever `PATH` the
// parent process happened to have. A run may carry a deadline: a child still running
// when it passes is killed and the call reports `TimedOut`.

use crate::libs::utilities::path_helpers::join_lookup_path;
use crate::schemas::errors::ProvisionError;
use crate::{log_debug, log_info, log_warn};
use colored::Colorize;
use std::io::{self, Read};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

/// How many trailing stderr lines are kept in an `InstallerExit` error.
const STDERR_TAIL_LINES: usize = 20;

/// How often a running child is checked against the deadline.
pub(crate) const POLL_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub code: Option<i32>,
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

pub trait CommandRunner {
    /// Runs `program` with `args`, resolved against `lookup_path`.
    ///
    /// When `deadline` passes before the program exits, the child is killed and the
    /// error kind is `TimedOut`.
    fn run(
        &self,
        program: &str,
        args: &[String],
        lookup_path: &[PathBuf],
        deadline: Option<Instant>,
    ) -> io::Result<CommandOutput>;
}

/// Runs real processes.
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(
        &self,
        program: &str,
        args: &[String],
        lookup_path: &[PathBuf],
        deadline: Option<Instant>,
    ) -> io::Result<CommandOutput> {
        let path_value = join_lookup_path(lookup_path);
        let cwd = std::env::current_dir()?;
        let resolved = which::which_in(program, Some(&path_value), cwd).map_err(|_| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("'{}' not found on the lookup path", program),
            )
        })?;

        let mut child = Command::new(&resolved)
            .args(args)
            .env("PATH", &path_value)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        // Both pipes drain on their own threads so a chatty installer never blocks on a
        // full pipe while we poll.
        let stdout = child.stdout.take().map(drain);
        let stderr = child.stderr.take().map(drain);

        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                log_warn!(
                    "[Runner] {} is still running at the deadline; killing it",
                    program.yellow()
                );
                let _ = child.kill();
                let _ = child.wait();
                // Grandchildren may still hold the pipes open, so the drain threads are
                // left to finish on their own.
                return Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("'{}' was killed at the deadline", program),
                ));
            }
            thread::sleep(POLL_INTERVAL);
        };

        Ok(CommandOutput {
            code: status.code(),
            success: status.success(),
            stdout: stdout.map(join_drain).unwrap_or_default(),
            stderr: stderr.map(join_drain).unwrap_or_default(),
        })
    }
}

/// Reads `pipe` to the end on a background thread.
pub(crate) fn drain<R: Read + Send + 'static>(mut pipe: R) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    })
}

pub(crate) fn join_drain(handle: thread::JoinHandle<String>) -> String {
    handle.join().unwrap_or_default()
}

/// Runs a command and turns anything but a zero exit into `InstallerExit`.
///
/// A command killed at `deadline` (or one that would start after it) is
/// `DeadlineExceeded` instead.
pub fn run_checked(
    runner: &dyn CommandRunner,
    program: &str,
    args: &[String],
    lookup_path: &[PathBuf],
    deadline: Option<Instant>,
) -> Result<CommandOutput, ProvisionError> {
    // Not worth starting a package manager only to kill it straight away.
    if deadline.is_some_and(|d| Instant::now() >= d) {
        return Err(ProvisionError::DeadlineExceeded(format!("running {}", program)));
    }
    log_info!(
        "[Runner] Executing: {} {}",
        program.cyan().bold(),
        args.join(" ").cyan()
    );
    let output = runner
        .run(program, args, lookup_path, deadline)
        .map_err(|e| match e.kind() {
            io::ErrorKind::TimedOut => {
                ProvisionError::DeadlineExceeded(format!("running {}", program))
            }
            _ => ProvisionError::InstallerExit {
                program: program.to_string(),
                code: "spawn-failed".to_string(),
                stderr: e.to_string(),
            },
        })?;

    if !output.stdout.is_empty() {
        log_debug!("[Runner] {} stdout:\n{}", program, output.stdout.trim_end());
    }
    if output.success {
        return Ok(output);
    }
    Err(ProvisionError::InstallerExit {
        program: program.to_string(),
        code: output
            .code
            .map(|c| c.to_string())
            .unwrap_or_else(|| "signal".to_string()),
        stderr: stderr_tail(&output.stderr),
    })
}

fn stderr_tail(stderr: &str) -> String {
    let lines: Vec<&str> = stderr.lines().collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join("\n")
}


#[cfg(test)]
mod tests {
    use super::testing::RecordingRunner;
    use super::*;

    #[test]
    fn non_zero_exit_becomes_installer_exit_error() {
        let runner = RecordingRunner::failing_on("broken");
        let err = run_checked(
            &runner,
            "pip",
            &["install".into(), "broken==1.0".into()],
            &[],
            None,
        )
        .unwrap_err();
        match err {
            ProvisionError::InstallerExit { program, code, stderr } => {
                assert_eq!(program, "pip");
                assert_eq!(code, "1");
                assert!(stderr.contains("broken==1.0"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn expired_deadline_never_starts_the_command() {
        let runner = RecordingRunner::default();
        let past = Instant::now() - Duration::from_secs(1);
        let err = run_checked(&runner, "pip", &["install".into()], &[], Some(past)).unwrap_err();
        assert_eq!(err.kind(), "DeadlineExceeded");
        assert!(runner.lines().is_empty());
    }

    #[test]
    fn stderr_tail_keeps_last_lines() {
        let text: String = (0..50).map(|i| format!("line {}\n", i)).collect();
        let tail = stderr_tail(&text);
        assert_eq!(tail.lines().count(), STDERR_TAIL_LINES);
        assert!(tail.ends_with("line 49"));
    }

    #[cfg(unix)]
    #[test]
    fn system_runner_reports_missing_program() {
        let err = SystemRunner
            .run(
                "definitely-not-a-real-tool-xyz",
                &[],
                &[PathBuf::from("/nonexistent")],
                None,
            )
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[cfg(unix)]
    mod unix {
        use super::*;
        use std::fs;
        use std::os::unix::fs::PermissionsExt;
        use std::path::Path;

        fn script(dir: &Path, name: &str, body: &str) {
            let path = dir.join(name);
            fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
            fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        }

        fn lookup(dir: &Path) -> Vec<PathBuf> {
            vec![dir.to_path_buf(), PathBuf::from("/bin"), PathBuf::from("/usr/bin")]
        }

        #[test]
        fn system_runner_captures_output_and_exit_code() {
            let dir = tempfile::tempdir().unwrap();
            script(dir.path(), "fakepip", "echo installed; echo warned >&2; exit 3");
            let out = SystemRunner
                .run("fakepip", &[], &lookup(dir.path()), None)
                .unwrap();
            assert_eq!(out.code, Some(3));
            assert!(!out.success);
            assert_eq!(out.stdout.trim(), "installed");
            assert_eq!(out.stderr.trim(), "warned");
        }

        #[test]
        fn hung_command_is_killed_at_the_deadline() {
            let dir = tempfile::tempdir().unwrap();
            script(dir.path(), "slowpy", "exec sleep 30");
            let started = Instant::now();
            let deadline = started + Duration::from_millis(300);

            let err = run_checked(
                &SystemRunner,
                "slowpy",
                &["-m".into(), "pip".into(), "install".into()],
                &lookup(dir.path()),
                Some(deadline),
            )
            .unwrap_err();
            assert_eq!(err.kind(), "DeadlineExceeded");
            assert!(started.elapsed() < Duration::from_secs(10));
        }
    }
}
