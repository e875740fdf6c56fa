//! # Fetcher
//!
//! Retrieves a resource from a URL into memory with a bounded retry policy. Payloads are
//! kept in memory on purpose: nothing touches disk until the digest has been verified.
//!
//! Retry policy:
//! - transport failures, HTTP 408/429 and 5xx are retried with exponential backoff;
//! - other HTTP statuses fail immediately (a 404 will not start existing);
//! - every attempt has its own timeout, clipped to the run deadline when one is set.

use crate::schemas::errors::ProvisionError;
use crate::schemas::settings::{FetchSettings, MIN_FETCH_ATTEMPTS};
use crate::{log_debug, log_info, log_warn};
use colored::Colorize;
use std::io::Read;
use std::time::{Duration, Instant};

/// Seam between installers and the network.
pub trait Fetcher {
    fn fetch(&self, url: &str, deadline: Option<Instant>) -> Result<Vec<u8>, ProvisionError>;
}

pub struct HttpFetcher {
    policy: FetchSettings,
}

enum AttemptError {
    Retryable(String),
    Fatal(String),
}

impl HttpFetcher {
    pub fn new(policy: FetchSettings) -> Self {
        HttpFetcher { policy }
    }

    fn attempts(&self) -> u32 {
        self.policy.attempts.max(MIN_FETCH_ATTEMPTS)
    }

    fn attempt(&self, url: &str, timeout: Duration) -> Result<Vec<u8>, AttemptError> {
        let agent = ureq::AgentBuilder::new()
            .timeout(timeout)
            .user_agent(concat!("setup-toolchain/", env!("CARGO_PKG_VERSION")))
            .build();

        let response = match agent.get(url).call() {
            Ok(res) => res,
            Err(ureq::Error::Status(code, _)) if code == 408 || code == 429 || code >= 500 => {
                return Err(AttemptError::Retryable(format!("HTTP {}", code)));
            }
            Err(ureq::Error::Status(code, _)) => {
                return Err(AttemptError::Fatal(format!("HTTP {}", code)));
            }
            Err(ureq::Error::Transport(t)) => {
                return Err(AttemptError::Retryable(t.to_string()));
            }
        };

        let mut body = Vec::new();
        response
            .into_reader()
            .read_to_end(&mut body)
            .map_err(|e| AttemptError::Retryable(format!("reading body: {}", e)))?;
        Ok(body)
    }
}

impl Fetcher for HttpFetcher {
    fn fetch(&self, url: &str, deadline: Option<Instant>) -> Result<Vec<u8>, ProvisionError> {
        let attempts = self.attempts();
        let per_attempt = Duration::from_secs(self.policy.timeout_secs.max(1));
        let mut backoff = Duration::from_millis(self.policy.backoff_ms);
        let mut last_reason = String::new();

        for attempt in 1..=attempts {
            // Each attempt gets the configured timeout, or whatever is left of the run.
            let timeout = match deadline {
                Some(d) => {
                    let remaining = d.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return Err(ProvisionError::DeadlineExceeded(format!("fetching {}", url)));
                    }
                    remaining.min(per_attempt)
                }
                None => per_attempt,
            };

            log_debug!(
                "[Fetcher] GET {} (attempt {}/{}, timeout {:?})",
                url.blue(),
                attempt,
                attempts,
                timeout
            );
            match self.attempt(url, timeout) {
                Ok(body) => {
                    log_info!("[Fetcher] Downloaded {} bytes from {}", body.len(), url.cyan());
                    return Ok(body);
                }
                Err(AttemptError::Fatal(reason)) => {
                    return Err(ProvisionError::Network {
                        url: url.to_string(),
                        attempts: attempt,
                        reason,
                    });
                }
                Err(AttemptError::Retryable(reason)) => {
                    log_warn!(
                        "[Fetcher] Attempt {}/{} for {} failed: {}",
                        attempt,
                        attempts,
                        url.yellow(),
                        reason
                    );
                    last_reason = reason;
                }
            }

            // Sleep only between attempts, and never past the deadline.
            if attempt < attempts {
                if backoff_outlasts(deadline, backoff) {
                    return Err(ProvisionError::DeadlineExceeded(format!("retrying {}", url)));
                }
                std::thread::sleep(backoff);
                backoff = backoff.saturating_mul(2);
            }
        }

        Err(ProvisionError::Network {
            url: url.to_string(),
            attempts,
            reason: last_reason,
        })
    }
}

/// Whether sleeping for `backoff` would run past `deadline`.
///
/// A wake-up time too far out to represent is past any deadline.
fn backoff_outlasts(deadline: Option<Instant>, backoff: Duration) -> bool {
    let Some(d) = deadline else {
        return false;
    };
    Instant::now().checked_add(backoff).is_none_or(|wake| wake >= d)
}
