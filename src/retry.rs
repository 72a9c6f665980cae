//! Caller-side retry with exponential backoff.
//!
//! The library never retries on its own: a failed command may already have
//! had side effects on the system under test. Callers that know a failure
//! happened before anything ran remotely (for instance
//! [`Error::OpenSession`]) can use this helper to try again.

use crate::error::Error;
use log::{debug, warn};
use std::fmt::Display;
use std::thread;
use std::time::Duration;

/// How often and how patiently to retry.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the initial attempt.
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub backoff_multiplier: f64,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 0,
            initial_delay: Duration::from_secs(1),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, initial_delay: Duration) -> Self {
        Self {
            max_retries,
            initial_delay,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (zero-based).
    fn delay(&self, attempt: u32) -> Duration {
        let scaled = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(attempt as i32);
        Duration::from_secs_f64(scaled.min(self.max_delay.as_secs_f64()))
    }
}

/// Whether a taxonomy error is safe to retry: nothing has reached the
/// remote side yet.
pub fn is_transient(err: &Error) -> bool {
    matches!(err, Error::OpenSession)
}

/// Runs `operation`, retrying failures accepted by `retryable` according to
/// `policy`. Returns the last error once retries are exhausted.
pub fn retry_with_backoff<T, E, F, R>(
    policy: &RetryPolicy,
    operation_name: &str,
    retryable: R,
    mut operation: F,
) -> Result<T, E>
where
    E: Display,
    F: FnMut() -> Result<T, E>,
    R: Fn(&E) -> bool,
{
    let mut attempt = 0;
    loop {
        match operation() {
            Ok(value) => {
                if attempt > 0 {
                    debug!("{} succeeded on retry {}", operation_name, attempt);
                }
                return Ok(value);
            }
            Err(e) if attempt < policy.max_retries && retryable(&e) => {
                let delay = policy.delay(attempt);
                attempt += 1;
                warn!(
                    "{} failed: {}; retrying ({}/{}) after {:?}",
                    operation_name, e, attempt, policy.max_retries, delay
                );
                thread::sleep(delay);
            }
            Err(e) => {
                debug!("{} failed after {} retries: {}", operation_name, attempt, e);
                return Err(e);
            }
        }
    }
}

/// Troubleshooting hints for a target that could not be reached.
pub fn connection_hints(host: &str, port: u16) -> String {
    let hints = [
        format!("Verify the host '{}' is reachable", host),
        format!("Check that sshd listens on port {} (try: ssh -p {} {})", port, port, host),
        "Verify your SSH agent is running (ssh-add -l) or set an identity in the config file"
            .to_string(),
        format!("Verify the public key is in ~/.ssh/authorized_keys on {}", host),
    ];
    hints.iter().map(|h| format!("  • {}", h)).collect::<Vec<_>>().join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_delay_calculation() {
        let policy = RetryPolicy::new(5, Duration::from_millis(1000));
        assert_eq!(policy.delay(0), Duration::from_millis(1000));
        assert_eq!(policy.delay(1), Duration::from_millis(2000));
        assert_eq!(policy.delay(3), Duration::from_millis(8000));
        assert_eq!(policy.delay(4), Duration::from_millis(10000));
    }

    #[test]
    fn test_success_on_first_attempt() {
        let calls = Cell::new(0);
        let result: Result<i32, Error> =
            retry_with_backoff(&RetryPolicy::new(3, Duration::ZERO), "op", is_transient, || {
                calls.set(calls.get() + 1);
                Ok(42)
            });
        assert_eq!(result, Ok(42));
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_transient_failures_retried() {
        let calls = Cell::new(0);
        let result = retry_with_backoff(&RetryPolicy::new(3, Duration::ZERO), "op", is_transient, || {
            calls.set(calls.get() + 1);
            if calls.get() < 3 {
                Err(Error::OpenSession)
            } else {
                Ok(7)
            }
        });
        assert_eq!(result, Ok(7));
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn test_retries_exhausted() {
        let calls = Cell::new(0);
        let result: Result<(), Error> =
            retry_with_backoff(&RetryPolicy::new(2, Duration::ZERO), "op", is_transient, || {
                calls.set(calls.get() + 1);
                Err(Error::OpenSession)
            });
        assert_eq!(result, Err(Error::OpenSession));
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn test_non_transient_not_retried() {
        let calls = Cell::new(0);
        let result: Result<(), Error> =
            retry_with_backoff(&RetryPolicy::new(5, Duration::ZERO), "op", is_transient, || {
                calls.set(calls.get() + 1);
                Err(Error::CommandTimeout)
            });
        assert_eq!(result, Err(Error::CommandTimeout));
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_connection_hints_mention_target() {
        let hints = connection_hints("sut.example.com", 2222);
        assert!(hints.contains("'sut.example.com' is reachable"));
        assert!(hints.contains("ssh -p 2222 sut.example.com"));
    }
}
