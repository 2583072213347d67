// Optimistic Concurrency Retry
//
// Re-runs a whole read-compute-commit cycle while it loses the race
// for the next table version. Only write conflicts are retried; every
// other error is returned as is.

use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::TableError;

/// Bounded retry with capped exponential backoff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Values below 1 count as 1.
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff_ms: 50,
            max_backoff_ms: 2_000,
        }
    }
}

impl RetryPolicy {
    /// A single attempt; conflicts surface immediately.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff_ms: 0,
            max_backoff_ms: 0,
        }
    }

    /// Delay before retry number `retry` (1 for the first retry).
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 1u64 << retry.saturating_sub(1).min(20);
        let millis = self
            .initial_backoff_ms
            .saturating_mul(factor)
            .min(self.max_backoff_ms);
        Duration::from_millis(millis)
    }

    /// Run `op` until it succeeds, fails with something other than a
    /// write conflict, or attempts run out.
    ///
    /// `op` receives the 1-based attempt number and must redo all of
    /// its reads, since the table moved on since the last attempt.
    pub fn run<T, F>(&self, mut op: F) -> Result<T, TableError>
    where
        F: FnMut(u32) -> Result<T, TableError>,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match op(attempt) {
                Ok(value) => return Ok(value),
                Err(TableError::Store(err)) if err.is_write_conflict() => {
                    if attempt >= attempts {
                        return Err(TableError::RetriesExhausted {
                            attempts: attempt,
                            last: err,
                        });
                    }
                    let delay = self.backoff(attempt);
                    warn!(
                        attempt,
                        max_attempts = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "write conflict, retrying"
                    );
                    thread::sleep(delay);
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreError;
    use crate::table::TableName;

    fn conflict() -> TableError {
        TableError::Store(StoreError::WriteConflict {
            table: TableName::new("drives").unwrap(),
            expected: 1,
            actual: 2,
        })
    }

    fn fast(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff_ms: 0,
            max_backoff_ms: 0,
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            initial_backoff_ms: 50,
            max_backoff_ms: 300,
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(50));
        assert_eq!(policy.backoff(2), Duration::from_millis(100));
        assert_eq!(policy.backoff(3), Duration::from_millis(200));
        assert_eq!(policy.backoff(4), Duration::from_millis(300));
        assert_eq!(policy.backoff(64), Duration::from_millis(300));
    }

    #[test]
    fn conflicts_are_retried_until_success() {
        let result = fast(3).run(|attempt| if attempt < 3 { Err(conflict()) } else { Ok(attempt) });
        assert_eq!(result.unwrap(), 3);
    }

    #[test]
    fn exhausted_attempts_surface_terminal_error() {
        let mut calls = 0;
        let err = fast(2)
            .run(|_| -> Result<(), TableError> {
                calls += 1;
                Err(conflict())
            })
            .unwrap_err();
        assert_eq!(calls, 2);
        assert!(matches!(err, TableError::RetriesExhausted { attempts: 2, .. }));
    }

    #[test]
    fn other_errors_are_not_retried() {
        let mut calls = 0;
        let err = fast(5)
            .run(|_| -> Result<(), TableError> {
                calls += 1;
                Err(TableError::EmptyKey)
            })
            .unwrap_err();
        assert_eq!(calls, 1);
        assert!(matches!(err, TableError::EmptyKey));
    }

    #[test]
    fn zero_attempts_still_runs_once() {
        let mut calls = 0;
        let _ = fast(0).run(|_| -> Result<(), TableError> {
            calls += 1;
            Err(conflict())
        });
        assert_eq!(calls, 1);
    }
}
