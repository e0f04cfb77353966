//! Retry policy: a fixed attempt budget under a cumulative wall-clock
//! deadline, with no backoff between attempts.
//!
//! The policy is resolved once per run. Project `[retry]` values win over
//! the `SLIPWAY_RETRY_*` environment, which wins over the defaults; each
//! field resolves independently, so a project may pin the attempt budget
//! while the environment stretches the deadline.

use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use slipway_config::project::RetrySpec;
use slipway_config::Project;
use tracing::{info, warn};

use crate::error::EngineError;

/// Default attempt budget: the first try plus the minimum viable retry.
pub const DEFAULT_ATTEMPTS: u32 = 2;
/// Default cumulative wall-clock budget across all attempts, in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 7200;
/// Environment override for the attempt budget.
pub const ATTEMPTS_VAR: &str = "SLIPWAY_RETRY_ATTEMPTS";
/// Environment override for the wall-clock budget, in seconds.
pub const TIMEOUT_VAR: &str = "SLIPWAY_RETRY_TIMEOUT";

/// The retry policy governing one run's retried steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryContext {
    /// Total invocations allowed, the first try included.
    pub attempts: u32,
    /// Cumulative wall-clock budget across all attempts.
    pub timeout: Duration,
}

impl Default for RetryContext {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_ATTEMPTS,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

impl RetryContext {
    /// Resolve the policy for one run.
    ///
    /// # Errors
    ///
    /// Fails fast on zero or non-numeric overrides from either source; a
    /// bad override must never reach the retry loop.
    pub fn resolve(project: &Project) -> Result<Self, EngineError> {
        Self::resolve_from(
            project.retry,
            std::env::var(ATTEMPTS_VAR).ok(),
            std::env::var(TIMEOUT_VAR).ok(),
        )
    }

    fn resolve_from(
        spec: RetrySpec,
        env_attempts: Option<String>,
        env_timeout: Option<String>,
    ) -> Result<Self, EngineError> {
        let attempts = match (spec.attempts, env_attempts) {
            (Some(value), _) => checked_attempts("[retry] attempts", value)?,
            (None, Some(raw)) => checked_attempts(ATTEMPTS_VAR, parse_override(ATTEMPTS_VAR, &raw)?)?,
            (None, None) => DEFAULT_ATTEMPTS,
        };
        let timeout_secs = match (spec.timeout, env_timeout) {
            (Some(value), _) => checked_timeout("[retry] timeout", value)?,
            (None, Some(raw)) => checked_timeout(TIMEOUT_VAR, parse_override(TIMEOUT_VAR, &raw)?)?,
            (None, None) => DEFAULT_TIMEOUT_SECS,
        };
        Ok(Self {
            attempts,
            timeout: Duration::from_secs(timeout_secs),
        })
    }
}

fn parse_override<T: FromStr>(setting: &str, raw: &str) -> Result<T, EngineError> {
    raw.trim()
        .parse()
        .map_err(|_| EngineError::InvalidRetrySetting {
            setting: setting.to_owned(),
            value: raw.to_owned(),
            reason: "must be a positive integer",
        })
}

fn checked_attempts(setting: &str, value: u32) -> Result<u32, EngineError> {
    if value == 0 {
        Err(EngineError::InvalidRetrySetting {
            setting: setting.to_owned(),
            value: value.to_string(),
            reason: "must be at least 1",
        })
    } else {
        Ok(value)
    }
}

fn checked_timeout(setting: &str, value: u64) -> Result<u64, EngineError> {
    if value == 0 {
        Err(EngineError::InvalidRetrySetting {
            setting: setting.to_owned(),
            value: value.to_string(),
            reason: "must be greater than zero",
        })
    } else {
        Ok(value)
    }
}

/// Invoke `work` until it succeeds, the attempt budget is spent, or the
/// deadline passes. Attempts run back-to-back; an in-flight attempt always
/// completes, and the deadline is checked only once it has failed. Every
/// failure is logged before the next attempt or the final surface. The
/// cancellation flag is honored at attempt boundaries.
///
/// # Errors
///
/// [`EngineError::Cancelled`] when the flag is set between attempts;
/// [`EngineError::RetriesExhausted`] after the final failed attempt;
/// [`EngineError::RetryDeadline`] when a failure lands past the deadline.
pub fn retry_with_timeout<T, F>(
    operation: &'static str,
    context: RetryContext,
    cancel: &AtomicBool,
    mut work: F,
) -> Result<T, EngineError>
where
    F: FnMut() -> Result<T, EngineError>,
{
    let started = Instant::now();
    let mut attempt: u32 = 1;
    loop {
        if cancel.load(Ordering::SeqCst) {
            return Err(EngineError::Cancelled);
        }
        match work() {
            Ok(value) => {
                if attempt > 1 {
                    info!(operation, attempt, "succeeded after retry");
                }
                return Ok(value);
            }
            Err(error) => {
                warn!(operation, attempt, error = %error, "attempt failed");
                if attempt >= context.attempts {
                    return Err(EngineError::RetriesExhausted {
                        operation,
                        attempts: context.attempts,
                        source: Box::new(error),
                    });
                }
                let elapsed = started.elapsed();
                if elapsed >= context.timeout {
                    return Err(EngineError::RetryDeadline {
                        operation,
                        elapsed_secs: elapsed.as_secs(),
                        timeout_secs: context.timeout.as_secs(),
                        source: Box::new(error),
                    });
                }
                attempt += 1;
            }
        }
    }
}
