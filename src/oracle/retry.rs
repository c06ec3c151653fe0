use crate::decant::config::OracleConfig;
use crate::decant::warn::{self, WarnEvent};
use crate::error::DecantError;
use crate::oracle::providers::CallError;
use std::thread;
use std::time::Duration;

const MAX_BACKOFF_MS: u64 = 8_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Extra attempts after the first.
    pub max_retries: u32,
    pub backoff_ms: u64,
}

impl RetryPolicy {
    pub fn from_config(cfg: &OracleConfig) -> Self {
        Self {
            max_retries: cfg.max_retries,
            backoff_ms: cfg.backoff_ms,
        }
    }

    /// Delay before retry number `attempt` (0-based): doubles each time, capped.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        Duration::from_millis(self.backoff_ms.saturating_mul(factor).min(MAX_BACKOFF_MS))
    }
}

/// Run `call` until it succeeds, fails for good, or retries run out.
pub fn run_with_retry<T>(
    stage: &'static str,
    policy: RetryPolicy,
    call: impl FnMut() -> Result<T, CallError>,
) -> Result<T, DecantError> {
    retry_with_sleep(stage, policy, call, thread::sleep)
}

fn retry_with_sleep<T>(
    stage: &'static str,
    policy: RetryPolicy,
    mut call: impl FnMut() -> Result<T, CallError>,
    mut sleep: impl FnMut(Duration),
) -> Result<T, DecantError> {
    let mut attempt = 0u32;
    loop {
        match call() {
            Ok(value) => return Ok(value),
            Err(err) if err.transient && attempt < policy.max_retries => {
                let delay = policy.delay(attempt);
                warn::emit(WarnEvent {
                    code: "ORACLE_RETRY",
                    stage,
                    action: "retry",
                    session: "na",
                    reason: &format!("attempt_{}_backoff_{}ms", attempt + 1, delay.as_millis()),
                    err: &err.reason,
                });
                sleep(delay);
                attempt += 1;
            }
            Err(err) => {
                return Err(DecantError::OracleUnavailable {
                    stage,
                    attempts: attempt as usize + 1,
                    reason: err.reason,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{RetryPolicy, retry_with_sleep};
    use crate::error::DecantError;
    use crate::oracle::providers::CallError;
    use std::time::Duration;

    const POLICY: RetryPolicy = RetryPolicy {
        max_retries: 3,
        backoff_ms: 500,
    };

    #[test]
    fn delay_doubles_and_caps() {
        assert_eq!(POLICY.delay(0), Duration::from_millis(500));
        assert_eq!(POLICY.delay(1), Duration::from_millis(1_000));
        assert_eq!(POLICY.delay(3), Duration::from_millis(4_000));
        assert_eq!(POLICY.delay(5), Duration::from_millis(8_000));
        assert_eq!(POLICY.delay(80), Duration::from_millis(8_000));
    }

    #[test]
    fn transient_failures_retry_until_success() {
        let mut calls = 0;
        let mut slept = Vec::new();
        let out = retry_with_sleep(
            "boundary",
            POLICY,
            || {
                calls += 1;
                if calls < 3 {
                    Err(CallError::transient("429"))
                } else {
                    Ok("u2")
                }
            },
            |d| slept.push(d),
        )
        .expect("third attempt succeeds");
        assert_eq!(out, "u2");
        assert_eq!(calls, 3);
        assert_eq!(slept, vec![Duration::from_millis(500), Duration::from_millis(1_000)]);
    }

    #[test]
    fn exhaustion_reports_attempts() {
        let mut calls = 0;
        let err = retry_with_sleep(
            "summary",
            POLICY,
            || -> Result<(), CallError> {
                calls += 1;
                Err(CallError::transient("503"))
            },
            |_| {},
        )
        .unwrap_err();
        assert_eq!(calls, 4);
        assert!(matches!(
            err,
            DecantError::OracleUnavailable { stage: "summary", attempts: 4, .. }
        ));
    }

    #[test]
    fn fatal_failures_are_not_retried() {
        let mut calls = 0;
        let err = retry_with_sleep(
            "boundary",
            POLICY,
            || -> Result<(), CallError> {
                calls += 1;
                Err(CallError::fatal("401 unauthorized"))
            },
            |_| panic!("no sleep expected"),
        )
        .unwrap_err();
        assert_eq!(calls, 1);
        assert!(err.to_string().contains("401 unauthorized"));
    }
}
