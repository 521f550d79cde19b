use std::future::Future;

use tracing::warn;

use crate::config::RetryPolicy;
use crate::contract::StoreError;
use crate::pacing::Sleeper;

/// How a retried storage operation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Retried<T> {
    Succeeded { value: T, attempts: u32 },
    /// A permanent error stopped the loop early.
    Permanent { error: StoreError, attempts: u32 },
    /// Every attempt failed transiently.
    Exhausted { last_error: StoreError, attempts: u32 },
}

impl<T> Retried<T> {
    pub fn attempts(&self) -> u32 {
        match self {
            Retried::Succeeded { attempts, .. }
            | Retried::Permanent { attempts, .. }
            | Retried::Exhausted { attempts, .. } => *attempts,
        }
    }
}

/// Runs `op` up to `policy.attempts` times, sleeping `policy.delay` between
/// attempts. `StoreError::NotFound` is never retried.
pub async fn retry_store_op<T, F, Fut>(
    policy: RetryPolicy,
    sleeper: &dyn Sleeper,
    what: &str,
    mut op: F,
) -> Retried<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let attempts = policy.attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => {
                return Retried::Succeeded {
                    value,
                    attempts: attempt,
                }
            }
            Err(error) if error.is_permanent() => {
                return Retried::Permanent {
                    error,
                    attempts: attempt,
                }
            }
            Err(error) => {
                warn!(
                    what,
                    attempt,
                    max_attempts = attempts,
                    error = %error,
                    "Transient storage failure"
                );
                if attempt >= attempts {
                    return Retried::Exhausted {
                        last_error: error,
                        attempts: attempt,
                    };
                }
                sleeper.sleep(policy.delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pacing::RecordingSleeper;
    use std::cell::Cell;
    use std::time::Duration;

    fn policy(attempts: u32) -> RetryPolicy {
        RetryPolicy {
            attempts,
            delay: Duration::from_secs(15),
        }
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let sleeper = RecordingSleeper::new();
        let calls = Cell::new(0);

        let out = retry_store_op(policy(3), &sleeper, "test", || {
            calls.set(calls.get() + 1);
            let n = calls.get();
            async move {
                if n < 3 {
                    Err(StoreError::Transient("503".into()))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(out, Retried::Succeeded { value: 3, attempts: 3 });
        assert_eq!(sleeper.delays(), vec![Duration::from_secs(15); 2]);
    }

    #[tokio::test]
    async fn not_found_stops_immediately() {
        let sleeper = RecordingSleeper::new();
        let calls = Cell::new(0);

        let out: Retried<()> = retry_store_op(policy(5), &sleeper, "test", || {
            calls.set(calls.get() + 1);
            async { Err(StoreError::NotFound("root".into())) }
        })
        .await;

        assert_eq!(calls.get(), 1);
        assert_eq!(out.attempts(), 1);
        assert!(matches!(out, Retried::Permanent { .. }));
        assert!(sleeper.delays().is_empty());
    }

    #[tokio::test]
    async fn exhausts_after_exactly_the_configured_attempts() {
        let sleeper = RecordingSleeper::new();
        let calls = Cell::new(0);

        let out: Retried<()> = retry_store_op(policy(4), &sleeper, "test", || {
            calls.set(calls.get() + 1);
            async { Err(StoreError::Transient("timeout".into())) }
        })
        .await;

        assert_eq!(calls.get(), 4);
        assert_eq!(
            out,
            Retried::Exhausted {
                last_error: StoreError::Transient("timeout".into()),
                attempts: 4
            }
        );
        // no pause after the final attempt
        assert_eq!(sleeper.delays().len(), 3);
    }
}
