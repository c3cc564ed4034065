//! Per-provider circuit breaker.
//!
//! Wraps every outbound provider call. Three states: Closed (normal), Open
//! (fast-fail without touching the network), HalfOpen (one trial after the
//! cooldown). A timed-out call counts as a failure and the underlying request
//! future is dropped, not awaited further.

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::common::{CoreError, CoreResult};

#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Consecutive failures before the breaker opens.
    pub failure_threshold: u32,
    /// How long the breaker stays open before allowing a trial call.
    pub cooldown: Duration,
    /// Budget for a single provider call.
    pub call_timeout: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            cooldown: Duration::from_secs(30),
            call_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug)]
enum BreakerState {
    Closed {
        failures: u32,
    },
    Open {
        until: Instant,
        retry_at: DateTime<Utc>,
    },
    /// A trial call is in flight; everything else fast-fails.
    HalfOpen,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    provider: String,
    config: BreakerConfig,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(provider: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            provider: provider.into(),
            config,
            state: Mutex::new(BreakerState::Closed { failures: 0 }),
        }
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// Run one provider call through the breaker.
    pub async fn call<T, F>(&self, fut: F) -> CoreResult<T>
    where
        F: Future<Output = CoreResult<T>>,
    {
        self.before_call().await?;

        let outcome = tokio::time::timeout(self.config.call_timeout, fut).await;
        match outcome {
            Ok(Ok(value)) => {
                self.on_success().await;
                Ok(value)
            }
            Ok(Err(err)) => {
                self.on_failure().await;
                Err(err)
            }
            // Timeout: the request future is dropped here; whether it landed
            // on the provider side is settled later by reconciliation.
            Err(_) => {
                self.on_failure().await;
                Err(CoreError::ProviderTimeout {
                    provider: self.provider.clone(),
                })
            }
        }
    }

    async fn before_call(&self) -> CoreResult<()> {
        let mut state = self.state.lock().await;
        match &*state {
            BreakerState::Closed { .. } => Ok(()),
            BreakerState::Open { until, retry_at } => {
                if Instant::now() < *until {
                    Err(CoreError::CircuitOpen {
                        provider: self.provider.clone(),
                        retry_at: *retry_at,
                    })
                } else {
                    // Cooldown elapsed: this call becomes the trial.
                    *state = BreakerState::HalfOpen;
                    Ok(())
                }
            }
            BreakerState::HalfOpen => Err(CoreError::CircuitOpen {
                provider: self.provider.clone(),
                retry_at: Utc::now(),
            }),
        }
    }

    async fn on_success(&self) {
        let mut state = self.state.lock().await;
        if matches!(*state, BreakerState::HalfOpen) {
            tracing::info!(provider = %self.provider, "circuit closed after successful trial");
        }
        *state = BreakerState::Closed { failures: 0 };
    }

    async fn on_failure(&self) {
        let mut state = self.state.lock().await;
        let open = |retry_in: Duration| BreakerState::Open {
            until: Instant::now() + retry_in,
            retry_at: Utc::now() + chrono::Duration::from_std(retry_in).unwrap_or_default(),
        };
        *state = match &*state {
            BreakerState::Closed { failures } => {
                let failures = failures + 1;
                if failures >= self.config.failure_threshold {
                    tracing::warn!(
                        provider = %self.provider,
                        failures,
                        cooldown_secs = self.config.cooldown.as_secs(),
                        "circuit opened"
                    );
                    open(self.config.cooldown)
                } else {
                    BreakerState::Closed { failures }
                }
            }
            // Failed trial: back to open with a fresh cooldown.
            BreakerState::HalfOpen | BreakerState::Open { .. } => {
                tracing::warn!(provider = %self.provider, "circuit re-opened after failed trial");
                open(self.config.cooldown)
            }
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new(
            "test-provider",
            BreakerConfig {
                failure_threshold: 3,
                cooldown: Duration::from_secs(30),
                call_timeout: Duration::from_secs(5),
            },
        )
    }

    async fn failing_call(breaker: &CircuitBreaker, calls: &AtomicU32) -> CoreResult<()> {
        breaker
            .call(async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(CoreError::Provider {
                    provider: "test-provider".to_string(),
                    detail: "boom".to_string(),
                })
            })
            .await
    }

    #[tokio::test]
    async fn opens_after_three_consecutive_failures() {
        let breaker = breaker();
        let calls = AtomicU32::new(0);

        for _ in 0..3 {
            assert!(failing_call(&breaker, &calls).await.is_err());
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        // Breaker is open: no network attempt is made.
        let result = failing_call(&breaker, &calls).await;
        assert!(matches!(result, Err(CoreError::CircuitOpen { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn allows_one_trial_after_cooldown_and_closes_on_success() {
        let breaker = breaker();
        let calls = AtomicU32::new(0);

        for _ in 0..3 {
            let _ = failing_call(&breaker, &calls).await;
        }

        tokio::time::advance(Duration::from_secs(31)).await;

        // Trial call goes through and closes the breaker.
        let ok = breaker.call(async { Ok::<_, CoreError>(42) }).await;
        assert_eq!(ok.unwrap(), 42);

        // Next call is a normal closed-state call.
        let ok = breaker.call(async { Ok::<_, CoreError>(43) }).await;
        assert_eq!(ok.unwrap(), 43);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_trial_reopens_with_fresh_cooldown() {
        let breaker = breaker();
        let calls = AtomicU32::new(0);

        for _ in 0..3 {
            let _ = failing_call(&breaker, &calls).await;
        }

        tokio::time::advance(Duration::from_secs(31)).await;

        // Trial fails: breaker re-opens.
        assert!(failing_call(&breaker, &calls).await.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 4);

        // Still open before the fresh cooldown elapses.
        tokio::time::advance(Duration::from_secs(10)).await;
        let result = failing_call(&breaker, &calls).await;
        assert!(matches!(result, Err(CoreError::CircuitOpen { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_counts_as_failure() {
        let breaker = CircuitBreaker::new(
            "slow-provider",
            BreakerConfig {
                failure_threshold: 1,
                cooldown: Duration::from_secs(30),
                call_timeout: Duration::from_secs(5),
            },
        );

        let result = breaker
            .call(async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok::<_, CoreError>(())
            })
            .await;
        assert!(matches!(result, Err(CoreError::ProviderTimeout { .. })));

        // One timeout at threshold 1 opened the breaker.
        let result = breaker.call(async { Ok::<_, CoreError>(()) }).await;
        assert!(matches!(result, Err(CoreError::CircuitOpen { .. })));
    }
}
