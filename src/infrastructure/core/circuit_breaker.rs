use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{error, info, warn};

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,   // Writes pass through
    Open,     // Tier considered down, writes fail fast
    HalfOpen, // Cooldown elapsed, next write is a trial
}

/// Guards one storage tier so a dead tier fails fast instead of stalling
/// the writer on every aggregate.
pub struct CircuitBreaker {
    state: Mutex<BreakerState>,
    failure_threshold: usize,
    success_threshold: usize,
    cooldown: Duration,
    tier: String,
}

struct BreakerState {
    state: CircuitState,
    failure_count: usize,
    success_count: usize,
    opened_at: Option<Instant>,
}

impl CircuitBreaker {
    /// * `tier` - tier name used in logs
    /// * `failure_threshold` - consecutive failures before opening
    /// * `success_threshold` - consecutive HalfOpen successes before closing
    /// * `cooldown` - time spent Open before a trial call is allowed
    pub fn new(
        tier: impl Into<String>,
        failure_threshold: usize,
        success_threshold: usize,
        cooldown: Duration,
    ) -> Self {
        Self {
            state: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                opened_at: None,
            }),
            failure_threshold: failure_threshold.max(1),
            success_threshold: success_threshold.max(1),
            cooldown,
            tier: tier.into(),
        }
    }

    /// Run `f` bounded by `timeout`. Timeouts count as failures.
    pub async fn call<F, T, E>(&self, timeout: Duration, f: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: Future<Output = Result<T, E>>,
    {
        self.admit()?;

        match tokio::time::timeout(timeout, f).await {
            Ok(Ok(value)) => {
                self.on_success();
                Ok(value)
            }
            Ok(Err(e)) => {
                self.on_failure();
                Err(CircuitBreakerError::Inner(e))
            }
            Err(_) => {
                self.on_failure();
                Err(CircuitBreakerError::Timeout(timeout))
            }
        }
    }

    fn admit<E>(&self) -> Result<(), CircuitBreakerError<E>> {
        let mut state = self.lock();
        if state.state != CircuitState::Open {
            return Ok(());
        }

        let elapsed = state.opened_at.map(|t| t.elapsed()).unwrap_or_default();
        if elapsed >= self.cooldown {
            info!(
                "CircuitBreaker [{}]: Open -> HalfOpen (cooldown elapsed)",
                self.tier
            );
            state.state = CircuitState::HalfOpen;
            state.success_count = 0;
            Ok(())
        } else {
            Err(CircuitBreakerError::Open(format!(
                "{} circuit open, retry in {:?}",
                self.tier,
                self.cooldown - elapsed
            )))
        }
    }

    fn on_success(&self) {
        let mut state = self.lock();
        match state.state {
            CircuitState::HalfOpen => {
                state.success_count += 1;
                if state.success_count >= self.success_threshold {
                    info!(
                        "CircuitBreaker [{}]: HalfOpen -> Closed ({} successes)",
                        self.tier, state.success_count
                    );
                    state.state = CircuitState::Closed;
                    state.failure_count = 0;
                    state.success_count = 0;
                    state.opened_at = None;
                }
            }
            CircuitState::Closed => state.failure_count = 0,
            CircuitState::Open => {
                warn!(
                    "CircuitBreaker [{}]: success recorded while Open",
                    self.tier
                );
            }
        }
    }

    fn on_failure(&self) {
        let mut state = self.lock();
        state.failure_count += 1;

        match state.state {
            CircuitState::Closed if state.failure_count >= self.failure_threshold => {
                error!(
                    "CircuitBreaker [{}]: Closed -> Open ({} failures)",
                    self.tier, state.failure_count
                );
                state.state = CircuitState::Open;
                state.opened_at = Some(Instant::now());
            }
            CircuitState::HalfOpen => {
                warn!(
                    "CircuitBreaker [{}]: HalfOpen -> Open (trial failed)",
                    self.tier
                );
                state.state = CircuitState::Open;
                state.success_count = 0;
                state.opened_at = Some(Instant::now());
            }
            _ => {}
        }
    }

    /// Close the breaker after an out-of-band health probe succeeded.
    pub fn reset(&self) {
        let mut state = self.lock();
        if state.state != CircuitState::Closed {
            info!("CircuitBreaker [{}]: reset to Closed", self.tier);
        }
        state.state = CircuitState::Closed;
        state.failure_count = 0;
        state.success_count = 0;
        state.opened_at = None;
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn is_open(&self) -> bool {
        self.state() == CircuitState::Open
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerState> {
        // State is always left consistent, so a poisoned lock is still usable
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CircuitBreakerError<E> {
    #[error("circuit breaker is open: {0}")]
    Open(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Inner(E),
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOUND: Duration = Duration::from_secs(1);

    #[tokio::test]
    async fn test_circuit_opens_after_failures() {
        let cb = CircuitBreaker::new("cache", 3, 2, Duration::from_secs(1));

        for _ in 0..3 {
            let result = cb.call(BOUND, async { Err::<(), &str>("error") }).await;
            assert!(result.is_err());
        }

        assert_eq!(cb.state(), CircuitState::Open);

        let result = cb.call(BOUND, async { Ok::<(), &str>(()) }).await;
        assert!(matches!(result, Err(CircuitBreakerError::Open(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_circuit_recovers_after_cooldown() {
        let cb = CircuitBreaker::new("cache", 2, 2, Duration::from_millis(100));

        for _ in 0..2 {
            let _ = cb.call(BOUND, async { Err::<(), &str>("error") }).await;
        }
        assert!(cb.is_open());

        tokio::time::sleep(Duration::from_millis(150)).await;

        assert!(cb.call(BOUND, async { Ok::<(), &str>(()) }).await.is_ok());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert!(cb.call(BOUND, async { Ok::<(), &str>(()) }).await.is_ok());
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_halfopen_reopens_on_failure() {
        let cb = CircuitBreaker::new("durable_store", 2, 2, Duration::from_millis(100));

        for _ in 0..2 {
            let _ = cb.call(BOUND, async { Err::<(), &str>("error") }).await;
        }
        tokio::time::sleep(Duration::from_millis(150)).await;

        let _ = cb.call(BOUND, async { Err::<(), &str>("error") }).await;
        assert!(cb.is_open());
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_call_counts_as_failure() {
        let cb = CircuitBreaker::new("cache", 1, 1, Duration::from_secs(5));

        let result = cb
            .call(Duration::from_millis(50), async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok::<(), &str>(())
            })
            .await;

        assert!(matches!(result, Err(CircuitBreakerError::Timeout(_))));
        assert!(cb.is_open());

        cb.reset();
        assert_eq!(cb.state(), CircuitState::Closed);
    }
}
