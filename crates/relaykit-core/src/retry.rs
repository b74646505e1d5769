//! Retrying request executor
//!
//! One logical request against a named provider: resolve credentials, call the
//! vendor, and on a transient failure sleep `base_delay * 2^attempt + jitter`
//! before trying again, up to `max_attempts` calls in total.

use async_trait::async_trait;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use crate::error::{Error, Result, TransientError};
use crate::registry::{ProviderConfig, ProviderRegistry};

/// Backoff and attempt budget for one call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of calls, including the first one
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles for each later attempt
    pub base_delay: Duration,
    /// Upper bound (exclusive) of the uniform jitter added to each delay
    pub max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(30),
            max_jitter: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// No waiting between attempts
    pub fn immediate() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::ZERO,
            max_jitter: Duration::ZERO,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_max_jitter(mut self, jitter: Duration) -> Self {
        self.max_jitter = jitter;
        self
    }

    /// Attempts actually made; a zero budget still makes one call
    pub fn attempt_budget(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Deterministic part of the delay after the failed attempt `attempt` (0-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        match 2u32.checked_pow(attempt) {
            Some(factor) => self.base_delay.saturating_mul(factor),
            None if self.base_delay.is_zero() => Duration::ZERO,
            None => Duration::MAX,
        }
    }

    /// Full delay after the failed attempt `attempt`: backoff plus jitter in
    /// `[0, max_jitter)`. Growth is uncapped.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let backoff = self.backoff(attempt);
        if self.max_jitter.is_zero() {
            return backoff;
        }
        let jitter = rand::thread_rng().gen_range(Duration::ZERO..self.max_jitter);
        backoff.saturating_add(jitter)
    }
}

/// One request ready to be executed; consumed by [`RetryExecutor::execute`]
#[derive(Debug, Clone)]
pub struct RequestDescriptor<P> {
    pub provider: String,
    pub model: String,
    pub payload: P,
    pub policy: RetryPolicy,
}

impl<P> RequestDescriptor<P> {
    pub fn new(provider: impl Into<String>, model: impl Into<String>, payload: P) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            payload,
            policy: RetryPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }
}

/// A successful vendor response plus how it was obtained
#[derive(Debug, Clone)]
pub struct Attempted<T> {
    pub value: T,
    /// Calls made, including the successful one
    pub attempts: u32,
    /// Wall-clock time across all attempts and backoff sleeps
    pub elapsed: Duration,
}

/// The vendor-specific part of a call: send `payload` to `provider` once.
///
/// Return [`Error::Transient`] for anything worth retrying (transport
/// failures, non-success statuses, malformed bodies). Any other error ends
/// the call immediately.
#[async_trait]
pub trait VendorCall<P: Sync, T: Send>: Send + Sync {
    async fn call(&self, provider: &ProviderConfig, payload: &P) -> Result<T>;
}

/// Per-call bookkeeping, dropped when the call finishes
#[derive(Debug, Default)]
struct RetryState {
    attempt_index: u32,
    last_error: Option<TransientError>,
}

/// Runs [`VendorCall`]s with credentials from the registry and retries
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    registry: Arc<ProviderRegistry>,
}

impl RetryExecutor {
    pub fn new(registry: Arc<ProviderRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    /// Execute `request` through `call`, retrying transient failures.
    ///
    /// Fails with [`Error::Configuration`] before any I/O when the provider is
    /// unknown, and with [`Error::ExhaustedRetries`] carrying the last error
    /// once the attempt budget is spent.
    pub async fn execute<P, T, C>(&self, request: RequestDescriptor<P>, call: &C) -> Result<Attempted<T>>
    where
        P: Sync,
        T: Send,
        C: VendorCall<P, T> + ?Sized,
    {
        let provider = self.registry.resolve(&request.provider)?;
        let span = info_span!(
            "vendor_call",
            call_id = %Uuid::new_v4(),
            provider = %provider.name,
            model = %request.model,
        );
        run_attempts(provider, &request, call).instrument(span).await
    }
}

async fn run_attempts<P, T, C>(
    provider: &ProviderConfig,
    request: &RequestDescriptor<P>,
    call: &C,
) -> Result<Attempted<T>>
where
    P: Sync,
    T: Send,
    C: VendorCall<P, T> + ?Sized,
{
    let budget = request.policy.attempt_budget();
    let start = Instant::now();
    let mut state = RetryState::default();

    loop {
        info!(
            "Attempt {}/{}: sending request to {} API",
            state.attempt_index + 1,
            budget,
            provider.name
        );

        match call.call(provider, &request.payload).await {
            Ok(value) => {
                let attempts = state.attempt_index + 1;
                info!(
                    "Received response from {} API after {} attempt(s)",
                    provider.name, attempts
                );
                return Ok(Attempted {
                    value,
                    attempts,
                    elapsed: start.elapsed(),
                });
            }
            Err(Error::Transient(e)) => {
                warn!(
                    status = ?e.status(),
                    "{} API error on attempt {}: {}",
                    provider.name,
                    state.attempt_index + 1,
                    e
                );
                state.last_error = Some(e);
            }
            Err(e) => {
                warn!("{} API call failed without retry: {}", provider.name, e);
                return Err(e);
            }
        }

        if state.attempt_index + 1 >= budget {
            break;
        }

        let delay = request.policy.delay_for(state.attempt_index);
        info!("Retrying in {:.2} seconds", delay.as_secs_f64());
        tokio::time::sleep(delay).await;
        state.attempt_index += 1;
    }

    error!("Maximum retry attempts reached for {} API", provider.name);
    let last = state
        .last_error
        .unwrap_or_else(|| TransientError::unexpected("no attempt recorded"));
    debug!("Last error: {:?}", last);
    Err(Error::ExhaustedRetries {
        attempts: budget,
        last,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails with a transient error until `succeed_on` (1-based), then echoes the payload
    struct FlakyCall {
        succeed_on: u32,
        calls: AtomicU32,
    }

    impl FlakyCall {
        fn new(succeed_on: u32) -> Self {
            Self {
                succeed_on,
                calls: AtomicU32::new(0),
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl VendorCall<String, String> for FlakyCall {
        async fn call(&self, provider: &ProviderConfig, payload: &String) -> Result<String> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n >= self.succeed_on {
                Ok(format!("{}:{}", provider.api_key, payload))
            } else {
                Err(TransientError::Status {
                    status: 503,
                    body: format!("failure {}", n),
                }
                .into())
            }
        }
    }

    /// Always fails with a non-retryable error
    struct InvalidCall {
        calls: AtomicU32,
    }

    #[async_trait]
    impl VendorCall<String, String> for InvalidCall {
        async fn call(&self, _provider: &ProviderConfig, _payload: &String) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(Error::input("payload rejected locally"))
        }
    }

    fn executor() -> RetryExecutor {
        RetryExecutor::new(Arc::new(ProviderRegistry::from_providers([
            ProviderConfig::new("X", "k", "http://u.example"),
        ])))
    }

    fn request(policy: RetryPolicy) -> RequestDescriptor<String> {
        RequestDescriptor::new("X", "m", "hello".to_string()).with_policy(policy)
    }

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.base_delay, Duration::from_secs(30));
        assert_eq!(policy.max_jitter, Duration::from_secs(10));
    }

    #[test]
    fn test_delay_bounds() {
        let policy = RetryPolicy::default();
        for attempt in 0..5 {
            let floor = Duration::from_secs(30 * 2u64.pow(attempt));
            for _ in 0..50 {
                let delay = policy.delay_for(attempt);
                assert!(delay >= floor, "attempt {} delay {:?}", attempt, delay);
                assert!(delay < floor + Duration::from_secs(10));
            }
        }
    }

    #[test]
    fn test_delay_without_jitter_is_exact() {
        let policy = RetryPolicy::default().with_max_jitter(Duration::ZERO);
        assert_eq!(policy.delay_for(0), Duration::from_secs(30));
        assert_eq!(policy.delay_for(3), Duration::from_secs(240));
    }

    #[test]
    fn test_backoff_saturates_instead_of_panicking() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(40), Duration::MAX);
        assert_eq!(policy.delay_for(200), Duration::MAX);
    }

    #[test]
    fn test_zero_budget_still_attempts_once() {
        assert_eq!(RetryPolicy::default().with_max_attempts(0).attempt_budget(), 1);
    }

    #[tokio::test]
    async fn test_unknown_provider_fails_before_calling() {
        let call = FlakyCall::new(1);
        let err = executor()
            .execute(
                RequestDescriptor::new("NOPE", "m", "x".to_string()),
                &call,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
        assert_eq!(call.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_attempt_success() {
        let call = FlakyCall::new(1);
        let out = executor()
            .execute(request(RetryPolicy::default()), &call)
            .await
            .unwrap();
        assert_eq!(out.value, "k:hello");
        assert_eq!(out.attempts, 1);
        assert_eq!(out.elapsed, Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_after_failures_waits_for_backoff() {
        let call = FlakyCall::new(3);
        let out = executor()
            .execute(request(RetryPolicy::default()), &call)
            .await
            .unwrap();
        assert_eq!(out.attempts, 3);
        assert_eq!(call.calls(), 3);
        // 30s + 60s of backoff, plus at most 10s of jitter per sleep
        assert!(out.elapsed >= Duration::from_secs(90));
        assert!(out.elapsed < Duration::from_secs(110));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausts_exactly_max_attempts() {
        let call = FlakyCall::new(u32::MAX);
        let policy = RetryPolicy::default().with_max_attempts(4);
        let err = executor().execute(request(policy), &call).await.unwrap_err();
        assert_eq!(call.calls(), 4);
        match err {
            Error::ExhaustedRetries { attempts, last } => {
                assert_eq!(attempts, 4);
                assert!(last.to_string().contains("failure 4"));
            }
            other => panic!("expected ExhaustedRetries, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_sleep_after_final_attempt() {
        let call = FlakyCall::new(u32::MAX);
        let policy = RetryPolicy::default()
            .with_max_attempts(2)
            .with_max_jitter(Duration::ZERO);
        let start = Instant::now();
        let _ = executor().execute(request(policy), &call).await;
        assert_eq!(start.elapsed(), Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_error_is_not_retried() {
        let call = InvalidCall {
            calls: AtomicU32::new(0),
        };
        let start = Instant::now();
        let err = executor()
            .execute(request(RetryPolicy::default()), &call)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InputValidation(_)));
        assert_eq!(call.calls.load(Ordering::SeqCst), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }
}
