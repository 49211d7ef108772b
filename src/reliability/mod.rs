//! Reliability wrapper around every outbound provider call.
//!
//! Each call goes through, in order:
//!
//! ```text
//! breaker.admit()  ──open──▶  ServiceUnavailable (no network call)
//!       │
//! limiter.acquire() (cancellable wait on the shared budget)
//!       │
//! provider.generate() ─▶ record_success / record_failure
//!       │
//! finish check + parse ─▶ retry with backoff if retryable
//! ```
//!
//! The rate limiter and circuit breakers are process-wide services held in
//! [`ReliabilityServices`] and shared by `Arc`, so every concurrent chunk
//! call of every run contends for the same provider budget.

pub mod breaker;
pub mod rate_limit;
pub mod retry;

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::config::ReliabilityConfig;
use crate::error::{ClassifyError, Result};
use crate::models::TokenUsage;
use crate::provider::{GenerateRequest, Provider};

pub use breaker::{Admission, CircuitBreaker, CircuitState};
pub use rate_limit::RateLimiter;
pub use retry::RetryPolicy;

/// Gives a half-open trial slot back if its call ends (cancelled or
/// dropped) before recording an outcome.
struct TrialSlot<'a> {
    breaker: &'a CircuitBreaker,
    held: bool,
}

impl Drop for TrialSlot<'_> {
    fn drop(&mut self) {
        if self.held {
            self.breaker.release_trial();
        }
    }
}

/// Pipeline phase a call belongs to. Each phase has its own breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Classification,
    Conversion,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Classification => "classification",
            Phase::Conversion => "conversion",
        }
    }
}

/// Shared rate limiter plus one circuit breaker per phase.
pub struct ReliabilityServices {
    pub limiter: RateLimiter,
    classification: CircuitBreaker,
    conversion: CircuitBreaker,
}

impl ReliabilityServices {
    pub fn new(config: &ReliabilityConfig) -> Self {
        let cooldown = Duration::from_secs(config.cooldown_secs);
        Self {
            limiter: RateLimiter::new(config.requests_per_minute, config.burst),
            classification: CircuitBreaker::new(config.failure_threshold, cooldown),
            conversion: CircuitBreaker::new(config.failure_threshold, cooldown),
        }
    }

    pub fn breaker(&self, phase: Phase) -> &CircuitBreaker {
        match phase {
            Phase::Classification => &self.classification,
            Phase::Conversion => &self.conversion,
        }
    }
}

/// A provider handle that applies breaker, rate limit and retry policy.
#[derive(Clone)]
pub struct ReliableClient {
    provider: Arc<dyn Provider>,
    services: Arc<ReliabilityServices>,
    policy: RetryPolicy,
}

impl ReliableClient {
    pub fn new(
        provider: Arc<dyn Provider>,
        services: Arc<ReliabilityServices>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            provider,
            services,
            policy,
        }
    }

    /// Client with fresh shared services built from `config`.
    pub fn from_config(provider: Arc<dyn Provider>, config: &ReliabilityConfig) -> Self {
        Self::new(
            provider,
            Arc::new(ReliabilityServices::new(config)),
            RetryPolicy::from(config),
        )
    }

    pub fn model_name(&self) -> &str {
        self.provider.model_name()
    }

    pub fn services(&self) -> &Arc<ReliabilityServices> {
        &self.services
    }

    /// Call the provider and parse its text, retrying retryable failures.
    ///
    /// `parse` runs inside the retry loop so an unparseable body is retried
    /// like a transient failure. Usage of every attempt that reached the
    /// provider is included in the returned total.
    pub async fn call<T, F>(
        &self,
        phase: Phase,
        request: &GenerateRequest,
        parse: F,
        cancel: &CancellationToken,
    ) -> Result<(T, TokenUsage)>
    where
        F: Fn(&str) -> Result<T>,
    {
        let breaker = self.services.breaker(phase);
        let mut usage = TokenUsage::default();
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            if cancel.is_cancelled() {
                return Err(ClassifyError::Cancelled);
            }
            let admission = breaker.admit();
            if admission == Admission::Rejected {
                return Err(ClassifyError::ServiceUnavailable {
                    phase: phase.as_str(),
                });
            }
            let mut trial = TrialSlot {
                breaker,
                held: admission == Admission::Trial,
            };
            self.services.limiter.acquire(cancel).await?;

            let outcome = tokio::select! {
                _ = cancel.cancelled() => return Err(ClassifyError::Cancelled),
                r = self.provider.generate(request) => r,
            };

            let err = match outcome {
                Ok(generation) => {
                    breaker.record_success();
                    trial.held = false;
                    usage.add(&generation.usage);
                    match generation.check_finish().and_then(|g| parse(&g.text)) {
                        Ok(value) => return Ok((value, usage)),
                        Err(e) => e,
                    }
                }
                Err(e) => {
                    breaker.record_failure();
                    trial.held = false;
                    e
                }
            };

            if !err.is_retryable() {
                tracing::warn!(phase = phase.as_str(), attempt, error = %err, "terminal provider failure");
                return Err(err);
            }
            if attempt >= self.policy.max_attempts {
                tracing::error!(phase = phase.as_str(), attempt, error = %err, "retries exhausted");
                return Err(ClassifyError::RetriesExhausted {
                    attempts: attempt,
                    last: Box::new(err),
                });
            }

            let delay = self.policy.delay(attempt);
            tracing::warn!(
                phase = phase.as_str(),
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "retrying provider call"
            );
            tokio::select! {
                _ = cancel.cancelled() => return Err(ClassifyError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}
