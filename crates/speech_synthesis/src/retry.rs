//! Retry with exponential backoff
//!
//! Wraps a fallible synthesis attempt and retries it on the same engine while
//! the failure is classified as retryable. The delay before retry `n` is
//! `base_delay * 2^(n-1)` plus random jitter, plus a cooldown after rate
//! limiting. Sleeps are raced against cancellation.
//!
//! # Example
//!
//! ```rust,ignore
//! use speech_synthesis::{RetryPolicy, with_retry};
//!
//! let policy = RetryPolicy::new(3, Duration::from_secs(2));
//! let outcome = with_retry(&synthesizer, &request, &policy, &cancel).await;
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::classifier::{ErrorClassifier, HeuristicClassifier};
use crate::config::RetrySettings;
use crate::error::{ErrorKind, SpeechError};
use crate::synthesizer::{CompletedChunks, Synthesizer};
use crate::types::{SynthesisArtifact, SynthesisRequest};

/// Retry parameters for one engine
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    rate_limit_cooldown: Duration,
    max_jitter: Duration,
    classifier: Arc<dyn ErrorClassifier>,
}

/// Progress of one retry loop
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryState {
    /// Attempts made so far (1 = no retries)
    pub attempt: u32,
    /// Total time spent sleeping between attempts
    pub cumulative_delay: Duration,
}

/// Final result of a retry loop
#[derive(Debug)]
pub struct RetryOutcome<T> {
    /// Value of the last attempt
    pub result: Result<T, SpeechError>,
    /// Classification of the last error, if the loop failed
    pub kind: Option<ErrorKind>,
    /// Attempts and accumulated delay
    pub state: RetryState,
}

impl<T> RetryOutcome<T> {
    /// Check if the operation succeeded
    #[must_use]
    pub const fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

impl RetryPolicy {
    /// Policy with `max_attempts` total attempts and no jitter or cooldown
    ///
    /// `max_attempts` below 1 is treated as 1.
    #[must_use]
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            rate_limit_cooldown: Duration::ZERO,
            max_jitter: Duration::ZERO,
            classifier: Arc::new(HeuristicClassifier),
        }
    }

    /// Policy from configuration
    #[must_use]
    pub fn from_settings(settings: &RetrySettings) -> Self {
        Self::new(
            settings.max_attempts,
            Duration::from_millis(settings.base_delay_ms),
        )
        .with_rate_limit_cooldown(Duration::from_millis(settings.rate_limit_cooldown_ms))
        .with_max_jitter(Duration::from_millis(settings.max_jitter_ms))
    }

    /// Extra wait after a rate-limit failure
    #[must_use]
    pub const fn with_rate_limit_cooldown(mut self, cooldown: Duration) -> Self {
        self.rate_limit_cooldown = cooldown;
        self
    }

    /// Upper bound of random jitter added to each delay
    #[must_use]
    pub const fn with_max_jitter(mut self, max_jitter: Duration) -> Self {
        self.max_jitter = max_jitter;
        self
    }

    /// Classifier deciding retryability
    #[must_use]
    pub fn with_classifier(mut self, classifier: Arc<dyn ErrorClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    /// Total attempts allowed
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before the attempt following failed attempt `attempt` (1-indexed)
    ///
    /// A server `retry_after` hint replaces the cooldown when it is longer.
    #[must_use]
    pub fn backoff_delay(&self, attempt: u32, kind: ErrorKind, retry_after: Option<Duration>) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let mut delay = self.base_delay.saturating_mul(1u32 << exponent);

        if !self.max_jitter.is_zero() {
            let max_ms = u64::try_from(self.max_jitter.as_millis()).unwrap_or(u64::MAX);
            delay = delay.saturating_add(Duration::from_millis(
                rand::rng().random_range(0..=max_ms),
            ));
        }

        if kind == ErrorKind::RateLimited {
            let cooldown = retry_after.map_or(self.rate_limit_cooldown, |hint| {
                hint.max(self.rate_limit_cooldown)
            });
            delay = delay.saturating_add(cooldown);
        }

        delay
    }

    /// Run `operation` until it succeeds, fails for good, or is cancelled
    ///
    /// Non-retryable failures return immediately without sleeping. Cancellation
    /// is checked before every attempt and interrupts backoff sleeps.
    #[allow(clippy::cast_possible_truncation)]
    pub async fn run<F, Fut, T>(&self, cancel: &CancellationToken, mut operation: F) -> RetryOutcome<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, SpeechError>>,
    {
        let mut state = RetryState::default();

        loop {
            if cancel.is_cancelled() {
                return Self::cancelled(state);
            }

            state.attempt += 1;

            let err = match operation().await {
                Ok(value) => {
                    if state.attempt > 1 {
                        debug!(attempts = state.attempt, "Synthesis succeeded after retries");
                    }
                    return RetryOutcome {
                        result: Ok(value),
                        kind: None,
                        state,
                    };
                },
                Err(err) => err,
            };

            let kind = self.classifier.classify(&err);

            if !kind.is_retryable() {
                debug!(
                    attempts = state.attempt,
                    error_kind = %kind,
                    error = %err,
                    "Synthesis failed with non-retryable error"
                );
                return RetryOutcome {
                    result: Err(err),
                    kind: Some(kind),
                    state,
                };
            }

            if state.attempt >= self.max_attempts {
                warn!(
                    attempts = state.attempt,
                    max_attempts = self.max_attempts,
                    error_kind = %kind,
                    error = %err,
                    "Synthesis failed after max attempts"
                );
                return RetryOutcome {
                    result: Err(err),
                    kind: Some(kind),
                    state,
                };
            }

            let delay = self.backoff_delay(state.attempt, kind, err.retry_after());
            warn!(
                attempt = state.attempt,
                max_attempts = self.max_attempts,
                delay_ms = delay.as_millis() as u64,
                error_kind = %kind,
                error = %err,
                "Synthesis failed, retrying"
            );

            tokio::select! {
                () = cancel.cancelled() => return Self::cancelled(state),
                () = tokio::time::sleep(delay) => {},
            }
            state.cumulative_delay += delay;
        }
    }

    fn cancelled<T>(state: RetryState) -> RetryOutcome<T> {
        RetryOutcome {
            result: Err(SpeechError::Cancelled),
            kind: Some(ErrorKind::Cancelled),
            state,
        }
    }
}

/// Synthesize `request` on one engine, retrying per `policy`
///
/// Chunks that succeeded in an earlier attempt are not requested again. On
/// success the artifact's `attempts` reflects the attempts made.
pub async fn with_retry(
    synthesizer: &Synthesizer,
    request: &SynthesisRequest,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
) -> RetryOutcome<SynthesisArtifact> {
    let completed = CompletedChunks::default();
    let mut outcome = policy
        .run(cancel, || synthesizer.resume(request, &completed))
        .await;
    if let Ok(artifact) = outcome.result.as_mut() {
        artifact.attempts = outcome.state.attempt;
    }
    outcome
}
