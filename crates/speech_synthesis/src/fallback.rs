//! Fallback chain
//!
//! An ordered list of engines, each with its own retry policy. A job is tried
//! on one engine at a time; when an engine is exhausted the chain moves on to
//! the next, and stops at the first success. Engines are never raced.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::error::SpeechError;
use crate::normalizer::FormatNormalizer;
use crate::ports::SynthesisEngine;
use crate::retry::{RetryPolicy, with_retry};
use crate::synthesizer::Synthesizer;
use crate::types::{SynthesisFailure, SynthesisRequest, SynthesisResult};

/// One engine in the chain together with its retry policy
#[derive(Debug, Clone)]
pub struct ChainLink {
    synthesizer: Synthesizer,
    policy: RetryPolicy,
}

impl ChainLink {
    /// Pair a synthesizer with a retry policy
    #[must_use]
    pub const fn new(synthesizer: Synthesizer, policy: RetryPolicy) -> Self {
        Self {
            synthesizer,
            policy,
        }
    }

    /// Engine name
    #[must_use]
    pub fn name(&self) -> &str {
        self.synthesizer.name()
    }

    /// The wrapped engine
    #[must_use]
    pub fn engine(&self) -> &Arc<dyn SynthesisEngine> {
        self.synthesizer.engine()
    }

    /// Retry policy used for this engine
    #[must_use]
    pub const fn policy(&self) -> &RetryPolicy {
        &self.policy
    }
}

/// Where a job currently is in the chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChainState {
    /// Trying the engine at this index
    Trying(usize),
    /// Every engine failed
    Exhausted,
}

/// Ordered engines tried one after another
#[derive(Debug, Clone)]
pub struct FallbackChain {
    links: Vec<ChainLink>,
}

impl FallbackChain {
    /// Create a chain from links in priority order
    ///
    /// # Errors
    ///
    /// Returns `SpeechError::Configuration` if `links` is empty.
    pub fn new(links: Vec<ChainLink>) -> Result<Self, SpeechError> {
        if links.is_empty() {
            return Err(SpeechError::Configuration(
                "Fallback chain needs at least one engine".to_string(),
            ));
        }
        Ok(Self { links })
    }

    /// Start building a chain whose engines share `normalizer`
    #[must_use]
    pub fn builder(normalizer: FormatNormalizer) -> FallbackChainBuilder {
        FallbackChainBuilder {
            normalizer,
            links: Vec::new(),
        }
    }

    /// Links in priority order
    #[must_use]
    pub fn links(&self) -> &[ChainLink] {
        &self.links
    }

    /// Number of engines in the chain
    #[must_use]
    pub fn len(&self) -> usize {
        self.links.len()
    }

    /// Whether the chain has no engines (never true for a built chain)
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// Synthesize `request`, falling back through the engines in order
    ///
    /// Each engine is used at most once per job. Invalid input and
    /// cancellation stop the chain immediately; every other failure moves on
    /// to the next engine. When all engines fail, the last failure is
    /// returned with the number of engines attempted.
    #[instrument(skip(self, request, cancel), fields(
        destination = %request.output_path().display(),
        engines = self.links.len()
    ))]
    pub async fn run(&self, request: &SynthesisRequest, cancel: &CancellationToken) -> SynthesisResult {
        let mut state = ChainState::Trying(0);
        let mut last_failure: Option<SynthesisFailure> = None;

        loop {
            let index = match state {
                ChainState::Trying(index) => index,
                ChainState::Exhausted => {
                    return Err(last_failure.unwrap_or_else(|| {
                        SynthesisFailure::from_error(
                            &SpeechError::Configuration("No engines configured".to_string()),
                            0,
                        )
                    }));
                },
            };

            let Some(link) = self.links.get(index) else {
                state = ChainState::Exhausted;
                continue;
            };

            debug!(engine = %link.name(), position = index, "Trying engine");
            let outcome = with_retry(&link.synthesizer, request, &link.policy, cancel).await;
            let attempts = outcome.state.attempt;

            let err = match outcome.result {
                Ok(artifact) => {
                    info!(
                        engine = %link.name(),
                        attempts,
                        path = %artifact.path.display(),
                        downgraded = artifact.downgraded,
                        "Synthesis complete"
                    );
                    return Ok(artifact);
                },
                Err(err) => err,
            };

            let kind = outcome.kind.unwrap_or_else(|| err.kind());
            let failure = SynthesisFailure {
                kind,
                detail: format!("{}: {err}", link.name()),
                retryable: kind.is_retryable(),
                engines_attempted: index + 1,
            };

            if !kind.advances_chain() {
                debug!(engine = %link.name(), error_kind = %kind, "Stopping chain");
                return Err(failure);
            }

            let next = index + 1;
            if let Some(next_link) = self.links.get(next) {
                warn!(
                    engine = %link.name(),
                    next = %next_link.name(),
                    attempts,
                    error_kind = %kind,
                    error = %err,
                    "Engine failed, falling back"
                );
                state = ChainState::Trying(next);
            } else {
                warn!(
                    engine = %link.name(),
                    attempts,
                    error_kind = %kind,
                    error = %err,
                    "Last engine failed, chain exhausted"
                );
                state = ChainState::Exhausted;
            }
            last_failure = Some(failure);
        }
    }
}

/// Builder for [`FallbackChain`]
#[derive(Debug)]
pub struct FallbackChainBuilder {
    normalizer: FormatNormalizer,
    links: Vec<ChainLink>,
}

impl FallbackChainBuilder {
    /// Append an engine with its retry policy
    #[must_use]
    pub fn engine(mut self, engine: Arc<dyn SynthesisEngine>, policy: RetryPolicy) -> Self {
        let synthesizer = Synthesizer::new(engine, self.normalizer.clone());
        self.links.push(ChainLink::new(synthesizer, policy));
        self
    }

    /// Finish the chain
    ///
    /// # Errors
    ///
    /// Returns `SpeechError::Configuration` if no engine was added.
    pub fn build(self) -> Result<FallbackChain, SpeechError> {
        FallbackChain::new(self.links)
    }
}
