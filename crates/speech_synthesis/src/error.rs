//! Speech synthesis errors
//!
//! Every failure an engine, the retry policy or the fallback chain can see is a
//! [`SpeechError`]. Each variant maps onto exactly one [`ErrorKind`], which is
//! what retry and fallback decisions are made on.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Classification of a synthesis failure
///
/// Only `RateLimited` and `TransientNetwork` are retried on the same engine.
/// Everything else either advances the fallback chain or stops the job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Empty or otherwise unusable request; fatal to the job
    InvalidInput,
    /// Credentials rejected or missing
    AuthFailure,
    /// Provider throttled the request
    RateLimited,
    /// Connection, timeout or 5xx failure
    TransientNetwork,
    /// Account quota or billing exhausted
    QuotaExhausted,
    /// Voice not offered by the engine
    UnsupportedVoice,
    /// No transcoder available for a required conversion
    TranscodeUnavailable,
    /// Any other provider-side rejection
    ProviderError,
    /// Engine or registry misconfiguration
    Configuration,
    /// Job cancelled before completion
    Cancelled,
}

impl ErrorKind {
    /// Whether the same engine should be tried again
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::RateLimited | Self::TransientNetwork)
    }

    /// Whether a failure of this kind lets the fallback chain move to the next engine
    ///
    /// Input problems are the same for every engine and cancellation is
    /// a caller decision, so neither advances.
    #[must_use]
    pub const fn advances_chain(self) -> bool {
        !matches!(self, Self::InvalidInput | Self::Cancelled)
    }

    /// Stable snake_case name, as used in reports
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidInput => "invalid_input",
            Self::AuthFailure => "auth_failure",
            Self::RateLimited => "rate_limited",
            Self::TransientNetwork => "transient_network",
            Self::QuotaExhausted => "quota_exhausted",
            Self::UnsupportedVoice => "unsupported_voice",
            Self::TranscodeUnavailable => "transcode_unavailable",
            Self::ProviderError => "provider_error",
            Self::Configuration => "configuration",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can occur during speech synthesis
#[derive(Debug, Error)]
pub enum SpeechError {
    /// Request cannot be synthesized by any engine
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Credentials were rejected
    #[error("Authentication failed: {0}")]
    AuthFailure(String),

    /// Provider throttled the request
    #[error("Rate limited: {detail}")]
    RateLimited {
        /// Provider message
        detail: String,
        /// Server-provided wait hint, if any
        retry_after: Option<Duration>,
    },

    /// Connection-level or server-side failure
    #[error("Transient network failure: {0}")]
    TransientNetwork(String),

    /// Request timed out
    #[error("Speech synthesis timeout after {0}ms")]
    Timeout(u64),

    /// Account quota exhausted
    #[error("Quota exhausted: {0}")]
    QuotaExhausted(String),

    /// Voice is not offered by the engine
    #[error("Unsupported voice: {0}")]
    UnsupportedVoice(String),

    /// A conversion was required but no transcoder is installed
    #[error("Transcoder unavailable: {0}")]
    TranscodeUnavailable(String),

    /// Provider rejected the request or returned unusable audio
    #[error("Synthesis failed: {0}")]
    SynthesisFailed(String),

    /// Audio processing/conversion failed
    #[error("Audio processing failed: {0}")]
    AudioProcessing(String),

    /// Provider not available (not installed or not supported on this host)
    #[error("Provider not available: {0}")]
    NotAvailable(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Filesystem failure while writing artifacts
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Job was cancelled
    #[error("Synthesis cancelled")]
    Cancelled,
}

impl SpeechError {
    /// Build an error of the given kind carrying `detail`
    #[must_use]
    pub fn from_kind(kind: ErrorKind, detail: impl Into<String>) -> Self {
        let detail = detail.into();
        match kind {
            ErrorKind::InvalidInput => Self::InvalidInput(detail),
            ErrorKind::AuthFailure => Self::AuthFailure(detail),
            ErrorKind::RateLimited => Self::RateLimited {
                detail,
                retry_after: None,
            },
            ErrorKind::TransientNetwork => Self::TransientNetwork(detail),
            ErrorKind::QuotaExhausted => Self::QuotaExhausted(detail),
            ErrorKind::UnsupportedVoice => Self::UnsupportedVoice(detail),
            ErrorKind::TranscodeUnavailable => Self::TranscodeUnavailable(detail),
            ErrorKind::ProviderError => Self::SynthesisFailed(detail),
            ErrorKind::Configuration => Self::Configuration(detail),
            ErrorKind::Cancelled => Self::Cancelled,
        }
    }

    /// Rate-limit error with an optional server wait hint
    #[must_use]
    pub fn rate_limited(detail: impl Into<String>, retry_after: Option<Duration>) -> Self {
        Self::RateLimited {
            detail: detail.into(),
            retry_after,
        }
    }

    /// The kind this error belongs to
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidInput(_) => ErrorKind::InvalidInput,
            Self::AuthFailure(_) => ErrorKind::AuthFailure,
            Self::RateLimited { .. } => ErrorKind::RateLimited,
            Self::TransientNetwork(_) | Self::Timeout(_) => ErrorKind::TransientNetwork,
            Self::QuotaExhausted(_) => ErrorKind::QuotaExhausted,
            Self::UnsupportedVoice(_) => ErrorKind::UnsupportedVoice,
            Self::TranscodeUnavailable(_) => ErrorKind::TranscodeUnavailable,
            Self::SynthesisFailed(_)
            | Self::AudioProcessing(_)
            | Self::NotAvailable(_)
            | Self::Io(_) => ErrorKind::ProviderError,
            Self::Configuration(_) => ErrorKind::Configuration,
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Server-provided wait hint for rate-limit errors
    #[must_use]
    pub const fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

impl From<reqwest::Error> for SpeechError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::TransientNetwork(format!("Request timed out: {err}"))
        } else if err.is_connect() || err.is_request() || err.is_body() {
            Self::TransientNetwork(err.to_string())
        } else if err.is_builder() {
            Self::Configuration(format!("Invalid request: {err}"))
        } else {
            Self::SynthesisFailed(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_input_error_message() {
        let err = SpeechError::InvalidInput("empty text".to_string());
        assert_eq!(err.to_string(), "Invalid input: empty text");
    }

    #[test]
    fn rate_limited_error_message() {
        let err = SpeechError::rate_limited("too many requests", None);
        assert_eq!(err.to_string(), "Rate limited: too many requests");
    }

    #[test]
    fn timeout_error_message() {
        let err = SpeechError::Timeout(30000);
        assert_eq!(err.to_string(), "Speech synthesis timeout after 30000ms");
    }

    #[test]
    fn only_rate_limit_and_network_are_retryable() {
        let retryable: Vec<ErrorKind> = [
            ErrorKind::InvalidInput,
            ErrorKind::AuthFailure,
            ErrorKind::RateLimited,
            ErrorKind::TransientNetwork,
            ErrorKind::QuotaExhausted,
            ErrorKind::UnsupportedVoice,
            ErrorKind::TranscodeUnavailable,
            ErrorKind::ProviderError,
            ErrorKind::Configuration,
            ErrorKind::Cancelled,
        ]
        .into_iter()
        .filter(|k| k.is_retryable())
        .collect();

        assert_eq!(
            retryable,
            vec![ErrorKind::RateLimited, ErrorKind::TransientNetwork]
        );
    }

    #[test]
    fn invalid_input_and_cancel_do_not_advance_chain() {
        assert!(!ErrorKind::InvalidInput.advances_chain());
        assert!(!ErrorKind::Cancelled.advances_chain());
        assert!(ErrorKind::AuthFailure.advances_chain());
        assert!(ErrorKind::QuotaExhausted.advances_chain());
        assert!(ErrorKind::TransientNetwork.advances_chain());
    }

    #[test]
    fn timeout_is_transient() {
        assert_eq!(
            SpeechError::Timeout(500).kind(),
            ErrorKind::TransientNetwork
        );
    }

    #[test]
    fn from_kind_round_trips_kind() {
        for kind in [
            ErrorKind::AuthFailure,
            ErrorKind::QuotaExhausted,
            ErrorKind::UnsupportedVoice,
            ErrorKind::ProviderError,
        ] {
            assert_eq!(SpeechError::from_kind(kind, "x").kind(), kind);
        }
    }

    #[test]
    fn retry_after_only_on_rate_limit() {
        let err = SpeechError::rate_limited("slow down", Some(Duration::from_secs(3)));
        assert_eq!(err.retry_after(), Some(Duration::from_secs(3)));
        assert_eq!(SpeechError::Cancelled.retry_after(), None);
    }

    #[test]
    fn kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::TranscodeUnavailable).unwrap();
        assert_eq!(json, "\"transcode_unavailable\"");
        assert_eq!(ErrorKind::AuthFailure.to_string(), "auth_failure");
    }
}
