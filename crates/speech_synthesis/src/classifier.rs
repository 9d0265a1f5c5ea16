//! Error classification
//!
//! Providers report failures as HTTP statuses, JSON bodies or free text.
//! An [`ErrorClassifier`] turns those into an [`ErrorKind`] so that retry and
//! fallback decisions do not depend on provider wording.

use std::fmt::Debug;
use std::time::Duration;

use reqwest::StatusCode;

use crate::error::{ErrorKind, SpeechError};

/// Maps provider failures onto error kinds
pub trait ErrorClassifier: Send + Sync + Debug {
    /// Classify an unsuccessful HTTP response
    fn classify_http(&self, status: StatusCode, body: &str) -> ErrorKind;

    /// Classify an error that already happened
    ///
    /// The default trusts the variant. Implementations may inspect the message
    /// of generic provider errors to recognise throttling.
    fn classify(&self, error: &SpeechError) -> ErrorKind {
        error.kind()
    }

    /// Build a `SpeechError` for an unsuccessful HTTP response
    fn http_error(
        &self,
        status: StatusCode,
        body: &str,
        retry_after: Option<Duration>,
    ) -> SpeechError {
        let detail = format!("HTTP {status}: {}", truncate(body, 300));
        match self.classify_http(status, body) {
            ErrorKind::RateLimited => SpeechError::rate_limited(detail, retry_after),
            kind => SpeechError::from_kind(kind, detail),
        }
    }
}

/// Status- and wording-based classifier
///
/// Status codes decide where they are unambiguous; quota, throttling and voice
/// wording in the body refine the rest. Providers that answer "no audio
/// received" or "blocked" are usually throttling, so those count as rate
/// limiting.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicClassifier;

impl HeuristicClassifier {
    /// Create the classifier
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Kind suggested by message wording alone
    #[must_use]
    pub fn classify_message(message: &str) -> Option<ErrorKind> {
        let message = message.to_lowercase();
        let has = |needles: &[&str]| needles.iter().any(|n| message.contains(n));

        if has(&["quota", "billing", "insufficient_funds", "payment required"]) {
            Some(ErrorKind::QuotaExhausted)
        } else if has(&[
            "rate limit",
            "rate_limit",
            "too many requests",
            "no audio received",
            "no audio was received",
            "blocked",
            "throttl",
        ]) {
            Some(ErrorKind::RateLimited)
        } else if message.contains("voice")
            && has(&["not found", "invalid", "unsupported", "not supported", "unknown", "not available"])
        {
            Some(ErrorKind::UnsupportedVoice)
        } else {
            None
        }
    }
}

impl ErrorClassifier for HeuristicClassifier {
    fn classify_http(&self, status: StatusCode, body: &str) -> ErrorKind {
        match status.as_u16() {
            401 | 403 => ErrorKind::AuthFailure,
            402 => ErrorKind::QuotaExhausted,
            // Some providers report quota exhaustion as 429
            429 => match Self::classify_message(body) {
                Some(ErrorKind::QuotaExhausted) => ErrorKind::QuotaExhausted,
                _ => ErrorKind::RateLimited,
            },
            408 | 500..=599 => ErrorKind::TransientNetwork,
            400..=499 => Self::classify_message(body).unwrap_or(ErrorKind::ProviderError),
            _ => ErrorKind::ProviderError,
        }
    }

    fn classify(&self, error: &SpeechError) -> ErrorKind {
        match error {
            SpeechError::SynthesisFailed(message) | SpeechError::NotAvailable(message) => {
                Self::classify_message(message).unwrap_or_else(|| error.kind())
            },
            _ => error.kind(),
        }
    }
}

/// Parse a `Retry-After` header given in seconds
#[must_use]
pub fn retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

fn truncate(text: &str, max_chars: usize) -> &str {
    text.char_indices()
        .nth(max_chars)
        .map_or(text, |(idx, _)| &text[..idx])
}
