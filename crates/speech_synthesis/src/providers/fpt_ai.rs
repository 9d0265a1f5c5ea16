//! FPT.AI Vietnamese speech engine
//!
//! The v5 endpoint takes the text as the raw request body and the voice and
//! speed as headers. It usually answers with a JSON envelope pointing at an
//! audio file that becomes downloadable a little later, so the engine polls
//! that URL until the file is ready.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::{debug, instrument};

use super::{audio_response, check_voice, chunk_limit, chunk_pause, classified, http_client};
use crate::chunking::ChunkLimit;
use crate::classifier::{ErrorClassifier, retry_after};
use crate::config::EngineDescriptor;
use crate::error::SpeechError;
use crate::ports::SynthesisEngine;
use crate::types::{AudioData, AudioFormat};

const DEFAULT_BASE_URL: &str = "https://api.fpt.ai/hmi/tts/v5";

const MAX_CHUNK_CHARS: usize = 2000;
const POLL_ATTEMPTS: u32 = 15;
const POLL_INTERVAL: Duration = Duration::from_secs(2);

const VOICES: &[&str] = &[
    "banmai",
    "lannhi",
    "leminh",
    "myan",
    "thuminh",
    "giahuy",
    "linhsan",
    "minhquang",
    "ngoclam",
];

/// FPT.AI text-to-speech engine
#[derive(Debug, Clone)]
pub struct FptAiEngine {
    name: String,
    client: Client,
    api_key: SecretString,
    url: String,
    voice: String,
    speed: i8,
    limit: ChunkLimit,
    pause: Duration,
    poll_interval: Duration,
    classifier: Arc<dyn ErrorClassifier>,
}

/// JSON envelope returned instead of audio
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    error: i64,
    #[serde(rename = "async", default)]
    async_url: Option<String>,
    #[serde(default)]
    message: String,
}

impl FptAiEngine {
    /// Create an engine from its descriptor
    ///
    /// # Errors
    ///
    /// Returns `SpeechError::Configuration` if the API key cannot be resolved,
    /// or `SpeechError::UnsupportedVoice` for a voice FPT.AI does not offer.
    pub fn new(
        name: impl Into<String>,
        descriptor: &EngineDescriptor,
        classifier: Arc<dyn ErrorClassifier>,
    ) -> Result<Self, SpeechError> {
        let name = name.into();
        let api_key = descriptor.credential()?.ok_or_else(|| {
            SpeechError::Configuration(format!("{name}: FPT.AI requires an API key"))
        })?;
        check_voice(&name, descriptor.voice(), VOICES)?;

        Ok(Self {
            client: http_client(descriptor)?,
            api_key,
            url: descriptor
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            voice: descriptor.voice().to_string(),
            speed: speed_from_rate(descriptor.rate),
            limit: chunk_limit(ChunkLimit::chars(MAX_CHUNK_CHARS), descriptor),
            pause: chunk_pause(descriptor),
            poll_interval: POLL_INTERVAL,
            classifier,
            name,
        })
    }

    /// Set the delay between polls of the async audio URL
    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Download the audio once the async URL serves it
    async fn fetch_async(&self, url: &str) -> Result<AudioData, SpeechError> {
        for poll in 1..=POLL_ATTEMPTS {
            let response = self.client.get(url).send().await?;
            if response.status() != StatusCode::NOT_FOUND {
                return audio_response(response, &self.classifier, AudioFormat::Mp3).await;
            }
            debug!(poll, "FPT.AI audio not ready yet");
            tokio::time::sleep(self.poll_interval).await;
        }

        Err(SpeechError::TransientNetwork(format!(
            "FPT.AI audio not ready after {POLL_ATTEMPTS} polls"
        )))
    }
}

/// Map a speaking rate onto FPT.AI's -3..=3 speed scale
fn speed_from_rate(rate: f32) -> i8 {
    #[allow(clippy::cast_possible_truncation)]
    let speed = ((rate - 1.0) * 3.0).round().clamp(-3.0, 3.0) as i8;
    speed
}

#[async_trait]
impl SynthesisEngine for FptAiEngine {
    fn name(&self) -> &str {
        &self.name
    }

    fn default_voice(&self) -> &str {
        &self.voice
    }

    fn chunk_limit(&self) -> Option<ChunkLimit> {
        Some(self.limit)
    }

    fn chunk_pause(&self) -> Duration {
        self.pause
    }

    #[instrument(skip(self, text), fields(engine = %self.name, text_len = text.len()))]
    async fn synthesize_chunk(
        &self,
        text: &str,
        voice: &str,
        _requested: AudioFormat,
    ) -> Result<AudioData, SpeechError> {
        check_voice(&self.name, voice, VOICES)?;

        let response = self
            .client
            .post(&self.url)
            .header("api-key", self.api_key.expose_secret())
            .header("voice", voice)
            .header("speed", self.speed.to_string())
            .header("prosody", "1")
            .body(text.to_string())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let wait = retry_after(response.headers());
            let body = response.text().await.unwrap_or_default();
            return Err(self.classifier.http_error(status, &body, wait));
        }

        let is_json = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.contains("json"));
        if !is_json {
            return audio_response(response, &self.classifier, AudioFormat::Mp3).await;
        }

        let envelope: Envelope = response.json().await.map_err(|e| {
            SpeechError::SynthesisFailed(format!("Failed to parse response: {e}"))
        })?;

        match envelope.async_url {
            Some(url) if envelope.error == 0 && !url.is_empty() => self.fetch_async(&url).await,
            _ => Err(classified(
                self.classifier.as_ref(),
                format!("FPT.AI error {}: {}", envelope.error, envelope.message),
            )),
        }
    }

    async fn is_available(&self) -> bool {
        // FPT.AI has no health endpoint
        !self.api_key.expose_secret().is_empty()
    }
}
