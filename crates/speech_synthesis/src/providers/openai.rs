//! OpenAI speech engine
//!
//! Calls the `/audio/speech` endpoint. The engine asks for the requested
//! format directly where the API offers it:
//!
//! - mp3, opus, aac, flac, wav

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use super::{audio_response, check_voice, chunk_limit, chunk_pause, http_client};
use crate::chunking::ChunkLimit;
use crate::classifier::{ErrorClassifier, retry_after};
use crate::config::EngineDescriptor;
use crate::error::SpeechError;
use crate::ports::SynthesisEngine;
use crate::types::{AudioData, AudioFormat};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "tts-1";

/// Input limit of the speech endpoint
const MAX_INPUT_CHARS: usize = 4096;

const VOICES: &[&str] = &[
    "alloy", "ash", "ballad", "coral", "echo", "fable", "nova", "onyx", "sage", "shimmer", "verse",
];

/// OpenAI text-to-speech engine
#[derive(Debug, Clone)]
pub struct OpenAiEngine {
    name: String,
    client: Client,
    api_key: SecretString,
    base_url: String,
    model: String,
    voice: String,
    speed: f32,
    limit: ChunkLimit,
    pause: Duration,
    classifier: Arc<dyn ErrorClassifier>,
}

/// TTS request body
#[derive(Debug, Serialize)]
struct TtsRequest<'a> {
    model: &'a str,
    input: &'a str,
    voice: &'a str,
    response_format: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    speed: Option<f32>,
}

/// OpenAI API error response
#[derive(Debug, Deserialize)]
struct ApiError {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
    code: Option<String>,
}

impl OpenAiEngine {
    /// Create an engine from its descriptor
    ///
    /// # Errors
    ///
    /// Returns `SpeechError::Configuration` if the credential cannot be
    /// resolved, or `SpeechError::UnsupportedVoice` for a voice the API does
    /// not offer.
    pub fn new(
        name: impl Into<String>,
        descriptor: &EngineDescriptor,
        classifier: Arc<dyn ErrorClassifier>,
    ) -> Result<Self, SpeechError> {
        let name = name.into();
        let api_key = descriptor.credential()?.ok_or_else(|| {
            SpeechError::Configuration(format!("{name}: OpenAI requires an API key"))
        })?;
        check_voice(&name, descriptor.voice(), VOICES)?;

        Ok(Self {
            client: http_client(descriptor)?,
            api_key,
            base_url: descriptor
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            model: descriptor
                .model
                .clone()
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            voice: descriptor.voice().to_string(),
            speed: descriptor.rate,
            limit: chunk_limit(ChunkLimit::chars(MAX_INPUT_CHARS), descriptor),
            pause: chunk_pause(descriptor),
            classifier,
            name,
        })
    }

    fn tts_url(&self) -> String {
        format!("{}/audio/speech", self.base_url.trim_end_matches('/'))
    }

    /// Response format to ask for, and the format of the returned audio
    const fn response_format(format: AudioFormat) -> (&'static str, AudioFormat) {
        match format {
            // Opus, OGG, and WebM all use opus codec
            AudioFormat::Opus | AudioFormat::Ogg | AudioFormat::Webm => ("opus", AudioFormat::Opus),
            AudioFormat::M4a => ("aac", AudioFormat::M4a),
            AudioFormat::Flac => ("flac", AudioFormat::Flac),
            AudioFormat::Wav => ("wav", AudioFormat::Wav),
            AudioFormat::Mp3 => ("mp3", AudioFormat::Mp3),
        }
    }

    fn api_error(&self, status: reqwest::StatusCode, body: &str, wait: Option<Duration>) -> SpeechError {
        if let Ok(api_error) = serde_json::from_str::<ApiError>(body) {
            let message = api_error.error.message;
            match api_error.error.code.as_deref() {
                Some("rate_limit_exceeded") => return SpeechError::rate_limited(message, wait),
                Some("insufficient_quota") => return SpeechError::QuotaExhausted(message),
                Some("invalid_api_key") => return SpeechError::AuthFailure(message),
                Some("invalid_voice") => return SpeechError::UnsupportedVoice(message),
                _ => {},
            }
        }
        self.classifier.http_error(status, body, wait)
    }
}

#[async_trait]
impl SynthesisEngine for OpenAiEngine {
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
        requested: AudioFormat,
    ) -> Result<AudioData, SpeechError> {
        check_voice(&self.name, voice, VOICES)?;

        let (response_format, output_format) = Self::response_format(requested);
        let request = TtsRequest {
            model: &self.model,
            input: text,
            voice,
            response_format,
            speed: if (self.speed - 1.0).abs() < f32::EPSILON {
                None
            } else {
                Some(self.speed)
            },
        };

        let response = self
            .client
            .post(self.tts_url())
            .bearer_auth(self.api_key.expose_secret())
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let wait = retry_after(response.headers());
            let body = response.text().await.unwrap_or_default();
            return Err(self.api_error(status, &body, wait));
        }

        let audio = audio_response(response, &self.classifier, output_format).await?;
        debug!(audio_size = audio.size_bytes(), "Speech synthesis complete");
        Ok(audio)
    }

    async fn is_available(&self) -> bool {
        let models_url = format!("{}/models", self.base_url.trim_end_matches('/'));

        match self
            .client
            .get(&models_url)
            .bearer_auth(self.api_key.expose_secret())
            .timeout(Duration::from_secs(5))
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                warn!("OpenAI availability check failed: {}", e);
                false
            },
        }
    }
}
