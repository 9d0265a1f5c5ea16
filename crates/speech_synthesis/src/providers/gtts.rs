//! Google Translate speech engine
//!
//! Free and keyless. The endpoint only accepts short texts, so chunks are
//! small, and it throttles aggressively under load.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, instrument};

use super::{audio_response, chunk_limit, chunk_pause, http_client};
use crate::chunking::ChunkLimit;
use crate::classifier::ErrorClassifier;
use crate::config::EngineDescriptor;
use crate::error::SpeechError;
use crate::ports::SynthesisEngine;
use crate::types::{AudioData, AudioFormat};

const DEFAULT_BASE_URL: &str = "https://translate.google.com";
const MAX_CHUNK_CHARS: usize = 200;

/// Google Translate text-to-speech engine
///
/// The "voice" is a language code such as `vi` or `en`.
#[derive(Debug, Clone)]
pub struct GttsEngine {
    name: String,
    client: Client,
    base_url: String,
    language: String,
    slow: bool,
    limit: ChunkLimit,
    pause: Duration,
    classifier: Arc<dyn ErrorClassifier>,
}

impl GttsEngine {
    /// Create an engine from its descriptor
    ///
    /// # Errors
    ///
    /// Returns `SpeechError::Configuration` if the HTTP client cannot be built.
    pub fn new(
        name: impl Into<String>,
        descriptor: &EngineDescriptor,
        classifier: Arc<dyn ErrorClassifier>,
    ) -> Result<Self, SpeechError> {
        Ok(Self {
            name: name.into(),
            client: http_client(descriptor)?,
            base_url: descriptor
                .base_url
                .as_deref()
                .unwrap_or(DEFAULT_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            language: descriptor
                .language
                .clone()
                .unwrap_or_else(|| descriptor.voice().to_string()),
            slow: descriptor.rate < 1.0,
            limit: chunk_limit(ChunkLimit::chars(MAX_CHUNK_CHARS), descriptor),
            pause: chunk_pause(descriptor),
            classifier,
        })
    }

    const fn speed(&self) -> &'static str {
        if self.slow { "0.24" } else { "1" }
    }
}

#[async_trait]
impl SynthesisEngine for GttsEngine {
    fn name(&self) -> &str {
        &self.name
    }

    fn default_voice(&self) -> &str {
        &self.language
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
        let text_len = text.chars().count().to_string();

        let response = self
            .client
            .get(format!("{}/translate_tts", self.base_url))
            .query(&[
                ("ie", "UTF-8"),
                ("q", text),
                ("tl", voice),
                ("client", "tw-ob"),
                ("ttsspeed", self.speed()),
                ("textlen", text_len.as_str()),
            ])
            .send()
            .await?;

        let audio = audio_response(response, &self.classifier, AudioFormat::Mp3).await?;
        debug!(audio_size = audio.size_bytes(), "gTTS synthesis complete");
        Ok(audio)
    }

    async fn is_available(&self) -> bool {
        true
    }
}
