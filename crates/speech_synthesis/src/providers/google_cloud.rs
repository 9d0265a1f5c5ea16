//! Google Cloud Text-to-Speech engine
//!
//! Uses the `text:synthesize` REST method with an API key. The service limits
//! requests to 5000 bytes and rejects very long sentences, so chunks are
//! measured in bytes and long sentences are broken up.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use super::{chunk_limit, chunk_pause, classified, http_client, voice_locale};
use crate::chunking::ChunkLimit;
use crate::classifier::{ErrorClassifier, retry_after};
use crate::config::EngineDescriptor;
use crate::error::SpeechError;
use crate::ports::SynthesisEngine;
use crate::types::{AudioData, AudioFormat};

const DEFAULT_BASE_URL: &str = "https://texttospeech.googleapis.com";
const DEFAULT_LANGUAGE: &str = "vi-VN";

const MAX_REQUEST_BYTES: usize = 4500;
const MAX_SENTENCE_CHARS: usize = 150;

/// Google Cloud text-to-speech engine
#[derive(Debug, Clone)]
pub struct GoogleCloudEngine {
    name: String,
    client: Client,
    api_key: SecretString,
    base_url: String,
    voice: String,
    language: Option<String>,
    speaking_rate: f32,
    limit: ChunkLimit,
    pause: Duration,
    classifier: Arc<dyn ErrorClassifier>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SynthesizeRequest<'a> {
    input: SynthesisInput<'a>,
    voice: VoiceSelection<'a>,
    audio_config: AudioConfig,
}

#[derive(Debug, Serialize)]
struct SynthesisInput<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VoiceSelection<'a> {
    language_code: &'a str,
    name: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AudioConfig {
    audio_encoding: &'static str,
    speaking_rate: f32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SynthesizeResponse {
    #[serde(default)]
    audio_content: String,
}

impl GoogleCloudEngine {
    /// Create an engine from its descriptor
    ///
    /// # Errors
    ///
    /// Returns `SpeechError::Configuration` if the API key cannot be resolved.
    pub fn new(
        name: impl Into<String>,
        descriptor: &EngineDescriptor,
        classifier: Arc<dyn ErrorClassifier>,
    ) -> Result<Self, SpeechError> {
        let name = name.into();
        let api_key = descriptor.credential()?.ok_or_else(|| {
            SpeechError::Configuration(format!("{name}: Google Cloud requires an API key"))
        })?;

        let provider_limit = ChunkLimit::bytes(MAX_REQUEST_BYTES)
            .with_max_sentence_chars(MAX_SENTENCE_CHARS);

        Ok(Self {
            client: http_client(descriptor)?,
            api_key,
            base_url: descriptor
                .base_url
                .as_deref()
                .unwrap_or(DEFAULT_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            voice: descriptor.voice().to_string(),
            language: descriptor.language.clone(),
            speaking_rate: descriptor.rate,
            limit: chunk_limit(provider_limit, descriptor),
            pause: chunk_pause(descriptor),
            classifier,
            name,
        })
    }

    /// Audio encoding to request and the format it decodes to
    const fn encoding(requested: AudioFormat) -> (&'static str, AudioFormat) {
        match requested {
            AudioFormat::Wav => ("LINEAR16", AudioFormat::Wav),
            AudioFormat::Ogg | AudioFormat::Opus => ("OGG_OPUS", AudioFormat::Ogg),
            _ => ("MP3", AudioFormat::Mp3),
        }
    }

    fn language_for(&self, voice: &str) -> String {
        self.language
            .clone()
            .or_else(|| voice_locale(voice))
            .unwrap_or_else(|| DEFAULT_LANGUAGE.to_string())
    }
}

#[async_trait]
impl SynthesisEngine for GoogleCloudEngine {
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
        let (audio_encoding, format) = Self::encoding(requested);
        let language = self.language_for(voice);

        let request = SynthesizeRequest {
            input: SynthesisInput { text },
            voice: VoiceSelection {
                language_code: &language,
                name: voice,
            },
            audio_config: AudioConfig {
                audio_encoding,
                speaking_rate: self.speaking_rate,
            },
        };

        let response = self
            .client
            .post(format!("{}/v1/text:synthesize", self.base_url))
            .query(&[("key", self.api_key.expose_secret())])
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let wait = retry_after(response.headers());
            let body = response.text().await.unwrap_or_default();
            return Err(self.classifier.http_error(status, &body, wait));
        }

        let body: SynthesizeResponse = response.json().await.map_err(|e| {
            SpeechError::SynthesisFailed(format!("Failed to parse response: {e}"))
        })?;

        if body.audio_content.is_empty() {
            return Err(classified(
                self.classifier.as_ref(),
                "No audio received from provider".to_string(),
            ));
        }

        let audio = STANDARD.decode(body.audio_content.as_bytes()).map_err(|e| {
            SpeechError::SynthesisFailed(format!("Failed to decode audio content: {e}"))
        })?;

        debug!(audio_size = audio.len(), "Google Cloud synthesis complete");
        Ok(AudioData::new(audio, format))
    }

    async fn is_available(&self) -> bool {
        match self
            .client
            .get(format!("{}/v1/voices", self.base_url))
            .query(&[
                ("key", self.api_key.expose_secret()),
                ("languageCode", self.language_for(&self.voice).as_str()),
            ])
            .timeout(Duration::from_secs(5))
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                warn!("Google Cloud availability check failed: {}", e);
                false
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunking::LengthUnit;
    use crate::classifier::HeuristicClassifier;
    use crate::config::EngineKind;
    use crate::error::ErrorKind;
    use wiremock::matchers::{body_partial_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn create_test_engine(mock_server: &MockServer) -> GoogleCloudEngine {
        let descriptor = EngineDescriptor::new(EngineKind::GoogleCloud)
            .with_credential("gcp-key")
            .with_base_url(mock_server.uri());
        GoogleCloudEngine::new("google", &descriptor, Arc::new(HeuristicClassifier)).unwrap()
    }

    #[tokio::test]
    async fn chunks_are_measured_in_bytes() {
        let mock_server = MockServer::start().await;
        let engine = create_test_engine(&mock_server);
        let limit = engine.chunk_limit().unwrap();

        assert_eq!(limit.unit(), LengthUnit::Bytes);
        assert_eq!(limit.max(), 4500);
    }

    #[tokio::test]
    async fn synthesize_decodes_audio_content() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/text:synthesize"))
            .and(query_param("key", "gcp-key"))
            .and(body_partial_json(serde_json::json!({
                "input": {"text": "Xin chào"},
                "voice": {"languageCode": "vi-VN", "name": "vi-VN-Standard-A"},
                "audioConfig": {"audioEncoding": "MP3"}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "audioContent": STANDARD.encode(b"ID3-audio")
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let engine = create_test_engine(&mock_server);
        let audio = engine
            .synthesize_chunk("Xin chào", "vi-VN-Standard-A", AudioFormat::Mp3)
            .await
            .unwrap();

        assert_eq!(audio.data(), b"ID3-audio");
        assert_eq!(audio.format(), AudioFormat::Mp3);
    }

    #[tokio::test]
    async fn empty_audio_content_is_rate_limited() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/text:synthesize"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .mount(&mock_server)
            .await;

        let engine = create_test_engine(&mock_server);
        let err = engine
            .synthesize_chunk("Xin chào", "vi-VN-Standard-A", AudioFormat::Mp3)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::RateLimited);
    }

    #[tokio::test]
    async fn invalid_voice_is_unsupported() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/text:synthesize"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": {
                    "code": 400,
                    "message": "Voice 'vi-VN-Nobody' does not exist. Invalid voice name.",
                    "status": "INVALID_ARGUMENT"
                }
            })))
            .mount(&mock_server)
            .await;

        let engine = create_test_engine(&mock_server);
        let err = engine
            .synthesize_chunk("Xin chào", "vi-VN-Nobody", AudioFormat::Mp3)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::UnsupportedVoice);
    }

    #[tokio::test]
    async fn forbidden_wins_over_billing_wording() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/text:synthesize"))
            .respond_with(ResponseTemplate::new(403).set_body_string("Billing disabled"))
            .mount(&mock_server)
            .await;

        let engine = create_test_engine(&mock_server);
        let err = engine
            .synthesize_chunk("Xin chào", "vi-VN-Standard-A", AudioFormat::Mp3)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::AuthFailure);
    }
}
