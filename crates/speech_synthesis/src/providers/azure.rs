//! Azure Cognitive Services speech engine
//!
//! Sends SSML to the regional REST endpoint and receives audio in the
//! requested output format where Azure offers one.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, instrument, warn};

use super::{
    audio_response, chunk_limit, chunk_pause, escape_xml, http_client, rate_percent, voice_locale,
};
use crate::chunking::ChunkLimit;
use crate::classifier::ErrorClassifier;
use crate::config::EngineDescriptor;
use crate::error::SpeechError;
use crate::ports::SynthesisEngine;
use crate::types::{AudioData, AudioFormat};

const SYNTHESIS_PATH: &str = "/cognitiveservices/v1";
const VOICES_PATH: &str = "/cognitiveservices/voices/list";
const SUBSCRIPTION_KEY_HEADER: &str = "Ocp-Apim-Subscription-Key";
const OUTPUT_FORMAT_HEADER: &str = "X-Microsoft-OutputFormat";
const DEFAULT_LANGUAGE: &str = "vi-VN";

/// Keeps the SSML document well below the service's request limit
const MAX_CHUNK_CHARS: usize = 3000;

/// Azure text-to-speech engine
#[derive(Debug, Clone)]
pub struct AzureEngine {
    name: String,
    client: Client,
    subscription_key: SecretString,
    base_url: String,
    voice: String,
    language: Option<String>,
    rate: f32,
    limit: ChunkLimit,
    pause: Duration,
    classifier: Arc<dyn ErrorClassifier>,
}

impl AzureEngine {
    /// Create an engine from its descriptor
    ///
    /// # Errors
    ///
    /// Returns `SpeechError::Configuration` if the subscription key cannot be
    /// resolved or no region is configured.
    pub fn new(
        name: impl Into<String>,
        descriptor: &EngineDescriptor,
        classifier: Arc<dyn ErrorClassifier>,
    ) -> Result<Self, SpeechError> {
        let name = name.into();
        let subscription_key = descriptor.credential()?.ok_or_else(|| {
            SpeechError::Configuration(format!("{name}: Azure requires a subscription key"))
        })?;

        let base_url = match (&descriptor.base_url, &descriptor.region) {
            (Some(url), _) => url.trim_end_matches('/').to_string(),
            (None, Some(region)) if !region.is_empty() => {
                format!("https://{region}.tts.speech.microsoft.com")
            },
            (None, _) => {
                return Err(SpeechError::Configuration(format!(
                    "{name}: Azure requires a region"
                )));
            },
        };

        Ok(Self {
            client: http_client(descriptor)?,
            subscription_key,
            base_url,
            voice: descriptor.voice().to_string(),
            language: descriptor.language.clone(),
            rate: descriptor.rate,
            limit: chunk_limit(ChunkLimit::chars(MAX_CHUNK_CHARS), descriptor),
            pause: chunk_pause(descriptor),
            classifier,
            name,
        })
    }

    /// Output format header value and the format it produces
    const fn output_format(requested: AudioFormat) -> (&'static str, AudioFormat) {
        match requested {
            AudioFormat::Wav => ("riff-24khz-16bit-mono-pcm", AudioFormat::Wav),
            AudioFormat::Ogg | AudioFormat::Opus => ("ogg-24khz-16bit-mono-opus", AudioFormat::Ogg),
            AudioFormat::Webm => ("webm-24khz-16bit-mono-opus", AudioFormat::Webm),
            _ => ("audio-24khz-48kbitrate-mono-mp3", AudioFormat::Mp3),
        }
    }

    /// Locale of a voice such as `vi-VN-HoaiMyNeural`
    fn language_for(&self, voice: &str) -> String {
        self.language
            .clone()
            .or_else(|| voice_locale(voice))
            .unwrap_or_else(|| DEFAULT_LANGUAGE.to_string())
    }

    fn ssml(&self, text: &str, voice: &str) -> String {
        format!(
            "<speak version='1.0' xmlns='http://www.w3.org/2001/10/synthesis' xml:lang='{lang}'>\
             <voice name='{voice}'><prosody rate='{rate}'>{text}</prosody></voice></speak>",
            lang = escape_xml(&self.language_for(voice)),
            voice = escape_xml(voice),
            rate = rate_percent(self.rate),
            text = escape_xml(text),
        )
    }
}

#[async_trait]
impl SynthesisEngine for AzureEngine {
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
        let (output_format, format) = Self::output_format(requested);

        let response = self
            .client
            .post(format!("{}{SYNTHESIS_PATH}", self.base_url))
            .header(SUBSCRIPTION_KEY_HEADER, self.subscription_key.expose_secret())
            .header(reqwest::header::CONTENT_TYPE, "application/ssml+xml")
            .header(OUTPUT_FORMAT_HEADER, output_format)
            .body(self.ssml(text, voice))
            .send()
            .await?;

        let audio = audio_response(response, &self.classifier, format).await?;
        debug!(audio_size = audio.size_bytes(), "Azure synthesis complete");
        Ok(audio)
    }

    async fn is_available(&self) -> bool {
        match self
            .client
            .get(format!("{}{VOICES_PATH}", self.base_url))
            .header(SUBSCRIPTION_KEY_HEADER, self.subscription_key.expose_secret())
            .timeout(Duration::from_secs(5))
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                warn!("Azure availability check failed: {}", e);
                false
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::HeuristicClassifier;
    use crate::config::EngineKind;
    use crate::error::ErrorKind;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn create_test_engine(mock_server: &MockServer) -> AzureEngine {
        let descriptor = EngineDescriptor::new(EngineKind::Azure)
            .with_credential("azure-key")
            .with_base_url(mock_server.uri());
        AzureEngine::new("azure", &descriptor, Arc::new(HeuristicClassifier)).unwrap()
    }

    #[test]
    fn region_builds_endpoint() {
        let mut descriptor = EngineDescriptor::new(EngineKind::Azure).with_credential("k");
        descriptor.region = Some("southeastasia".to_string());
        let engine = AzureEngine::new("azure", &descriptor, Arc::new(HeuristicClassifier)).unwrap();
        assert_eq!(
            engine.base_url,
            "https://southeastasia.tts.speech.microsoft.com"
        );
    }

    #[test]
    fn missing_region_is_configuration_error() {
        let descriptor = EngineDescriptor::new(EngineKind::Azure).with_credential("k");
        let err = AzureEngine::new("azure", &descriptor, Arc::new(HeuristicClassifier)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn ssml_escapes_text_and_derives_language() {
        let mut descriptor = EngineDescriptor::new(EngineKind::Azure)
            .with_credential("k")
            .with_base_url("http://localhost");
        descriptor.rate = 1.25;
        let engine = AzureEngine::new("azure", &descriptor, Arc::new(HeuristicClassifier)).unwrap();

        let ssml = engine.ssml("A & B <c>", "en-US-JennyNeural");
        assert!(ssml.contains("xml:lang='en-US'"));
        assert!(ssml.contains("<voice name='en-US-JennyNeural'>"));
        assert!(ssml.contains("<prosody rate='+25%'>A &amp; B &lt;c&gt;</prosody>"));
    }

    #[tokio::test]
    async fn synthesize_sends_ssml_with_headers() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/cognitiveservices/v1"))
            .and(header("Ocp-Apim-Subscription-Key", "azure-key"))
            .and(header("Content-Type", "application/ssml+xml"))
            .and(header(
                "X-Microsoft-OutputFormat",
                "audio-24khz-48kbitrate-mono-mp3",
            ))
            .and(body_string_contains("vi-VN-HoaiMyNeural"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0xFFu8; 128]))
            .expect(1)
            .mount(&mock_server)
            .await;

        let engine = create_test_engine(&mock_server);
        let audio = engine
            .synthesize_chunk("Xin chào", "vi-VN-HoaiMyNeural", AudioFormat::Mp3)
            .await
            .unwrap();

        assert_eq!(audio.format(), AudioFormat::Mp3);
        assert_eq!(audio.size_bytes(), 128);
    }

    #[tokio::test]
    async fn wav_request_uses_riff_output() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/cognitiveservices/v1"))
            .and(header("X-Microsoft-OutputFormat", "riff-24khz-16bit-mono-pcm"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![1u8; 16]))
            .expect(1)
            .mount(&mock_server)
            .await;

        let engine = create_test_engine(&mock_server);
        let audio = engine
            .synthesize_chunk("Xin chào", "vi-VN-HoaiMyNeural", AudioFormat::Wav)
            .await
            .unwrap();

        assert_eq!(audio.format(), AudioFormat::Wav);
    }

    #[tokio::test]
    async fn forbidden_is_auth_failure() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/cognitiveservices/v1"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&mock_server)
            .await;

        let engine = create_test_engine(&mock_server);
        let err = engine
            .synthesize_chunk("Xin chào", "vi-VN-HoaiMyNeural", AudioFormat::Mp3)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::AuthFailure);
    }

    #[tokio::test]
    async fn too_many_requests_is_rate_limited() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/cognitiveservices/v1"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "3"))
            .mount(&mock_server)
            .await;

        let engine = create_test_engine(&mock_server);
        let err = engine
            .synthesize_chunk("Xin chào", "vi-VN-HoaiMyNeural", AudioFormat::Mp3)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::RateLimited);
        assert_eq!(err.retry_after(), Some(Duration::from_secs(3)));
    }

    #[tokio::test]
    async fn is_available_checks_voice_list() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/cognitiveservices/voices/list"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
            .mount(&mock_server)
            .await;

        let engine = create_test_engine(&mock_server);
        assert!(engine.is_available().await);
    }
}
