//! Microsoft Edge read-aloud speech engine
//!
//! Keyless, and the service behind the default Vietnamese voices. Every chunk
//! is one WebSocket session: a `speech.config` frame, an `ssml` frame, then
//! binary `Path:audio` frames until `Path:turn.end`. The connection URL
//! carries a `Sec-MS-GEC` token derived from the current time.

use std::borrow::Cow;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use reqwest::StatusCode;
use sha2::{Digest, Sha256};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderValue, header};
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::{debug, instrument, trace};
use uuid::Uuid;

use super::{chunk_limit, classified, escape_xml, rate_percent};
use crate::chunking::ChunkLimit;
use crate::classifier::ErrorClassifier;
use crate::config::EngineDescriptor;
use crate::error::SpeechError;
use crate::ports::SynthesisEngine;
use crate::types::{AudioData, AudioFormat};

const DEFAULT_BASE_URL: &str =
    "wss://speech.platform.bing.com/consumer/speech/synthesize/readaloud/edge/v1";
const TRUSTED_CLIENT_TOKEN: &str = "6A5AA1D4EAFF4E9FB37E23D68491D6F4";
const CHROMIUM_VERSION: &str = "130.0.2849.68";
const EXTENSION_ORIGIN: &str = "chrome-extension://jdiccldimpdaibmpdkjnbmckianbfold";
const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                          (KHTML, like Gecko) Chrome/130.0.0.0 Safari/537.36 Edg/130.0.0.0";
const OUTPUT_FORMAT: &str = "audio-24khz-48kbitrate-mono-mp3";

const MAX_CHUNK_CHARS: usize = 1500;
const DEFAULT_CHUNK_PAUSE: Duration = Duration::from_secs(1);

/// Seconds from 1601-01-01 (Windows file time epoch) to the Unix epoch
const WINDOWS_EPOCH_OFFSET: i64 = 11_644_473_600;
/// Token validity window in seconds
const TOKEN_WINDOW: i64 = 300;

/// Microsoft Edge text-to-speech engine
#[derive(Debug, Clone)]
pub struct EdgeTtsEngine {
    name: String,
    base_url: String,
    voice: String,
    rate: String,
    limit: ChunkLimit,
    pause: Duration,
    timeout: Duration,
    classifier: Arc<dyn ErrorClassifier>,
}

impl EdgeTtsEngine {
    /// Create an engine from its descriptor
    ///
    /// # Errors
    ///
    /// Never fails today; the signature matches the other engines.
    pub fn new(
        name: impl Into<String>,
        descriptor: &EngineDescriptor,
        classifier: Arc<dyn ErrorClassifier>,
    ) -> Result<Self, SpeechError> {
        Ok(Self {
            name: name.into(),
            base_url: descriptor
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            voice: descriptor.voice().to_string(),
            rate: rate_percent(descriptor.rate),
            limit: chunk_limit(ChunkLimit::chars(MAX_CHUNK_CHARS), descriptor),
            pause: descriptor
                .chunk_pause_ms
                .map_or(DEFAULT_CHUNK_PAUSE, Duration::from_millis),
            timeout: Duration::from_millis(descriptor.timeout_ms),
            classifier,
        })
    }

    fn connection_url(&self) -> String {
        format!(
            "{}?TrustedClientToken={TRUSTED_CLIENT_TOKEN}&ConnectionId={}\
             &Sec-MS-GEC={}&Sec-MS-GEC-Version=1-{CHROMIUM_VERSION}",
            self.base_url,
            Uuid::new_v4().simple(),
            sec_ms_gec(Utc::now().timestamp()),
        )
    }

    fn ssml(&self, text: &str, voice: &str) -> String {
        format!(
            "<speak version='1.0' xmlns='http://www.w3.org/2001/10/synthesis' xml:lang='en-US'>\
             <voice name='{voice}'><prosody pitch='+0Hz' rate='{rate}' volume='+0%'>{text}\
             </prosody></voice></speak>",
            voice = escape_xml(voice),
            rate = self.rate,
            text = escape_xml(text),
        )
    }

    /// One WebSocket session: send the request, collect audio until turn end
    async fn session(&self, text: &str, voice: &str) -> Result<Vec<u8>, SpeechError> {
        let mut request = self
            .connection_url()
            .into_client_request()
            .map_err(|e| SpeechError::Configuration(format!("{}: bad Edge TTS URL: {e}", self.name)))?;
        let headers = request.headers_mut();
        headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        headers.insert(header::ORIGIN, HeaderValue::from_static(EXTENSION_ORIGIN));
        headers.insert(header::USER_AGENT, HeaderValue::from_static(BROWSER_USER_AGENT));

        let (socket, _) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| self.socket_error(e))?;
        let (mut sink, mut stream) = socket.split();

        let timestamp = frame_timestamp();
        sink.send(Message::Text(config_frame(&timestamp).into()))
            .await
            .map_err(|e| self.socket_error(e))?;
        sink.send(Message::Text(
            ssml_frame(&timestamp, &self.ssml(text, voice)).into(),
        ))
        .await
        .map_err(|e| self.socket_error(e))?;

        let mut audio = Vec::new();
        while let Some(message) = stream.next().await {
            match message.map_err(|e| self.socket_error(e))? {
                Message::Binary(frame) => {
                    if let Some(payload) = audio_payload(&frame)? {
                        audio.extend_from_slice(payload);
                    }
                },
                Message::Text(frame) => {
                    let path = frame_path(frame.as_str());
                    trace!(path = ?path, "Edge TTS frame");
                    if path == Some("turn.end") {
                        break;
                    }
                },
                Message::Close(_) => break,
                _ => {},
            }
        }

        Ok(audio)
    }

    fn socket_error(&self, err: tungstenite::Error) -> SpeechError {
        match err {
            tungstenite::Error::Http(response) => {
                let status = StatusCode::from_u16(response.status().as_u16())
                    .unwrap_or(StatusCode::BAD_GATEWAY);
                let body = response
                    .body()
                    .as_deref()
                    .map_or(Cow::Borrowed(""), String::from_utf8_lossy);
                self.classifier.http_error(status, &body, None)
            },
            other => SpeechError::TransientNetwork(format!("{}: Edge TTS connection failed: {other}", self.name)),
        }
    }
}

/// `Sec-MS-GEC` token for a Unix time
///
/// SHA-256 over the Windows file time (100 ns ticks) rounded down to five
/// minutes, followed by the trusted client token, in upper-case hex.
fn sec_ms_gec(unix_secs: i64) -> String {
    let secs = unix_secs + WINDOWS_EPOCH_OFFSET;
    let ticks = i128::from(secs - secs.rem_euclid(TOKEN_WINDOW)) * 10_000_000;
    let digest = Sha256::digest(format!("{ticks}{TRUSTED_CLIENT_TOKEN}").as_bytes());
    hex::encode_upper(digest)
}

fn frame_timestamp() -> String {
    Utc::now()
        .format("%a %b %d %Y %H:%M:%S GMT+0000 (Coordinated Universal Time)")
        .to_string()
}

fn config_frame(timestamp: &str) -> String {
    let body = serde_json::json!({
        "context": {
            "synthesis": {
                "audio": {
                    "metadataoptions": {
                        "sentenceBoundaryEnabled": "false",
                        "wordBoundaryEnabled": "false"
                    },
                    "outputFormat": OUTPUT_FORMAT
                }
            }
        }
    });
    format!(
        "X-Timestamp:{timestamp}\r\nContent-Type:application/json; charset=utf-8\r\n\
         Path:speech.config\r\n\r\n{body}\r\n"
    )
}

fn ssml_frame(timestamp: &str, ssml: &str) -> String {
    format!(
        "X-RequestId:{}\r\nContent-Type:application/ssml+xml\r\nX-Timestamp:{timestamp}Z\r\n\
         Path:ssml\r\n\r\n{ssml}",
        Uuid::new_v4().simple()
    )
}

/// Value of the `Path` header in a frame's header block
fn frame_path(headers: &str) -> Option<&str> {
    headers
        .split("\r\n\r\n")
        .next()?
        .split("\r\n")
        .find_map(|line| line.strip_prefix("Path:"))
        .map(str::trim)
}

/// Audio bytes of a binary frame, `None` for non-audio frames
///
/// Layout: big-endian `u16` header length, headers, payload.
fn audio_payload(frame: &[u8]) -> Result<Option<&[u8]>, SpeechError> {
    let truncated = || SpeechError::SynthesisFailed("Truncated Edge TTS audio frame".to_string());

    let Some((len, rest)) = frame.split_first_chunk::<2>() else {
        return Err(truncated());
    };
    let header_len = usize::from(u16::from_be_bytes(*len));
    let Some((headers, payload)) = rest.split_at_checked(header_len) else {
        return Err(truncated());
    };

    let headers = String::from_utf8_lossy(headers);
    if frame_path(&headers) == Some("audio") {
        Ok(Some(payload))
    } else {
        Ok(None)
    }
}

#[async_trait]
impl SynthesisEngine for EdgeTtsEngine {
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
        let audio = tokio::time::timeout(self.timeout, self.session(text, voice))
            .await
            .map_err(|_| {
                SpeechError::TransientNetwork(format!(
                    "{}: Edge TTS timed out after {:?}",
                    self.name, self.timeout
                ))
            })??;

        if audio.is_empty() {
            return Err(classified(
                self.classifier.as_ref(),
                "No audio received from Edge TTS".to_string(),
            ));
        }

        debug!(audio_size = audio.len(), "Edge TTS synthesis complete");
        Ok(AudioData::new(audio, AudioFormat::Mp3))
    }

    async fn is_available(&self) -> bool {
        // Keyless and no health endpoint
        true
    }
}
