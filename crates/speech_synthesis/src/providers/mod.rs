//! Synthesis engine implementations
//!
//! Contains concrete implementations of the `SynthesisEngine` trait: two local
//! engines that drive a command-line tool, five HTTP engines and one
//! WebSocket engine.

pub mod azure;
pub mod edge_tts;
pub mod fpt_ai;
pub mod google_cloud;
pub mod gtts;
pub mod macos_say;
pub mod openai;
pub mod piper;

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use reqwest::header::{CONTENT_TYPE, HeaderMap};
use reqwest::{Client, Response};
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, error};

use crate::chunking::ChunkLimit;
use crate::classifier::{ErrorClassifier, retry_after};
use crate::config::EngineDescriptor;
use crate::error::{ErrorKind, SpeechError};
use crate::types::{AudioData, AudioFormat};

pub use azure::AzureEngine;
pub use edge_tts::EdgeTtsEngine;
pub use fpt_ai::FptAiEngine;
pub use google_cloud::GoogleCloudEngine;
pub use gtts::GttsEngine;
pub use macos_say::MacosSayEngine;
pub use openai::OpenAiEngine;
pub use piper::PiperEngine;

const USER_AGENT: &str = concat!("narrator/", env!("CARGO_PKG_VERSION"));

/// HTTP client with the descriptor's timeout
pub(crate) fn http_client(descriptor: &EngineDescriptor) -> Result<Client, SpeechError> {
    Client::builder()
        .timeout(Duration::from_millis(descriptor.timeout_ms))
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| SpeechError::Configuration(format!("Failed to create HTTP client: {e}")))
}

/// Provider limit, lowered by the descriptor's `max_chunk_chars`
pub(crate) fn chunk_limit(provider: ChunkLimit, descriptor: &EngineDescriptor) -> ChunkLimit {
    descriptor
        .max_chunk_chars
        .map_or(provider, |chars| provider.tightened(chars))
}

pub(crate) fn chunk_pause(descriptor: &EngineDescriptor) -> Duration {
    descriptor
        .chunk_pause_ms
        .map_or(Duration::ZERO, Duration::from_millis)
}

/// Reject voices outside a static catalog
pub(crate) fn check_voice(engine: &str, voice: &str, catalog: &[&str]) -> Result<(), SpeechError> {
    if catalog.contains(&voice) {
        Ok(())
    } else {
        Err(SpeechError::UnsupportedVoice(format!(
            "{engine} does not offer voice '{voice}' (available: {})",
            catalog.join(", ")
        )))
    }
}

/// Classify a failure described only by text
pub(crate) fn classified(classifier: &dyn ErrorClassifier, message: String) -> SpeechError {
    let err = SpeechError::SynthesisFailed(message);
    match (classifier.classify(&err), err) {
        (ErrorKind::ProviderError, err) => err,
        (kind, SpeechError::SynthesisFailed(message)) => SpeechError::from_kind(kind, message),
        (_, err) => err,
    }
}

/// Audio container named by a Content-Type header
fn declared_format(headers: &HeaderMap) -> Option<AudioFormat> {
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(AudioFormat::from_mime_type)
}

/// Turn an HTTP response into audio, classifying failures
///
/// An audio Content-Type overrides `expected`; anything else (or none) keeps it.
pub(crate) async fn audio_response(
    response: Response,
    classifier: &Arc<dyn ErrorClassifier>,
    expected: AudioFormat,
) -> Result<AudioData, SpeechError> {
    let status = response.status();
    if !status.is_success() {
        let wait = retry_after(response.headers());
        let body = response.text().await.unwrap_or_default();
        return Err(classifier.http_error(status, &body, wait));
    }

    let format = declared_format(response.headers()).unwrap_or(expected);
    if format != expected {
        debug!(%expected, declared = %format, "Provider declared a different audio format");
    }

    let audio_bytes: Bytes = response.bytes().await?;
    if audio_bytes.is_empty() {
        return Err(classified(
            classifier.as_ref(),
            "No audio received from provider".to_string(),
        ));
    }

    Ok(AudioData::new(audio_bytes.to_vec(), format))
}

/// Temporary output file for a command-line engine
pub(crate) fn tool_output(ext: &str) -> Result<NamedTempFile, SpeechError> {
    tempfile::Builder::new()
        .prefix(".narrator-")
        .suffix(&format!(".{ext}"))
        .tempfile()
        .map_err(|e| SpeechError::SynthesisFailed(format!("Failed to create temp file: {e}")))
}

/// Run a command-line engine with `text` on stdin
///
/// A missing executable is `NotAvailable`; a non-zero exit is classified from
/// the tool's stderr.
pub(crate) async fn run_tool(
    mut cmd: Command,
    tool: &str,
    text: &str,
    classifier: &dyn ErrorClassifier,
) -> Result<(), SpeechError> {
    cmd.stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    debug!("Running {tool}: {:?}", cmd);

    let mut child = cmd.spawn().map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            SpeechError::NotAvailable(format!("{tool} not found. Please install {tool}."))
        } else {
            SpeechError::SynthesisFailed(format!("Failed to run {tool}: {e}"))
        }
    })?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(text.as_bytes()).await.map_err(|e| {
            SpeechError::SynthesisFailed(format!("Failed to write to {tool} stdin: {e}"))
        })?;
        // stdin is dropped here, closing it
    }

    let output = child
        .wait_with_output()
        .await
        .map_err(|e| SpeechError::SynthesisFailed(format!("Failed to wait for {tool}: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        error!("{tool} failed: {}", stderr.trim());
        return Err(classified(
            classifier,
            format!("{tool} exited with status {}: {}", output.status, stderr.trim()),
        ));
    }

    Ok(())
}

/// Read a command-line engine's output file
pub(crate) async fn read_tool_output(
    file: &NamedTempFile,
    tool: &str,
    format: AudioFormat,
) -> Result<AudioData, SpeechError> {
    let data = tokio::fs::read(file.path())
        .await
        .map_err(|e| SpeechError::SynthesisFailed(format!("Failed to read {tool} output: {e}")))?;

    if data.is_empty() {
        return Err(SpeechError::SynthesisFailed(format!(
            "{tool} produced empty output"
        )));
    }

    Ok(AudioData::new(data, format))
}

/// Locale prefix of a voice name such as `vi-VN-HoaiMyNeural`
pub(crate) fn voice_locale(voice: &str) -> Option<String> {
    let mut parts = voice.splitn(3, '-');
    match (parts.next(), parts.next()) {
        (Some(lang), Some(region)) if !lang.is_empty() && !region.is_empty() => {
            Some(format!("{lang}-{region}"))
        },
        _ => None,
    }
}

/// Escape text for an SSML document
pub(crate) fn escape_xml(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

/// Speaking rate as a signed percentage, e.g. `+20%`
pub(crate) fn rate_percent(rate: f32) -> String {
    #[allow(clippy::cast_possible_truncation)]
    let percent = ((rate - 1.0) * 100.0).round() as i32;
    format!("{percent:+}%")
}
