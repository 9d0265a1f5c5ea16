//! macOS `say` engine
//!
//! Offline synthesis with the system voices. `say` cannot write MP3, so
//! compressed requests get Apple Lossless in an M4A container and everything
//! else gets 32-bit float WAV. The format normalizer converts from there.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, instrument};

use super::{chunk_pause, read_tool_output, run_tool, tool_output};
use crate::chunking::ChunkLimit;
use crate::classifier::ErrorClassifier;
use crate::config::EngineDescriptor;
use crate::error::SpeechError;
use crate::ports::SynthesisEngine;
use crate::types::{AudioData, AudioFormat};

const DEFAULT_EXECUTABLE: &str = "say";

/// Speaking rate of `say` at 1.0, in words per minute
const BASE_WORDS_PER_MINUTE: f32 = 175.0;

/// macOS speech engine
#[derive(Debug, Clone)]
pub struct MacosSayEngine {
    name: String,
    executable: PathBuf,
    voice: String,
    words_per_minute: u32,
    limit: Option<ChunkLimit>,
    pause: Duration,
    classifier: Arc<dyn ErrorClassifier>,
}

impl MacosSayEngine {
    /// Create an engine from its descriptor
    ///
    /// # Errors
    ///
    /// Currently never fails.
    pub fn new(
        name: impl Into<String>,
        descriptor: &EngineDescriptor,
        classifier: Arc<dyn ErrorClassifier>,
    ) -> Result<Self, SpeechError> {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let words_per_minute = (descriptor.rate * BASE_WORDS_PER_MINUTE).round() as u32;

        Ok(Self {
            name: name.into(),
            executable: descriptor
                .executable_path
                .clone()
                .unwrap_or_else(|| PathBuf::from(DEFAULT_EXECUTABLE)),
            voice: descriptor.voice().to_string(),
            words_per_minute,
            limit: descriptor.max_chunk_chars.map(ChunkLimit::chars),
            pause: chunk_pause(descriptor),
            classifier,
        })
    }

    /// Container `say` writes for a requested format
    const fn native_format(requested: AudioFormat) -> AudioFormat {
        match requested {
            AudioFormat::Mp3 | AudioFormat::M4a => AudioFormat::M4a,
            _ => AudioFormat::Wav,
        }
    }

    fn command(&self, voice: &str, output: &Path, native: AudioFormat) -> Command {
        let mut cmd = Command::new(&self.executable);
        cmd.arg("-v")
            .arg(voice)
            .arg("-r")
            .arg(self.words_per_minute.to_string())
            .args(["-f", "-"])
            .arg("-o")
            .arg(output);

        if native == AudioFormat::M4a {
            cmd.args(["--file-format=m4af", "--data-format=alac"]);
        } else {
            cmd.args(["--file-format=WAVE", "--data-format=LEF32@32000"]);
        }
        cmd
    }
}

#[async_trait]
impl SynthesisEngine for MacosSayEngine {
    fn name(&self) -> &str {
        &self.name
    }

    fn default_voice(&self) -> &str {
        &self.voice
    }

    fn chunk_limit(&self) -> Option<ChunkLimit> {
        self.limit
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
        let native = Self::native_format(requested);
        let output = tool_output(native.extension())?;

        run_tool(
            self.command(voice, output.path(), native),
            "say",
            text,
            self.classifier.as_ref(),
        )
        .await?;

        read_tool_output(&output, "say", native).await
    }

    async fn is_available(&self) -> bool {
        let available = Command::new(&self.executable)
            .args(["-v", "?"])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .is_ok_and(|s| s.success());

        debug!("say availability: {}", available);
        available
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::HeuristicClassifier;
    use crate::config::EngineKind;

    fn engine(descriptor: &EngineDescriptor) -> MacosSayEngine {
        MacosSayEngine::new("macos", descriptor, Arc::new(HeuristicClassifier)).unwrap()
    }

    fn args(cmd: &Command) -> Vec<String> {
        cmd.as_std()
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn default_voice_is_linh() {
        let engine = engine(&EngineDescriptor::new(EngineKind::MacosSay));
        assert_eq!(engine.default_voice(), "Linh");
        assert!(engine.chunk_limit().is_none());
    }

    #[test]
    fn compressed_requests_produce_m4a() {
        assert_eq!(MacosSayEngine::native_format(AudioFormat::Mp3), AudioFormat::M4a);
        assert_eq!(MacosSayEngine::native_format(AudioFormat::M4a), AudioFormat::M4a);
        assert_eq!(MacosSayEngine::native_format(AudioFormat::Wav), AudioFormat::Wav);
        assert_eq!(MacosSayEngine::native_format(AudioFormat::Flac), AudioFormat::Wav);
    }

    #[test]
    fn command_carries_voice_rate_and_format() {
        let mut descriptor = EngineDescriptor::new(EngineKind::MacosSay);
        descriptor.rate = 1.2;
        let engine = engine(&descriptor);

        let cmd = engine.command("Linh", Path::new("/tmp/a.m4a"), AudioFormat::M4a);
        assert_eq!(
            args(&cmd),
            vec![
                "-v", "Linh", "-r", "210", "-f", "-", "-o", "/tmp/a.m4a",
                "--file-format=m4af", "--data-format=alac",
            ]
        );

        let cmd = engine.command("Linh", Path::new("/tmp/a.wav"), AudioFormat::Wav);
        assert!(args(&cmd).contains(&"--data-format=LEF32@32000".to_string()));
    }

    #[tokio::test]
    async fn missing_executable_is_not_available() {
        let mut descriptor = EngineDescriptor::new(EngineKind::MacosSay);
        descriptor.executable_path = Some(PathBuf::from("/nonexistent/say"));
        let engine = engine(&descriptor);

        assert!(!engine.is_available().await);

        let err = engine
            .synthesize_chunk("Xin chào", "Linh", AudioFormat::Mp3)
            .await
            .unwrap_err();
        assert!(matches!(err, SpeechError::NotAvailable(_)));
    }
}
