//! Piper local text-to-speech engine
//!
//! Drives the Piper CLI. Text goes in on stdin and a WAV file comes out.
//!
//! # Prerequisites
//!
//! - Piper must be installed and available in PATH (or configured via
//!   `executable_path`)
//! - A voice model (.onnx) with its config (.onnx.json) next to it
//!
//! ```bash
//! wget https://github.com/rhasspy/piper/releases/download/v1.2.0/piper_amd64.tar.gz
//! tar -xzf piper_amd64.tar.gz
//! wget https://huggingface.co/rhasspy/piper-voices/resolve/main/vi/vi_VN/vais1000/medium/vi_VN-vais1000-medium.onnx
//! wget https://huggingface.co/rhasspy/piper-voices/resolve/main/vi/vi_VN/vais1000/medium/vi_VN-vais1000-medium.onnx.json
//! ```

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

const DEFAULT_EXECUTABLE: &str = "piper";

/// Local engine using Piper
#[derive(Debug, Clone)]
pub struct PiperEngine {
    name: String,
    executable: PathBuf,
    model_path: PathBuf,
    voice: String,
    length_scale: f32,
    limit: Option<ChunkLimit>,
    pause: Duration,
    classifier: Arc<dyn ErrorClassifier>,
}

impl PiperEngine {
    /// Create an engine from its descriptor
    ///
    /// The voice is the model's file stem unless the descriptor names one.
    ///
    /// # Errors
    ///
    /// Returns `SpeechError::Configuration` if no model is configured or the
    /// model file does not exist.
    pub fn new(
        name: impl Into<String>,
        descriptor: &EngineDescriptor,
        classifier: Arc<dyn ErrorClassifier>,
    ) -> Result<Self, SpeechError> {
        let name = name.into();
        let model_path = descriptor.model_path.clone().ok_or_else(|| {
            SpeechError::Configuration(format!("{name}: Piper requires a model_path"))
        })?;
        if !model_path.is_file() {
            return Err(SpeechError::Configuration(format!(
                "{name}: Piper model not found at '{}'",
                model_path.display()
            )));
        }

        let voice = descriptor.voice_id.clone().unwrap_or_else(|| {
            model_path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or_else(|| descriptor.voice())
                .to_string()
        });

        Ok(Self {
            executable: descriptor
                .executable_path
                .clone()
                .unwrap_or_else(|| PathBuf::from(DEFAULT_EXECUTABLE)),
            model_path,
            voice,
            length_scale: 1.0 / descriptor.rate,
            limit: descriptor.max_chunk_chars.map(ChunkLimit::chars),
            pause: chunk_pause(descriptor),
            classifier,
            name,
        })
    }

    /// Get the Piper executable path
    fn executable(&self) -> &Path {
        &self.executable
    }

    fn command(&self, output: &Path) -> Command {
        let mut cmd = Command::new(self.executable());
        cmd.arg("--model")
            .arg(&self.model_path)
            .arg("--output_file")
            .arg(output)
            .arg("--length_scale")
            .arg(format!("{:.2}", self.length_scale));
        cmd
    }
}

#[async_trait]
impl SynthesisEngine for PiperEngine {
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
        _requested: AudioFormat,
    ) -> Result<AudioData, SpeechError> {
        // One model is one voice
        if voice != self.voice {
            return Err(SpeechError::UnsupportedVoice(format!(
                "{} only provides voice '{}', not '{voice}'",
                self.name, self.voice
            )));
        }

        let output = tool_output("wav")?;
        run_tool(
            self.command(output.path()),
            "piper",
            text,
            self.classifier.as_ref(),
        )
        .await?;

        read_tool_output(&output, "piper", AudioFormat::Wav).await
    }

    async fn is_available(&self) -> bool {
        let executable_exists = self.executable().is_file()
            || Command::new(self.executable())
                .arg("--help")
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .await
                .is_ok_and(|s| s.success());

        let model_exists = self.model_path.is_file();

        debug!(
            "Piper availability: executable={}, model={}",
            executable_exists, model_exists
        );

        executable_exists && model_exists
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::classifier::HeuristicClassifier;
    use crate::config::EngineKind;
    use crate::error::ErrorKind;

    fn model_dir() -> (TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let model = dir.path().join("vi_VN-vais1000-medium.onnx");
        std::fs::write(&model, b"onnx").unwrap();
        (dir, model)
    }

    fn descriptor(model: &Path) -> EngineDescriptor {
        let mut descriptor = EngineDescriptor::new(EngineKind::Piper);
        descriptor.model_path = Some(model.to_path_buf());
        descriptor
    }

    fn engine(descriptor: &EngineDescriptor) -> PiperEngine {
        PiperEngine::new("piper", descriptor, Arc::new(HeuristicClassifier)).unwrap()
    }

    #[test]
    fn missing_model_is_configuration_error() {
        let descriptor = descriptor(Path::new("/nonexistent/model.onnx"));
        let err = PiperEngine::new("piper", &descriptor, Arc::new(HeuristicClassifier))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);

        let bare = EngineDescriptor::new(EngineKind::Piper);
        let err = PiperEngine::new("piper", &bare, Arc::new(HeuristicClassifier)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn default_voice_is_model_stem() {
        let (_dir, model) = model_dir();
        let engine = engine(&descriptor(&model));
        assert_eq!(engine.default_voice(), "vi_VN-vais1000-medium");
        assert!(engine.chunk_limit().is_none());
    }

    #[test]
    fn rate_becomes_length_scale() {
        let (_dir, model) = model_dir();
        let mut descriptor = descriptor(&model);
        descriptor.rate = 2.0;
        let engine = engine(&descriptor);

        let cmd = engine.command(Path::new("/tmp/out.wav"));
        let args: Vec<String> = cmd
            .as_std()
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();

        assert_eq!(
            args,
            vec![
                "--model".to_string(),
                model.display().to_string(),
                "--output_file".to_string(),
                "/tmp/out.wav".to_string(),
                "--length_scale".to_string(),
                "0.50".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn other_voice_is_unsupported() {
        let (_dir, model) = model_dir();
        let engine = engine(&descriptor(&model));

        let err = engine
            .synthesize_chunk("Xin chào", "someone-else", AudioFormat::Wav)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::UnsupportedVoice);
    }

    #[tokio::test]
    async fn missing_executable_is_not_available() {
        let (_dir, model) = model_dir();
        let mut descriptor = descriptor(&model);
        descriptor.executable_path = Some(PathBuf::from("/nonexistent/piper"));
        let engine = engine(&descriptor);

        assert!(!engine.is_available().await);

        let voice = engine.default_voice().to_string();
        let err = engine
            .synthesize_chunk("Xin chào", &voice, AudioFormat::Wav)
            .await
            .unwrap_err();
        assert!(matches!(err, SpeechError::NotAvailable(_)));
    }
}
