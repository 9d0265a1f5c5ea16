//! FFmpeg-backed audio transcoder
//!
//! Converts artifacts between containers and joins chunk files. FFmpeg must be
//! installed on the system; when it is not, every operation reports
//! `SpeechError::TranscodeUnavailable` so callers can downgrade instead of
//! failing.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, instrument};

use crate::artifact::temp_file_beside;
use crate::error::SpeechError;
use crate::ports::Transcoder;
use crate::types::AudioFormat;

/// Transcoder that shells out to FFmpeg
#[derive(Debug, Clone, Default)]
pub struct FfmpegTranscoder {
    /// FFmpeg binary path (defaults to "ffmpeg" in PATH)
    ffmpeg_path: Option<String>,
}

impl FfmpegTranscoder {
    /// Create a transcoder using `ffmpeg` from PATH
    #[must_use]
    pub const fn new() -> Self {
        Self { ffmpeg_path: None }
    }

    /// Create a transcoder with a custom FFmpeg path
    #[must_use]
    pub fn with_ffmpeg_path(path: impl Into<String>) -> Self {
        Self {
            ffmpeg_path: Some(path.into()),
        }
    }

    /// Binary to spawn
    fn program(&self) -> &str {
        self.ffmpeg_path.as_deref().unwrap_or("ffmpeg")
    }

    /// Muxer passed to `-f`
    const fn muxer_name(format: AudioFormat) -> &'static str {
        match format {
            AudioFormat::Opus => "opus",
            AudioFormat::Ogg => "ogg",
            AudioFormat::Mp3 => "mp3",
            AudioFormat::Wav => "wav",
            AudioFormat::Flac => "flac",
            AudioFormat::Webm => "webm",
            AudioFormat::M4a => "ipod",
        }
    }

    /// Codec and quality flags for `format`
    fn push_encoder_args(cmd: &mut Command, format: AudioFormat) {
        match format {
            AudioFormat::Mp3 => {
                cmd.args(["-codec:a", "libmp3lame", "-q:a", "2"]);
            },
            AudioFormat::Opus => {
                cmd.args(["-codec:a", "libopus", "-application", "voip", "-b:a", "48k"]);
            },
            AudioFormat::Wav => {
                cmd.args(["-codec:a", "pcm_s16le"]);
            },
            AudioFormat::Flac => {
                cmd.args(["-codec:a", "flac", "-compression_level", "5"]);
            },
            AudioFormat::M4a => {
                cmd.args(["-codec:a", "aac", "-b:a", "128k"]);
            },
            AudioFormat::Ogg | AudioFormat::Webm => {
                cmd.args(["-codec:a", "libvorbis", "-q:a", "4"]);
            },
        }
    }

    /// Base command shared by every invocation
    fn command(&self) -> Command {
        let mut cmd = Command::new(self.program());
        cmd.args(["-y", "-loglevel", "error"])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        cmd
    }

    async fn run(&self, mut cmd: Command) -> Result<(), SpeechError> {
        debug!("Running ffmpeg: {:?}", cmd);

        let output = cmd.output().await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                SpeechError::TranscodeUnavailable(format!(
                    "FFmpeg not found at '{}'",
                    self.program()
                ))
            } else {
                SpeechError::AudioProcessing(format!("Failed to spawn FFmpeg: {e}"))
            }
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SpeechError::AudioProcessing(format!(
                "FFmpeg exited with status {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        Ok(())
    }
}

/// Quote a path for an FFmpeg concat list
fn concat_entry(path: &Path) -> String {
    format!("file '{}'\n", path.display().to_string().replace('\'', r"'\''"))
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    #[instrument(skip(self))]
    async fn is_available(&self) -> bool {
        Command::new(self.program())
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .is_ok_and(|status| status.success())
    }

    #[instrument(skip(self), fields(target = %target))]
    async fn transcode(
        &self,
        input: &Path,
        output: &Path,
        target: AudioFormat,
    ) -> Result<(), SpeechError> {
        let temp = temp_file_beside(output, target.extension())?;

        let mut cmd = self.command();
        cmd.arg("-i").arg(input);
        Self::push_encoder_args(&mut cmd, target);
        cmd.arg("-f")
            .arg(Self::muxer_name(target))
            .arg(temp.path());

        self.run(cmd).await?;

        temp.persist(output).map_err(|e| {
            SpeechError::AudioProcessing(format!(
                "Failed to move converted audio to {}: {e}",
                output.display()
            ))
        })?;

        debug!("Converted {} -> {}", input.display(), output.display());
        Ok(())
    }

    #[instrument(skip(self, inputs), fields(inputs = inputs.len()))]
    async fn concat(&self, inputs: &[PathBuf], output: &Path) -> Result<(), SpeechError> {
        let mut list = tempfile::Builder::new()
            .suffix(".txt")
            .tempfile()
            .map_err(|e| SpeechError::AudioProcessing(format!("Failed to create concat list: {e}")))?;
        for input in inputs {
            list.write_all(concat_entry(input).as_bytes())?;
        }
        list.flush()?;

        let ext = output
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("bin");
        let temp = temp_file_beside(output, ext)?;

        let mut cmd = self.command();
        cmd.args(["-f", "concat", "-safe", "0", "-i"])
            .arg(list.path())
            .args(["-c", "copy"])
            .arg(temp.path());

        self.run(cmd).await?;

        temp.persist(output).map_err(|e| {
            SpeechError::AudioProcessing(format!(
                "Failed to move joined audio to {}: {e}",
                output.display()
            ))
        })?;
        Ok(())
    }
}
