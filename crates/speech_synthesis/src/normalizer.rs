//! Format normalization
//!
//! Converts an engine's native-format artifact into the requested format.
//! When no transcoder is installed the native artifact is kept and the result
//! is flagged as downgraded rather than failing the job.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::error::SpeechError;
use crate::ports::Transcoder;
use crate::types::AudioFormat;

/// Artifact after normalization
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedArtifact {
    /// Where the artifact now lives
    pub path: PathBuf,
    /// Its actual format
    pub format: AudioFormat,
    /// True when `format` is not the requested one
    pub downgraded: bool,
}

/// Brings artifacts into the requested container format
#[derive(Debug, Clone)]
pub struct FormatNormalizer {
    transcoder: Arc<dyn Transcoder>,
}

/// Removes the intermediate file on every exit path unless disarmed
struct IntermediateGuard<'a> {
    path: &'a Path,
    armed: bool,
}

impl Drop for IntermediateGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            if let Err(e) = std::fs::remove_file(self.path) {
                debug!(path = %self.path.display(), error = %e, "Could not remove intermediate artifact");
            }
        }
    }
}

impl FormatNormalizer {
    /// Create a normalizer backed by `transcoder`
    #[must_use]
    pub fn new(transcoder: Arc<dyn Transcoder>) -> Self {
        Self { transcoder }
    }

    /// The transcoder used for conversions
    #[must_use]
    pub fn transcoder(&self) -> &dyn Transcoder {
        self.transcoder.as_ref()
    }

    /// Normalize `artifact` into `target`, next to it with the target extension
    pub async fn normalize(
        &self,
        artifact: &Path,
        native: AudioFormat,
        target: AudioFormat,
    ) -> Result<NormalizedArtifact, SpeechError> {
        let destination = artifact.with_extension(target.extension());
        self.normalize_to(artifact, native, target, &destination)
            .await
    }

    /// Normalize `artifact` into `target` at `destination`
    ///
    /// Identity when `native == target`: the transcoder is never invoked and
    /// the artifact is returned untouched. When the transcoder is unavailable
    /// the native artifact is returned with `downgraded` set. After a
    /// successful conversion the intermediate file is removed; on a failed
    /// conversion it is removed too and the error is returned.
    ///
    /// # Errors
    ///
    /// Returns `SpeechError::AudioProcessing` if an installed transcoder fails.
    #[instrument(skip(self), fields(native = %native, target = %target))]
    pub async fn normalize_to(
        &self,
        artifact: &Path,
        native: AudioFormat,
        target: AudioFormat,
        destination: &Path,
    ) -> Result<NormalizedArtifact, SpeechError> {
        if native == target {
            return Ok(NormalizedArtifact {
                path: artifact.to_path_buf(),
                format: native,
                downgraded: false,
            });
        }

        if !self.transcoder.is_available().await {
            warn!(
                path = %artifact.display(),
                "No transcoder available, keeping {native} instead of {target}"
            );
            return Ok(NormalizedArtifact {
                path: artifact.to_path_buf(),
                format: native,
                downgraded: true,
            });
        }

        let mut guard = IntermediateGuard {
            path: artifact,
            armed: artifact != destination,
        };

        let converted = self.transcoder.transcode(artifact, destination, target).await;
        match converted {
            Ok(()) => {
                drop(guard);
                info!(path = %destination.display(), "Converted {native} to {target}");
                Ok(NormalizedArtifact {
                    path: destination.to_path_buf(),
                    format: target,
                    downgraded: false,
                })
            },
            // Transcoder vanished between the availability check and the call
            Err(SpeechError::TranscodeUnavailable(detail)) => {
                guard.armed = false;
                drop(guard);
                warn!(detail = %detail, "Transcoder unavailable, keeping {native}");
                Ok(NormalizedArtifact {
                    path: artifact.to_path_buf(),
                    format: native,
                    downgraded: true,
                })
            },
            Err(e) => {
                drop(guard);
                Err(e)
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;

    use super::*;

    #[derive(Debug, Default)]
    struct CountingTranscoder {
        available: bool,
        fail: bool,
        calls: AtomicU32,
    }

    #[async_trait]
    impl Transcoder for CountingTranscoder {
        async fn is_available(&self) -> bool {
            self.available
        }

        async fn transcode(&self, input: &Path, output: &Path, _: AudioFormat) -> Result<(), SpeechError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(SpeechError::AudioProcessing("boom".to_string()));
            }
            let data = std::fs::read(input)?;
            std::fs::write(output, data)?;
            Ok(())
        }

        async fn concat(&self, _: &[PathBuf], _: &Path) -> Result<(), SpeechError> {
            Ok(())
        }
    }

    fn normalizer(transcoder: &Arc<CountingTranscoder>) -> FormatNormalizer {
        FormatNormalizer::new(Arc::clone(transcoder) as Arc<dyn Transcoder>)
    }

    #[tokio::test]
    async fn same_format_is_identity() {
        let transcoder = Arc::new(CountingTranscoder {
            available: true,
            ..Default::default()
        });
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.mp3");
        std::fs::write(&path, b"mp3").unwrap();

        let result = normalizer(&transcoder)
            .normalize(&path, AudioFormat::Mp3, AudioFormat::Mp3)
            .await
            .unwrap();

        assert_eq!(result.path, path);
        assert!(!result.downgraded);
        assert_eq!(std::fs::read(&path).unwrap(), b"mp3");
        assert_eq!(transcoder.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn converts_and_removes_intermediate() {
        let transcoder = Arc::new(CountingTranscoder {
            available: true,
            ..Default::default()
        });
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.wav");
        std::fs::write(&path, b"wav").unwrap();

        let result = normalizer(&transcoder)
            .normalize(&path, AudioFormat::Wav, AudioFormat::Mp3)
            .await
            .unwrap();

        assert_eq!(result.path, dir.path().join("a.mp3"));
        assert_eq!(result.format, AudioFormat::Mp3);
        assert!(!path.exists());
        assert_eq!(transcoder.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn downgrades_without_transcoder() {
        let transcoder = Arc::new(CountingTranscoder::default());
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.wav");
        std::fs::write(&path, b"wav").unwrap();

        let result = normalizer(&transcoder)
            .normalize(&path, AudioFormat::Wav, AudioFormat::Mp3)
            .await
            .unwrap();

        assert_eq!(result.path, path);
        assert_eq!(result.format, AudioFormat::Wav);
        assert!(result.downgraded);
        assert!(path.exists());
        assert_eq!(transcoder.calls.load(Ordering::SeqCst), 0);
    }

    #[derive(Debug)]
    struct VanishingTranscoder;

    #[async_trait]
    impl Transcoder for VanishingTranscoder {
        async fn is_available(&self) -> bool {
            true
        }

        async fn transcode(&self, _: &Path, _: &Path, _: AudioFormat) -> Result<(), SpeechError> {
            Err(SpeechError::TranscodeUnavailable("ffmpeg removed".to_string()))
        }

        async fn concat(&self, _: &[PathBuf], _: &Path) -> Result<(), SpeechError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn transcoder_vanishing_mid_call_keeps_native_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.wav");
        std::fs::write(&path, b"wav").unwrap();

        let result = FormatNormalizer::new(Arc::new(VanishingTranscoder))
            .normalize(&path, AudioFormat::Wav, AudioFormat::Mp3)
            .await
            .unwrap();

        assert!(result.downgraded);
        assert_eq!(result.path, path);
        assert_eq!(std::fs::read(&path).unwrap(), b"wav");
    }

    #[tokio::test]
    async fn failed_conversion_cleans_up() {
        let transcoder = Arc::new(CountingTranscoder {
            available: true,
            fail: true,
            ..Default::default()
        });
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.wav");
        std::fs::write(&path, b"wav").unwrap();

        let result = normalizer(&transcoder)
            .normalize(&path, AudioFormat::Wav, AudioFormat::Mp3)
            .await;

        assert!(result.is_err());
        assert!(!path.exists());
        assert!(!dir.path().join("a.mp3").exists());
    }
}
