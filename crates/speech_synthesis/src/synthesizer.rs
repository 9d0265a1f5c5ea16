//! Single-engine synthesis
//!
//! A [`Synthesizer`] wraps one [`SynthesisEngine`] and turns a full
//! [`SynthesisRequest`] into an artifact on disk: chunking, ordered chunk
//! calls, joining, atomic writing and format normalization.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, instrument};

use crate::artifact::{persist_staged, stage_beside, write_atomic};
use crate::chunking::TextChunker;
use crate::concat::join_chunks;
use crate::error::SpeechError;
use crate::normalizer::FormatNormalizer;
use crate::ports::SynthesisEngine;
use crate::types::{AudioData, AudioFormat, SynthesisArtifact, SynthesisRequest};

/// Chunk audio already received for one request on one engine
///
/// Shared across the retry attempts of a request, so a retry resumes at the
/// first chunk that has not succeeded yet.
#[derive(Debug, Default)]
pub struct CompletedChunks {
    parts: Mutex<Vec<AudioData>>,
}

impl CompletedChunks {
    fn lock(&self) -> MutexGuard<'_, Vec<AudioData>> {
        self.parts.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of chunks received so far
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether no chunk has been received yet
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn push(&self, audio: AudioData) {
        self.lock().push(audio);
    }

    fn snapshot(&self) -> Vec<AudioData> {
        self.lock().clone()
    }
}

/// Runs requests against one engine
#[derive(Debug, Clone)]
pub struct Synthesizer {
    engine: Arc<dyn SynthesisEngine>,
    normalizer: FormatNormalizer,
}

impl Synthesizer {
    /// Create a synthesizer for `engine`
    #[must_use]
    pub fn new(engine: Arc<dyn SynthesisEngine>, normalizer: FormatNormalizer) -> Self {
        Self { engine, normalizer }
    }

    /// The wrapped engine
    #[must_use]
    pub fn engine(&self) -> &Arc<dyn SynthesisEngine> {
        &self.engine
    }

    /// Engine name
    #[must_use]
    pub fn name(&self) -> &str {
        self.engine.name()
    }

    /// Synthesize `request` into an artifact at its output path
    ///
    /// The artifact is in the requested format, or in the engine's native
    /// format with `downgraded` set when no transcoder is available. The
    /// returned `attempts` is always 1; the retry policy overwrites it.
    ///
    /// # Errors
    ///
    /// Returns `SpeechError::InvalidInput` for empty text, or the engine's
    /// classified error.
    pub async fn synthesize(
        &self,
        request: &SynthesisRequest,
    ) -> Result<SynthesisArtifact, SpeechError> {
        self.resume(request, &CompletedChunks::default()).await
    }

    /// Like [`Synthesizer::synthesize`], skipping chunks already in `completed`
    ///
    /// Every chunk the engine returns is recorded in `completed`, so calling
    /// again after a failure only requests the chunks that are still missing.
    ///
    /// # Errors
    ///
    /// Same as [`Synthesizer::synthesize`].
    #[instrument(skip(self, request, completed), fields(
        engine = %self.engine.name(),
        text_len = request.text().len(),
        format = %request.format()
    ))]
    pub async fn resume(
        &self,
        request: &SynthesisRequest,
        completed: &CompletedChunks,
    ) -> Result<SynthesisArtifact, SpeechError> {
        request.validate()?;

        let voice = request
            .voice()
            .unwrap_or_else(|| self.engine.default_voice());

        let chunks = match self.engine.chunk_limit() {
            Some(limit) => TextChunker::new(limit).split(request.text()),
            None => vec![request.text().trim().to_string()],
        };
        if chunks.is_empty() {
            return Err(SpeechError::InvalidInput(
                "Text contains nothing to synthesize".to_string(),
            ));
        }

        let done = completed.len().min(chunks.len());
        debug!(chunks = chunks.len(), done, voice, "Synthesizing chunks");

        let pause = self.engine.chunk_pause();
        for (index, chunk) in chunks.iter().enumerate().skip(done) {
            if index > done && !pause.is_zero() {
                tokio::time::sleep(pause).await;
            }
            let audio = self
                .engine
                .synthesize_chunk(chunk, voice, request.format())
                .await?;
            if audio.is_empty() {
                return Err(SpeechError::SynthesisFailed(format!(
                    "{} returned no audio for chunk {index}",
                    self.engine.name()
                )));
            }
            completed.push(audio);
        }

        let audio = join_chunks(completed.snapshot(), self.normalizer.transcoder()).await?;
        let native = audio.format();
        let target = request.format();
        let destination = request.output_path();

        if native == target {
            let bytes = write_atomic(destination, audio.into_data()).await?;
            return Ok(self.artifact(destination.to_path_buf(), bytes, native, false));
        }

        // Hidden until the outcome is known; dropped on every path but a downgrade
        let staged = stage_beside(destination, native.extension(), audio.into_data()).await?;
        let normalized = self
            .normalizer
            .normalize_to(staged.path(), native, target, destination)
            .await?;

        if normalized.downgraded {
            let kept = native_path(destination, native);
            persist_staged(staged, &kept)?;
            let bytes = tokio::fs::metadata(&kept).await?.len();
            return Ok(self.artifact(kept, bytes, native, true));
        }

        let bytes = tokio::fs::metadata(&normalized.path).await?.len();
        Ok(self.artifact(normalized.path, bytes, normalized.format, false))
    }

    fn artifact(&self, path: PathBuf, bytes: u64, format: AudioFormat, downgraded: bool) -> SynthesisArtifact {
        SynthesisArtifact {
            path,
            bytes,
            format,
            engine: self.engine.name().to_string(),
            attempts: 1,
            downgraded,
        }
    }
}

/// Where a downgraded artifact is kept
///
/// Same stem as the destination with the native extension.
fn native_path(destination: &Path, native: AudioFormat) -> PathBuf {
    let candidate = destination.with_extension(native.extension());
    if candidate == destination {
        let mut name = destination
            .file_name()
            .map(OsString::from)
            .unwrap_or_default();
        name.push(format!(".native.{}", native.extension()));
        destination.with_file_name(name)
    } else {
        candidate
    }
}
