//! Port definitions for speech synthesis
//!
//! These traits define the interfaces that synthesis backends and audio
//! transcoders must implement. Everything above them (retry, fallback,
//! scheduling) only talks to these traits.

use std::fmt::Debug;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;

use crate::chunking::ChunkLimit;
use crate::error::SpeechError;
use crate::types::{AudioData, AudioFormat};

/// Port for a single text-to-speech backend
///
/// Implementations only know how to turn one chunk of text into audio bytes.
/// Chunking, concatenation, format normalization and artifact writing are
/// handled by [`crate::Synthesizer`].
#[async_trait]
pub trait SynthesisEngine: Send + Sync + Debug {
    /// Configured engine name, unique within a registry
    fn name(&self) -> &str;

    /// Voice used when the request does not override it
    fn default_voice(&self) -> &str;

    /// Largest text a single [`Self::synthesize_chunk`] call accepts
    ///
    /// `None` means the engine takes arbitrarily long text in one call.
    fn chunk_limit(&self) -> Option<ChunkLimit> {
        None
    }

    /// Pause inserted between consecutive chunk calls
    fn chunk_pause(&self) -> Duration {
        Duration::ZERO
    }

    /// Synthesize one chunk of text
    ///
    /// # Arguments
    ///
    /// * `text` - Non-empty text within [`Self::chunk_limit`]
    /// * `voice` - Voice identifier to use
    /// * `requested` - Format the caller ultimately wants
    ///
    /// # Returns
    ///
    /// Audio in the engine's native format for `requested`. The returned
    /// format may differ from `requested`; the caller normalizes it.
    ///
    /// # Errors
    ///
    /// Returns a classified `SpeechError` if synthesis fails.
    async fn synthesize_chunk(
        &self,
        text: &str,
        voice: &str,
        requested: AudioFormat,
    ) -> Result<AudioData, SpeechError>;

    /// Check if the engine can currently be used
    ///
    /// Local engines look for their executable, remote engines for a
    /// credential.
    async fn is_available(&self) -> bool;
}

/// Port for an external audio transcoder
#[async_trait]
pub trait Transcoder: Send + Sync + Debug {
    /// Check if the transcoder is installed and runnable
    async fn is_available(&self) -> bool;

    /// Convert the file at `input` into `target` at `output`
    ///
    /// # Errors
    ///
    /// Returns `SpeechError::TranscodeUnavailable` if the transcoder is not
    /// installed, or `SpeechError::AudioProcessing` if the conversion fails.
    async fn transcode(
        &self,
        input: &Path,
        output: &Path,
        target: AudioFormat,
    ) -> Result<(), SpeechError>;

    /// Losslessly concatenate same-format files into `output`, in order
    ///
    /// # Errors
    ///
    /// Same as [`Self::transcode`].
    async fn concat(&self, inputs: &[PathBuf], output: &Path) -> Result<(), SpeechError>;
}
