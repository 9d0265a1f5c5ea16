//! Types for speech synthesis
//!
//! Contains audio containers, synthesis requests, and the per-job outcome
//! records produced by the fallback chain and the batch scheduler.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, SpeechError};

/// Supported audio formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    /// Opus codec in an Ogg container
    Opus,
    /// OGG container
    Ogg,
    /// MP3 format
    Mp3,
    /// WAV format (uncompressed)
    Wav,
    /// FLAC format (lossless)
    Flac,
    /// WebM format
    Webm,
    /// M4A/AAC or ALAC in an MPEG-4 container
    M4a,
}

impl AudioFormat {
    /// Get the file extension for this audio format
    #[must_use]
    pub const fn extension(&self) -> &'static str {
        match self {
            Self::Opus => "opus",
            Self::Ogg => "ogg",
            Self::Mp3 => "mp3",
            Self::Wav => "wav",
            Self::Flac => "flac",
            Self::Webm => "webm",
            Self::M4a => "m4a",
        }
    }

    /// Parse audio format from a file extension (case-insensitive, without dot)
    #[must_use]
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "opus" => Some(Self::Opus),
            "ogg" | "oga" => Some(Self::Ogg),
            "mp3" => Some(Self::Mp3),
            "wav" | "wave" => Some(Self::Wav),
            "flac" => Some(Self::Flac),
            "webm" => Some(Self::Webm),
            "m4a" | "aac" | "mp4" => Some(Self::M4a),
            _ => None,
        }
    }

    /// Parse audio format from a Content-Type value
    #[must_use]
    pub fn from_mime_type(mime: &str) -> Option<Self> {
        // Handle compound MIME types like "audio/ogg; codecs=opus"
        let base_mime = mime.split(';').next().unwrap_or(mime).trim();

        match base_mime {
            "audio/opus" => Some(Self::Opus),
            "audio/ogg" => {
                if mime.contains("codecs=opus") {
                    Some(Self::Opus)
                } else {
                    Some(Self::Ogg)
                }
            },
            "audio/mpeg" | "audio/mp3" => Some(Self::Mp3),
            "audio/wav" | "audio/x-wav" | "audio/wave" => Some(Self::Wav),
            "audio/flac" | "audio/x-flac" => Some(Self::Flac),
            "audio/webm" => Some(Self::Webm),
            "audio/m4a" | "audio/mp4" | "audio/x-m4a" | "audio/aac" => Some(Self::M4a),
            _ => None,
        }
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl std::str::FromStr for AudioFormat {
    type Err = SpeechError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_extension(s.trim_start_matches('.'))
            .ok_or_else(|| SpeechError::Configuration(format!("Unknown audio format: {s}")))
    }
}

/// Container for audio data with metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioData {
    /// Raw audio bytes
    data: Vec<u8>,
    /// Audio format
    format: AudioFormat,
}

impl AudioData {
    /// Create new audio data
    #[must_use]
    pub const fn new(data: Vec<u8>, format: AudioFormat) -> Self {
        Self { data, format }
    }

    /// Get the raw audio bytes
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Consume and return the raw audio bytes
    #[must_use]
    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    /// Get the audio format
    #[must_use]
    pub const fn format(&self) -> AudioFormat {
        self.format
    }

    /// Get the size of the audio data in bytes
    #[must_use]
    pub fn size_bytes(&self) -> usize {
        self.data.len()
    }

    /// Check if the audio data is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// One unit of text to turn into an audio file
///
/// Immutable once built. Emptiness is checked when an engine picks the
/// request up, so that an empty chapter still yields a failure record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesisRequest {
    text: String,
    voice: Option<String>,
    output_path: PathBuf,
    format: AudioFormat,
}

impl SynthesisRequest {
    /// Create a request that writes `text` to `output_path` as `format`
    #[must_use]
    pub fn new(text: impl Into<String>, output_path: impl Into<PathBuf>, format: AudioFormat) -> Self {
        Self {
            text: text.into(),
            voice: None,
            output_path: output_path.into(),
            format,
        }
    }

    /// Override the engine's configured voice
    #[must_use]
    pub fn with_voice(mut self, voice: impl Into<String>) -> Self {
        self.voice = Some(voice.into());
        self
    }

    /// Text to synthesize
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Voice override, if any
    #[must_use]
    pub fn voice(&self) -> Option<&str> {
        self.voice.as_deref()
    }

    /// Destination of the final artifact
    #[must_use]
    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    /// Requested container format
    #[must_use]
    pub const fn format(&self) -> AudioFormat {
        self.format
    }

    /// Reject requests no engine could serve
    pub fn validate(&self) -> Result<(), SpeechError> {
        if self.text.trim().is_empty() {
            return Err(SpeechError::InvalidInput(
                "Cannot synthesize empty text".to_string(),
            ));
        }
        if self.output_path.as_os_str().is_empty() {
            return Err(SpeechError::InvalidInput(
                "Output path must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Audio file produced for a job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SynthesisArtifact {
    /// Final location on disk
    pub path: PathBuf,
    /// File size in bytes
    pub bytes: u64,
    /// Actual container format of the file
    pub format: AudioFormat,
    /// Name of the engine that produced it
    pub engine: String,
    /// Attempts spent on the successful engine
    pub attempts: u32,
    /// True when the requested format could not be produced
    pub downgraded: bool,
}

/// Why a job produced no artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SynthesisFailure {
    /// Classification of the last error
    pub kind: ErrorKind,
    /// Human-readable detail, prefixed with the engine name
    pub detail: String,
    /// Whether the last error was a retryable kind
    pub retryable: bool,
    /// Number of engines tried before giving up
    pub engines_attempted: usize,
}

impl SynthesisFailure {
    /// Build a failure record from an error
    #[must_use]
    pub fn from_error(err: &SpeechError, engines_attempted: usize) -> Self {
        let kind = err.kind();
        Self {
            kind,
            detail: err.to_string(),
            retryable: kind.is_retryable(),
            engines_attempted,
        }
    }
}

impl fmt::Display for SynthesisFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.detail, self.kind)
    }
}

/// Outcome of one synthesis job
pub type SynthesisResult = Result<SynthesisArtifact, SynthesisFailure>;

/// Identifier of a job within a batch
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Create a job identifier
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the identifier
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// A request tagged with its job identifier
#[derive(Debug, Clone)]
pub struct BatchJob {
    /// Job identifier, unique within the batch
    pub id: JobId,
    /// What to synthesize
    pub request: SynthesisRequest,
}

impl BatchJob {
    /// Create a batch job
    #[must_use]
    pub fn new(id: impl Into<JobId>, request: SynthesisRequest) -> Self {
        Self {
            id: id.into(),
            request,
        }
    }
}

/// Outcome record for one job in a batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobReport {
    /// Job identifier
    pub job_id: JobId,
    /// Requested destination
    pub destination: PathBuf,
    /// Artifact or failure
    #[serde(with = "outcome_serde")]
    pub outcome: SynthesisResult,
}

impl JobReport {
    /// Whether the job produced an artifact
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// Serializes `Result` as `{"status": "ok", ...}` / `{"status": "failed", ...}`
mod outcome_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    use super::{SynthesisArtifact, SynthesisFailure, SynthesisResult};

    #[derive(Serialize, Deserialize)]
    #[serde(tag = "status", rename_all = "snake_case")]
    enum Outcome {
        Ok(SynthesisArtifact),
        Failed(SynthesisFailure),
    }

    pub fn serialize<S: Serializer>(value: &SynthesisResult, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Ok(artifact) => Outcome::Ok(artifact.clone()),
            Err(failure) => Outcome::Failed(failure.clone()),
        }
        .serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<SynthesisResult, D::Error> {
        Ok(match Outcome::deserialize(deserializer)? {
            Outcome::Ok(artifact) => Ok(artifact),
            Outcome::Failed(failure) => Err(failure),
        })
    }
}

/// Aggregate counts over a finished batch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    /// Jobs submitted
    pub total: usize,
    /// Jobs with an artifact
    pub succeeded: usize,
    /// Jobs without an artifact
    pub failed: usize,
    /// Successful jobs whose artifact is not in the requested format
    pub downgraded: usize,
    /// Total bytes written
    pub bytes_written: u64,
}

impl BatchSummary {
    /// Summarize a set of job reports
    #[must_use]
    pub fn from_reports(reports: &[JobReport]) -> Self {
        reports.iter().fold(Self::default(), |mut acc, report| {
            acc.total += 1;
            match &report.outcome {
                Ok(artifact) => {
                    acc.succeeded += 1;
                    acc.bytes_written += artifact.bytes;
                    if artifact.downgraded {
                        acc.downgraded += 1;
                    }
                },
                Err(_) => acc.failed += 1,
            }
            acc
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod audio_format_tests {
        use super::*;

        #[test]
        fn extension_and_display() {
            assert_eq!(AudioFormat::Mp3.extension(), "mp3");
            assert_eq!(AudioFormat::M4a.extension(), "m4a");
            assert_eq!(AudioFormat::Wav.to_string(), "wav");
        }

        #[test]
        fn from_extension_is_case_insensitive() {
            assert_eq!(AudioFormat::from_extension("MP3"), Some(AudioFormat::Mp3));
            assert_eq!(AudioFormat::from_extension("aac"), Some(AudioFormat::M4a));
            assert_eq!(AudioFormat::from_extension("txt"), None);
        }

        #[test]
        fn parses_from_str_with_leading_dot() {
            assert_eq!(".wav".parse::<AudioFormat>().unwrap(), AudioFormat::Wav);
            assert!("midi".parse::<AudioFormat>().is_err());
        }

        #[test]
        fn from_mime_type_handles_codecs() {
            assert_eq!(
                AudioFormat::from_mime_type("audio/ogg; codecs=opus"),
                Some(AudioFormat::Opus)
            );
            assert_eq!(
                AudioFormat::from_mime_type("audio/mpeg"),
                Some(AudioFormat::Mp3)
            );
        }
    }

    mod request_tests {
        use super::*;

        #[test]
        fn whitespace_text_is_invalid() {
            let request = SynthesisRequest::new("   \n", "out.mp3", AudioFormat::Mp3);
            let err = request.validate().unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidInput);
        }

        #[test]
        fn voice_override_is_kept() {
            let request =
                SynthesisRequest::new("Xin chào", "out.mp3", AudioFormat::Mp3).with_voice("Linh");
            assert_eq!(request.voice(), Some("Linh"));
            assert!(request.validate().is_ok());
        }
    }

    mod report_tests {
        use super::*;

        fn artifact(bytes: u64, downgraded: bool) -> SynthesisArtifact {
            SynthesisArtifact {
                path: PathBuf::from("a.mp3"),
                bytes,
                format: AudioFormat::Mp3,
                engine: "x".to_string(),
                attempts: 1,
                downgraded,
            }
        }

        #[test]
        fn summary_counts_outcomes() {
            let reports = vec![
                JobReport {
                    job_id: JobId::new("1"),
                    destination: PathBuf::from("1.mp3"),
                    outcome: Ok(artifact(10, false)),
                },
                JobReport {
                    job_id: JobId::new("2"),
                    destination: PathBuf::from("2.mp3"),
                    outcome: Ok(artifact(5, true)),
                },
                JobReport {
                    job_id: JobId::new("3"),
                    destination: PathBuf::from("3.mp3"),
                    outcome: Err(SynthesisFailure::from_error(&SpeechError::Cancelled, 0)),
                },
            ];

            let summary = BatchSummary::from_reports(&reports);
            assert_eq!(summary.total, 3);
            assert_eq!(summary.succeeded, 2);
            assert_eq!(summary.failed, 1);
            assert_eq!(summary.downgraded, 1);
            assert_eq!(summary.bytes_written, 15);
        }

        #[test]
        fn report_serializes_with_status_tag() {
            let report = JobReport {
                job_id: JobId::new("ch1"),
                destination: PathBuf::from("ch1.mp3"),
                outcome: Err(SynthesisFailure::from_error(
                    &SpeechError::AuthFailure("bad key".to_string()),
                    2,
                )),
            };

            let json = serde_json::to_value(&report).unwrap();
            assert_eq!(json["job_id"], "ch1");
            assert_eq!(json["outcome"]["status"], "failed");
            assert_eq!(json["outcome"]["kind"], "auth_failure");
            assert_eq!(json["outcome"]["engines_attempted"], 2);

            let back: JobReport = serde_json::from_value(json).unwrap();
            assert_eq!(back, report);
        }
    }
}
