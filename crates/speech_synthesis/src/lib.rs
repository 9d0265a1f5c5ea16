//! Speech synthesis - multi-backend text-to-speech orchestration
//!
//! Turns long texts into audio files through interchangeable engines:
//! - `SynthesisEngine` - one provider, one chunk of text at a time
//! - `Synthesizer` - chunking, joining and atomic writes for one engine
//! - `RetryPolicy` - exponential backoff for transient failures
//! - `FallbackChain` - engines tried strictly in order
//! - `BatchScheduler` - many jobs under a shared concurrency budget
//!
//! # Architecture
//!
//! This crate follows the ports & adapters pattern:
//! - `ports` module defines the traits (ports)
//! - `providers` module contains concrete engines (adapters)
//! - `converter` module contains the FFmpeg transcoder adapter
//!
//! # Supported Engines
//!
//! - macOS `say`, Piper (local)
//! - OpenAI, Azure, Google Cloud, FPT.AI, Google Translate (HTTP)
//! - Microsoft Edge read-aloud (WebSocket)
//!
//! # Example
//!
//! ```ignore
//! use speech_synthesis::{
//!     AudioFormat, BatchJob, BatchScheduler, EngineRegistry, SynthesisConfig, SynthesisRequest,
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! let chain = Arc::new(EngineRegistry::new().build(&config)?);
//! let jobs = vec![BatchJob::new(
//!     "chapter-1",
//!     SynthesisRequest::new(text, "out/chapter-1.mp3", AudioFormat::Mp3),
//! )];
//!
//! let reports = BatchScheduler::from_config(&config)
//!     .run_batch(jobs, chain, &CancellationToken::new())
//!     .await;
//! ```

pub mod artifact;
pub mod chunking;
pub mod classifier;
pub mod concat;
pub mod config;
pub mod converter;
pub mod error;
pub mod fallback;
pub mod normalizer;
pub mod ports;
pub mod providers;
pub mod registry;
pub mod retry;
pub mod scheduler;
pub mod synthesizer;
pub mod types;

pub use chunking::{ChunkLimit, LengthUnit, TextChunker};
pub use classifier::{ErrorClassifier, HeuristicClassifier};
pub use config::{EngineDescriptor, EngineKind, RetrySettings, SynthesisConfig, TranscoderConfig};
pub use converter::FfmpegTranscoder;
pub use error::{ErrorKind, SpeechError};
pub use fallback::{ChainLink, FallbackChain, FallbackChainBuilder};
pub use normalizer::{FormatNormalizer, NormalizedArtifact};
pub use ports::{SynthesisEngine, Transcoder};
pub use registry::{EngineRegistry, EngineStatus};
pub use retry::{RetryOutcome, RetryPolicy, RetryState, with_retry};
pub use scheduler::{BatchScheduler, ConcurrencyBudget};
pub use synthesizer::{CompletedChunks, Synthesizer};
pub use types::{
    AudioData, AudioFormat, BatchJob, BatchSummary, JobId, JobReport, SynthesisArtifact,
    SynthesisFailure, SynthesisRequest, SynthesisResult,
};
