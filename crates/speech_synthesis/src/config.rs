//! Configuration for speech synthesis
//!
//! A [`SynthesisConfig`] names every engine the registry may build, the order
//! the fallback chain tries them in, and the retry and scheduling knobs.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::PathBuf;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::error::SpeechError;

/// Top-level synthesis configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesisConfig {
    /// Maximum number of jobs synthesizing at the same time
    #[serde(default = "default_concurrency_limit")]
    pub concurrency_limit: usize,

    /// Upper bound of the random delay before each batch job starts
    #[serde(default = "default_start_jitter_ms")]
    pub max_jitter_ms: u64,

    /// Retry settings shared by all engines unless overridden
    #[serde(default)]
    pub retry: RetrySettings,

    /// Engine names in the order the fallback chain tries them
    #[serde(default)]
    pub fallback_order: Vec<String>,

    /// Engine descriptors keyed by name
    #[serde(default)]
    pub engines: BTreeMap<String, EngineDescriptor>,

    /// External transcoder settings
    #[serde(default)]
    pub transcoder: TranscoderConfig,
}

/// Retry and backoff settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Attempts per engine, including the first one
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry; doubled for every further retry
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Extra wait added after a rate-limit response
    #[serde(default = "default_rate_limit_cooldown_ms")]
    pub rate_limit_cooldown_ms: u64,

    /// Upper bound of the random jitter added to each backoff
    #[serde(default = "default_backoff_jitter_ms")]
    pub max_jitter_ms: u64,
}

/// Engine implementation to instantiate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EngineKind {
    /// macOS `say` command
    #[serde(rename = "macos_say")]
    MacosSay,
    /// Piper neural TTS CLI
    #[serde(rename = "piper")]
    Piper,
    /// OpenAI speech endpoint
    #[serde(rename = "openai")]
    OpenAi,
    /// Azure Cognitive Services Speech
    #[serde(rename = "azure")]
    Azure,
    /// Google Cloud Text-to-Speech
    #[serde(rename = "google_cloud")]
    GoogleCloud,
    /// FPT.AI Vietnamese TTS
    #[serde(rename = "fpt_ai")]
    FptAi,
    /// Google Translate TTS endpoint
    #[serde(rename = "gtts")]
    Gtts,
    /// Microsoft Edge read-aloud service
    #[serde(rename = "edge_tts")]
    EdgeTts,
}

impl EngineKind {
    /// Configuration name of this kind
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MacosSay => "macos_say",
            Self::Piper => "piper",
            Self::OpenAi => "openai",
            Self::Azure => "azure",
            Self::GoogleCloud => "google_cloud",
            Self::FptAi => "fpt_ai",
            Self::Gtts => "gtts",
            Self::EdgeTts => "edge_tts",
        }
    }

    /// Whether the engine cannot run without a credential
    #[must_use]
    pub const fn requires_credential(self) -> bool {
        matches!(
            self,
            Self::OpenAi | Self::Azure | Self::GoogleCloud | Self::FptAi
        )
    }

    /// Voice used when neither the descriptor nor the request names one
    #[must_use]
    pub const fn default_voice(self) -> &'static str {
        match self {
            Self::MacosSay => "Linh",
            Self::Piper => "default",
            Self::OpenAi => "nova",
            Self::Azure => "vi-VN-HoaiMyNeural",
            Self::GoogleCloud => "vi-VN-Standard-A",
            Self::FptAi => "banmai",
            Self::Gtts => "vi",
            Self::EdgeTts => "vi-VN-NamMinhNeural",
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declarative description of one engine instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineDescriptor {
    /// Implementation to use
    pub kind: EngineKind,

    /// Voice identifier; the kind's default when absent
    #[serde(default)]
    pub voice_id: Option<String>,

    /// `env:NAME`, `file:/path` or a literal secret
    #[serde(default)]
    pub credential_ref: Option<String>,

    /// Service region (Azure)
    #[serde(default)]
    pub region: Option<String>,

    /// Speaking rate, 1.0 is normal
    #[serde(default = "default_rate")]
    pub rate: f32,

    /// Voice model file (Piper)
    #[serde(default)]
    pub model_path: Option<PathBuf>,

    /// Executable override for local engines
    #[serde(default)]
    pub executable_path: Option<PathBuf>,

    /// API base URL override for HTTP engines
    #[serde(default)]
    pub base_url: Option<String>,

    /// Provider model name (OpenAI)
    #[serde(default)]
    pub model: Option<String>,

    /// Language code override
    #[serde(default)]
    pub language: Option<String>,

    /// Per-engine override of `retry.max_attempts`
    #[serde(default)]
    pub max_attempts: Option<u32>,

    /// Per-engine override of `retry.base_delay_ms`
    #[serde(default)]
    pub base_delay_ms: Option<u64>,

    /// Lower the engine's chunk size below its provider limit
    #[serde(default)]
    pub max_chunk_chars: Option<usize>,

    /// Pause between consecutive chunk requests
    #[serde(default)]
    pub chunk_pause_ms: Option<u64>,

    /// Request timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

/// External transcoder settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscoderConfig {
    /// FFmpeg binary path (defaults to "ffmpeg" in PATH)
    #[serde(default)]
    pub ffmpeg_path: Option<String>,
}

const fn default_concurrency_limit() -> usize {
    2
}

const fn default_start_jitter_ms() -> u64 {
    500
}

const fn default_max_attempts() -> u32 {
    3
}

const fn default_base_delay_ms() -> u64 {
    2000
}

const fn default_rate_limit_cooldown_ms() -> u64 {
    10_000
}

const fn default_backoff_jitter_ms() -> u64 {
    1000
}

const fn default_rate() -> f32 {
    1.0
}

const fn default_timeout_ms() -> u64 {
    30000 // 30 seconds
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: default_concurrency_limit(),
            max_jitter_ms: default_start_jitter_ms(),
            retry: RetrySettings::default(),
            fallback_order: Vec::new(),
            engines: BTreeMap::new(),
            transcoder: TranscoderConfig::default(),
        }
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            rate_limit_cooldown_ms: default_rate_limit_cooldown_ms(),
            max_jitter_ms: default_backoff_jitter_ms(),
        }
    }
}

impl SynthesisConfig {
    /// Add an engine and append it to the fallback order
    #[must_use]
    pub fn with_engine(mut self, name: impl Into<String>, descriptor: EngineDescriptor) -> Self {
        let name = name.into();
        self.fallback_order.push(name.clone());
        self.engines.insert(name, descriptor);
        self
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns a description of the first problem found.
    pub fn validate(&self) -> Result<(), String> {
        if self.concurrency_limit == 0 {
            return Err("Concurrency limit must be at least 1".to_string());
        }

        self.retry.validate()?;

        if self.fallback_order.is_empty() {
            return Err("Fallback order must name at least one engine".to_string());
        }

        let mut seen = HashSet::new();
        for name in &self.fallback_order {
            if !seen.insert(name.as_str()) {
                return Err(format!("Engine '{name}' appears twice in the fallback order"));
            }
            if !self.engines.contains_key(name) {
                return Err(format!("Fallback order names unknown engine '{name}'"));
            }
        }

        for (name, descriptor) in &self.engines {
            descriptor
                .validate()
                .map_err(|e| format!("Engine '{name}': {e}"))?;
        }

        Ok(())
    }
}

impl RetrySettings {
    /// Apply an engine's overrides
    #[must_use]
    pub fn for_engine(&self, descriptor: &EngineDescriptor) -> Self {
        Self {
            max_attempts: descriptor.max_attempts.unwrap_or(self.max_attempts),
            base_delay_ms: descriptor.base_delay_ms.unwrap_or(self.base_delay_ms),
            ..*self
        }
    }

    /// Validate retry settings
    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts == 0 {
            return Err("Max attempts must be at least 1".to_string());
        }
        Ok(())
    }
}

impl EngineDescriptor {
    /// Descriptor for `kind` with every optional field unset
    #[must_use]
    pub const fn new(kind: EngineKind) -> Self {
        Self {
            kind,
            voice_id: None,
            credential_ref: None,
            region: None,
            rate: default_rate(),
            model_path: None,
            executable_path: None,
            base_url: None,
            model: None,
            language: None,
            max_attempts: None,
            base_delay_ms: None,
            max_chunk_chars: None,
            chunk_pause_ms: None,
            timeout_ms: default_timeout_ms(),
        }
    }

    /// Set the voice
    #[must_use]
    pub fn with_voice(mut self, voice: impl Into<String>) -> Self {
        self.voice_id = Some(voice.into());
        self
    }

    /// Set the credential reference
    #[must_use]
    pub fn with_credential(mut self, credential_ref: impl Into<String>) -> Self {
        self.credential_ref = Some(credential_ref.into());
        self
    }

    /// Set the API base URL
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Configured voice, or the kind's default
    #[must_use]
    pub fn voice(&self) -> &str {
        self.voice_id
            .as_deref()
            .unwrap_or_else(|| self.kind.default_voice())
    }

    /// Resolve the credential reference into a secret
    ///
    /// # Errors
    ///
    /// Returns `SpeechError::Configuration` if the kind needs a credential and
    /// none is configured, or the reference cannot be resolved.
    pub fn credential(&self) -> Result<Option<SecretString>, SpeechError> {
        match self.credential_ref.as_deref() {
            Some(reference) => resolve_credential(reference).map(Some),
            None if self.kind.requires_credential() => Err(SpeechError::Configuration(format!(
                "{} engine requires a credential_ref",
                self.kind
            ))),
            None => Ok(None),
        }
    }

    /// Validate the descriptor without touching the filesystem or environment
    pub fn validate(&self) -> Result<(), String> {
        if !(0.5..=2.0).contains(&self.rate) {
            return Err(format!(
                "Rate must be between 0.5 and 2.0, got {}",
                self.rate
            ));
        }

        if self.timeout_ms == 0 {
            return Err("Timeout must be greater than 0".to_string());
        }

        if self.max_attempts == Some(0) {
            return Err("Max attempts must be at least 1".to_string());
        }

        if self.max_chunk_chars == Some(0) {
            return Err("Max chunk size must be greater than 0".to_string());
        }

        if self.kind.requires_credential() && self.credential_ref.is_none() {
            return Err(format!("{} engine requires a credential_ref", self.kind));
        }

        match self.kind {
            EngineKind::Azure
                if self.region.as_deref().is_none_or(str::is_empty) && self.base_url.is_none() =>
            {
                Err("Azure engine requires a region".to_string())
            },
            EngineKind::Piper if self.model_path.is_none() => {
                Err("Piper engine requires a model_path".to_string())
            },
            _ => Ok(()),
        }
    }
}

/// Resolve a credential reference
///
/// `env:NAME` reads an environment variable, `file:/path` reads and trims a
/// file, anything else is taken literally.
///
/// # Errors
///
/// Returns `SpeechError::Configuration` if the variable or file is missing or
/// the resolved value is empty.
pub fn resolve_credential(reference: &str) -> Result<SecretString, SpeechError> {
    let value = if let Some(var) = reference.strip_prefix("env:") {
        std::env::var(var).map_err(|_| {
            SpeechError::Configuration(format!("Environment variable {var} is not set"))
        })?
    } else if let Some(path) = reference.strip_prefix("file:") {
        std::fs::read_to_string(path)
            .map_err(|e| {
                SpeechError::Configuration(format!("Failed to read credential file {path}: {e}"))
            })?
            .trim()
            .to_string()
    } else {
        reference.to_string()
    };

    if value.trim().is_empty() {
        return Err(SpeechError::Configuration(
            "Credential resolved to an empty value".to_string(),
        ));
    }

    Ok(SecretString::from(value))
}
