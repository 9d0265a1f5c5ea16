//! Engine registry
//!
//! Turns a [`SynthesisConfig`] into engines and a [`FallbackChain`]. Every
//! check that can run without synthesizing happens here, so a misconfigured
//! engine fails before any job is scheduled.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use crate::classifier::{ErrorClassifier, HeuristicClassifier};
use crate::config::{EngineDescriptor, EngineKind, SynthesisConfig};
use crate::converter::FfmpegTranscoder;
use crate::error::SpeechError;
use crate::fallback::FallbackChain;
use crate::normalizer::FormatNormalizer;
use crate::ports::{SynthesisEngine, Transcoder};
use crate::providers::{
    AzureEngine, EdgeTtsEngine, FptAiEngine, GoogleCloudEngine, GttsEngine, MacosSayEngine,
    OpenAiEngine, PiperEngine,
};
use crate::retry::RetryPolicy;

/// Builds engines and fallback chains from configuration
#[derive(Debug, Clone)]
pub struct EngineRegistry {
    classifier: Arc<dyn ErrorClassifier>,
    transcoder: Option<Arc<dyn Transcoder>>,
}

/// Availability of one configured engine
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    /// Engine name from the configuration
    pub name: String,
    /// Implementation kind
    pub kind: EngineKind,
    /// Voice the engine uses by default
    pub voice: String,
    /// Whether the engine reported itself available
    pub available: bool,
    /// Build error, if the engine could not be constructed
    pub error: Option<String>,
}

impl Default for EngineRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineRegistry {
    /// Registry using the heuristic classifier and FFmpeg from configuration
    #[must_use]
    pub fn new() -> Self {
        Self {
            classifier: Arc::new(HeuristicClassifier),
            transcoder: None,
        }
    }

    /// Use a different error classifier for engines and retry policies
    #[must_use]
    pub fn with_classifier(mut self, classifier: Arc<dyn ErrorClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    /// Use `transcoder` instead of building one from configuration
    #[must_use]
    pub fn with_transcoder(mut self, transcoder: Arc<dyn Transcoder>) -> Self {
        self.transcoder = Some(transcoder);
        self
    }

    /// The transcoder chains built from `config` will use
    #[must_use]
    pub fn transcoder_for(&self, config: &SynthesisConfig) -> Arc<dyn Transcoder> {
        if let Some(transcoder) = &self.transcoder {
            return Arc::clone(transcoder);
        }
        match &config.transcoder.ffmpeg_path {
            Some(path) => Arc::new(FfmpegTranscoder::with_ffmpeg_path(path.clone())),
            None => Arc::new(FfmpegTranscoder::new()),
        }
    }

    /// Construct a single engine
    ///
    /// # Errors
    ///
    /// Returns `SpeechError::Configuration` for invalid descriptors, missing
    /// credentials or model files, and `SpeechError::UnsupportedVoice` for
    /// voices outside a provider's catalog.
    pub fn build_engine(
        &self,
        name: &str,
        descriptor: &EngineDescriptor,
    ) -> Result<Arc<dyn SynthesisEngine>, SpeechError> {
        descriptor
            .validate()
            .map_err(|e| SpeechError::Configuration(format!("Engine '{name}': {e}")))?;

        let classifier = Arc::clone(&self.classifier);
        let engine: Arc<dyn SynthesisEngine> = match descriptor.kind {
            EngineKind::MacosSay => Arc::new(MacosSayEngine::new(name, descriptor, classifier)?),
            EngineKind::Piper => Arc::new(PiperEngine::new(name, descriptor, classifier)?),
            EngineKind::OpenAi => Arc::new(OpenAiEngine::new(name, descriptor, classifier)?),
            EngineKind::Azure => Arc::new(AzureEngine::new(name, descriptor, classifier)?),
            EngineKind::GoogleCloud => {
                Arc::new(GoogleCloudEngine::new(name, descriptor, classifier)?)
            },
            EngineKind::FptAi => Arc::new(FptAiEngine::new(name, descriptor, classifier)?),
            EngineKind::Gtts => Arc::new(GttsEngine::new(name, descriptor, classifier)?),
            EngineKind::EdgeTts => Arc::new(EdgeTtsEngine::new(name, descriptor, classifier)?),
        };

        debug!(engine = name, kind = %descriptor.kind, voice = engine.default_voice(), "Built engine");
        Ok(engine)
    }

    /// Build the fallback chain described by `config`
    ///
    /// # Errors
    ///
    /// Returns `SpeechError::Configuration` if the configuration is invalid or
    /// any engine cannot be built, or `SpeechError::UnsupportedVoice` for a
    /// voice detectable as unsupported.
    pub fn build(&self, config: &SynthesisConfig) -> Result<FallbackChain, SpeechError> {
        config.validate().map_err(SpeechError::Configuration)?;

        let normalizer = FormatNormalizer::new(self.transcoder_for(config));
        let mut builder = FallbackChain::builder(normalizer);

        for name in &config.fallback_order {
            let descriptor = config.engines.get(name).ok_or_else(|| {
                SpeechError::Configuration(format!("Fallback order names unknown engine '{name}'"))
            })?;

            let engine = self.build_engine(name, descriptor)?;
            let policy = RetryPolicy::from_settings(&config.retry.for_engine(descriptor))
                .with_classifier(Arc::clone(&self.classifier));
            builder = builder.engine(engine, policy);
        }

        let chain = builder.build()?;
        info!(
            engines = ?config.fallback_order,
            "Fallback chain ready"
        );
        Ok(chain)
    }

    /// Build every engine in fallback order and ask whether it is available
    ///
    /// Build errors are reported per engine instead of failing the whole call.
    pub async fn check_availability(&self, config: &SynthesisConfig) -> Vec<EngineStatus> {
        let mut statuses = Vec::with_capacity(config.fallback_order.len());

        for name in &config.fallback_order {
            let Some(descriptor) = config.engines.get(name) else {
                continue;
            };

            let status = match self.build_engine(name, descriptor) {
                Ok(engine) => EngineStatus {
                    name: name.clone(),
                    kind: descriptor.kind,
                    voice: engine.default_voice().to_string(),
                    available: engine.is_available().await,
                    error: None,
                },
                Err(e) => EngineStatus {
                    name: name.clone(),
                    kind: descriptor.kind,
                    voice: descriptor.voice().to_string(),
                    available: false,
                    error: Some(e.to_string()),
                },
            };
            statuses.push(status);
        }

        statuses
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::error::ErrorKind;

    fn gtts() -> EngineDescriptor {
        EngineDescriptor::new(EngineKind::Gtts).with_base_url("http://127.0.0.1:9")
    }

    fn openai() -> EngineDescriptor {
        EngineDescriptor::new(EngineKind::OpenAi)
            .with_credential("sk-test")
            .with_base_url("http://127.0.0.1:9")
    }

    #[test]
    fn builds_chain_in_fallback_order() {
        let config = SynthesisConfig::default()
            .with_engine("primary", openai())
            .with_engine("backup", gtts());

        let chain = EngineRegistry::new().build(&config).unwrap();

        let names: Vec<&str> = chain.links().iter().map(|l| l.name()).collect();
        assert_eq!(names, vec!["primary", "backup"]);
    }

    #[test]
    fn keyless_edge_engine_builds_with_defaults() {
        let config = SynthesisConfig::default()
            .with_engine("edge", EngineDescriptor::new(EngineKind::EdgeTts))
            .with_engine("backup", gtts());

        let chain = EngineRegistry::new().build(&config).unwrap();

        let edge = chain.links()[0].engine();
        assert_eq!(edge.default_voice(), "vi-VN-NamMinhNeural");
        assert_eq!(edge.chunk_limit().map(|l| l.max()), Some(1500));
    }

    #[test]
    fn per_engine_attempts_reach_policy() {
        let mut backup = gtts();
        backup.max_attempts = Some(5);
        let config = SynthesisConfig::default()
            .with_engine("primary", openai())
            .with_engine("backup", backup);

        let chain = EngineRegistry::new().build(&config).unwrap();

        assert_eq!(chain.links()[0].policy().max_attempts(), 3);
        assert_eq!(chain.links()[1].policy().max_attempts(), 5);
    }

    #[test]
    fn missing_credential_fails_at_build() {
        let config = SynthesisConfig::default()
            .with_engine("openai", EngineDescriptor::new(EngineKind::OpenAi));

        let err = EngineRegistry::new().build(&config).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn unresolvable_credential_fails_at_build() {
        let descriptor = EngineDescriptor::new(EngineKind::OpenAi)
            .with_credential("env:NARRATOR_TEST_SURELY_UNSET_VARIABLE");
        let config = SynthesisConfig::default().with_engine("openai", descriptor);

        let err = EngineRegistry::new().build(&config).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn missing_piper_model_fails_at_build() {
        let mut descriptor = EngineDescriptor::new(EngineKind::Piper);
        descriptor.model_path = Some(PathBuf::from("/nonexistent/voice.onnx"));
        let config = SynthesisConfig::default().with_engine("piper", descriptor);

        let err = EngineRegistry::new().build(&config).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn catalog_voice_mismatch_fails_at_build() {
        let config = SynthesisConfig::default()
            .with_engine("openai", openai().with_voice("vi-VN-HoaiMyNeural"));

        let err = EngineRegistry::new().build(&config).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedVoice);
    }

    #[test]
    fn empty_fallback_order_is_rejected() {
        let err = EngineRegistry::new()
            .build(&SynthesisConfig::default())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[tokio::test]
    async fn availability_reports_build_errors_per_engine() {
        let mut piper = EngineDescriptor::new(EngineKind::Piper);
        piper.model_path = Some(PathBuf::from("/nonexistent/voice.onnx"));
        let mut say = EngineDescriptor::new(EngineKind::MacosSay);
        say.executable_path = Some(PathBuf::from("/nonexistent/say"));

        let config = SynthesisConfig::default()
            .with_engine("piper", piper)
            .with_engine("say", say);

        let statuses = EngineRegistry::new().check_availability(&config).await;

        assert_eq!(statuses.len(), 2);
        assert!(statuses[0].error.is_some());
        assert!(!statuses[0].available);
        assert!(statuses[1].error.is_none());
        assert!(!statuses[1].available);
        assert_eq!(statuses[1].voice, "Linh");
    }
}
