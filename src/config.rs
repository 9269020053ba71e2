use crate::defaults;
use crate::error::{CommentaryError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub pipeline: PipelineSettings,
    pub retry: RetrySettings,
    pub context: ContextSettings,
    pub transcription: TranscriptionSettings,
    pub rewrite: RewriteSettings,
    pub synthesis: SynthesisSettings,
    pub dataset: DatasetSettings,
}

/// Pipeline shape and ordering bounds
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineSettings {
    /// Default source descriptor when `start` is called without one
    pub source: Option<String>,
    pub chunk_duration_ms: u32,
    pub channel_buffer: usize,
    pub max_concurrent_units: usize,
    pub max_hold_ms: u64,
    pub reorder_depth: usize,
    pub drain_grace_ms: u64,
}

/// Retry policy shared by transcription, rewrite and synthesis
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub backoff_multiplier: f64,
    pub max_backoff_ms: u64,
    pub call_timeout_ms: u64,
}

/// Race context refresh configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ContextSettings {
    pub enabled: bool,
    pub refresh_secs: u64,
    pub base_url: String,
}

/// Speech-to-text engine configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TranscriptionSettings {
    pub api_key: String,
    pub model: String,
    pub language: String,
    pub max_fragments: usize,
    pub max_wait_ms: u64,
}

/// Commentary rewrite engine configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RewriteSettings {
    pub api_key: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// Speech synthesis engine configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SynthesisSettings {
    pub api_key: String,
    pub model: String,
    pub speaker: String,
    pub language: String,
    pub pace: f32,
    pub cache_ttl_secs: u64,
    pub cache_capacity: usize,
}

/// Dataset logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DatasetSettings {
    pub enabled: bool,
    pub dir: Option<PathBuf>,
    pub race_name: Option<String>,
    pub queue_capacity: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            source: None,
            chunk_duration_ms: defaults::CHUNK_DURATION_MS,
            channel_buffer: defaults::CHANNEL_BUFFER,
            max_concurrent_units: defaults::MAX_CONCURRENT_UNITS,
            max_hold_ms: defaults::MAX_HOLD_MS,
            reorder_depth: defaults::REORDER_DEPTH,
            drain_grace_ms: defaults::DRAIN_GRACE_MS,
        }
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: defaults::RETRY_MAX_ATTEMPTS,
            initial_backoff_ms: defaults::RETRY_INITIAL_BACKOFF_MS,
            backoff_multiplier: defaults::RETRY_BACKOFF_MULTIPLIER,
            max_backoff_ms: defaults::RETRY_MAX_BACKOFF_MS,
            call_timeout_ms: defaults::CALL_TIMEOUT_MS,
        }
    }
}

impl Default for ContextSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            refresh_secs: defaults::CONTEXT_REFRESH_SECS,
            base_url: defaults::OPENF1_BASE_URL.to_string(),
        }
    }
}

impl Default for TranscriptionSettings {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: defaults::TRANSCRIPTION_MODEL.to_string(),
            language: defaults::ENGLISH_LANGUAGE.to_string(),
            max_fragments: defaults::MAX_FRAGMENTS,
            max_wait_ms: defaults::MAX_SENTENCE_WAIT_MS,
        }
    }
}

impl Default for RewriteSettings {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: defaults::REWRITE_MODEL.to_string(),
            max_tokens: defaults::REWRITE_MAX_TOKENS,
            temperature: defaults::REWRITE_TEMPERATURE,
        }
    }
}

impl Default for SynthesisSettings {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: defaults::SYNTHESIS_MODEL.to_string(),
            speaker: defaults::SYNTHESIS_SPEAKER.to_string(),
            language: defaults::SYNTHESIS_LANGUAGE.to_string(),
            pace: defaults::SYNTHESIS_PACE,
            cache_ttl_secs: defaults::PHRASE_CACHE_TTL_SECS,
            cache_capacity: defaults::PHRASE_CACHE_CAPACITY,
        }
    }
}

impl Default for DatasetSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            dir: None,
            race_name: None,
            queue_capacity: defaults::DATASET_QUEUE_CAPACITY,
        }
    }
}

impl PipelineSettings {
    pub fn chunk_duration(&self) -> Duration {
        Duration::from_millis(u64::from(self.chunk_duration_ms))
    }

    pub fn max_hold(&self) -> Duration {
        Duration::from_millis(self.max_hold_ms)
    }

    pub fn drain_grace(&self) -> Duration {
        Duration::from_millis(self.drain_grace_ms)
    }
}

impl DatasetSettings {
    /// Directory the JSONL files are written to.
    ///
    /// Defaults to `~/.local/share/commentcast/datasets`.
    pub fn resolved_dir(&self) -> PathBuf {
        self.dir.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from(".local/share"))
                .join("commentcast")
                .join("datasets")
        })
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Returns an error if the file contains invalid TOML.
    /// Missing fields will use default values.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from a file or return defaults if the file doesn't exist
    ///
    /// Only a missing file yields defaults; invalid TOML is an error.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        match Self::load(path) {
            Ok(config) => Ok(config),
            Err(e) => {
                let missing = e
                    .downcast_ref::<std::io::Error>()
                    .is_some_and(|io_err| io_err.kind() == std::io::ErrorKind::NotFound);
                if missing {
                    Ok(Self::default())
                } else {
                    Err(CommentaryError::ConfigParse {
                        message: format!("{}: {}", path.display(), e),
                    })
                }
            }
        }
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - DEEPGRAM_API_KEY → transcription.api_key
    /// - GROQ_API_KEY → rewrite.api_key
    /// - SARVAM_API_KEY → synthesis.api_key
    /// - COMMENTCAST_SOURCE → pipeline.source
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(key) = std::env::var("DEEPGRAM_API_KEY")
            && !key.is_empty()
        {
            self.transcription.api_key = key;
        }

        if let Ok(key) = std::env::var("GROQ_API_KEY")
            && !key.is_empty()
        {
            self.rewrite.api_key = key;
        }

        if let Ok(key) = std::env::var("SARVAM_API_KEY")
            && !key.is_empty()
        {
            self.synthesis.api_key = key;
        }

        if let Ok(source) = std::env::var("COMMENTCAST_SOURCE")
            && !source.is_empty()
        {
            self.pipeline.source = Some(source);
        }

        self
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        fn invalid(key: &str, message: &str) -> CommentaryError {
            CommentaryError::ConfigInvalidValue {
                key: key.to_string(),
                message: message.to_string(),
            }
        }

        if self.pipeline.chunk_duration_ms == 0 {
            return Err(invalid("pipeline.chunk_duration_ms", "must be positive"));
        }
        if self.pipeline.channel_buffer == 0 {
            return Err(invalid("pipeline.channel_buffer", "must be positive"));
        }
        if self.pipeline.max_concurrent_units == 0 {
            return Err(invalid("pipeline.max_concurrent_units", "must be positive"));
        }
        if self.pipeline.reorder_depth == 0 {
            return Err(invalid("pipeline.reorder_depth", "must be positive"));
        }
        if self.retry.max_attempts == 0 {
            return Err(invalid("retry.max_attempts", "must be at least 1"));
        }
        if self.retry.backoff_multiplier < 1.0 {
            return Err(invalid("retry.backoff_multiplier", "must be >= 1.0"));
        }
        if self.retry.call_timeout_ms >= u64::from(self.pipeline.chunk_duration_ms) {
            return Err(invalid(
                "retry.call_timeout_ms",
                "must be shorter than pipeline.chunk_duration_ms",
            ));
        }
        if self.context.refresh_secs == 0 {
            return Err(invalid("context.refresh_secs", "must be positive"));
        }
        Ok(())
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/commentcast/config.toml on Linux
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join("commentcast")
            .join("config.toml")
    }
}
