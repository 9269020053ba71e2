//! External engine boundaries: transcription, rewrite and synthesis.
//!
//! Each engine is a fallible, latency-variable request/response call.
//! Stations only see these traits; the HTTP adapters live behind the
//! `remote` feature and the scripted mocks are always available.

pub mod mock;

#[cfg(feature = "remote")]
pub mod deepgram;
#[cfg(feature = "remote")]
pub mod groq;
#[cfg(feature = "remote")]
pub mod sarvam;

use crate::error::Result;
use crate::pipeline::types::{AudioChunk, EventCategory};
use async_trait::async_trait;
use std::sync::Arc;

pub use mock::{MockRewriter, MockSynthesizer, MockTranscriber};

/// Speech-to-text engine.
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe one chunk. An empty string means no speech.
    async fn transcribe(&self, chunk: &AudioChunk) -> Result<String>;

    /// Engine / model name for logs and health output.
    fn name(&self) -> &str;
}

/// Everything the rewrite engine needs for one line of commentary.
#[derive(Debug, Clone, PartialEq)]
pub struct RewriteRequest {
    pub english: String,
    pub category: EventCategory,
    /// Compact race summary, absent when no snapshot has been fetched yet.
    pub context_line: Option<String>,
}

impl RewriteRequest {
    pub fn new(english: impl Into<String>, category: EventCategory) -> Self {
        Self {
            english: english.into(),
            category,
            context_line: None,
        }
    }

    pub fn with_context(mut self, context_line: impl Into<String>) -> Self {
        let line = context_line.into();
        self.context_line = (!line.is_empty()).then_some(line);
        self
    }
}

/// English-to-Telugu commentary engine.
///
/// Calls must be idempotent per request: the same request may be retried.
#[async_trait]
pub trait Rewriter: Send + Sync {
    /// Returns raw engine output; interpretation (skip marker, trimming) is the station's job.
    async fn rewrite(&self, request: &RewriteRequest) -> Result<String>;

    fn name(&self) -> &str;
}

/// Telugu text-to-speech engine.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Encoded audio for `telugu`.
    async fn synthesize(&self, telugu: &str) -> Result<Vec<u8>>;

    /// MIME type of the bytes returned by [`synthesize`](Self::synthesize).
    fn mime_type(&self) -> &str;

    fn name(&self) -> &str;
}

/// The three engines a pipeline session drives.
#[derive(Clone)]
pub struct Engines {
    pub transcriber: Arc<dyn Transcriber>,
    pub rewriter: Arc<dyn Rewriter>,
    pub synthesizer: Arc<dyn Synthesizer>,
}

impl std::fmt::Debug for Engines {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engines")
            .field("transcriber", &self.transcriber.name())
            .field("rewriter", &self.rewriter.name())
            .field("synthesizer", &self.synthesizer.name())
            .finish()
    }
}

impl Engines {
    /// Scripted engines with default behaviour.
    pub fn mock() -> Self {
        Self {
            transcriber: Arc::new(MockTranscriber::new("mock")),
            rewriter: Arc::new(MockRewriter::new()),
            synthesizer: Arc::new(MockSynthesizer::new()),
        }
    }

    /// HTTP engines configured from `config`. Fails when an API key is missing.
    #[cfg(feature = "remote")]
    pub fn from_config(config: &crate::config::Config) -> Result<Self> {
        Ok(Self {
            transcriber: Arc::new(deepgram::DeepgramTranscriber::new(&config.transcription)?),
            rewriter: Arc::new(groq::GroqRewriter::new(&config.rewrite)?),
            synthesizer: Arc::new(sarvam::SarvamSynthesizer::new(&config.synthesis)?),
        })
    }
}
