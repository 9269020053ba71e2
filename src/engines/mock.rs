//! Scripted engines for tests and offline runs.
//!
//! Every mock counts its calls so tests can assert how often an engine
//! was invoked, independent of how many listeners are attached.

use super::{RewriteRequest, Rewriter, Synthesizer, Transcriber};
use crate::defaults;
use crate::error::{CommentaryError, Result};
use crate::pipeline::types::AudioChunk;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Mock transcriber with per-sequence responses, delays and failures.
#[derive(Debug, Default)]
pub struct MockTranscriber {
    name: String,
    response: String,
    responses: HashMap<u64, String>,
    delays: HashMap<u64, Duration>,
    /// Remaining failures per sequence number before the call succeeds.
    failures: Mutex<HashMap<u64, u32>>,
    should_fail: bool,
    calls: AtomicUsize,
}

impl MockTranscriber {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            response: "mock transcription.".to_string(),
            ..Default::default()
        }
    }

    /// Response for every chunk without a specific one.
    pub fn with_response(mut self, response: &str) -> Self {
        self.response = response.to_string();
        self
    }

    pub fn with_response_for(mut self, sequence: u64, response: &str) -> Self {
        self.responses.insert(sequence, response.to_string());
        self
    }

    /// Sleep before answering for `sequence`.
    pub fn with_delay_for(mut self, sequence: u64, delay: Duration) -> Self {
        self.delays.insert(sequence, delay);
        self
    }

    /// Fail the first `count` calls for `sequence`.
    pub fn with_failures_for(self, sequence: u64, count: u32) -> Self {
        if let Ok(mut failures) = self.failures.lock() {
            failures.insert(sequence, count);
        }
        self
    }

    /// Fail every call.
    pub fn with_failure(mut self) -> Self {
        self.should_fail = true;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn take_failure(&self, sequence: u64) -> bool {
        let Ok(mut failures) = self.failures.lock() else {
            return false;
        };
        match failures.get_mut(&sequence) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }
}

#[async_trait]
impl Transcriber for MockTranscriber {
    async fn transcribe(&self, chunk: &AudioChunk) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some(delay) = self.delays.get(&chunk.sequence) {
            tokio::time::sleep(*delay).await;
        }

        if self.should_fail || self.take_failure(chunk.sequence) {
            return Err(CommentaryError::TranscriptionFailure {
                message: format!("mock transcription failure for chunk {}", chunk.sequence),
            });
        }

        Ok(self
            .responses
            .get(&chunk.sequence)
            .cloned()
            .unwrap_or_else(|| self.response.clone()))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Mock rewrite engine. Answers `"తెలుగు: <english>"` unless scripted otherwise.
#[derive(Debug, Default)]
pub struct MockRewriter {
    response: Option<String>,
    delays: Vec<(String, Duration)>,
    failing: Vec<String>,
    should_fail: bool,
    requests: Mutex<Vec<RewriteRequest>>,
    calls: AtomicUsize,
}

impl MockRewriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fixed answer for every request.
    pub fn with_response(mut self, response: &str) -> Self {
        self.response = Some(response.to_string());
        self
    }

    /// Sleep before answering requests whose English text contains `needle`.
    pub fn with_delay_when(mut self, needle: &str, delay: Duration) -> Self {
        self.delays.push((needle.to_string(), delay));
        self
    }

    /// Fail every request whose English text contains `needle`.
    pub fn with_failure_when(mut self, needle: &str) -> Self {
        self.failing.push(needle.to_string());
        self
    }

    pub fn with_failure(mut self) -> Self {
        self.should_fail = true;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Every request received, in call order.
    pub fn requests(&self) -> Vec<RewriteRequest> {
        self.requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Rewriter for MockRewriter {
    async fn rewrite(&self, request: &RewriteRequest) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }

        if let Some((_, delay)) = self
            .delays
            .iter()
            .find(|(needle, _)| request.english.contains(needle.as_str()))
        {
            tokio::time::sleep(*delay).await;
        }

        if self.should_fail
            || self
                .failing
                .iter()
                .any(|needle| request.english.contains(needle.as_str()))
        {
            return Err(CommentaryError::RewriteFailure {
                message: "mock rewrite failure".to_string(),
            });
        }

        Ok(self
            .response
            .clone()
            .unwrap_or_else(|| format!("తెలుగు: {}", request.english)))
    }

    fn name(&self) -> &str {
        "mock-rewriter"
    }
}

/// Mock synthesis engine. Returns the UTF-8 bytes of the text as "audio".
#[derive(Debug, Default)]
pub struct MockSynthesizer {
    delays: Vec<(String, Duration)>,
    failing: Vec<String>,
    should_fail: bool,
    calls: AtomicUsize,
}

impl MockSynthesizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep before synthesizing text containing `needle`.
    pub fn with_delay_when(mut self, needle: &str, delay: Duration) -> Self {
        self.delays.push((needle.to_string(), delay));
        self
    }

    /// Fail every call for text containing `needle`.
    pub fn with_failure_when(mut self, needle: &str) -> Self {
        self.failing.push(needle.to_string());
        self
    }

    pub fn with_failure(mut self) -> Self {
        self.should_fail = true;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Synthesizer for MockSynthesizer {
    async fn synthesize(&self, telugu: &str) -> Result<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some((_, delay)) = self
            .delays
            .iter()
            .find(|(needle, _)| telugu.contains(needle.as_str()))
        {
            tokio::time::sleep(*delay).await;
        }

        if self.should_fail || self.failing.iter().any(|needle| telugu.contains(needle.as_str())) {
            return Err(CommentaryError::SynthesisFailure {
                message: "mock synthesis failure".to_string(),
            });
        }

        Ok(telugu.as_bytes().to_vec())
    }

    fn mime_type(&self) -> &str {
        defaults::SYNTHESIS_MIME_TYPE
    }

    fn name(&self) -> &str {
        "mock-synthesizer"
    }
}
