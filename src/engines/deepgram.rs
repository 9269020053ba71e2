//! Deepgram pre-recorded transcription over HTTP.

use super::Transcriber;
use crate::config::TranscriptionSettings;
use crate::error::{CommentaryError, Result};
use crate::pipeline::types::AudioChunk;
use async_trait::async_trait;
use reqwest::header;
use serde::Deserialize;
use std::time::Duration;

const LISTEN_URL: &str = "https://api.deepgram.com/v1/listen";
const HTTP_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Deserialize)]
pub struct ListenResponse {
    pub results: ListenResults,
}

#[derive(Debug, Deserialize)]
pub struct ListenResults {
    #[serde(default)]
    pub channels: Vec<ListenChannel>,
}

#[derive(Debug, Deserialize)]
pub struct ListenChannel {
    #[serde(default)]
    pub alternatives: Vec<ListenAlternative>,
}

#[derive(Debug, Deserialize)]
pub struct ListenAlternative {
    #[serde(default)]
    pub transcript: String,
}

impl ListenResponse {
    /// Best transcript of the first channel; empty when nothing was heard.
    pub fn transcript(&self) -> String {
        self.results
            .channels
            .first()
            .and_then(|channel| channel.alternatives.first())
            .map(|alt| alt.transcript.trim().to_string())
            .unwrap_or_default()
    }
}

/// Transcriber posting each chunk as a WAV file to Deepgram.
pub struct DeepgramTranscriber {
    http: reqwest::Client,
    api_key: String,
    url: String,
    name: String,
}

impl DeepgramTranscriber {
    pub fn new(settings: &TranscriptionSettings) -> Result<Self> {
        if settings.api_key.trim().is_empty() {
            return Err(CommentaryError::ConfigInvalidValue {
                key: "transcription.api_key".to_string(),
                message: "missing (set DEEPGRAM_API_KEY)".to_string(),
            });
        }
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| http_error(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            api_key: settings.api_key.trim().to_string(),
            url: listen_url(&settings.model, &settings.language),
            name: format!("deepgram/{}", settings.model),
        })
    }
}

/// Listen endpoint with model, language and punctuation selected.
pub fn listen_url(model: &str, language: &str) -> String {
    format!("{LISTEN_URL}?model={model}&language={language}&punctuate=true")
}

#[async_trait]
impl Transcriber for DeepgramTranscriber {
    async fn transcribe(&self, chunk: &AudioChunk) -> Result<String> {
        let wav = chunk.to_wav()?;
        let response = self
            .http
            .post(&self.url)
            .header(header::AUTHORIZATION, format!("Token {}", self.api_key))
            .header(header::CONTENT_TYPE, "audio/wav")
            .body(wav)
            .send()
            .await
            .map_err(|e| failure(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(failure(format!("status {status}: {body}")));
        }

        let parsed: ListenResponse = response
            .json()
            .await
            .map_err(|e| failure(format!("unreadable response: {e}")))?;
        let transcript = parsed.transcript();
        tracing::debug!(seq = chunk.sequence, chars = transcript.len(), "Deepgram transcript");
        Ok(transcript)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

fn failure(message: String) -> CommentaryError {
    CommentaryError::TranscriptionFailure { message }
}

fn http_error(message: String) -> CommentaryError {
    CommentaryError::Http {
        service: "deepgram".to_string(),
        message,
    }
}
