//! Sarvam Bulbul text-to-speech.

use super::Synthesizer;
use crate::config::SynthesisSettings;
use crate::defaults;
use crate::error::{CommentaryError, Result};
use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const TTS_URL: &str = "https://api.sarvam.ai/text-to-speech";
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Serialize)]
pub struct TtsRequest {
    pub inputs: Vec<String>,
    pub target_language_code: String,
    pub speaker: String,
    pub model: String,
    pub enable_preprocessing: bool,
    pub pace: f32,
    pub pitch: f32,
    pub loudness: f32,
}

/// Bulbul answers with one base64 WAV per input.
#[derive(Debug, Deserialize)]
pub struct TtsResponse {
    #[serde(default)]
    pub audios: Vec<String>,
}

impl TtsResponse {
    pub fn first_audio(&self) -> Result<Vec<u8>> {
        let encoded = self
            .audios
            .first()
            .ok_or_else(|| failure("response had no audio".to_string()))?;
        let audio = BASE64
            .decode(encoded)
            .map_err(|e| failure(format!("audio is not base64: {e}")))?;
        if audio.is_empty() {
            return Err(failure("empty audio".to_string()));
        }
        Ok(audio)
    }
}

pub struct SarvamSynthesizer {
    http: reqwest::Client,
    api_key: String,
    settings: SynthesisSettings,
    name: String,
}

impl SarvamSynthesizer {
    pub fn new(settings: &SynthesisSettings) -> Result<Self> {
        if settings.api_key.trim().is_empty() {
            return Err(CommentaryError::ConfigInvalidValue {
                key: "synthesis.api_key".to_string(),
                message: "missing (set SARVAM_API_KEY)".to_string(),
            });
        }
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| CommentaryError::Http {
                service: "sarvam".to_string(),
                message: format!("Failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            http,
            api_key: settings.api_key.trim().to_string(),
            settings: settings.clone(),
            name: format!("sarvam/{}", settings.model),
        })
    }

    pub fn tts_request(&self, telugu: &str) -> TtsRequest {
        TtsRequest {
            inputs: vec![telugu.to_string()],
            target_language_code: self.settings.language.clone(),
            speaker: self.settings.speaker.clone(),
            model: self.settings.model.clone(),
            enable_preprocessing: true,
            pace: self.settings.pace,
            pitch: 0.0,
            loudness: 1.5,
        }
    }
}

#[async_trait]
impl Synthesizer for SarvamSynthesizer {
    async fn synthesize(&self, telugu: &str) -> Result<Vec<u8>> {
        let response = self
            .http
            .post(TTS_URL)
            .header("api-subscription-key", &self.api_key)
            .json(&self.tts_request(telugu))
            .send()
            .await
            .map_err(|e| failure(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(failure(format!("status {status}: {body}")));
        }

        let parsed: TtsResponse = response
            .json()
            .await
            .map_err(|e| failure(format!("unreadable response: {e}")))?;
        let audio = parsed.first_audio()?;
        tracing::debug!(bytes = audio.len(), "Bulbul audio received");
        Ok(audio)
    }

    fn mime_type(&self) -> &str {
        defaults::SYNTHESIS_MIME_TYPE
    }

    fn name(&self) -> &str {
        &self.name
    }
}

fn failure(message: String) -> CommentaryError {
    CommentaryError::SynthesisFailure { message }
}
