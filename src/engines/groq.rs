//! Groq chat-completions rewrite engine (OpenAI-compatible API).

use super::{RewriteRequest, Rewriter};
use crate::commentary::{SYSTEM_PROMPT, user_message};
use crate::config::RewriteSettings;
use crate::error::{CommentaryError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const CHAT_URL: &str = "https://api.groq.com/openai/v1/chat/completions";
const HTTP_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Serialize)]
pub struct ChatMessage {
    pub role: &'static str,
    pub content: String,
}

#[derive(Debug, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    pub temperature: f32,
}

#[derive(Debug, Deserialize)]
pub struct ChatResponse {
    #[serde(default)]
    pub choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
pub struct Choice {
    pub message: MessageContent,
}

#[derive(Debug, Deserialize)]
pub struct MessageContent {
    #[serde(default)]
    pub content: String,
}

pub struct GroqRewriter {
    http: reqwest::Client,
    api_key: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
    name: String,
}

impl GroqRewriter {
    pub fn new(settings: &RewriteSettings) -> Result<Self> {
        if settings.api_key.trim().is_empty() {
            return Err(CommentaryError::ConfigInvalidValue {
                key: "rewrite.api_key".to_string(),
                message: "missing (set GROQ_API_KEY)".to_string(),
            });
        }
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| CommentaryError::Http {
                service: "groq".to_string(),
                message: format!("Failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            http,
            api_key: settings.api_key.trim().to_string(),
            model: settings.model.clone(),
            max_tokens: settings.max_tokens,
            temperature: settings.temperature,
            name: format!("groq/{}", settings.model),
        })
    }

    /// Chat request body for one line of commentary.
    pub fn chat_request(&self, request: &RewriteRequest) -> ChatRequest {
        ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: user_message(request),
                },
            ],
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        }
    }
}

#[async_trait]
impl Rewriter for GroqRewriter {
    async fn rewrite(&self, request: &RewriteRequest) -> Result<String> {
        let response = self
            .http
            .post(CHAT_URL)
            .bearer_auth(&self.api_key)
            .json(&self.chat_request(request))
            .send()
            .await
            .map_err(|e| failure(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(failure(format!("status {status}: {body}")));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| failure(format!("unreadable response: {e}")))?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| failure("response had no choices".to_string()))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

fn failure(message: String) -> CommentaryError {
    CommentaryError::RewriteFailure { message }
}
