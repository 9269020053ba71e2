//! JSON-line protocol between the CLI and the daemon.
//!
//! Every connection sends one [`Command`] line and gets one [`Response`]
//! line back. `follow` is the exception: after `Response::Following` the
//! connection stays open and carries one [`WireEvent`] per line.

use crate::pipeline::broadcaster::DeliveryEvent;
use crate::pipeline::orchestrator::{Health, RewriteProbe};
use crate::pipeline::types::{ContextSnapshot, EventCategory, PipelineSession, SessionState};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};

/// Commands sent by the CLI to the daemon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    /// Start a session on a source descriptor (URL, file path or device)
    Start {
        source: String,
        #[serde(default)]
        label: Option<String>,
    },
    /// Stop the running session and drain what is in flight
    Stop,
    /// Rewrite and synthesize one English line, nothing broadcast
    TestRewrite { english: String },
    /// Same as test_rewrite, then publish to every listener
    TestBroadcast { english: String },
    /// Latest race snapshot
    GetContext,
    /// Session state and pipeline counters
    Health,
    /// Turn this connection into a listener
    Follow,
    /// Stop any session and exit the daemon
    Shutdown,
}

impl Command {
    /// Serialize command to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize command from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

/// Result of a test rewrite, as sent over the socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RewriteReport {
    pub english: String,
    pub telugu: String,
    pub category: EventCategory,
    /// True when the rewrite failed and the English text was passed through.
    pub fallback: bool,
    pub context_used: bool,
    pub audio_bytes: usize,
    pub mime_type: String,
    /// Listeners reached; only set for test_broadcast.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivered: Option<usize>,
}

impl RewriteReport {
    pub fn from_probe(probe: &RewriteProbe, delivered: Option<usize>) -> Self {
        Self {
            english: probe.commentary.english.clone(),
            telugu: probe.commentary.telugu.clone(),
            category: probe.commentary.category,
            fallback: probe.commentary.fallback,
            context_used: probe.commentary.context.is_some(),
            audio_bytes: probe.artifact.audio.len(),
            mime_type: probe.artifact.mime_type.clone(),
            delivered,
        }
    }
}

/// Responses sent by the daemon to the CLI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    /// Command succeeded
    Ok,
    /// A session was started
    Started { session: PipelineSession },
    /// The session was stopped; carries its final record
    Stopped { session: PipelineSession },
    /// Output of test_rewrite / test_broadcast
    Rewrite { report: RewriteReport },
    /// Latest race snapshot, if any was ever fetched
    Context { snapshot: Option<ContextSnapshot> },
    /// Health report
    Health { health: Box<Health> },
    /// The connection now carries follow events
    Following,
    /// Error occurred
    Error { message: String },
}

impl Response {
    /// Serialize response to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize response from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    pub fn error(message: impl std::fmt::Display) -> Self {
        Response::Error {
            message: message.to_string(),
        }
    }
}

/// Delivery event on a follow connection. Audio travels base64-encoded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireEvent {
    Text {
        sequence: u64,
        english: String,
        telugu: String,
        category: Option<EventCategory>,
    },
    Audio {
        sequence: u64,
        mime_type: String,
        data: String,
    },
    BeatSkipped {
        sequence: u64,
    },
    Context {
        snapshot: ContextSnapshot,
    },
    Status {
        state: SessionState,
        message: Option<String>,
    },
}

impl WireEvent {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    /// Decoded audio bytes for `Audio` events.
    pub fn audio(&self) -> Option<Vec<u8>> {
        match self {
            WireEvent::Audio { data, .. } => BASE64.decode(data).ok(),
            _ => None,
        }
    }
}

impl From<&DeliveryEvent> for WireEvent {
    fn from(event: &DeliveryEvent) -> Self {
        match event {
            DeliveryEvent::Text {
                sequence,
                english,
                telugu,
                category,
            } => WireEvent::Text {
                sequence: *sequence,
                english: english.clone(),
                telugu: telugu.clone(),
                category: *category,
            },
            DeliveryEvent::Audio {
                sequence,
                mime_type,
                audio,
            } => WireEvent::Audio {
                sequence: *sequence,
                mime_type: mime_type.clone(),
                data: BASE64.encode(audio),
            },
            DeliveryEvent::BeatSkipped { sequence } => WireEvent::BeatSkipped {
                sequence: *sequence,
            },
            DeliveryEvent::ContextChanged(snapshot) => WireEvent::Context {
                snapshot: snapshot.as_ref().clone(),
            },
            DeliveryEvent::SessionStatus { state, message } => WireEvent::Status {
                state: *state,
                message: message.clone(),
            },
        }
    }
}
