//! Data types for the commentary pipeline.
//!
//! `sequence` is the ordering key carried by every value derived from one
//! [`AudioChunk`]. Stations copy it forward and never assign or change it.

use crate::defaults;
use crate::error::{CommentaryError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Cursor;
use std::sync::Arc;
use uuid::Uuid;

/// A fixed-duration slice of source audio.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    /// Monotonic per-session sequence number, starting at 0.
    pub sequence: u64,
    /// PCM samples (16-bit signed, mono).
    pub samples: Arc<[i16]>,
    /// Sample rate of `samples` in Hz.
    pub sample_rate: u32,
    /// Duration of the chunk in milliseconds.
    pub duration_ms: u32,
    /// Wall-clock time the chunk was cut from the source.
    pub captured_at: DateTime<Utc>,
}

impl AudioChunk {
    /// Creates a chunk at the default sample rate, deriving the duration from the sample count.
    pub fn new(sequence: u64, samples: Vec<i16>) -> Self {
        Self::with_rate(sequence, samples, defaults::SAMPLE_RATE)
    }

    /// Creates a chunk with an explicit sample rate.
    pub fn with_rate(sequence: u64, samples: Vec<i16>, sample_rate: u32) -> Self {
        let duration_ms = if sample_rate == 0 {
            0
        } else {
            (samples.len() as u64 * 1000 / u64::from(sample_rate)) as u32
        };
        Self {
            sequence,
            samples: samples.into(),
            sample_rate,
            duration_ms,
            captured_at: Utc::now(),
        }
    }

    /// Encodes the chunk as a 16-bit mono WAV file in memory.
    pub fn to_wav(&self) -> Result<Vec<u8>> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: self.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::with_capacity(44 + self.samples.len() * 2));
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).map_err(|e| {
                CommentaryError::Other(format!("Failed to start WAV encoding: {}", e))
            })?;
            for &sample in self.samples.iter() {
                writer.write_sample(sample).map_err(|e| {
                    CommentaryError::Other(format!("Failed to encode WAV sample: {}", e))
                })?;
            }
            writer.finalize().map_err(|e| {
                CommentaryError::Other(format!("Failed to finalize WAV encoding: {}", e))
            })?;
        }
        Ok(cursor.into_inner())
    }
}

/// English text recognised from one or more chunks.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptUnit {
    /// Sequence number of the chunk that completed the utterance.
    pub sequence: u64,
    /// Non-empty English text.
    pub text: String,
    pub language: String,
}

impl TranscriptUnit {
    pub fn new(sequence: u64, text: impl Into<String>) -> Self {
        Self {
            sequence,
            text: text.into(),
            language: defaults::ENGLISH_LANGUAGE.to_string(),
        }
    }
}

/// One row of the leaderboard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverPosition {
    pub position: u32,
    pub driver_number: Option<u32>,
    pub name: String,
    pub code: String,
    pub team: String,
    pub gap: String,
    pub last_lap_time: String,
}

impl DriverPosition {
    /// Minimal row used by tests and mocks.
    pub fn new(position: u32, name: &str, team: &str) -> Self {
        Self {
            position,
            driver_number: None,
            name: name.to_string(),
            code: name
                .split_whitespace()
                .last()
                .unwrap_or(name)
                .chars()
                .take(3)
                .collect::<String>()
                .to_uppercase(),
            team: team.to_string(),
            gap: defaults::UNKNOWN_LAP_TIME.to_string(),
            last_lap_time: defaults::UNKNOWN_LAP_TIME.to_string(),
        }
    }
}

/// Immutable race-state reading. Replaced wholesale, never edited.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextSnapshot {
    pub captured_at: DateTime<Utc>,
    pub session_name: String,
    pub circuit: String,
    pub current_lap: u32,
    pub total_laps: u32,
    /// Ordered by position, leader first.
    pub positions: Vec<DriverPosition>,
}

impl ContextSnapshot {
    pub fn new(current_lap: u32, total_laps: u32, positions: Vec<DriverPosition>) -> Self {
        Self {
            captured_at: Utc::now(),
            session_name: String::new(),
            circuit: String::new(),
            current_lap,
            total_laps,
            positions,
        }
    }

    pub fn leader(&self) -> Option<&DriverPosition> {
        self.positions.first()
    }

    /// Position of a driver by full name or three-letter code (case-insensitive).
    pub fn position_of(&self, driver: &str) -> Option<u32> {
        self.positions
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(driver) || p.code.eq_ignore_ascii_case(driver))
            .map(|p| p.position)
    }

    /// Laps left in the race, if the total is known.
    pub fn laps_remaining(&self) -> Option<u32> {
        (self.total_laps > 0).then(|| self.total_laps.saturating_sub(self.current_lap))
    }

    /// Compact one-line summary for prompt injection.
    ///
    /// `Leader: X | Top 3: [P1 X | P2 Y | P3 Z] | Lap: 12/57 | Circuit: Sakhir`
    pub fn context_line(&self) -> String {
        let Some(leader) = self.leader() else {
            return String::new();
        };
        let top_3 = self
            .positions
            .iter()
            .take(3)
            .map(|p| format!("P{} {}", p.position, p.name))
            .collect::<Vec<_>>()
            .join(" | ");

        let mut parts = vec![format!("Leader: {}", leader.name), format!("Top 3: [{}]", top_3)];
        if self.current_lap > 0 && self.total_laps > 0 {
            parts.push(format!("Lap: {}/{}", self.current_lap, self.total_laps));
        }
        if !self.circuit.is_empty() {
            parts.push(format!("Circuit: {}", self.circuit));
        }
        if !self.session_name.is_empty() {
            parts.push(format!("Session: {}", self.session_name));
        }
        parts.join(" | ")
    }
}

/// Energy class of a commentary line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventCategory {
    Hype,
    Tension,
    Info,
    Filler,
}

impl EventCategory {
    pub const ALL: [EventCategory; 4] = [
        EventCategory::Hype,
        EventCategory::Tension,
        EventCategory::Info,
        EventCategory::Filler,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventCategory::Hype => "hype",
            EventCategory::Tension => "tension",
            EventCategory::Info => "info",
            EventCategory::Filler => "filler",
        }
    }

    /// Prompt tag, e.g. `[HYPE]`.
    pub fn tag(&self) -> String {
        format!("[{}]", self.as_str().to_uppercase())
    }
}

impl fmt::Display for EventCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Telugu commentary derived from one transcript unit.
#[derive(Debug, Clone)]
pub struct CommentaryUnit {
    pub sequence: u64,
    pub english: String,
    pub telugu: String,
    pub category: EventCategory,
    /// Snapshot in effect when the unit was generated (shared, read-only).
    pub context: Option<Arc<ContextSnapshot>>,
    /// True when the rewrite engine failed and the English text was passed through.
    pub fallback: bool,
}

impl CommentaryUnit {
    /// Degraded unit: English text untranslated, category `filler`.
    pub fn pass_through(unit: &TranscriptUnit, context: Option<Arc<ContextSnapshot>>) -> Self {
        Self {
            sequence: unit.sequence,
            english: unit.text.clone(),
            telugu: unit.text.clone(),
            category: EventCategory::Filler,
            context,
            fallback: true,
        }
    }
}

/// How complete an artifact is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    /// Text and audio.
    Full,
    /// Synthesis failed; text only.
    TextOnly,
    /// Placeholder emitted by the sequencer for a unit that never arrived in time.
    Skipped,
}

/// Terminal pipeline output for one sequence number.
#[derive(Debug, Clone)]
pub struct AudioArtifact {
    pub sequence: u64,
    /// Encoded audio, shared between all listeners without copying.
    pub audio: Arc<[u8]>,
    pub mime_type: String,
    pub telugu: String,
    pub english: String,
    pub category: Option<EventCategory>,
    pub kind: ArtifactKind,
}

impl AudioArtifact {
    pub fn from_unit(unit: &CommentaryUnit, audio: Arc<[u8]>, mime_type: &str) -> Self {
        let kind = if audio.is_empty() {
            ArtifactKind::TextOnly
        } else {
            ArtifactKind::Full
        };
        Self {
            sequence: unit.sequence,
            audio,
            mime_type: mime_type.to_string(),
            telugu: unit.telugu.clone(),
            english: unit.english.clone(),
            category: Some(unit.category),
            kind,
        }
    }

    /// Artifact with empty audio but populated text.
    pub fn text_only(unit: &CommentaryUnit) -> Self {
        Self::from_unit(unit, Arc::from(Vec::new()), defaults::SYNTHESIS_MIME_TYPE)
    }

    /// Placeholder for a dropped beat.
    pub fn skipped(sequence: u64) -> Self {
        Self {
            sequence,
            audio: Arc::from(Vec::new()),
            mime_type: defaults::SYNTHESIS_MIME_TYPE.to_string(),
            telugu: String::new(),
            english: String::new(),
            category: None,
            kind: ArtifactKind::Skipped,
        }
    }

    pub fn has_audio(&self) -> bool {
        !self.audio.is_empty()
    }

    pub fn has_text(&self) -> bool {
        !self.telugu.is_empty() || !self.english.is_empty()
    }
}

/// Result of pushing one chunk through the stations.
///
/// Every admitted chunk resolves to exactly one outcome so the sequencer
/// never waits on a sequence number that will not produce output.
#[derive(Debug, Clone)]
pub enum ChunkOutcome {
    /// The chunk produced no commentary (silence, absorbed into a later sentence, or dropped).
    Empty { sequence: u64 },
    /// The chunk produced an artifact.
    Artifact(AudioArtifact),
}

impl ChunkOutcome {
    pub fn sequence(&self) -> u64 {
        match self {
            ChunkOutcome::Empty { sequence } => *sequence,
            ChunkOutcome::Artifact(artifact) => artifact.sequence,
        }
    }
}

/// Lifecycle state of a pipeline session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Starting,
    Running,
    Stopping,
    Stopped,
    Failed,
}

impl SessionState {
    /// Only Idle, Stopped and Failed accept a new `start`.
    pub fn accepts_start(&self) -> bool {
        matches!(
            self,
            SessionState::Idle | SessionState::Stopped | SessionState::Failed
        )
    }

    /// Stopped or Failed: the session will not change state again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Stopped | SessionState::Failed)
    }

    /// True while a session occupies the single pipeline slot.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SessionState::Starting | SessionState::Running | SessionState::Stopping
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Starting => "starting",
            SessionState::Running => "running",
            SessionState::Stopping => "stopping",
            SessionState::Stopped => "stopped",
            SessionState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// The one pipeline session that may be active process-wide.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineSession {
    pub id: Uuid,
    pub source: String,
    pub label: String,
    pub state: SessionState,
    pub started_at: DateTime<Utc>,
}

impl PipelineSession {
    pub fn new(source: &str, label: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            source: source.to_string(),
            label: label.to_string(),
            state: SessionState::Starting,
            started_at: Utc::now(),
        }
    }
}
