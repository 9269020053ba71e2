//! Commentary pipeline.
//!
//! Each station runs as its own task, connected by bounded tokio channels
//! for backpressure. Stations may finish units out of order; the sequencer
//! restores chunk order before the broadcaster fans results out.

pub mod broadcaster;
pub mod error;
pub mod orchestrator;
pub mod retry;
pub mod rewrite_station;
pub mod sequencer;
pub mod synthesis_station;
pub mod transcriber_station;
pub mod types;

pub use broadcaster::{Broadcaster, DeliveryEvent, Subscription};
pub use error::{CollectingReporter, ErrorReporter, LogReporter, StationError};
pub use orchestrator::{Health, PipelineController, RewriteProbe, SessionHandle};
pub use retry::{RetryError, RetryPolicy};
pub use rewrite_station::RewriteStation;
pub use sequencer::{ReorderBuffer, Sequencer, SequencerInput, SequencerStats};
pub use synthesis_station::{PhraseCache, SynthesisStation};
pub use transcriber_station::{SentenceBuffer, TranscriberStation};
pub use types::{
    ArtifactKind, AudioArtifact, AudioChunk, ChunkOutcome, CommentaryUnit, ContextSnapshot,
    DriverPosition, EventCategory, PipelineSession, SessionState, TranscriptUnit,
};
