//! commentcast - live English race commentary re-voiced in Telugu
//!
//! A session pulls fixed-length audio chunks from a stream, transcribes,
//! rewrites and synthesizes each one concurrently, restores chunk order and
//! fans the result out to every connected listener.

#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

#[cfg(feature = "cli")]
pub mod cli;
pub mod commentary;
pub mod config;
pub mod context;
pub mod daemon;
pub mod dataset;
pub mod defaults;
pub mod engines;
pub mod error;
pub mod ipc;
pub mod output;
pub mod pipeline;
pub mod source;

// Engine and source boundaries
pub use context::RaceDataSource;
pub use engines::{Engines, Rewriter, Synthesizer, Transcriber};
pub use source::ChunkSource;

// Pipeline
pub use pipeline::broadcaster::{Broadcaster, DeliveryEvent, Subscription};
pub use pipeline::orchestrator::{Health, PipelineController, SessionHandle};
pub use pipeline::types::{AudioArtifact, PipelineSession, SessionState};

// Error handling
pub use error::{CommentaryError, Result};

// Config
pub use config::Config;

/// Build version string with optional git commit hash.
///
/// Returns `"0.1.0+abc1234"` when git hash is available, `"0.1.0"` otherwise.
pub fn version_string() -> String {
    let version = env!("CARGO_PKG_VERSION");
    match option_env!("GIT_HASH") {
        Some(hash) if !hash.is_empty() => format!("{}+{}", version, hash),
        _ => version.to_string(),
    }
}
