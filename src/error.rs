//! Error types for commentcast.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CommentaryError {
    // Session state misuse (rejected synchronously)
    #[error("A pipeline session is already running")]
    AlreadyRunning,

    #[error("No pipeline session is running")]
    NotRunning,

    // Fatal source errors
    #[error("Chunk source fault: {message}")]
    SourceFault { message: String },

    // Per-chunk, transient stage errors
    #[error("Transcription failed: {message}")]
    TranscriptionFailure { message: String },

    #[error("Rewrite failed: {message}")]
    RewriteFailure { message: String },

    #[error("Synthesis failed: {message}")]
    SynthesisFailure { message: String },

    #[error("Race context unavailable: {message}")]
    ContextUnavailable { message: String },

    #[error("Sequence {sequence} held longer than {held_ms}ms, skipped")]
    SequencerTimeout { sequence: u64, held_ms: u64 },

    #[error("Operation timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Operation cancelled")]
    Cancelled,

    // Configuration errors
    #[error("Failed to parse configuration: {message}")]
    ConfigParse { message: String },

    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    // Remote engine errors
    #[error("HTTP request to {service} failed: {message}")]
    Http { service: String, message: String },

    // IPC errors
    #[error("IPC socket error: {message}")]
    IpcSocket { message: String },

    #[error("IPC protocol error: {message}")]
    IpcProtocol { message: String },

    #[error("IPC connection failed: {message}")]
    IpcConnection { message: String },

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Generic error for cases not covered above
    #[error("{0}")]
    Other(String),
}

impl CommentaryError {
    /// True for errors that end a session rather than degrade a single chunk.
    pub fn is_fatal(&self) -> bool {
        matches!(self, CommentaryError::SourceFault { .. })
    }
}

// Type alias for convenience
pub type Result<T> = std::result::Result<T, CommentaryError>;
