//! Default configuration constants for commentcast.
//!
//! Shared between the config file types, the pipeline and the adapters so
//! the same numbers are not repeated in several places.

/// Sample rate the capture sources deliver to the transcription engine.
pub const SAMPLE_RATE: u32 = 16000;

/// Default chunk duration in milliseconds.
///
/// Five seconds gives the transcription engine enough speech for a
/// sentence fragment without making listeners wait too long.
pub const CHUNK_DURATION_MS: u32 = 5000;

/// Default maximum time a finished artifact is held behind an outstanding
/// predecessor before the predecessor is skipped (3 × chunk duration).
pub const MAX_HOLD_MS: u64 = 3 * CHUNK_DURATION_MS as u64;

/// Maximum number of completed results held in the reorder buffer.
pub const REORDER_DEPTH: usize = 32;

/// Grace period for in-flight chunks to drain on `stop`.
pub const DRAIN_GRACE_MS: u64 = 5000;

/// Bounded channel capacity between stations.
pub const CHANNEL_BUFFER: usize = 16;

/// Units each of the rewrite and synthesis stations works on at the same time.
pub const MAX_CONCURRENT_UNITS: usize = 4;

/// Retry policy defaults shared by all three engine stages.
pub const RETRY_MAX_ATTEMPTS: u32 = 3;
pub const RETRY_INITIAL_BACKOFF_MS: u64 = 250;
pub const RETRY_BACKOFF_MULTIPLIER: f64 = 2.0;
pub const RETRY_MAX_BACKOFF_MS: u64 = 2000;

/// Per-call timeout for external engines. Must stay below the chunk duration.
pub const CALL_TIMEOUT_MS: u64 = 4000;

/// A capture process silent for this long is a source fault.
pub const SOURCE_READ_TIMEOUT_SECS: u64 = 30;

/// Race context refresh period.
pub const CONTEXT_REFRESH_SECS: u64 = 10;

/// OpenF1 public API root.
pub const OPENF1_BASE_URL: &str = "https://api.openf1.org/v1";

/// Sentence accumulation: flush after this many fragments without terminal punctuation.
pub const MAX_FRAGMENTS: usize = 5;

/// Sentence accumulation: flush when the oldest buffered fragment is this old.
pub const MAX_SENTENCE_WAIT_MS: u64 = 8000;

/// Transcription engine defaults.
pub const TRANSCRIPTION_MODEL: &str = "nova-2";
pub const ENGLISH_LANGUAGE: &str = "en";

/// Rewrite engine defaults.
pub const REWRITE_MODEL: &str = "llama-3.3-70b-versatile";
pub const REWRITE_MAX_TOKENS: u32 = 500;
pub const REWRITE_TEMPERATURE: f32 = 0.7;

/// Marker the rewrite engine may answer with to decline a filler line.
pub const SKIP_MARKER: &str = "##SKIP##";

/// Synthesis engine defaults.
pub const SYNTHESIS_MODEL: &str = "bulbul:v2";
pub const SYNTHESIS_SPEAKER: &str = "abhilash";
pub const SYNTHESIS_LANGUAGE: &str = "te-IN";
pub const SYNTHESIS_PACE: f32 = 1.1;
pub const SYNTHESIS_MIME_TYPE: &str = "audio/wav";

/// Synthesis phrase cache.
pub const PHRASE_CACHE_TTL_SECS: u64 = 120;
pub const PHRASE_CACHE_CAPACITY: usize = 256;

/// Dataset logger queue capacity; records beyond it are dropped, never awaited.
pub const DATASET_QUEUE_CAPACITY: usize = 256;

/// Log dataset stats every N records.
pub const DATASET_STATS_EVERY: u64 = 50;

/// Per-listener queue capacity on the delivery edge.
pub const LISTENER_QUEUE_CAPACITY: usize = 256;

/// Placeholder shown for unknown lap times.
pub const UNKNOWN_LAP_TIME: &str = "—";
