//! Chunk sources: where source audio comes from.
//!
//! A source yields fixed-duration chunks in order, numbered from 0.
//! `Ok(None)` is a clean end of stream; `Err` is a source fault and ends
//! the session.

pub mod command;
pub mod wav;

use crate::defaults;
use crate::error::{CommentaryError, Result};
use crate::pipeline::types::AudioChunk;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::Path;
use std::time::Duration;

pub use command::CommandChunkSource;
pub use wav::WavChunkSource;

/// Lazy, in-order sequence of audio chunks.
#[async_trait]
pub trait ChunkSource: Send {
    /// Next chunk, `Ok(None)` at end of stream. May wait for source data.
    async fn next_chunk(&mut self) -> Result<Option<AudioChunk>>;

    /// Human-readable description for logs and health output.
    fn describe(&self) -> String;
}

/// Cuts a PCM sample stream into numbered fixed-duration chunks.
#[derive(Debug)]
pub struct ChunkSlicer {
    samples_per_chunk: usize,
    sample_rate: u32,
    pending: Vec<i16>,
    next_sequence: u64,
}

impl ChunkSlicer {
    pub fn new(chunk_duration_ms: u32, sample_rate: u32) -> Self {
        let samples_per_chunk =
            ((u64::from(sample_rate) * u64::from(chunk_duration_ms)) / 1000).max(1) as usize;
        Self {
            samples_per_chunk,
            sample_rate,
            pending: Vec::with_capacity(samples_per_chunk),
            next_sequence: 0,
        }
    }

    pub fn samples_per_chunk(&self) -> usize {
        self.samples_per_chunk
    }

    pub fn push(&mut self, samples: &[i16]) {
        self.pending.extend_from_slice(samples);
    }

    /// Cuts one full chunk if enough samples are buffered.
    pub fn next_full(&mut self) -> Option<AudioChunk> {
        if self.pending.len() < self.samples_per_chunk {
            return None;
        }
        let rest = self.pending.split_off(self.samples_per_chunk);
        let samples = std::mem::replace(&mut self.pending, rest);
        Some(self.cut(samples))
    }

    /// Emits whatever is buffered as a final, shorter chunk.
    ///
    /// A remainder shorter than one millisecond carries no speech and would
    /// report a zero duration, so it is dropped.
    pub fn flush(&mut self) -> Option<AudioChunk> {
        if self.pending.is_empty() {
            return None;
        }
        let samples = std::mem::take(&mut self.pending);
        if (samples.len() as u64) * 1000 < u64::from(self.sample_rate) {
            tracing::debug!(samples = samples.len(), "Dropping sub-millisecond tail");
            return None;
        }
        Some(self.cut(samples))
    }

    fn cut(&mut self, samples: Vec<i16>) -> AudioChunk {
        let chunk = AudioChunk::with_rate(self.next_sequence, samples, self.sample_rate);
        self.next_sequence += 1;
        chunk
    }
}

/// In-memory source for tests and diagnostics.
pub struct VecChunkSource {
    chunks: VecDeque<AudioChunk>,
    delay: Option<Duration>,
    fault: Option<String>,
    hold_open: bool,
}

impl VecChunkSource {
    pub fn new(chunks: Vec<AudioChunk>) -> Self {
        Self {
            chunks: chunks.into(),
            delay: None,
            fault: None,
            hold_open: false,
        }
    }

    /// `count` chunks of quiet audio numbered 0..count, each 100ms long.
    pub fn quiet(count: u64) -> Self {
        Self::new(
            (0..count)
                .map(|sequence| AudioChunk::new(sequence, vec![0i16; defaults::SAMPLE_RATE as usize / 10]))
                .collect(),
        )
    }

    /// Wait before yielding each chunk.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Fail with a source fault once the chunks run out.
    pub fn then_fault(mut self, message: &str) -> Self {
        self.fault = Some(message.to_string());
        self
    }

    /// Never end: once the chunks run out, wait forever (like a live feed).
    pub fn hold_open(mut self) -> Self {
        self.hold_open = true;
        self
    }
}

#[async_trait]
impl ChunkSource for VecChunkSource {
    async fn next_chunk(&mut self) -> Result<Option<AudioChunk>> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(chunk) = self.chunks.pop_front() {
            return Ok(Some(chunk));
        }
        if let Some(message) = self.fault.take() {
            return Err(CommentaryError::SourceFault { message });
        }
        if self.hold_open {
            std::future::pending::<()>().await;
        }
        Ok(None)
    }

    fn describe(&self) -> String {
        format!("memory ({} chunks queued)", self.chunks.len())
    }
}

/// Hosts whose pages need `yt-dlp` to find the audio stream.
const EXTRACTOR_HOSTS: &[&str] = &["youtube.com", "youtu.be", "twitch.tv", "vimeo.com"];

/// Opens a source from a descriptor.
///
/// `*.wav` paths are decoded in-process; video-site URLs go through
/// `yt-dlp | ffmpeg`; anything else (other URLs, streams, media files) is
/// decoded by `ffmpeg`.
pub fn open_source(descriptor: &str, chunk_duration_ms: u32) -> Result<Box<dyn ChunkSource>> {
    let descriptor = descriptor.trim();
    if descriptor.is_empty() {
        return Err(CommentaryError::SourceFault {
            message: "empty source descriptor".to_string(),
        });
    }

    let is_url = descriptor.starts_with("http://") || descriptor.starts_with("https://");
    if is_url {
        if EXTRACTOR_HOSTS.iter().any(|host| descriptor.contains(host)) {
            return Ok(Box::new(CommandChunkSource::extract_url(descriptor, chunk_duration_ms)));
        }
        return Ok(Box::new(CommandChunkSource::ffmpeg(descriptor, chunk_duration_ms)));
    }

    let path = Path::new(descriptor);
    let is_wav = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("wav"));
    if is_wav {
        return Ok(Box::new(WavChunkSource::open(path, chunk_duration_ms)?));
    }
    if !path.exists() {
        return Err(CommentaryError::SourceFault {
            message: format!("source not found: {}", descriptor),
        });
    }
    Ok(Box::new(CommandChunkSource::ffmpeg(descriptor, chunk_duration_ms)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slicer_cuts_fixed_chunks_and_flushes_rest() {
        let mut slicer = ChunkSlicer::new(100, 16000);
        assert_eq!(slicer.samples_per_chunk(), 1600);

        slicer.push(&vec![1i16; 4000]);
        let first = slicer.next_full().unwrap();
        let second = slicer.next_full().unwrap();
        assert!(slicer.next_full().is_none());
        let last = slicer.flush().unwrap();
        assert!(slicer.flush().is_none());

        assert_eq!((first.sequence, first.duration_ms), (0, 100));
        assert_eq!((second.sequence, second.duration_ms), (1, 100));
        assert_eq!((last.sequence, last.samples.len()), (2, 800));
        assert_eq!(last.duration_ms, 50);
    }

    #[test]
    fn test_slicer_drops_sub_millisecond_tail() {
        let mut slicer = ChunkSlicer::new(100, 16000);
        slicer.push(&vec![1i16; 1600 + 5]);

        assert_eq!(slicer.next_full().unwrap().sequence, 0);
        assert!(slicer.flush().is_none());
        assert!(slicer.flush().is_none());

        // Exactly one millisecond is still a chunk.
        slicer.push(&[1i16; 16]);
        let tail = slicer.flush().unwrap();
        assert_eq!((tail.sequence, tail.duration_ms), (1, 1));
    }

    #[tokio::test]
    async fn test_vec_source_ends_cleanly() {
        let mut source = VecChunkSource::quiet(2);
        assert_eq!(source.next_chunk().await.unwrap().unwrap().sequence, 0);
        assert_eq!(source.next_chunk().await.unwrap().unwrap().sequence, 1);
        assert!(source.next_chunk().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_vec_source_fault_after_chunks() {
        let mut source = VecChunkSource::quiet(1).then_fault("feed lost");
        assert!(source.next_chunk().await.unwrap().is_some());
        let err = source.next_chunk().await.unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("feed lost"));
    }

    #[tokio::test]
    async fn test_vec_source_hold_open_never_ends() {
        let mut source = VecChunkSource::quiet(0).hold_open();
        let waited = tokio::time::timeout(Duration::from_millis(50), source.next_chunk()).await;
        assert!(waited.is_err());
    }

    #[test]
    fn test_open_source_dispatch() {
        assert!(open_source("  ", 5000).is_err());
        assert!(open_source("/definitely/not/here.mp3", 5000).is_err());
        assert!(open_source("/definitely/not/here.wav", 5000).is_err());

        let url = open_source("https://www.youtube.com/watch?v=abc", 5000).unwrap();
        assert!(url.describe().contains("yt-dlp"));
        let stream = open_source("https://example.com/live.m3u8", 5000).unwrap();
        assert!(stream.describe().starts_with("ffmpeg"));
    }
}
