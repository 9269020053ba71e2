//! Subprocess chunk source: `ffmpeg` (optionally fed by `yt-dlp`) decoding to raw PCM.

use crate::defaults::{SAMPLE_RATE, SOURCE_READ_TIMEOUT_SECS};
use crate::error::{CommentaryError, Result};
use crate::pipeline::types::AudioChunk;
use crate::source::{ChunkSlicer, ChunkSource};
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStdout, Command};

const READ_BUFFER_BYTES: usize = 16 * 1024;

/// `ffmpeg` arguments producing 16kHz mono s16le on stdout.
pub fn ffmpeg_args(input: &str) -> Vec<String> {
    [
        "-hide_banner",
        "-loglevel",
        "error",
        "-i",
        input,
        "-vn",
        "-f",
        "s16le",
        "-acodec",
        "pcm_s16le",
        "-ac",
        "1",
        "-ar",
    ]
    .iter()
    .map(|s| s.to_string())
    .chain([SAMPLE_RATE.to_string(), "pipe:1".to_string()])
    .collect()
}

/// Decodes little-endian 16-bit PCM, carrying an odd trailing byte to the next read.
pub fn decode_pcm(carry: &mut Option<u8>, bytes: &[u8]) -> Vec<i16> {
    let mut joined;
    let bytes = match carry.take() {
        Some(first) => {
            joined = Vec::with_capacity(bytes.len() + 1);
            joined.push(first);
            joined.extend_from_slice(bytes);
            joined.as_slice()
        }
        None => bytes,
    };

    let mut pairs = bytes.chunks_exact(2);
    let samples = pairs
        .by_ref()
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    *carry = pairs.remainder().first().copied();
    samples
}

struct Running {
    decoder: Child,
    extractor: Option<Child>,
    stdout: ChildStdout,
    carry: Option<u8>,
}

impl Running {
    /// Reaps the processes once stdout hit EOF; a failed exit is a fault.
    async fn finish(mut self) -> Result<()> {
        if let Some(mut extractor) = self.extractor.take() {
            let _killed = extractor.start_kill();
            let _reaped = extractor.wait().await;
        }
        let status = self
            .decoder
            .wait()
            .await
            .map_err(|e| fault(format!("Failed to wait for ffmpeg: {}", e)))?;
        if status.success() {
            Ok(())
        } else {
            Err(fault(format!("ffmpeg exited with {}", status)))
        }
    }
}

/// Chunk source backed by an `ffmpeg` subprocess. Spawned on first read.
pub struct CommandChunkSource {
    input: String,
    /// Resolve the input through `yt-dlp` first (video-site URLs).
    extract: bool,
    slicer: ChunkSlicer,
    read_timeout: Duration,
    running: Option<Running>,
    finished: bool,
}

impl CommandChunkSource {
    /// Decode a file, stream URL or device with `ffmpeg`.
    pub fn ffmpeg(input: &str, chunk_duration_ms: u32) -> Self {
        Self {
            input: input.to_string(),
            extract: false,
            slicer: ChunkSlicer::new(chunk_duration_ms, SAMPLE_RATE),
            read_timeout: Duration::from_secs(SOURCE_READ_TIMEOUT_SECS),
            running: None,
            finished: false,
        }
    }

    /// Pipe `yt-dlp`'s best audio stream for `url` into `ffmpeg`.
    pub fn extract_url(url: &str, chunk_duration_ms: u32) -> Self {
        Self {
            extract: true,
            ..Self::ffmpeg(url, chunk_duration_ms)
        }
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    fn spawn(&self) -> Result<Running> {
        let mut extractor = None;
        let mut decoder = Command::new("ffmpeg");

        if self.extract {
            let mut child = Command::new("yt-dlp")
                .args(["--quiet", "--no-warnings", "-f", "bestaudio", "-o", "-", &self.input])
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::null())
                .kill_on_drop(true)
                .spawn()
                .map_err(|e| fault(format!("Failed to start yt-dlp: {}", e)))?;
            let piped = child
                .stdout
                .take()
                .ok_or_else(|| fault("yt-dlp stdout unavailable".to_string()))?;
            let stdin: Stdio = piped
                .try_into()
                .map_err(|e| fault(format!("Failed to pipe yt-dlp into ffmpeg: {}", e)))?;
            decoder.stdin(stdin).args(ffmpeg_args("pipe:0"));
            extractor = Some(child);
        } else {
            decoder.stdin(Stdio::null()).args(ffmpeg_args(&self.input));
        }

        let mut decoder = decoder
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| fault(format!("Failed to start ffmpeg: {}", e)))?;
        let stdout = decoder
            .stdout
            .take()
            .ok_or_else(|| fault("ffmpeg stdout unavailable".to_string()))?;

        tracing::info!(input = %self.input, extract = self.extract, "Capture process started");
        Ok(Running {
            decoder,
            extractor,
            stdout,
            carry: None,
        })
    }
}

#[async_trait]
impl ChunkSource for CommandChunkSource {
    async fn next_chunk(&mut self) -> Result<Option<AudioChunk>> {
        if let Some(chunk) = self.slicer.next_full() {
            return Ok(Some(chunk));
        }
        if self.finished {
            return Ok(self.slicer.flush());
        }
        if self.running.is_none() {
            self.running = Some(self.spawn()?);
        }

        let mut buffer = vec![0u8; READ_BUFFER_BYTES];
        loop {
            let Some(running) = self.running.as_mut() else {
                return Ok(self.slicer.flush());
            };

            let read = tokio::time::timeout(self.read_timeout, running.stdout.read(&mut buffer))
                .await
                .map_err(|_| {
                    fault(format!(
                        "No audio from {} for {}s",
                        self.input,
                        self.read_timeout.as_secs()
                    ))
                })?
                .map_err(|e| fault(format!("Failed to read capture output: {}", e)))?;

            if read == 0 {
                self.finished = true;
                if let Some(running) = self.running.take() {
                    running.finish().await?;
                }
                tracing::info!(input = %self.input, "Capture reached end of stream");
                return Ok(self.slicer.flush());
            }

            let samples = decode_pcm(&mut running.carry, &buffer[..read]);
            self.slicer.push(&samples);
            if let Some(chunk) = self.slicer.next_full() {
                return Ok(Some(chunk));
            }
        }
    }

    fn describe(&self) -> String {
        if self.extract {
            format!("yt-dlp | ffmpeg {}", self.input)
        } else {
            format!("ffmpeg {}", self.input)
        }
    }
}

fn fault(message: String) -> CommentaryError {
    CommentaryError::SourceFault { message }
}
