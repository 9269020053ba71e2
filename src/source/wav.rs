//! WAV file chunk source.

use crate::defaults::SAMPLE_RATE;
use crate::error::{CommentaryError, Result};
use crate::pipeline::types::AudioChunk;
use crate::source::{ChunkSlicer, ChunkSource};
use async_trait::async_trait;
use std::io::Read;
use std::path::Path;
use std::time::Duration;

/// Chunk source reading a WAV file.
/// Supports arbitrary sample rates and channel counts, resampling to 16kHz mono.
pub struct WavChunkSource {
    slicer: ChunkSlicer,
    label: String,
    /// Sleep one chunk duration between chunks, like a live feed.
    realtime: bool,
    started: bool,
}

impl WavChunkSource {
    pub fn open(path: &Path, chunk_duration_ms: u32) -> Result<Self> {
        let file = std::fs::File::open(path).map_err(|e| CommentaryError::SourceFault {
            message: format!("Failed to open {}: {}", path.display(), e),
        })?;
        let mut source = Self::from_reader(Box::new(std::io::BufReader::new(file)), chunk_duration_ms)?;
        source.label = path.display().to_string();
        Ok(source)
    }

    /// Create from any reader (for testing/flexibility).
    pub fn from_reader(reader: Box<dyn Read + Send>, chunk_duration_ms: u32) -> Result<Self> {
        let samples = decode(reader)?;
        let mut slicer = ChunkSlicer::new(chunk_duration_ms, SAMPLE_RATE);
        slicer.push(&samples);
        Ok(Self {
            slicer,
            label: "wav".to_string(),
            realtime: false,
            started: false,
        })
    }

    pub fn with_realtime(mut self, realtime: bool) -> Self {
        self.realtime = realtime;
        self
    }
}

#[async_trait]
impl ChunkSource for WavChunkSource {
    async fn next_chunk(&mut self) -> Result<Option<AudioChunk>> {
        let chunk = self.slicer.next_full().or_else(|| self.slicer.flush());
        if let Some(chunk) = &chunk
            && self.realtime
            && self.started
        {
            tokio::time::sleep(Duration::from_millis(u64::from(chunk.duration_ms))).await;
        }
        self.started = true;
        Ok(chunk)
    }

    fn describe(&self) -> String {
        format!("wav {}", self.label)
    }
}

/// Reads every sample, downmixing to mono and resampling to 16kHz.
fn decode(reader: Box<dyn Read + Send>) -> Result<Vec<i16>> {
    let mut wav_reader = hound::WavReader::new(reader).map_err(|e| CommentaryError::SourceFault {
        message: format!("Failed to parse WAV file: {}", e),
    })?;

    let spec = wav_reader.spec();
    let raw_samples: Vec<i16> = wav_reader
        .samples::<i16>()
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| CommentaryError::SourceFault {
            message: format!("Failed to read WAV samples: {}", e),
        })?;

    let channels = usize::from(spec.channels.max(1));
    let mono_samples: Vec<i16> = if channels > 1 {
        raw_samples
            .chunks_exact(channels)
            .map(|frame| {
                let sum: i32 = frame.iter().map(|&s| i32::from(s)).sum();
                (sum / channels as i32) as i16
            })
            .collect()
    } else {
        raw_samples
    };

    Ok(resample(&mono_samples, spec.sample_rate, SAMPLE_RATE))
}

/// Simple linear interpolation resampling.
fn resample(samples: &[i16], from_rate: u32, to_rate: u32) -> Vec<i16> {
    if from_rate == to_rate || samples.is_empty() {
        return samples.to_vec();
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let output_len = (samples.len() as f64 / ratio).ceil() as usize;

    (0..output_len)
        .map(|i| {
            let source_pos = i as f64 * ratio;
            let source_idx = (source_pos.floor() as usize).min(samples.len() - 1);
            let fraction = source_pos - source_idx as f64;

            if source_idx + 1 >= samples.len() {
                samples[source_idx]
            } else {
                let left = samples[source_idx] as f64;
                let right = samples[source_idx + 1] as f64;
                (left + (right - left) * fraction) as i16
            }
        })
        .collect()
}
