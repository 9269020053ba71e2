//! Transcriber station: audio chunks to English sentences.
//!
//! Chunks are transcribed one at a time, in order, because fragments are
//! stitched into sentences across chunk boundaries. A unit is attributed to
//! the chunk that completed it; chunks whose text was absorbed into that
//! unit, silent chunks and chunks dropped after retries resolve as empty.

use crate::config::TranscriptionSettings;
use crate::engines::Transcriber;
use crate::pipeline::error::{ErrorReporter, StationError};
use crate::pipeline::retry::{RetryError, RetryPolicy};
use crate::pipeline::sequencer::SequencerInput;
use crate::pipeline::types::{AudioChunk, ChunkOutcome, TranscriptUnit};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Words the engine emits for non-speech that should never reach listeners.
const NON_SPEECH_MARKERS: &[&str] = &["[music]", "[inaudible]", "[applause]", "[blank_audio]"];

/// Drops non-speech markers and collapses whitespace.
fn clean_transcription(text: &str) -> String {
    text.split_whitespace()
        .filter(|word| !NON_SPEECH_MARKERS.contains(&word.to_lowercase().as_str()))
        .collect::<Vec<_>>()
        .join(" ")
}

fn ends_sentence(text: &str) -> bool {
    text.trim_end()
        .ends_with(['.', '!', '?'])
}

/// A completed utterance and the chunks it swallowed.
#[derive(Debug, Clone, PartialEq)]
pub struct Utterance {
    pub unit: TranscriptUnit,
    /// Earlier chunks whose text is part of `unit`; they resolve as empty.
    pub absorbed: Vec<u64>,
}

/// Accumulates fragments until a sentence is complete.
///
/// Flushes on terminal punctuation, on `max_fragments` fragments, or when
/// the oldest fragment is `max_wait` old.
#[derive(Debug)]
pub struct SentenceBuffer {
    fragments: Vec<(u64, String)>,
    started: Option<Instant>,
    max_fragments: usize,
    max_wait: Duration,
}

impl SentenceBuffer {
    pub fn new(max_fragments: usize, max_wait: Duration) -> Self {
        Self {
            fragments: Vec::new(),
            started: None,
            max_fragments: max_fragments.max(1),
            max_wait,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    /// When the pending fragments must be flushed regardless of punctuation.
    pub fn deadline(&self) -> Option<Instant> {
        self.started.map(|started| started + self.max_wait)
    }

    /// Adds one chunk's text. Returns the utterance if this fragment completed it.
    pub fn push(&mut self, sequence: u64, text: &str, now: Instant) -> Option<Utterance> {
        if self.fragments.is_empty() {
            self.started = Some(now);
        }
        self.fragments.push((sequence, text.to_string()));

        let timed_out = self.deadline().is_some_and(|deadline| deadline <= now);
        if ends_sentence(text) || self.fragments.len() >= self.max_fragments || timed_out {
            self.flush()
        } else {
            None
        }
    }

    /// Emits whatever is pending, attributed to the last contributing chunk.
    pub fn flush(&mut self) -> Option<Utterance> {
        self.started = None;
        let (last, _) = self.fragments.last()?;
        let last = *last;

        let text = self
            .fragments
            .iter()
            .map(|(_, text)| text.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        let absorbed = self
            .fragments
            .iter()
            .map(|(seq, _)| *seq)
            .filter(|seq| *seq != last)
            .collect();
        self.fragments.clear();

        Some(Utterance {
            unit: TranscriptUnit::new(last, text),
            absorbed,
        })
    }
}

/// Station wrapping a transcription engine.
pub struct TranscriberStation {
    transcriber: Arc<dyn Transcriber>,
    retry: RetryPolicy,
    sentences: SentenceBuffer,
    reporter: Arc<dyn ErrorReporter>,
}

impl TranscriberStation {
    pub fn new(
        transcriber: Arc<dyn Transcriber>,
        retry: RetryPolicy,
        settings: &TranscriptionSettings,
        reporter: Arc<dyn ErrorReporter>,
    ) -> Self {
        Self {
            transcriber,
            retry,
            sentences: SentenceBuffer::new(
                settings.max_fragments,
                Duration::from_millis(settings.max_wait_ms),
            ),
            reporter,
        }
    }

    pub fn name(&self) -> &'static str {
        "transcriber"
    }

    /// Transcribes one chunk with retries. `Ok(None)` means silence or a dropped chunk.
    pub async fn transcribe(
        &self,
        chunk: &AudioChunk,
        cancel: &CancellationToken,
    ) -> Result<Option<String>, RetryError> {
        let transcriber = &self.transcriber;
        let result = self
            .retry
            .run("transcription", cancel, move |attempt| {
                tracing::debug!(seq = chunk.sequence, attempt, "Transcribing chunk");
                transcriber.transcribe(chunk)
            })
            .await;

        match result {
            Ok(text) => {
                let cleaned = clean_transcription(&text);
                Ok((!cleaned.is_empty()).then_some(cleaned))
            }
            Err(RetryError::Cancelled) => Err(RetryError::Cancelled),
            Err(RetryError::Exhausted { attempts, last }) => {
                self.reporter.report(
                    self.name(),
                    &StationError::Recoverable(format!(
                        "Dropping chunk {} after {} attempt(s): {}",
                        chunk.sequence, attempts, last
                    )),
                );
                Ok(None)
            }
        }
    }

    /// Runs the station until the input closes or `cancel` fires.
    ///
    /// Units go to `output`; empty outcomes go straight to the sequencer.
    pub async fn run(
        mut self,
        mut input: mpsc::Receiver<AudioChunk>,
        output: mpsc::Sender<TranscriptUnit>,
        sequencer: mpsc::Sender<SequencerInput>,
        cancel: CancellationToken,
    ) {
        loop {
            let deadline = self.sentences.deadline();
            let flush_timer = tokio::time::sleep_until(
                deadline.unwrap_or_else(|| Instant::now() + Duration::from_secs(3600)),
            );

            let chunk = tokio::select! {
                _ = cancel.cancelled() => return,
                _ = flush_timer, if deadline.is_some() => {
                    if let Some(utterance) = self.sentences.flush() {
                        tracing::debug!(seq = utterance.unit.sequence, "Sentence flushed after max wait");
                        if !emit(utterance, &output, &sequencer).await {
                            return;
                        }
                    }
                    continue;
                }
                chunk = input.recv() => chunk,
            };

            let Some(chunk) = chunk else {
                break;
            };
            let sequence = chunk.sequence;

            let text = match self.transcribe(&chunk, &cancel).await {
                Ok(text) => text,
                Err(_) => return,
            };

            let utterance = match text {
                Some(text) => {
                    tracing::debug!(seq = sequence, text = %text, "Transcript fragment");
                    self.sentences.push(sequence, &text, Instant::now())
                }
                None => {
                    // A pause ends the pending sentence; this chunk itself carries nothing.
                    let pending = self.sentences.flush();
                    if !resolve_empty(sequence, &sequencer).await {
                        return;
                    }
                    pending
                }
            };

            if let Some(utterance) = utterance
                && !emit(utterance, &output, &sequencer).await
            {
                return;
            }
        }

        if let Some(utterance) = self.sentences.flush() {
            let _sent = emit(utterance, &output, &sequencer).await;
        }
    }
}

async fn resolve_empty(sequence: u64, sequencer: &mpsc::Sender<SequencerInput>) -> bool {
    sequencer
        .send(SequencerInput::Resolved(ChunkOutcome::Empty { sequence }))
        .await
        .is_ok()
}

/// Resolves absorbed chunks, then forwards the unit. False once downstream is gone.
async fn emit(
    utterance: Utterance,
    output: &mpsc::Sender<TranscriptUnit>,
    sequencer: &mpsc::Sender<SequencerInput>,
) -> bool {
    for sequence in utterance.absorbed {
        if !resolve_empty(sequence, sequencer).await {
            return false;
        }
    }
    tracing::info!(seq = utterance.unit.sequence, text = %utterance.unit.text, "Transcribed");
    output.send(utterance.unit).await.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engines::MockTranscriber;
    use crate::pipeline::error::CollectingReporter;

    const WAIT: Duration = Duration::from_secs(8);

    fn chunk(sequence: u64) -> AudioChunk {
        AudioChunk::new(sequence, vec![0i16; 160])
    }

    fn station(transcriber: MockTranscriber, reporter: Arc<CollectingReporter>) -> TranscriberStation {
        TranscriberStation::new(
            Arc::new(transcriber),
            RetryPolicy::immediate(3, Duration::from_secs(1)),
            &TranscriptionSettings::default(),
            reporter,
        )
    }

    #[test]
    fn test_clean_transcription_drops_markers() {
        assert_eq!(clean_transcription("  [MUSIC]  Box   box "), "Box box");
        assert_eq!(clean_transcription("[inaudible]"), "");
    }

    #[test]
    fn test_sentence_completes_on_punctuation() {
        let mut buffer = SentenceBuffer::new(5, WAIT);
        let now = Instant::now();
        assert!(buffer.push(3, "Verstappen goes", now).is_none());
        let utterance = buffer.push(4, "around the outside!", now).unwrap();

        assert_eq!(utterance.unit.sequence, 4);
        assert_eq!(utterance.unit.text, "Verstappen goes around the outside!");
        assert_eq!(utterance.absorbed, vec![3]);
        assert!(buffer.is_empty());
        assert_eq!(buffer.deadline(), None);
    }

    #[test]
    fn test_sentence_flushes_at_max_fragments() {
        let mut buffer = SentenceBuffer::new(3, WAIT);
        let now = Instant::now();
        assert!(buffer.push(0, "one", now).is_none());
        assert!(buffer.push(1, "two", now).is_none());
        let utterance = buffer.push(2, "three", now).unwrap();
        assert_eq!(utterance.unit.text, "one two three");
        assert_eq!(utterance.absorbed, vec![0, 1]);
    }

    #[test]
    fn test_sentence_flushes_when_oldest_fragment_expires() {
        let mut buffer = SentenceBuffer::new(5, WAIT);
        let start = Instant::now();
        assert!(buffer.push(0, "slow", start).is_none());
        assert_eq!(buffer.deadline(), Some(start + WAIT));

        let utterance = buffer.push(1, "commentary", start + WAIT).unwrap();
        assert_eq!(utterance.unit.sequence, 1);
    }

    #[test]
    fn test_flush_on_empty_buffer() {
        let mut buffer = SentenceBuffer::new(5, WAIT);
        assert!(buffer.flush().is_none());
    }

    #[tokio::test]
    async fn test_run_emits_units_and_resolves_absorbed_chunks() {
        let transcriber = MockTranscriber::new("mock")
            .with_response_for(0, "Norris is closing")
            .with_response_for(1, "on Leclerc.")
            .with_response_for(2, "Pit stop for Hamilton.");
        let station = station(transcriber, Arc::new(CollectingReporter::new()));

        let (in_tx, in_rx) = mpsc::channel(8);
        let (out_tx, mut out_rx) = mpsc::channel(8);
        let (seq_tx, mut seq_rx) = mpsc::channel(8);
        let handle = tokio::spawn(station.run(in_rx, out_tx, seq_tx, CancellationToken::new()));

        for sequence in 0..3 {
            in_tx.send(chunk(sequence)).await.unwrap();
        }
        drop(in_tx);
        handle.await.unwrap();

        let first = out_rx.recv().await.unwrap();
        assert_eq!(first.sequence, 1);
        assert_eq!(first.text, "Norris is closing on Leclerc.");
        assert_eq!(out_rx.recv().await.unwrap().sequence, 2);

        match seq_rx.recv().await.unwrap() {
            SequencerInput::Resolved(ChunkOutcome::Empty { sequence }) => assert_eq!(sequence, 0),
            other => panic!("expected empty outcome, got {:?}", other),
        }
        assert!(seq_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_silence_ends_pending_sentence() {
        let transcriber = MockTranscriber::new("mock")
            .with_response_for(0, "Safety car")
            .with_response_for(1, "");
        let station = station(transcriber, Arc::new(CollectingReporter::new()));

        let (in_tx, in_rx) = mpsc::channel(8);
        let (out_tx, mut out_rx) = mpsc::channel(8);
        let (seq_tx, mut seq_rx) = mpsc::channel(8);
        let handle = tokio::spawn(station.run(in_rx, out_tx, seq_tx, CancellationToken::new()));

        in_tx.send(chunk(0)).await.unwrap();
        in_tx.send(chunk(1)).await.unwrap();
        drop(in_tx);
        handle.await.unwrap();

        let unit = out_rx.recv().await.unwrap();
        assert_eq!((unit.sequence, unit.text.as_str()), (0, "Safety car"));
        assert!(matches!(
            seq_rx.recv().await,
            Some(SequencerInput::Resolved(ChunkOutcome::Empty { sequence: 1 }))
        ));
    }

    #[tokio::test]
    async fn test_failed_chunk_is_dropped_after_retries() {
        let transcriber = MockTranscriber::new("mock")
            .with_response("Lights out.")
            .with_failures_for(1, 3);
        let reporter = Arc::new(CollectingReporter::new());
        let station = station(transcriber, reporter.clone());

        let (in_tx, in_rx) = mpsc::channel(8);
        let (out_tx, mut out_rx) = mpsc::channel(8);
        let (seq_tx, mut seq_rx) = mpsc::channel(8);
        let handle = tokio::spawn(station.run(in_rx, out_tx, seq_tx, CancellationToken::new()));

        for sequence in 0..3 {
            in_tx.send(chunk(sequence)).await.unwrap();
        }
        drop(in_tx);
        handle.await.unwrap();

        assert_eq!(out_rx.recv().await.unwrap().sequence, 0);
        assert_eq!(out_rx.recv().await.unwrap().sequence, 2);
        assert!(matches!(
            seq_rx.recv().await,
            Some(SequencerInput::Resolved(ChunkOutcome::Empty { sequence: 1 }))
        ));
        assert_eq!(reporter.count_for("transcriber"), 1);
    }

    #[tokio::test]
    async fn test_transient_failure_recovers_within_retries() {
        let transcriber = MockTranscriber::new("mock")
            .with_response("DRS enabled.")
            .with_failures_for(0, 2);
        let station = station(transcriber, Arc::new(CollectingReporter::new()));

        let text = station
            .transcribe(&chunk(0), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(text.as_deref(), Some("DRS enabled."));
    }

    #[tokio::test]
    async fn test_pending_fragment_flushed_after_max_wait() {
        let transcriber = MockTranscriber::new("mock").with_response_for(0, "and he is");
        let station = TranscriberStation::new(
            Arc::new(transcriber),
            RetryPolicy::immediate(1, Duration::from_secs(1)),
            &TranscriptionSettings {
                max_wait_ms: 50,
                ..Default::default()
            },
            Arc::new(CollectingReporter::new()),
        );

        let (in_tx, in_rx) = mpsc::channel(8);
        let (out_tx, mut out_rx) = mpsc::channel(8);
        let (seq_tx, _seq_rx) = mpsc::channel(8);
        let _handle = tokio::spawn(station.run(in_rx, out_tx, seq_tx, CancellationToken::new()));

        in_tx.send(chunk(0)).await.unwrap();
        let unit = tokio::time::timeout(Duration::from_secs(2), out_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(unit.text, "and he is");
        drop(in_tx);
    }
}
