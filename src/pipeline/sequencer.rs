//! Sequencer: restores chunk order before broadcast.
//!
//! Every chunk is announced (`Admitted`) by the intake before it enters the
//! stations, and every station path ends in exactly one `Resolved` outcome
//! for it. Results are released strictly in admission order. Once a
//! completed result is waiting behind a missing predecessor, that
//! predecessor may stay outstanding for at most `max_hold` after its
//! admission: when the bound is hit it is skipped and a placeholder is
//! released in its place.

use crate::error::CommentaryError;
use crate::pipeline::broadcaster::Broadcaster;
use crate::pipeline::error::{ErrorReporter, StationError};
use crate::pipeline::types::{ArtifactKind, AudioArtifact, ChunkOutcome};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Messages consumed by the sequencer.
#[derive(Debug, Clone)]
pub enum SequencerInput {
    /// A chunk entered the pipeline; its result must be waited for.
    Admitted { sequence: u64 },
    /// A chunk's final outcome.
    Resolved(ChunkOutcome),
}

/// Counters shared with the controller's health report.
#[derive(Debug, Default)]
pub struct SequencerStats {
    pub admitted: AtomicU64,
    pub released: AtomicU64,
    pub empty: AtomicU64,
    pub skipped: AtomicU64,
    pub late_discarded: AtomicU64,
}

impl SequencerStats {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }
}

/// Reorder buffer with a release watermark.
///
/// Pure state machine; time is passed in so behaviour is deterministic.
#[derive(Debug)]
pub struct ReorderBuffer {
    /// Admitted, not yet released sequence numbers with their admission time.
    /// The first entry is the head.
    outstanding: BTreeMap<u64, Instant>,
    /// Completed results waiting for their turn.
    ready: BTreeMap<u64, ChunkOutcome>,
    /// Highest sequence number ever admitted.
    last_admitted: Option<u64>,
    max_hold: Duration,
    max_depth: usize,
    stats: Arc<SequencerStats>,
}

impl ReorderBuffer {
    pub fn new(max_hold: Duration, max_depth: usize) -> Self {
        Self::with_stats(max_hold, max_depth, Arc::new(SequencerStats::default()))
    }

    pub fn with_stats(max_hold: Duration, max_depth: usize, stats: Arc<SequencerStats>) -> Self {
        Self {
            outstanding: BTreeMap::new(),
            ready: BTreeMap::new(),
            last_admitted: None,
            max_hold,
            max_depth: max_depth.max(1),
            stats,
        }
    }

    pub fn stats(&self) -> &Arc<SequencerStats> {
        &self.stats
    }

    /// Lowest sequence number not yet released.
    pub fn watermark(&self) -> Option<u64> {
        self.outstanding.keys().next().copied()
    }

    /// Number of completed results held behind the head.
    pub fn held(&self) -> usize {
        self.ready.len()
    }

    /// Registers a chunk admitted at `now`. Sequence numbers must increase;
    /// anything else is ignored.
    pub fn admit(&mut self, sequence: u64, now: Instant) -> bool {
        if self.last_admitted.is_some_and(|last| sequence <= last) {
            tracing::warn!(seq = sequence, "Ignoring non-increasing sequence number");
            return false;
        }
        self.last_admitted = Some(sequence);
        self.outstanding.insert(sequence, now);
        SequencerStats::bump(&self.stats.admitted);
        true
    }

    /// Accepts an outcome and returns whatever can now be released, in order.
    pub fn resolve(&mut self, outcome: ChunkOutcome) -> Vec<AudioArtifact> {
        let sequence = outcome.sequence();
        if !self.outstanding.contains_key(&sequence) || self.ready.contains_key(&sequence) {
            tracing::debug!(seq = sequence, "Discarding result for released or unknown sequence");
            SequencerStats::bump(&self.stats.late_discarded);
            return Vec::new();
        }

        self.ready.insert(sequence, outcome);
        let mut released = self.drain();

        while self.ready.len() > self.max_depth {
            released.extend(self.skip_head());
        }
        released
    }

    /// When the head has been outstanding for `max_hold`, if anything is held behind it.
    pub fn deadline(&self) -> Option<Instant> {
        if self.ready.is_empty() {
            return None;
        }
        self.outstanding
            .values()
            .next()
            .map(|admitted| *admitted + self.max_hold)
    }

    /// Skips stuck heads until the head is within `max_hold` of its admission
    /// or nothing is held behind it.
    pub fn expire(&mut self, now: Instant) -> Vec<AudioArtifact> {
        let mut released = Vec::new();
        while self.deadline().is_some_and(|deadline| deadline <= now) {
            released.extend(self.skip_head());
        }
        released
    }

    /// End of input: release everything, skipping whatever never resolved.
    pub fn finish(&mut self) -> Vec<AudioArtifact> {
        let mut released = self.drain();
        while !self.outstanding.is_empty() {
            released.extend(self.skip_head());
        }
        released
    }

    fn skip_head(&mut self) -> Vec<AudioArtifact> {
        let Some((head, _)) = self.outstanding.pop_first() else {
            return Vec::new();
        };

        let mut released = match self.ready.remove(&head) {
            // Only reachable from finish(); a ready head is normally drained already.
            Some(outcome) => self.emit(outcome).into_iter().collect(),
            None => {
                SequencerStats::bump(&self.stats.skipped);
                vec![AudioArtifact::skipped(head)]
            }
        };
        released.extend(self.drain());
        released
    }

    fn drain(&mut self) -> Vec<AudioArtifact> {
        let mut released = Vec::new();
        while let Some(&head) = self.outstanding.keys().next() {
            let Some(outcome) = self.ready.remove(&head) else {
                break;
            };
            self.outstanding.remove(&head);
            released.extend(self.emit(outcome));
        }
        released
    }

    fn emit(&self, outcome: ChunkOutcome) -> Option<AudioArtifact> {
        match outcome {
            ChunkOutcome::Empty { .. } => {
                SequencerStats::bump(&self.stats.empty);
                None
            }
            ChunkOutcome::Artifact(artifact) => {
                SequencerStats::bump(&self.stats.released);
                Some(artifact)
            }
        }
    }
}

/// Async station driving a [`ReorderBuffer`] and publishing through the [`Broadcaster`].
pub struct Sequencer {
    buffer: ReorderBuffer,
    broadcaster: Broadcaster,
    reporter: Arc<dyn ErrorReporter>,
}

impl Sequencer {
    pub fn new(buffer: ReorderBuffer, broadcaster: Broadcaster, reporter: Arc<dyn ErrorReporter>) -> Self {
        Self {
            buffer,
            broadcaster,
            reporter,
        }
    }

    pub fn name(&self) -> &'static str {
        "sequencer"
    }

    /// Runs until the input closes (flushing what is left) or `cancel` fires (dropping it).
    pub async fn run(mut self, mut input: mpsc::Receiver<SequencerInput>, cancel: CancellationToken) {
        loop {
            let deadline = self.buffer.deadline();
            let hold_timer = tokio::time::sleep_until(
                deadline.unwrap_or_else(|| Instant::now() + Duration::from_secs(3600)),
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::debug!(held = self.buffer.held(), "Sequencer cancelled");
                    return;
                }
                message = input.recv() => match message {
                    Some(SequencerInput::Admitted { sequence }) => {
                        self.buffer.admit(sequence, Instant::now());
                    }
                    Some(SequencerInput::Resolved(outcome)) => {
                        let mut released = self.buffer.resolve(outcome);
                        released.extend(self.buffer.expire(Instant::now()));
                        self.publish(released);
                    }
                    None => break,
                },
                _ = hold_timer, if deadline.is_some() => {
                    let released = self.buffer.expire(Instant::now());
                    self.publish(released);
                }
            }
        }

        let released = self.buffer.finish();
        self.publish(released);
        tracing::debug!("Sequencer drained");
    }

    fn publish(&self, released: Vec<AudioArtifact>) {
        for artifact in released {
            if artifact.kind == ArtifactKind::Skipped {
                let dropped = CommentaryError::SequencerTimeout {
                    sequence: artifact.sequence,
                    held_ms: self.buffer.max_hold.as_millis() as u64,
                };
                self.reporter
                    .report(self.name(), &StationError::Recoverable(dropped.to_string()));
            } else {
                tracing::debug!(seq = artifact.sequence, kind = ?artifact.kind, "Releasing artifact");
            }
            self.broadcaster.publish(&artifact);
        }
    }
}
