//! Synthesis station: Telugu commentary to audio artifacts.
//!
//! Results go straight to the sequencer as resolved outcomes. A unit whose
//! synthesis fails every attempt still resolves, as a text-only artifact.

use crate::dataset::DatasetLogger;
use crate::engines::Synthesizer;
use crate::pipeline::error::{ErrorReporter, StationError};
use crate::pipeline::retry::RetryPolicy;
use crate::pipeline::sequencer::SequencerInput;
use crate::pipeline::types::{AudioArtifact, ChunkOutcome, CommentaryUnit};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::{Semaphore, mpsc};
use tokio_util::sync::CancellationToken;

struct CachedPhrase {
    audio: Arc<[u8]>,
    mime_type: String,
    stored_at: Instant,
}

/// Short-lived cache of synthesized audio keyed by the exact Telugu text.
pub struct PhraseCache {
    entries: Mutex<HashMap<String, CachedPhrase>>,
    ttl: Duration,
    capacity: usize,
    hits: AtomicU64,
}

impl PhraseCache {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
            capacity,
            hits: AtomicU64::new(0),
        }
    }

    /// Cached audio for `text` if it is younger than the TTL.
    pub fn get(&self, text: &str) -> Option<(Arc<[u8]>, String)> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let fresh = entries
            .get(text)
            .is_some_and(|entry| entry.stored_at.elapsed() < self.ttl);
        if !fresh {
            entries.remove(text);
            return None;
        }
        self.hits.fetch_add(1, Ordering::Relaxed);
        entries
            .get(text)
            .map(|entry| (Arc::clone(&entry.audio), entry.mime_type.clone()))
    }

    pub fn insert(&self, text: &str, audio: Arc<[u8]>, mime_type: &str) {
        if self.capacity == 0 || audio.is_empty() {
            return;
        }
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let ttl = self.ttl;
        entries.retain(|_, entry| entry.stored_at.elapsed() < ttl);
        if entries.len() >= self.capacity && !entries.contains_key(text) {
            let oldest = entries
                .iter()
                .min_by_key(|(_, entry)| entry.stored_at)
                .map(|(key, _)| key.clone());
            if let Some(oldest) = oldest {
                entries.remove(&oldest);
            }
        }
        entries.insert(
            text.to_string(),
            CachedPhrase {
                audio,
                mime_type: mime_type.to_string(),
                stored_at: Instant::now(),
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }
}

/// Station wrapping a synthesis engine.
pub struct SynthesisStation {
    synthesizer: Arc<dyn Synthesizer>,
    retry: RetryPolicy,
    cache: Arc<PhraseCache>,
    reporter: Arc<dyn ErrorReporter>,
    dataset: Option<DatasetLogger>,
}

impl SynthesisStation {
    pub fn new(
        synthesizer: Arc<dyn Synthesizer>,
        retry: RetryPolicy,
        cache: Arc<PhraseCache>,
        reporter: Arc<dyn ErrorReporter>,
    ) -> Self {
        Self {
            synthesizer,
            retry,
            cache,
            reporter,
            dataset: None,
        }
    }

    /// Append every finished unit to the dataset log.
    pub fn with_dataset(mut self, dataset: Option<DatasetLogger>) -> Self {
        self.dataset = dataset;
        self
    }

    pub fn name(&self) -> &'static str {
        "synthesis"
    }

    /// Synthesizes one unit. `None` only when cancelled.
    pub async fn synthesize(
        &self,
        unit: &CommentaryUnit,
        cancel: &CancellationToken,
    ) -> Option<AudioArtifact> {
        if unit.telugu.trim().is_empty() {
            return Some(AudioArtifact::text_only(unit));
        }

        if let Some((audio, mime_type)) = self.cache.get(&unit.telugu) {
            tracing::debug!(seq = unit.sequence, "Phrase cache hit");
            return Some(AudioArtifact::from_unit(unit, audio, &mime_type));
        }

        let synthesizer = &self.synthesizer;
        let text = unit.telugu.as_str();
        let reporter = &self.reporter;
        let name = self.name();
        let artifact = self
            .retry
            .run_or_else(
                "synthesis",
                cancel,
                move |attempt| {
                    tracing::debug!(seq = unit.sequence, attempt, "Synthesizing unit");
                    synthesizer.synthesize(text)
                },
                |last| {
                    reporter.report(
                        name,
                        &StationError::Recoverable(format!(
                            "Unit {} released without audio: {}",
                            unit.sequence, last
                        )),
                    );
                    Vec::new()
                },
            )
            .await?;

        let audio: Arc<[u8]> = Arc::from(artifact);
        let mime_type = self.synthesizer.mime_type().to_string();
        self.cache.insert(&unit.telugu, Arc::clone(&audio), &mime_type);
        Some(AudioArtifact::from_unit(unit, audio, &mime_type))
    }

    /// Runs the station until the input closes or `cancel` fires.
    pub async fn run(
        self,
        mut input: mpsc::Receiver<CommentaryUnit>,
        sequencer: mpsc::Sender<SequencerInput>,
        max_concurrent: usize,
        cancel: CancellationToken,
    ) {
        let max_concurrent = max_concurrent.max(1);
        let semaphore = Arc::new(Semaphore::new(max_concurrent));
        let station = Arc::new(self);

        loop {
            let unit = tokio::select! {
                _ = cancel.cancelled() => break,
                unit = input.recv() => unit,
            };
            let Some(unit) = unit else {
                break;
            };

            let permit = tokio::select! {
                _ = cancel.cancelled() => break,
                permit = semaphore.clone().acquire_owned() => permit,
            };
            let Ok(permit) = permit else {
                break;
            };

            let station = Arc::clone(&station);
            let sequencer = sequencer.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                let _permit = permit;
                let Some(artifact) = station.synthesize(&unit, &cancel).await else {
                    return;
                };
                if cancel.is_cancelled() {
                    return;
                }
                tracing::debug!(
                    seq = artifact.sequence,
                    bytes = artifact.audio.len(),
                    kind = ?artifact.kind,
                    "Synthesized"
                );
                if let Some(dataset) = &station.dataset {
                    dataset.log(&unit, &artifact);
                }
                let _sent = sequencer
                    .send(SequencerInput::Resolved(ChunkOutcome::Artifact(artifact)))
                    .await;
            });
        }

        let _drained = semaphore.acquire_many(max_concurrent as u32).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engines::MockSynthesizer;
    use crate::pipeline::error::CollectingReporter;
    use crate::pipeline::types::{ArtifactKind, EventCategory};

    fn unit(sequence: u64, telugu: &str) -> CommentaryUnit {
        CommentaryUnit {
            sequence,
            english: "Safety car".to_string(),
            telugu: telugu.to_string(),
            category: EventCategory::Info,
            context: None,
            fallback: false,
        }
    }

    fn station(synthesizer: Arc<MockSynthesizer>, reporter: Arc<CollectingReporter>) -> SynthesisStation {
        SynthesisStation::new(
            synthesizer,
            RetryPolicy::immediate(3, Duration::from_secs(1)),
            Arc::new(PhraseCache::new(Duration::from_secs(120), 16)),
            reporter,
        )
    }

    #[test]
    fn test_phrase_cache_expires_entries() {
        let cache = PhraseCache::new(Duration::ZERO, 4);
        cache.insert("సేఫ్టీ కార్", Arc::from(vec![1u8]), "audio/wav");
        assert!(cache.get("సేఫ్టీ కార్").is_none());
        assert_eq!(cache.hits(), 0);
    }

    #[test]
    fn test_phrase_cache_evicts_oldest_at_capacity() {
        let cache = PhraseCache::new(Duration::from_secs(60), 2);
        cache.insert("one", Arc::from(vec![1u8]), "audio/wav");
        cache.insert("two", Arc::from(vec![2u8]), "audio/wav");
        cache.insert("three", Arc::from(vec![3u8]), "audio/wav");

        assert_eq!(cache.len(), 2);
        assert!(cache.get("one").is_none());
        assert_eq!(&*cache.get("three").unwrap().0, &[3u8]);
    }

    #[test]
    fn test_phrase_cache_ignores_empty_audio() {
        let cache = PhraseCache::new(Duration::from_secs(60), 2);
        cache.insert("silent", Arc::from(Vec::new()), "audio/wav");
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_repeated_phrase_synthesized_once() {
        let synthesizer = Arc::new(MockSynthesizer::new());
        let station = station(synthesizer.clone(), Arc::new(CollectingReporter::new()));
        let cancel = CancellationToken::new();

        let first = station.synthesize(&unit(1, "సేఫ్టీ కార్"), &cancel).await.unwrap();
        let second = station.synthesize(&unit(2, "సేఫ్టీ కార్"), &cancel).await.unwrap();

        assert_eq!(synthesizer.calls(), 1);
        assert_eq!(first.audio, second.audio);
        assert_eq!(second.sequence, 2);
        assert_eq!(station.cache.hits(), 1);
    }

    #[tokio::test]
    async fn test_exhausted_synthesis_keeps_text() {
        let synthesizer = Arc::new(MockSynthesizer::new().with_failure());
        let reporter = Arc::new(CollectingReporter::new());
        let station = station(synthesizer.clone(), reporter.clone());

        let artifact = station
            .synthesize(&unit(7, "ఏడో ల్యాప్"), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(artifact.kind, ArtifactKind::TextOnly);
        assert!(!artifact.has_audio());
        assert_eq!(artifact.telugu, "ఏడో ల్యాప్");
        assert_eq!(synthesizer.calls(), 3);
        assert_eq!(reporter.count_for("synthesis"), 1);
        assert!(station.cache.is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_synthesis_yields_nothing() {
        let station = station(Arc::new(MockSynthesizer::new()), Arc::new(CollectingReporter::new()));
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(station.synthesize(&unit(0, "text"), &cancel).await.is_none());
    }

    #[tokio::test]
    async fn test_run_resolves_every_unit() {
        let synthesizer = Arc::new(MockSynthesizer::new().with_failure_when("broken"));
        let station = station(synthesizer, Arc::new(CollectingReporter::new()));

        let (in_tx, in_rx) = mpsc::channel(8);
        let (seq_tx, mut seq_rx) = mpsc::channel(8);
        let handle = tokio::spawn(station.run(in_rx, seq_tx, 2, CancellationToken::new()));

        in_tx.send(unit(0, "fine")).await.unwrap();
        in_tx.send(unit(1, "broken")).await.unwrap();
        drop(in_tx);
        handle.await.unwrap();

        let mut resolved = Vec::new();
        while let Some(SequencerInput::Resolved(ChunkOutcome::Artifact(artifact))) = seq_rx.recv().await {
            resolved.push((artifact.sequence, artifact.kind));
        }
        resolved.sort_by_key(|(seq, _)| *seq);
        assert_eq!(
            resolved,
            vec![(0, ArtifactKind::Full), (1, ArtifactKind::TextOnly)]
        );
    }
}
