//! Dataset logging: one JSONL record per commentary unit.
//!
//! The pipeline hands records over with `try_send`; a background task owns
//! the file. A full queue drops the record, the pipeline never waits on disk.

use crate::config::DatasetSettings;
use crate::defaults;
use crate::error::Result;
use crate::pipeline::types::{AudioArtifact, CommentaryUnit, ContextSnapshot, EventCategory};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetInput {
    pub event_type: EventCategory,
    pub english: String,
    pub context: Option<ContextSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetMetadata {
    pub timestamp: DateTime<Utc>,
    pub race: String,
    /// True when the Telugu text is an English pass-through.
    pub skipped: bool,
    pub sequence: u64,
    pub audio_bytes: usize,
    pub mime_type: String,
}

/// One line of the dataset file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetRecord {
    pub input: DatasetInput,
    pub output: String,
    pub metadata: DatasetMetadata,
}

impl DatasetRecord {
    pub fn new(unit: &CommentaryUnit, artifact: &AudioArtifact, race: &str) -> Self {
        Self {
            input: DatasetInput {
                event_type: unit.category,
                english: unit.english.clone(),
                context: unit.context.as_deref().cloned(),
            },
            output: unit.telugu.clone(),
            metadata: DatasetMetadata {
                timestamp: Utc::now(),
                race: race.to_string(),
                skipped: unit.fallback,
                sequence: unit.sequence,
                audio_bytes: artifact.audio.len(),
                mime_type: artifact.mime_type.clone(),
            },
        }
    }
}

/// File name for a race label: lowercase, non-alphanumerics folded to `_`.
pub fn file_name_for(race: &str) -> String {
    let slug: String = race
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect();
    let slug = slug.trim_matches('_');
    if slug.is_empty() {
        "race_unnamed.jsonl".to_string()
    } else {
        format!("race_{}.jsonl", slug)
    }
}

/// Logger counters; outlive the logger so health can report them after a session.
#[derive(Debug, Default)]
pub struct DatasetCounters {
    queued: AtomicU64,
    written: AtomicU64,
    dropped: AtomicU64,
}

impl DatasetCounters {
    pub fn queued(&self) -> u64 {
        self.queued.load(Ordering::Relaxed)
    }

    pub fn written(&self) -> u64 {
        self.written.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Handle the pipeline logs through. Cheap to clone.
#[derive(Debug, Clone)]
pub struct DatasetLogger {
    tx: mpsc::Sender<DatasetRecord>,
    race: Arc<str>,
    path: Arc<Path>,
    counters: Arc<DatasetCounters>,
}

impl DatasetLogger {
    /// Opens (appending) `<dir>/race_<name>.jsonl` and spawns the writer task.
    pub async fn spawn(dir: &Path, race: &str, queue_capacity: usize) -> Result<(Self, JoinHandle<()>)> {
        tokio::fs::create_dir_all(dir).await?;
        let path: PathBuf = dir.join(file_name_for(race));
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;

        let (tx, rx) = mpsc::channel(queue_capacity.max(1));
        let counters = Arc::new(DatasetCounters::default());
        let handle = tokio::spawn(write_records(file, rx, Arc::clone(&counters), path.clone()));

        tracing::info!(path = %path.display(), "Dataset logging enabled");
        Ok((
            Self {
                tx,
                race: Arc::from(race),
                path: Arc::from(path.as_path()),
                counters,
            },
            handle,
        ))
    }

    /// Spawns the logger described by `settings`, or `None` when disabled.
    pub async fn from_settings(settings: &DatasetSettings, label: &str) -> Result<Option<(Self, JoinHandle<()>)>> {
        if !settings.enabled {
            return Ok(None);
        }
        let race = settings.race_name.as_deref().unwrap_or(label);
        let dir = settings.resolved_dir();
        Self::spawn(&dir, race, settings.queue_capacity).await.map(Some)
    }

    /// Queues a record without waiting. Returns false when it was dropped.
    pub fn log(&self, unit: &CommentaryUnit, artifact: &AudioArtifact) -> bool {
        match self.tx.try_send(DatasetRecord::new(unit, artifact, &self.race)) {
            Ok(()) => {
                self.counters.queued.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(TrySendError::Full(record)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(seq = record.metadata.sequence, "Dataset queue full, record dropped");
                false
            }
            Err(TrySendError::Closed(_)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn counters(&self) -> Arc<DatasetCounters> {
        Arc::clone(&self.counters)
    }

    pub fn records_written(&self) -> u64 {
        self.counters.written()
    }

    pub fn records_dropped(&self) -> u64 {
        self.counters.dropped()
    }
}

async fn write_records(
    mut file: tokio::fs::File,
    mut rx: mpsc::Receiver<DatasetRecord>,
    counters: Arc<DatasetCounters>,
    path: PathBuf,
) {
    let mut per_category: HashMap<EventCategory, u64> = HashMap::new();
    let mut skipped = 0u64;

    while let Some(record) = rx.recv().await {
        let mut line = match serde_json::to_string(&record) {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!("Failed to serialize dataset record: {}", e);
                continue;
            }
        };
        line.push('\n');

        if let Err(e) = file.write_all(line.as_bytes()).await {
            tracing::warn!(path = %path.display(), "Failed to write dataset record: {}", e);
            continue;
        }

        *per_category.entry(record.input.event_type).or_default() += 1;
        if record.metadata.skipped {
            skipped += 1;
        }
        let written = counters.written.fetch_add(1, Ordering::Relaxed) + 1;
        if written.is_multiple_of(defaults::DATASET_STATS_EVERY) {
            log_stats(written, skipped, &per_category);
        }
    }

    if let Err(e) = file.flush().await {
        tracing::warn!(path = %path.display(), "Failed to flush dataset file: {}", e);
    }
    let written = counters.written.load(Ordering::Relaxed);
    if written > 0 {
        log_stats(written, skipped, &per_category);
    }
}

fn log_stats(written: u64, skipped: u64, per_category: &HashMap<EventCategory, u64>) {
    let count = |category| per_category.get(&category).copied().unwrap_or(0);
    tracing::info!(
        records = written,
        skipped,
        hype = count(EventCategory::Hype),
        tension = count(EventCategory::Tension),
        info = count(EventCategory::Info),
        filler = count(EventCategory::Filler),
        "Dataset stats"
    );
}
