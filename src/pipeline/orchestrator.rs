//! Pipeline controller: session lifecycle and station wiring.
//!
//! ```text
//! ChunkSource → intake → transcriber → rewrite → synthesis → sequencer → broadcaster
//!                  └──── Admitted ─────────────────────────────↗
//! ```
//!
//! At most one session runs at a time. `start` calls are serialized by a
//! lock and the controller is the only writer of session state. Every
//! station runs as its own task connected by bounded channels; the
//! sequencer is the one point where order is restored.

use crate::config::Config;
use crate::context::{ContextCache, RaceDataSource};
use crate::dataset::{DatasetCounters, DatasetLogger};
use crate::engines::Engines;
use crate::error::{CommentaryError, Result};
use crate::pipeline::broadcaster::{Broadcaster, Subscription};
use crate::pipeline::error::{ErrorReporter, LogReporter, StationError};
use crate::pipeline::retry::RetryPolicy;
use crate::pipeline::rewrite_station::RewriteStation;
use crate::pipeline::sequencer::{ReorderBuffer, Sequencer, SequencerInput, SequencerStats};
use crate::pipeline::synthesis_station::{PhraseCache, SynthesisStation};
use crate::pipeline::transcriber_station::TranscriberStation;
use crate::pipeline::types::{
    AudioArtifact, AudioChunk, ChunkOutcome, CommentaryUnit, ContextSnapshot, PipelineSession,
    SessionState, TranscriptUnit,
};
use crate::source::{ChunkSource, open_source};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// How long teardown waits for cancelled tasks before detaching them.
const TEARDOWN_TIMEOUT: Duration = Duration::from_secs(2);

/// Handle to a started session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    session: PipelineSession,
    state: watch::Receiver<SessionState>,
}

impl SessionHandle {
    pub fn id(&self) -> Uuid {
        self.session.id
    }

    pub fn session(&self) -> &PipelineSession {
        &self.session
    }

    /// Current state of this session.
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Waits until the session is Stopped or Failed and returns that state.
    pub async fn wait(&mut self) -> SessionState {
        match self.state.wait_for(|state| state.is_terminal()).await {
            Ok(state) => *state,
            // Sender dropped without a terminal state: the controller is gone.
            Err(_) => SessionState::Stopped,
        }
    }
}

/// Output of a diagnostic rewrite + synthesis.
#[derive(Debug, Clone)]
pub struct RewriteProbe {
    pub commentary: CommentaryUnit,
    pub artifact: AudioArtifact,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineNames {
    pub transcriber: String,
    pub rewriter: String,
    pub synthesizer: String,
}

/// Point-in-time health report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Health {
    pub state: SessionState,
    /// Current session, or the last one once it ended.
    pub session: Option<PipelineSession>,
    pub last_failure: Option<String>,
    pub chunks_admitted: u64,
    pub artifacts_released: u64,
    pub empty_chunks: u64,
    pub beats_skipped: u64,
    pub late_discarded: u64,
    pub listeners: usize,
    pub artifacts_published: u64,
    pub listeners_dropped: u64,
    pub context_available: bool,
    pub context_staleness: u64,
    pub context_refreshes: u64,
    pub phrase_cache_hits: u64,
    pub dataset_records: u64,
    pub engines: EngineNames,
}

struct Active {
    id: Uuid,
    intake_cancel: CancellationToken,
    state_tx: watch::Sender<SessionState>,
}

struct Slot {
    state: SessionState,
    session: Option<PipelineSession>,
    last_failure: Option<String>,
    stats: Option<Arc<SequencerStats>>,
    dataset: Option<Arc<DatasetCounters>>,
    active: Option<Active>,
}

impl Slot {
    fn idle() -> Self {
        Self {
            state: SessionState::Idle,
            session: None,
            last_failure: None,
            stats: None,
            dataset: None,
            active: None,
        }
    }

    fn set_state(&mut self, to: SessionState) {
        let from = self.state;
        self.state = to;
        if let Some(session) = self.session.as_mut() {
            session.state = to;
        }
        if let Some(active) = &self.active {
            active.state_tx.send_replace(to);
            tracing::info!(session = %active.id, %from, %to, "Session state changed");
        }
    }
}

/// State shared between the controller and its session tasks.
struct Shared {
    slot: Mutex<Slot>,
    broadcaster: Broadcaster,
    reporter: Arc<dyn ErrorReporter>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Moves session `id` to `to` if it is currently in one of `from`.
    fn transition(&self, id: Uuid, from: &[SessionState], to: SessionState) -> bool {
        let mut slot = self.lock();
        let current = slot.active.as_ref().is_some_and(|active| active.id == id);
        if !current || !from.contains(&slot.state) {
            return false;
        }
        slot.set_state(to);
        true
    }

    /// Final bookkeeping once every task of session `id` has ended.
    fn retire(&self, id: Uuid, failure: Option<String>) {
        let mut slot = self.lock();
        if !slot.active.as_ref().is_some_and(|active| active.id == id) {
            return;
        }
        match failure {
            Some(message) => {
                if slot.state != SessionState::Failed {
                    slot.set_state(SessionState::Failed);
                }
                slot.last_failure = Some(message);
            }
            None => slot.set_state(SessionState::Stopped),
        }
        slot.active = None;
    }
}

/// Why the intake loop ended.
enum IntakeEnd {
    /// `stop` was requested.
    Cancelled,
    /// The source reached end of stream.
    EndOfStream,
    /// The source cannot continue.
    Fault(CommentaryError),
}

/// Owns the single pipeline session and the long-lived collaborators.
pub struct PipelineController {
    config: Config,
    engines: Engines,
    context: Arc<ContextCache>,
    race_data: Option<Arc<dyn RaceDataSource>>,
    phrase_cache: Arc<PhraseCache>,
    shared: Arc<Shared>,
    start_lock: tokio::sync::Mutex<()>,
}

impl PipelineController {
    pub fn new(config: Config, engines: Engines) -> Self {
        let phrase_cache = Arc::new(PhraseCache::new(
            Duration::from_secs(config.synthesis.cache_ttl_secs),
            config.synthesis.cache_capacity,
        ));
        Self {
            config,
            engines,
            context: Arc::new(ContextCache::new()),
            race_data: None,
            phrase_cache,
            shared: Arc::new(Shared {
                slot: Mutex::new(Slot::idle()),
                broadcaster: Broadcaster::new(),
                reporter: Arc::new(LogReporter),
            }),
            start_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Race-data collaborator refreshed while a session runs.
    pub fn with_race_data(mut self, source: Arc<dyn RaceDataSource>) -> Self {
        self.race_data = Some(source);
        self
    }

    /// Replaces the broadcaster (e.g. to share one with other producers).
    pub fn with_broadcaster(mut self, broadcaster: Broadcaster) -> Self {
        let reporter = Arc::clone(&self.shared.reporter);
        self.shared = Arc::new(Shared {
            slot: Mutex::new(Slot::idle()),
            broadcaster,
            reporter,
        });
        self
    }

    pub fn with_error_reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        let broadcaster = self.shared.broadcaster.clone();
        self.shared = Arc::new(Shared {
            slot: Mutex::new(Slot::idle()),
            broadcaster,
            reporter,
        });
        self
    }

    pub fn with_context_cache(mut self, context: Arc<ContextCache>) -> Self {
        self.context = context;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn broadcaster(&self) -> &Broadcaster {
        &self.shared.broadcaster
    }

    pub fn subscribe(&self) -> Subscription {
        self.shared.broadcaster.subscribe()
    }

    pub fn state(&self) -> SessionState {
        self.shared.lock().state
    }

    pub fn last_failure(&self) -> Option<String> {
        self.shared.lock().last_failure.clone()
    }

    /// Starts a session reading `descriptor` (see [`open_source`]).
    pub async fn start(&self, descriptor: &str, label: &str) -> Result<SessionHandle> {
        let _guard = self.start_lock.lock().await;
        self.ensure_can_start()?;
        let source = open_source(descriptor, self.config.pipeline.chunk_duration_ms)?;
        self.launch(source, descriptor, label).await
    }

    /// Starts a session on an already-open source.
    pub async fn start_with_source(
        &self,
        source: Box<dyn ChunkSource>,
        label: &str,
    ) -> Result<SessionHandle> {
        let _guard = self.start_lock.lock().await;
        self.ensure_can_start()?;
        let descriptor = source.describe();
        self.launch(source, &descriptor, label).await
    }

    fn ensure_can_start(&self) -> Result<()> {
        let slot = self.shared.lock();
        if slot.active.is_some() || !slot.state.accepts_start() {
            return Err(CommentaryError::AlreadyRunning);
        }
        Ok(())
    }

    /// Wires the stations and spawns the session. Caller holds `start_lock`.
    async fn launch(
        &self,
        source: Box<dyn ChunkSource>,
        descriptor: &str,
        label: &str,
    ) -> Result<SessionHandle> {
        let session = PipelineSession::new(descriptor, label);
        let id = session.id;
        let (state_tx, state_rx) = watch::channel(SessionState::Starting);
        let session_cancel = CancellationToken::new();
        let intake_cancel = session_cancel.child_token();
        let stats = Arc::new(SequencerStats::default());

        let dataset = match DatasetLogger::from_settings(&self.config.dataset, label).await {
            Ok(dataset) => dataset,
            Err(e) => {
                tracing::warn!("Dataset logging disabled for this session: {}", e);
                None
            }
        };

        {
            let mut slot = self.shared.lock();
            slot.session = Some(session.clone());
            slot.last_failure = None;
            slot.stats = Some(Arc::clone(&stats));
            slot.dataset = dataset.as_ref().map(|(logger, _)| logger.counters());
            slot.active = Some(Active {
                id,
                intake_cancel: intake_cancel.clone(),
                state_tx,
            });
            slot.set_state(SessionState::Starting);
        }

        let pipeline = &self.config.pipeline;
        let buffer = pipeline.channel_buffer.max(1);
        let (chunk_tx, chunk_rx) = mpsc::channel::<AudioChunk>(buffer);
        let (transcript_tx, transcript_rx) = mpsc::channel::<TranscriptUnit>(buffer);
        let (commentary_tx, commentary_rx) = mpsc::channel::<CommentaryUnit>(buffer);
        let (sequencer_tx, sequencer_rx) = mpsc::channel::<SequencerInput>(buffer * 4);
        let retry = RetryPolicy::from_settings(&self.config.retry);
        let reporter = Arc::clone(&self.shared.reporter);

        let sequencer = Sequencer::new(
            ReorderBuffer::with_stats(pipeline.max_hold(), pipeline.reorder_depth, Arc::clone(&stats)),
            self.shared.broadcaster.clone(),
            Arc::clone(&reporter),
        );
        let transcriber = TranscriberStation::new(
            Arc::clone(&self.engines.transcriber),
            retry.clone(),
            &self.config.transcription,
            Arc::clone(&reporter),
        );
        let rewrite = RewriteStation::new(
            Arc::clone(&self.engines.rewriter),
            retry.clone(),
            Arc::clone(&self.context),
            Arc::clone(&reporter),
        );
        let (dataset_logger, dataset_writer) = dataset.unzip();
        let synthesis = SynthesisStation::new(
            Arc::clone(&self.engines.synthesizer),
            retry,
            Arc::clone(&self.phrase_cache),
            Arc::clone(&reporter),
        )
        .with_dataset(dataset_logger);

        let sequencer_task = tokio::spawn(sequencer.run(sequencer_rx, session_cancel.clone()));
        let mut tasks = vec![
            tokio::spawn(synthesis.run(
                commentary_rx,
                sequencer_tx.clone(),
                pipeline.max_concurrent_units,
                session_cancel.clone(),
            )),
            tokio::spawn(rewrite.run(
                transcript_rx,
                commentary_tx,
                pipeline.max_concurrent_units,
                session_cancel.clone(),
            )),
            tokio::spawn(transcriber.run(
                chunk_rx,
                transcript_tx,
                sequencer_tx.clone(),
                session_cancel.clone(),
            )),
        ];
        if self.config.context.enabled
            && let Some(race_data) = &self.race_data
        {
            tasks.push(self.context.spawn_refresh(
                Arc::clone(race_data),
                Duration::from_secs(self.config.context.refresh_secs.max(1)),
                Some(self.shared.broadcaster.clone()),
                session_cancel.clone(),
            ));
        }

        let intake_task = tokio::spawn(run_intake(
            source,
            chunk_tx,
            sequencer_tx,
            Arc::clone(&self.shared),
            id,
            intake_cancel,
        ));

        tokio::spawn(supervise(
            Arc::clone(&self.shared),
            id,
            intake_task,
            sequencer_task,
            tasks,
            dataset_writer,
            session_cancel,
            pipeline.drain_grace(),
        ));

        tracing::info!(session = %id, source = %descriptor, label, "Session started");
        Ok(SessionHandle {
            session,
            state: state_rx,
        })
    }

    /// Stops the running session, draining in-flight chunks up to the grace period.
    ///
    /// Returns the final session record, or `NotRunning` when nothing runs.
    pub async fn stop(&self) -> Result<PipelineSession> {
        let (intake_cancel, mut state_rx) = {
            let mut slot = self.shared.lock();
            if !matches!(slot.state, SessionState::Starting | SessionState::Running) {
                return Err(CommentaryError::NotRunning);
            }
            let Some(active) = slot.active.as_ref() else {
                return Err(CommentaryError::NotRunning);
            };
            let handles = (active.intake_cancel.clone(), active.state_tx.subscribe());
            slot.set_state(SessionState::Stopping);
            handles
        };
        self.shared
            .broadcaster
            .publish_status(SessionState::Stopping, None);

        intake_cancel.cancel();
        let _ended = state_rx
            .wait_for(|state| state.is_terminal())
            .await
            .map(|state| *state);

        self.shared
            .lock()
            .session
            .clone()
            .ok_or(CommentaryError::NotRunning)
    }

    /// Rewrites and synthesizes one line outside any session.
    ///
    /// Skips the chunk source and the sequencer; nothing is broadcast.
    pub async fn test_rewrite(&self, english: &str) -> Result<RewriteProbe> {
        let english = english.trim();
        if english.is_empty() {
            return Err(CommentaryError::Other("Nothing to rewrite".to_string()));
        }

        let cancel = CancellationToken::new();
        let retry = RetryPolicy::from_settings(&self.config.retry);
        let reporter = Arc::clone(&self.shared.reporter);
        let unit = TranscriptUnit::new(0, english);

        let commentary = RewriteStation::new(
            Arc::clone(&self.engines.rewriter),
            retry.clone(),
            Arc::clone(&self.context),
            Arc::clone(&reporter),
        )
        .rewrite(&unit, &cancel)
        .await
        .ok_or(CommentaryError::Cancelled)?;

        let artifact = SynthesisStation::new(
            Arc::clone(&self.engines.synthesizer),
            retry,
            Arc::clone(&self.phrase_cache),
            reporter,
        )
        .synthesize(&commentary, &cancel)
        .await
        .ok_or(CommentaryError::Cancelled)?;

        Ok(RewriteProbe {
            commentary,
            artifact,
        })
    }

    /// Like [`test_rewrite`](Self::test_rewrite), and publishes the result to every listener.
    pub async fn test_broadcast(&self, english: &str) -> Result<(RewriteProbe, usize)> {
        let probe = self.test_rewrite(english).await?;
        let delivered = self.shared.broadcaster.publish(&probe.artifact);
        Ok((probe, delivered))
    }

    pub fn get_context(&self) -> Option<Arc<ContextSnapshot>> {
        self.context.read()
    }

    pub fn context_cache(&self) -> &Arc<ContextCache> {
        &self.context
    }

    pub fn health(&self) -> Health {
        let slot = self.shared.lock();
        let stat = |pick: fn(&SequencerStats) -> &std::sync::atomic::AtomicU64| {
            slot.stats
                .as_deref()
                .map(|stats| SequencerStats::get(pick(stats)))
                .unwrap_or(0)
        };
        let broadcaster = &self.shared.broadcaster;

        Health {
            state: slot.state,
            session: slot.session.clone(),
            last_failure: slot.last_failure.clone(),
            chunks_admitted: stat(|s| &s.admitted),
            artifacts_released: stat(|s| &s.released),
            empty_chunks: stat(|s| &s.empty),
            beats_skipped: stat(|s| &s.skipped),
            late_discarded: stat(|s| &s.late_discarded),
            listeners: broadcaster.listener_count(),
            artifacts_published: broadcaster.artifacts_published(),
            listeners_dropped: broadcaster.listeners_dropped(),
            context_available: self.context.read().is_some(),
            context_staleness: self.context.staleness(),
            context_refreshes: self.context.successful_refreshes(),
            phrase_cache_hits: self.phrase_cache.hits(),
            dataset_records: slot.dataset.as_ref().map_or(0, |d| d.written()),
            engines: EngineNames {
                transcriber: self.engines.transcriber.name().to_string(),
                rewriter: self.engines.rewriter.name().to_string(),
                synthesizer: self.engines.synthesizer.name().to_string(),
            },
        }
    }

    /// Stops the running session, if any. Used on daemon shutdown.
    pub async fn shutdown(&self) {
        match self.stop().await {
            Ok(session) => tracing::info!(session = %session.id, "Session stopped for shutdown"),
            Err(CommentaryError::NotRunning) => {}
            Err(e) => tracing::warn!("Failed to stop session on shutdown: {}", e),
        }
    }
}

/// Pulls chunks from the source and feeds the transcriber.
///
/// Each chunk is announced to the sequencer before it is forwarded, so the
/// sequencer always knows what it is waiting for.
async fn run_intake(
    mut source: Box<dyn ChunkSource>,
    chunks: mpsc::Sender<AudioChunk>,
    sequencer: mpsc::Sender<SequencerInput>,
    shared: Arc<Shared>,
    id: Uuid,
    cancel: CancellationToken,
) -> IntakeEnd {
    let mut last_sequence: Option<u64> = None;

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return IntakeEnd::Cancelled,
            next = source.next_chunk() => next,
        };

        let chunk = match next {
            Ok(Some(chunk)) => chunk,
            Ok(None) => return IntakeEnd::EndOfStream,
            Err(e) if e.is_fatal() => return IntakeEnd::Fault(e),
            Err(e) => {
                return IntakeEnd::Fault(CommentaryError::SourceFault {
                    message: e.to_string(),
                });
            }
        };

        let sequence = chunk.sequence;
        if last_sequence.is_some_and(|last| sequence <= last) {
            return IntakeEnd::Fault(CommentaryError::SourceFault {
                message: format!(
                    "chunk {} is not after chunk {}",
                    sequence,
                    last_sequence.unwrap_or_default()
                ),
            });
        }
        if chunk.duration_ms == 0 {
            return IntakeEnd::Fault(CommentaryError::SourceFault {
                message: format!("chunk {} has zero duration", sequence),
            });
        }
        last_sequence = Some(sequence);

        if sequencer
            .send(SequencerInput::Admitted { sequence })
            .await
            .is_err()
        {
            return IntakeEnd::Cancelled;
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                // Admitted but never forwarded: resolve it so the drain does not wait on it.
                let _sent = sequencer
                    .send(SequencerInput::Resolved(ChunkOutcome::Empty { sequence }))
                    .await;
                return IntakeEnd::Cancelled;
            }
            sent = chunks.send(chunk) => {
                if sent.is_err() {
                    return IntakeEnd::Cancelled;
                }
            }
        }

        tracing::debug!(session = %id, seq = sequence, "Chunk accepted");
        if shared.transition(id, &[SessionState::Starting], SessionState::Running) {
            shared
                .broadcaster
                .publish_status(SessionState::Running, None);
        }
    }
}

/// Watches one session from intake end to teardown.
#[allow(clippy::too_many_arguments)]
async fn supervise(
    shared: Arc<Shared>,
    id: Uuid,
    intake: JoinHandle<IntakeEnd>,
    sequencer: JoinHandle<()>,
    tasks: Vec<JoinHandle<()>>,
    dataset_writer: Option<JoinHandle<()>>,
    session_cancel: CancellationToken,
    drain_grace: Duration,
) {
    let mut sequencer = Some(sequencer);
    let end = intake.await.unwrap_or_else(|e| {
        IntakeEnd::Fault(CommentaryError::SourceFault {
            message: format!("intake task ended abnormally: {}", e),
        })
    });

    let failure = match end {
        IntakeEnd::Fault(error) => {
            let message = error.to_string();
            session_cancel.cancel();
            shared
                .reporter
                .report("controller", &StationError::Fatal(message.clone()));
            shared
                .broadcaster
                .publish_status(SessionState::Failed, Some(message.clone()));
            shared.transition(
                id,
                &[SessionState::Starting, SessionState::Running, SessionState::Stopping],
                SessionState::Failed,
            );
            Some(message)
        }
        IntakeEnd::Cancelled | IntakeEnd::EndOfStream => {
            if matches!(end, IntakeEnd::EndOfStream) {
                tracing::info!(session = %id, "Source ended, draining");
                if shared.transition(
                    id,
                    &[SessionState::Starting, SessionState::Running],
                    SessionState::Stopping,
                ) {
                    shared
                        .broadcaster
                        .publish_status(SessionState::Stopping, None);
                }
            }
            let drained = match sequencer.as_mut() {
                Some(handle) => tokio::time::timeout(drain_grace, handle).await.is_ok(),
                None => true,
            };
            if drained {
                sequencer = None;
                tracing::debug!(session = %id, "Pipeline drained");
            } else {
                tracing::warn!(
                    session = %id,
                    grace_ms = drain_grace.as_millis() as u64,
                    "Drain grace expired, abandoning in-flight chunks"
                );
            }
            session_cancel.cancel();
            None
        }
    };

    for task in tasks.into_iter().chain(sequencer) {
        if tokio::time::timeout(TEARDOWN_TIMEOUT, task).await.is_err() {
            tracing::warn!(session = %id, "Station did not stop in time, detaching");
        }
    }
    if let Some(writer) = dataset_writer
        && tokio::time::timeout(TEARDOWN_TIMEOUT, writer).await.is_err()
    {
        tracing::warn!(session = %id, "Dataset writer did not finish in time");
    }

    if failure.is_none() {
        shared
            .broadcaster
            .publish_status(SessionState::Stopped, None);
    }
    tracing::info!(session = %id, failed = failure.is_some(), "Session ended");
    shared.retire(id, failure);
}
