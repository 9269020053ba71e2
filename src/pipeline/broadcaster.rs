//! Broadcaster: one ordered artifact fanned out to every listener.
//!
//! Each listener owns a bounded queue. Delivery uses `try_send`, so a slow
//! or vanished listener is dropped from the fan-out set instead of
//! stalling the others. Listeners only see events published after they
//! subscribed.

use crate::defaults;
use crate::pipeline::types::{
    ArtifactKind, AudioArtifact, ContextSnapshot, EventCategory, SessionState,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::{TryRecvError, TrySendError};

/// Event delivered to listeners.
#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryEvent {
    /// English/Telugu pair for one sequence number.
    Text {
        sequence: u64,
        english: String,
        telugu: String,
        category: Option<EventCategory>,
    },
    /// Encoded audio for one sequence number. The bytes are shared, not copied per listener.
    Audio {
        sequence: u64,
        mime_type: String,
        audio: Arc<[u8]>,
    },
    /// The sequencer gave up waiting for this sequence number.
    BeatSkipped { sequence: u64 },
    /// A fresh race snapshot was published.
    ContextChanged(Arc<ContextSnapshot>),
    /// Session lifecycle change; terminal states end the stream.
    SessionStatus {
        state: SessionState,
        message: Option<String>,
    },
}

impl DeliveryEvent {
    /// Sequence number for artifact events.
    pub fn sequence(&self) -> Option<u64> {
        match self {
            DeliveryEvent::Text { sequence, .. }
            | DeliveryEvent::Audio { sequence, .. }
            | DeliveryEvent::BeatSkipped { sequence } => Some(*sequence),
            DeliveryEvent::ContextChanged(_) | DeliveryEvent::SessionStatus { .. } => None,
        }
    }

    /// Splits an artifact into the events listeners receive for it.
    pub fn from_artifact(artifact: &AudioArtifact) -> Vec<DeliveryEvent> {
        if artifact.kind == ArtifactKind::Skipped {
            return vec![DeliveryEvent::BeatSkipped {
                sequence: artifact.sequence,
            }];
        }

        let mut events = Vec::with_capacity(2);
        if artifact.has_text() {
            events.push(DeliveryEvent::Text {
                sequence: artifact.sequence,
                english: artifact.english.clone(),
                telugu: artifact.telugu.clone(),
                category: artifact.category,
            });
        }
        if artifact.has_audio() {
            events.push(DeliveryEvent::Audio {
                sequence: artifact.sequence,
                mime_type: artifact.mime_type.clone(),
                audio: Arc::clone(&artifact.audio),
            });
        }
        events
    }
}

struct Listener {
    id: u64,
    tx: mpsc::Sender<DeliveryEvent>,
}

struct Inner {
    listeners: Mutex<Vec<Listener>>,
    next_id: AtomicU64,
    artifacts_published: AtomicU64,
    listeners_dropped: AtomicU64,
    capacity: usize,
}

/// Fan-out point between the sequencer and every listener.
///
/// Cheap to clone; clones share the listener set.
#[derive(Clone)]
pub struct Broadcaster {
    inner: Arc<Inner>,
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Broadcaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broadcaster")
            .field("listeners", &self.listener_count())
            .field("capacity", &self.inner.capacity)
            .finish()
    }
}

impl Broadcaster {
    pub fn new() -> Self {
        Self::with_capacity(defaults::LISTENER_QUEUE_CAPACITY)
    }

    /// Broadcaster whose listener queues hold `capacity` events.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                listeners: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(1),
                artifacts_published: AtomicU64::new(0),
                listeners_dropped: AtomicU64::new(0),
                capacity: capacity.max(1),
            }),
        }
    }

    /// Adds a listener. It receives only events published from now on.
    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::channel(self.inner.capacity);
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let mut listeners = self
            .inner
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        listeners.push(Listener { id, tx });
        tracing::info!(listener = id, total = listeners.len(), "Listener subscribed");
        Subscription { id, rx }
    }

    /// Removes a listener explicitly. Dropping the [`Subscription`] has the same effect lazily.
    pub fn unsubscribe(&self, id: u64) {
        let mut listeners = self
            .inner
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        listeners.retain(|l| l.id != id);
    }

    pub fn listener_count(&self) -> usize {
        self.inner
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|l| !l.tx.is_closed())
            .count()
    }

    /// Number of artifacts published so far.
    pub fn artifacts_published(&self) -> u64 {
        self.inner.artifacts_published.load(Ordering::Relaxed)
    }

    /// Listeners removed because they disconnected or fell behind.
    pub fn listeners_dropped(&self) -> u64 {
        self.inner.listeners_dropped.load(Ordering::Relaxed)
    }

    /// Delivers one artifact to every current listener. Returns how many received it.
    pub fn publish(&self, artifact: &AudioArtifact) -> usize {
        self.inner.artifacts_published.fetch_add(1, Ordering::Relaxed);
        self.deliver(&DeliveryEvent::from_artifact(artifact))
    }

    pub fn publish_context(&self, snapshot: Arc<ContextSnapshot>) -> usize {
        self.deliver(&[DeliveryEvent::ContextChanged(snapshot)])
    }

    pub fn publish_status(&self, state: SessionState, message: Option<String>) -> usize {
        self.deliver(&[DeliveryEvent::SessionStatus { state, message }])
    }

    fn deliver(&self, events: &[DeliveryEvent]) -> usize {
        let mut listeners = self
            .inner
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let before = listeners.len();

        listeners.retain(|listener| {
            for event in events {
                match listener.tx.try_send(event.clone()) {
                    Ok(()) => {}
                    Err(TrySendError::Closed(_)) => {
                        tracing::debug!(listener = listener.id, "Listener disconnected");
                        return false;
                    }
                    Err(TrySendError::Full(_)) => {
                        tracing::warn!(listener = listener.id, "Listener queue full, dropping listener");
                        return false;
                    }
                }
            }
            true
        });

        let removed = before - listeners.len();
        if removed > 0 {
            self.inner
                .listeners_dropped
                .fetch_add(removed as u64, Ordering::Relaxed);
            tracing::info!(removed, remaining = listeners.len(), "Removed listeners");
        }
        listeners.len()
    }
}

/// Receiving side of one listener.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    rx: mpsc::Receiver<DeliveryEvent>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Next event, or `None` once the broadcaster dropped this listener.
    pub async fn recv(&mut self) -> Option<DeliveryEvent> {
        self.rx.recv().await
    }

    /// Next event if one is already queued.
    pub fn try_recv(&mut self) -> Option<DeliveryEvent> {
        match self.rx.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Drains everything currently queued.
    pub fn drain(&mut self) -> Vec<DeliveryEvent> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }
}
