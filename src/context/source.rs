//! Race-data boundary: a read-only fetch of a full snapshot.

use crate::error::{CommentaryError, Result};
use crate::pipeline::types::ContextSnapshot;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// External race-leaderboard collaborator.
#[async_trait]
pub trait RaceDataSource: Send + Sync {
    /// Fetches a complete snapshot. Partial data is the source's problem, not the cache's.
    async fn fetch(&self) -> Result<ContextSnapshot>;

    fn name(&self) -> &str;
}

/// Scripted race data: each call pops the next step.
///
/// Once the script runs out every call fails.
#[derive(Debug, Default)]
pub struct MockRaceData {
    script: Mutex<VecDeque<Option<ContextSnapshot>>>,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl MockRaceData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next call succeeds with `snapshot`.
    pub fn then_ok(self, snapshot: ContextSnapshot) -> Self {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(Some(snapshot));
        }
        self
    }

    /// Next call fails.
    pub fn then_fail(self) -> Self {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(None);
        }
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RaceDataSource for MockRaceData {
    async fn fetch(&self) -> Result<ContextSnapshot> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let step = self
            .script
            .lock()
            .ok()
            .and_then(|mut script| script.pop_front());

        match step {
            Some(Some(snapshot)) => Ok(snapshot),
            Some(None) => Err(CommentaryError::ContextUnavailable {
                message: format!("mock race data failure on call {}", call + 1),
            }),
            None => Err(CommentaryError::ContextUnavailable {
                message: "mock race data script exhausted".to_string(),
            }),
        }
    }

    fn name(&self) -> &str {
        "mock-race-data"
    }
}
