//! Rewrite station: English transcript units to Telugu commentary.
//!
//! Units are rewritten concurrently (bounded by a semaphore), so they may
//! leave this station out of order. A unit is never dropped here: when the
//! engine fails every attempt, or declines the line, the English text is
//! passed through as `filler`.

use crate::commentary;
use crate::context::ContextCache;
use crate::engines::{RewriteRequest, Rewriter};
use crate::pipeline::error::{ErrorReporter, StationError};
use crate::pipeline::retry::{RetryError, RetryPolicy};
use crate::pipeline::types::{CommentaryUnit, TranscriptUnit};
use std::sync::Arc;
use tokio::sync::{Semaphore, mpsc};
use tokio_util::sync::CancellationToken;

/// Station wrapping a rewrite engine.
pub struct RewriteStation {
    rewriter: Arc<dyn Rewriter>,
    retry: RetryPolicy,
    context: Arc<ContextCache>,
    reporter: Arc<dyn ErrorReporter>,
}

impl RewriteStation {
    pub fn new(
        rewriter: Arc<dyn Rewriter>,
        retry: RetryPolicy,
        context: Arc<ContextCache>,
        reporter: Arc<dyn ErrorReporter>,
    ) -> Self {
        Self {
            rewriter,
            retry,
            context,
            reporter,
        }
    }

    pub fn name(&self) -> &'static str {
        "rewrite"
    }

    /// Classifies and rewrites one unit. `None` only when cancelled.
    ///
    /// Reads the context cache once; the snapshot seen here is the one
    /// recorded on the unit.
    pub async fn rewrite(
        &self,
        unit: &TranscriptUnit,
        cancel: &CancellationToken,
    ) -> Option<CommentaryUnit> {
        let (previous, current) = self.context.read_delta();
        let category = commentary::classify(&unit.text, previous.as_deref(), current.as_deref());

        let mut request = RewriteRequest::new(unit.text.clone(), category);
        if let Some(snapshot) = &current {
            request = request.with_context(snapshot.context_line());
        }

        let rewriter = &self.rewriter;
        let request_ref = &request;
        let result = self
            .retry
            .run("rewrite", cancel, move |attempt| {
                tracing::debug!(seq = unit.sequence, attempt, "Rewriting unit");
                rewriter.rewrite(request_ref)
            })
            .await;

        match result {
            Ok(raw) => match commentary::interpret(&raw) {
                Some(telugu) => Some(CommentaryUnit {
                    sequence: unit.sequence,
                    english: unit.text.clone(),
                    telugu,
                    category,
                    context: current,
                    fallback: false,
                }),
                None => {
                    tracing::debug!(seq = unit.sequence, %category, "Engine declined line, passing English through");
                    Some(CommentaryUnit::pass_through(unit, current))
                }
            },
            Err(RetryError::Cancelled) => None,
            Err(RetryError::Exhausted { attempts, last }) => {
                self.reporter.report(
                    self.name(),
                    &StationError::Recoverable(format!(
                        "Passing unit {} through untranslated after {} attempt(s): {}",
                        unit.sequence, attempts, last
                    )),
                );
                Some(CommentaryUnit::pass_through(unit, current))
            }
        }
    }

    /// Runs the station until the input closes or `cancel` fires.
    ///
    /// At most `max_concurrent` units are with the engine at once; on close
    /// the station waits for them before dropping `output`.
    pub async fn run(
        self,
        mut input: mpsc::Receiver<TranscriptUnit>,
        output: mpsc::Sender<CommentaryUnit>,
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
            let output = output.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                let _permit = permit;
                if let Some(commentary) = station.rewrite(&unit, &cancel).await {
                    tracing::info!(
                        seq = commentary.sequence,
                        category = %commentary.category,
                        fallback = commentary.fallback,
                        "Rewritten"
                    );
                    if !cancel.is_cancelled() {
                        let _sent = output.send(commentary).await;
                    }
                }
            });
        }

        // Wait for in-flight units so `output` closes only after they are forwarded.
        let _drained = semaphore.acquire_many(max_concurrent as u32).await;
    }
}
