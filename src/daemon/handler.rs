//! Command handler implementation for the daemon.

use crate::ipc::protocol::{Command, Response, RewriteReport};
use crate::ipc::server::CommandHandler;
use crate::pipeline::broadcaster::Subscription;
use crate::pipeline::orchestrator::PipelineController;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Command handler for daemon IPC commands.
pub struct DaemonCommandHandler {
    controller: Arc<PipelineController>,
    shutdown: CancellationToken,
}

impl DaemonCommandHandler {
    /// `shutdown` is cancelled once a `shutdown` command has stopped the session.
    pub fn new(controller: Arc<PipelineController>, shutdown: CancellationToken) -> Self {
        Self {
            controller,
            shutdown,
        }
    }

    async fn start(&self, source: String, label: Option<String>) -> Response {
        let source = match source.trim() {
            "" => match self.controller.config().pipeline.source.clone() {
                Some(source) => source,
                None => return Response::error("No source given and pipeline.source is not set"),
            },
            source => source.to_string(),
        };
        let label = label
            .filter(|label| !label.trim().is_empty())
            .unwrap_or_else(|| source.clone());

        match self.controller.start(&source, &label).await {
            Ok(handle) => Response::Started {
                session: handle.session().clone(),
            },
            Err(e) => Response::error(e),
        }
    }

    async fn stop(&self) -> Response {
        match self.controller.stop().await {
            Ok(session) => Response::Stopped { session },
            Err(e) => Response::error(e),
        }
    }

    async fn test_rewrite(&self, english: &str, broadcast: bool) -> Response {
        let result = if broadcast {
            self.controller
                .test_broadcast(english)
                .await
                .map(|(probe, delivered)| RewriteReport::from_probe(&probe, Some(delivered)))
        } else {
            self.controller
                .test_rewrite(english)
                .await
                .map(|probe| RewriteReport::from_probe(&probe, None))
        };

        match result {
            Ok(report) => Response::Rewrite { report },
            Err(e) => Response::error(e),
        }
    }
}

#[async_trait::async_trait]
impl CommandHandler for DaemonCommandHandler {
    async fn handle(&self, command: Command) -> Response {
        match command {
            Command::Start { source, label } => self.start(source, label).await,
            Command::Stop => self.stop().await,
            Command::TestRewrite { english } => self.test_rewrite(&english, false).await,
            Command::TestBroadcast { english } => self.test_rewrite(&english, true).await,
            Command::GetContext => Response::Context {
                snapshot: self.controller.get_context().map(|s| s.as_ref().clone()),
            },
            Command::Health => Response::Health {
                health: Box::new(self.controller.health()),
            },
            // The server intercepts follow before it reaches here.
            Command::Follow => Response::error("follow must be sent on its own connection"),
            Command::Shutdown => {
                self.controller.shutdown().await;
                self.shutdown.cancel();
                Response::Ok
            }
        }
    }

    fn follow(&self) -> Option<Subscription> {
        Some(self.controller.subscribe())
    }
}
