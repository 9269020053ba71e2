//! Daemon mode: owns the pipeline controller and serves the IPC socket.

pub mod handler;

use crate::config::Config;
use crate::engines::Engines;
use crate::error::{CommentaryError, Result};
use crate::ipc::server::IpcServer;
use crate::pipeline::orchestrator::PipelineController;
use std::path::PathBuf;
use std::sync::Arc;

/// Builds the controller a daemon or a one-shot `run` drives.
///
/// `mock` swaps every engine for its scripted stand-in, for offline runs.
pub fn build_controller(config: Config, mock: bool) -> Result<PipelineController> {
    let engines = if mock {
        Engines::mock()
    } else {
        remote_engines(&config)?
    };
    let controller = PipelineController::new(config, engines);
    attach_race_data(controller, mock)
}

#[cfg(feature = "remote")]
fn remote_engines(config: &Config) -> Result<Engines> {
    Engines::from_config(config)
}

#[cfg(not(feature = "remote"))]
fn remote_engines(_config: &Config) -> Result<Engines> {
    Err(CommentaryError::Other(
        "Built without the `remote` feature; use --mock".to_string(),
    ))
}

#[cfg(feature = "remote")]
fn attach_race_data(controller: PipelineController, mock: bool) -> Result<PipelineController> {
    use crate::context::openf1::OpenF1Client;

    let settings = &controller.config().context;
    if mock || !settings.enabled {
        return Ok(controller);
    }
    let client = OpenF1Client::new(&settings.base_url)?;
    Ok(controller.with_race_data(Arc::new(client)))
}

#[cfg(not(feature = "remote"))]
fn attach_race_data(controller: PipelineController, _mock: bool) -> Result<PipelineController> {
    Ok(controller)
}

/// Run the daemon: build the controller, serve the socket, wait for shutdown.
///
/// Returns on SIGINT, SIGTERM or a `shutdown` command. Any running session
/// is stopped and drained first.
pub async fn run_daemon(
    config: Config,
    socket_path: Option<PathBuf>,
    mock: bool,
    quiet: bool,
) -> Result<()> {
    let controller = Arc::new(build_controller(config, mock)?);
    tracing::info!(engines = ?controller.health().engines, "Controller ready");

    let socket_path = socket_path.unwrap_or_else(IpcServer::default_socket_path);
    let server = Arc::new(IpcServer::new(socket_path)?);
    let shutdown = server.shutdown_token();

    if !quiet {
        eprintln!(
            "IPC server listening at: {}",
            server.socket_path().display()
        );
        eprintln!("Daemon ready.");
    }

    let handler = handler::DaemonCommandHandler::new(Arc::clone(&controller), shutdown.clone());

    let server_clone = Arc::clone(&server);
    let mut server_handle = tokio::spawn(async move { server_clone.start(handler).await });

    let mut server_done = false;
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received SIGINT, shutting down");
        }
        res = wait_for_sigterm() => {
            if let Err(e) = res {
                tracing::error!("Error setting up signal handler: {}", e);
            }
            tracing::info!("Received SIGTERM, shutting down");
        }
        _ = shutdown.cancelled() => {
            tracing::info!("Shutdown requested over IPC");
        }
        res = &mut server_handle => {
            server_done = true;
            match res {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::error!("IPC server stopped: {}", e),
                Err(e) => tracing::error!("IPC server task failed: {}", e),
            }
        }
    }

    controller.shutdown().await;
    server.stop().await?;

    if !server_done && let Err(e) = server_handle.await {
        tracing::warn!("IPC server task failed: {}", e);
    }

    if !quiet {
        eprintln!("Daemon stopped.");
    }

    Ok(())
}

/// Wait for SIGTERM signal (used by systemd).
#[cfg(unix)]
async fn wait_for_sigterm() -> Result<()> {
    use tokio::signal::unix::{SignalKind, signal};
    let mut sigterm = signal(SignalKind::terminate()).map_err(|e| {
        CommentaryError::Other(format!("Failed to register SIGTERM handler: {}", e))
    })?;
    sigterm.recv().await;
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_sigterm() -> Result<()> {
    // On non-Unix, just wait forever (Ctrl+C will still work)
    std::future::pending::<()>().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::client::send_command;
    use crate::ipc::protocol::{Command, Response};
    use tempfile::TempDir;

    #[test]
    fn test_build_controller_with_mock_engines() {
        let controller = build_controller(Config::default(), true).unwrap();
        let engines = controller.health().engines;
        assert_eq!(engines.transcriber, "mock");
    }

    #[cfg(feature = "remote")]
    #[test]
    fn test_build_controller_requires_api_keys() {
        let err = build_controller(Config::default(), false).err();
        assert!(matches!(err, Some(CommentaryError::ConfigInvalidValue { .. })));
    }

    #[tokio::test]
    async fn test_daemon_exits_on_shutdown_command() {
        let dir = TempDir::new().unwrap();
        let socket_path = dir.path().join("daemon.sock");

        let daemon = tokio::spawn(run_daemon(
            Config::default(),
            Some(socket_path.clone()),
            true,
            true,
        ));
        for _ in 0..100 {
            if socket_path.exists() {
                break;
            }
            tokio::time::sleep(tokio::time::Duration::from_millis(10)).await;
        }

        let response = send_command(&socket_path, Command::Shutdown).await.unwrap();
        assert_eq!(response, Response::Ok);

        let result = tokio::time::timeout(tokio::time::Duration::from_secs(5), daemon)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
        assert!(!socket_path.exists());
    }
}
