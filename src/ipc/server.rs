//! Async Unix socket server for daemon control.

use crate::error::{CommentaryError, Result};
use crate::ipc::protocol::{Command, Response, WireEvent};
use crate::pipeline::broadcaster::Subscription;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{UnixListener, UnixStream};
use tokio_util::sync::CancellationToken;

/// Handler trait for processing IPC commands.
#[async_trait::async_trait]
pub trait CommandHandler: Send + Sync {
    /// Handle a command and return a response.
    async fn handle(&self, command: Command) -> Response;

    /// Listener for a `follow` connection. `None` refuses the follow.
    fn follow(&self) -> Option<Subscription> {
        None
    }
}

/// IPC server for daemon control commands over a Unix socket.
pub struct IpcServer {
    socket_path: PathBuf,
    shutdown: CancellationToken,
}

impl IpcServer {
    /// Create a new IPC server bound to the specified socket path.
    pub fn new(socket_path: PathBuf) -> Result<Self> {
        Ok(Self {
            socket_path,
            shutdown: CancellationToken::new(),
        })
    }

    /// Get the socket path this server is using.
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Token that stops the accept loop and every follow stream when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Get the default socket path based on XDG_RUNTIME_DIR or fallback.
    pub fn default_socket_path() -> PathBuf {
        if let Ok(xdg_runtime) = std::env::var("XDG_RUNTIME_DIR") {
            PathBuf::from(xdg_runtime).join("commentcast.sock")
        } else {
            let uid = unsafe { libc::getuid() };
            PathBuf::from(format!("/tmp/commentcast-{}.sock", uid))
        }
    }

    /// Start the IPC server and handle incoming connections until shut down.
    pub async fn start<H>(&self, handler: H) -> Result<()>
    where
        H: CommandHandler + 'static,
    {
        // Clean up any existing socket file
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path).map_err(|e| CommentaryError::IpcSocket {
                message: format!("Failed to remove existing socket: {}", e),
            })?;
        }

        let listener =
            UnixListener::bind(&self.socket_path).map_err(|e| CommentaryError::IpcSocket {
                message: format!("Failed to bind to socket: {}", e),
            })?;
        tracing::info!(socket = %self.socket_path.display(), "IPC server listening");

        let handler = Arc::new(handler);

        loop {
            let accepted = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                accepted = listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, _)) => {
                    let handler = Arc::clone(&handler);
                    let shutdown = self.shutdown.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_client(stream, handler, shutdown).await {
                            tracing::warn!("Error handling client: {}", e);
                        }
                    });
                }
                Err(e) => {
                    return Err(CommentaryError::IpcConnection {
                        message: format!("Failed to accept connection: {}", e),
                    });
                }
            }
        }

        tracing::debug!("IPC accept loop stopped");
        Ok(())
    }

    /// Stop the IPC server and clean up the socket file.
    pub async fn stop(&self) -> Result<()> {
        self.shutdown.cancel();

        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path).map_err(|e| CommentaryError::IpcSocket {
                message: format!("Failed to remove socket file: {}", e),
            })?;
        }

        Ok(())
    }
}

/// Handle a single client connection.
async fn handle_client<H>(
    stream: UnixStream,
    handler: Arc<H>,
    shutdown: CancellationToken,
) -> Result<()>
where
    H: CommandHandler,
{
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    reader
        .read_line(&mut line)
        .await
        .map_err(|e| CommentaryError::IpcConnection {
            message: format!("Failed to read from client: {}", e),
        })?;

    let command = match Command::from_json(line.trim()) {
        Ok(command) => command,
        Err(e) => {
            let message = format!("Failed to parse command: {}", e);
            write_line(&mut writer, &Response::error(&message)).await?;
            return Err(CommentaryError::IpcProtocol { message });
        }
    };
    tracing::debug!(?command, "IPC command");

    if command == Command::Follow {
        return match handler.follow() {
            Some(subscription) => {
                write_line(&mut writer, &Response::Following).await?;
                stream_events(reader, writer, subscription, shutdown).await
            }
            None => write_line(&mut writer, &Response::error("Follow is not supported")).await,
        };
    }

    let response = handler.handle(command).await;
    write_line(&mut writer, &response).await
}

/// Forwards delivery events until the listener is dropped, the client hangs up or the server stops.
async fn stream_events(
    mut reader: BufReader<OwnedReadHalf>,
    mut writer: OwnedWriteHalf,
    mut subscription: Subscription,
    shutdown: CancellationToken,
) -> Result<()> {
    let listener = subscription.id();
    tracing::info!(listener, "Follow stream opened");
    let mut discard = String::new();

    loop {
        let event = tokio::select! {
            _ = shutdown.cancelled() => break,
            // Any read result means the client is gone or misbehaving.
            _ = reader.read_line(&mut discard) => break,
            event = subscription.recv() => event,
        };
        let Some(event) = event else {
            tracing::info!(listener, "Listener dropped by broadcaster");
            break;
        };

        let json = WireEvent::from(&event)
            .to_json()
            .map_err(|e| CommentaryError::IpcProtocol {
                message: format!("Failed to serialize event: {}", e),
            })?;
        write_raw(&mut writer, &json).await?;
    }

    tracing::info!(listener, "Follow stream closed");
    Ok(())
}

async fn write_line(writer: &mut OwnedWriteHalf, response: &Response) -> Result<()> {
    let json = response.to_json().map_err(|e| CommentaryError::IpcProtocol {
        message: format!("Failed to serialize response: {}", e),
    })?;
    write_raw(writer, &json).await
}

async fn write_raw(writer: &mut OwnedWriteHalf, json: &str) -> Result<()> {
    let io_error = |e: std::io::Error| CommentaryError::IpcConnection {
        message: format!("Failed to write to client: {}", e),
    };
    writer.write_all(json.as_bytes()).await.map_err(io_error)?;
    writer.write_all(b"\n").await.map_err(io_error)?;
    writer.flush().await.map_err(io_error)
}
