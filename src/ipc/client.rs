//! IPC client for sending commands to the daemon.

use crate::error::{CommentaryError, Result};
use crate::ipc::protocol::{Command, Response, WireEvent};
use std::path::Path;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::UnixStream;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};

/// Send a command to the daemon via Unix socket.
///
/// # Errors
/// Returns `CommentaryError::IpcConnection` if connection fails
/// Returns `CommentaryError::IpcProtocol` if serialization/deserialization fails
pub async fn send_command(socket_path: &Path, command: Command) -> Result<Response> {
    let (mut lines, _writer) = open(socket_path, &command).await?;
    read_response(&mut lines).await
}

/// Open a follow connection; events arrive through [`FollowStream::next_event`].
pub async fn follow(socket_path: &Path) -> Result<FollowStream> {
    let (mut lines, writer) = open(socket_path, &Command::Follow).await?;
    match read_response(&mut lines).await? {
        Response::Following => Ok(FollowStream {
            lines,
            _writer: writer,
        }),
        Response::Error { message } => Err(CommentaryError::Other(message)),
        other => Err(CommentaryError::IpcProtocol {
            message: format!("Unexpected response to follow: {:?}", other),
        }),
    }
}

/// Open follow connection.
pub struct FollowStream {
    lines: Lines<BufReader<OwnedReadHalf>>,
    // Held so the daemon does not read a hang-up.
    _writer: OwnedWriteHalf,
}

impl FollowStream {
    /// Next event, or `None` when the daemon closed the stream.
    pub async fn next_event(&mut self) -> Result<Option<WireEvent>> {
        let line = self
            .lines
            .next_line()
            .await
            .map_err(|e| CommentaryError::IpcConnection {
                message: format!("Failed to read event: {}", e),
            })?;
        line.map(|line| {
            WireEvent::from_json(&line).map_err(|e| CommentaryError::IpcProtocol {
                message: format!("Failed to deserialize event: {}", e),
            })
        })
        .transpose()
    }
}

async fn open(
    socket_path: &Path,
    command: &Command,
) -> Result<(Lines<BufReader<OwnedReadHalf>>, OwnedWriteHalf)> {
    let stream =
        UnixStream::connect(socket_path)
            .await
            .map_err(|e| CommentaryError::IpcConnection {
                message: format!("Failed to connect to daemon: {}", e),
            })?;

    let (reader, mut writer) = stream.into_split();

    let mut command_json = command.to_json().map_err(|e| CommentaryError::IpcProtocol {
        message: format!("Failed to serialize command: {}", e),
    })?;
    command_json.push('\n');

    writer
        .write_all(command_json.as_bytes())
        .await
        .map_err(|e| CommentaryError::IpcConnection {
            message: format!("Failed to write command: {}", e),
        })?;

    writer
        .flush()
        .await
        .map_err(|e| CommentaryError::IpcConnection {
            message: format!("Failed to flush writer: {}", e),
        })?;

    Ok((BufReader::new(reader).lines(), writer))
}

async fn read_response(lines: &mut Lines<BufReader<OwnedReadHalf>>) -> Result<Response> {
    let line = lines
        .next_line()
        .await
        .map_err(|e| CommentaryError::IpcConnection {
            message: format!("Failed to read response: {}", e),
        })?
        .ok_or_else(|| CommentaryError::IpcConnection {
            message: "Daemon closed the connection without a response".to_string(),
        })?;

    Response::from_json(line.trim()).map_err(|e| CommentaryError::IpcProtocol {
        message: format!("Failed to deserialize response: {}", e),
    })
}
