//! Unix socket control surface for the daemon.

pub mod client;
pub mod protocol;
pub mod server;

pub use client::{FollowStream, follow, send_command};
pub use protocol::{Command, Response, RewriteReport, WireEvent};
pub use server::{CommandHandler, IpcServer};
