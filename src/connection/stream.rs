//! Streaming sender
//!
//! In STREAM mode one task per connection drains the peer's stream channel
//! and is the sole steady-state writer on the socket: TAKETHIS lines with
//! dot-stuffed bodies, and CHECK lines. The driver task keeps the read
//! half and consumes the peer's status replies, so sends and receives
//! pipeline on independent halves of the protocol.

use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::codec;
use crate::commands;
use crate::daemon::Daemon;
use crate::error::Result;
use crate::validation::validate_message_id;

use super::SharedWriter;

/// Outbound offer carried on a peer's stream channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// `CHECK <message-id>` admission probe
    Check(String),
    /// `TAKETHIS <message-id>` article offer with inline body
    Takethis(String),
}

impl StreamEvent {
    /// Message-id the event refers to
    pub fn message_id(&self) -> &str {
        match self {
            StreamEvent::Check(id) | StreamEvent::Takethis(id) => id,
        }
    }
}

/// Drain the stream channel onto the socket until error or channel close
///
/// Any send error terminates the sender and shuts the write half down,
/// which in turn unblocks the driver's read loop.
pub(super) async fn run_sender(
    name: String,
    daemon: Arc<Daemon>,
    mut rx: mpsc::Receiver<StreamEvent>,
    writer: SharedWriter,
) {
    while let Some(event) = rx.recv().await {
        if validate_message_id(event.message_id()).is_err() {
            warn!("{} dropping stream event with invalid id", name);
            continue;
        }
        if let Err(err) = send_event(&daemon, &name, &event, &writer).await {
            warn!("{} error while streaming: {}", name, err);
            break;
        }
    }
    let _ = writer.lock().await.shutdown().await;
}

async fn send_event(
    daemon: &Daemon,
    name: &str,
    event: &StreamEvent,
    writer: &SharedWriter,
) -> Result<()> {
    match event {
        StreamEvent::Takethis(message_id) => {
            if !daemon.store().has_article(message_id).await {
                debug!("{} didn't send {}, not in local store", name, message_id);
                return Ok(());
            }
            let data = daemon.store().read_article(message_id).await?;
            let mut guard = writer.lock().await;
            guard
                .write_all(commands::takethis(message_id).as_bytes())
                .await?;
            codec::write_body(&mut *guard, &data).await?;
        }
        StreamEvent::Check(message_id) => {
            let mut guard = writer.lock().await;
            guard.write_all(commands::check(message_id).as_bytes()).await?;
        }
    }
    Ok(())
}
