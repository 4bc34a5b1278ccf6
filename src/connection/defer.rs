//! Deferred re-CHECK queue
//!
//! A peer answering `431` to CHECK wants the offer again later. Rather than
//! spawning a timer task per deferral, each connection runs one sweeper
//! over a FIFO of due times; the delay is fixed, so the queue stays sorted
//! by construction. A deferral that cannot enqueue onto the stream channel
//! within the enqueue timeout is dropped, and so is anything pending when
//! the connection goes away.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{sleep_until, timeout, Instant};
use tracing::debug;

use super::stream::StreamEvent;

/// How long a 431'd offer waits before the next CHECK
pub const DEFER_DELAY: Duration = Duration::from_secs(90);

/// How long the sweeper will wait on a full stream channel before dropping
const ENQUEUE_TIMEOUT: Duration = Duration::from_secs(5);

/// Handle for scheduling deferred CHECKs
///
/// Dropping the handle stops the sweeper; pending entries are discarded.
pub struct DeferQueue {
    tx: mpsc::UnboundedSender<String>,
}

impl DeferQueue {
    /// Start a sweeper feeding `stream_tx` after `delay`
    pub fn new(stream_tx: mpsc::Sender<StreamEvent>, delay: Duration) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(sweep(rx, stream_tx, delay));
        Self { tx }
    }

    /// Schedule a re-CHECK for this message-id
    ///
    /// Silently a no-op once the sweeper is gone.
    pub fn push(&self, message_id: String) {
        let _ = self.tx.send(message_id);
    }
}

async fn sweep(
    mut rx: mpsc::UnboundedReceiver<String>,
    stream_tx: mpsc::Sender<StreamEvent>,
    delay: Duration,
) {
    let mut queue: VecDeque<(Instant, String)> = VecDeque::new();

    loop {
        let next_due = queue.front().map(|(due, _)| *due);
        tokio::select! {
            entry = rx.recv() => match entry {
                Some(message_id) => queue.push_back((Instant::now() + delay, message_id)),
                None => break,
            },
            _ = sleep_until(next_due.unwrap_or_else(Instant::now)), if next_due.is_some() => {
                if let Some((_, message_id)) = queue.pop_front() {
                    let event = StreamEvent::Check(message_id);
                    match timeout(ENQUEUE_TIMEOUT, stream_tx.send(event)).await {
                        Ok(Ok(())) => {}
                        // stream channel full past the timeout, or closed
                        _ => debug!("dropped deferred CHECK"),
                    }
                }
            }
        }
    }
}
