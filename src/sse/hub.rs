//! SSE broadcast hub (spec §4.10): turns named runtime events into
//! `event:`/`data:` lines fanned out to every connected dashboard client.

use std::convert::Infallible;
use std::time::Duration;

use axum::response::sse::{Event, KeepAlive, Sse};
use futures_util::stream::{self, Stream, StreamExt};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::warn;

/// Reconnection delay suggested to clients via the initial `retry:` line.
pub const SSE_RETRY_MS: u64 = 5_000;

/// How often a comment-line heartbeat is written to keep idle connections
/// alive through proxies that time out silent sockets.
pub const SSE_HEARTBEAT_INTERVAL_MS: u64 = 30_000;

/// One named, pre-serialized outbound message. Broadcast receivers that lag
/// too far behind simply skip the missed messages (spec makes no ordering
/// guarantee across clients, only within one client's own stream).
#[derive(Debug, Clone)]
pub struct HubMessage {
    pub event: &'static str,
    pub data: String,
}

impl HubMessage {
    pub fn new<T: Serialize>(event: &'static str, payload: &T) -> Self {
        let data = serde_json::to_string(payload).unwrap_or_else(|e| {
            warn!(error = %e, event, "failed to serialize SSE payload");
            "null".to_string()
        });
        Self { event, data }
    }
}

/// Multi-client fan-out. Broadcasting never blocks on a slow client — each
/// subscriber gets its own bounded channel and drops messages only if it
/// falls behind the buffer, never the other way around.
pub struct SseHub {
    sender: broadcast::Sender<HubMessage>,
}

impl SseHub {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Number of currently live subscribers.
    pub fn client_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn broadcast<T: Serialize>(&self, event: &'static str, payload: &T) {
        let message = HubMessage::new(event, payload);
        // A send with zero receivers is not an error; it just means no one
        // is watching right now.
        let _ = self.sender.send(message);
    }

    /// Build the axum SSE response for one freshly accepted client: every
    /// broadcast message as it arrives, with axum's own keep-alive comment
    /// lines standing in for the periodic heartbeat when the hub is quiet.
    pub fn client_stream(&self) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
        let receiver = self.sender.subscribe();
        let retry_line = stream::once(async {
            Ok(Event::default().retry(Duration::from_millis(SSE_RETRY_MS)).comment("connected"))
        });
        let messages = stream::unfold(receiver, |mut receiver| async move {
            loop {
                match receiver.recv().await {
                    Ok(message) => {
                        let event = Event::default().event(message.event).data(message.data);
                        return Some((Ok(event), receiver));
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        });
        let stream = retry_line.chain(messages);

        Sse::new(stream).keep_alive(
            KeepAlive::new()
                .interval(Duration::from_millis(SSE_HEARTBEAT_INTERVAL_MS))
                .text("heartbeat"),
        )
    }
}

impl Default for SseHub {
    fn default() -> Self {
        Self::new(1024)
    }
}
