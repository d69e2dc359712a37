//! WebSocket transport glue for dashboard subscribers.
//!
//! The HTTP upgrade itself happens at the REST boundary; this module takes
//! the accepted stream, registers it with the [`Broadcaster`] and runs the
//! reader/writer pair until either side goes away.

use super::{Broadcaster, Subscription};
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::debug;
use uuid::Uuid;

/// Origin allow-list checked before a subscriber is registered. An empty
/// list allows every origin.
#[derive(Clone, Debug, Default)]
pub struct OriginPolicy {
    allowed: Vec<String>,
}

impl OriginPolicy {
    pub fn new(allowed: Vec<String>) -> Self {
        Self { allowed }
    }

    pub fn is_allowed(&self, origin: Option<&str>) -> bool {
        if self.allowed.is_empty() {
            return true;
        }
        origin.is_some_and(|origin| self.allowed.iter().any(|allowed| allowed == origin))
    }
}

/// Subscribe the connection to a session's events and pump frames until the
/// peer disconnects or the subscriber is dropped.
///
/// Writer task: drains the subscriber queue into Text frames; when the queue
/// closes (unregister or slow-consumer eviction) it sends a Close frame and
/// exits. Reader side: drains the transport; any completion (close frame,
/// error, EOF) unregisters the subscriber, which in turn ends the writer.
pub async fn pump_subscriber<S>(
    stream: WebSocketStream<S>,
    broadcaster: &Broadcaster,
    session_id: Uuid,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let Subscription {
        id,
        session_id,
        mut rx,
    } = broadcaster.subscribe(session_id);
    let (mut sink, mut source) = stream.split();

    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if sink.send(Message::Text(frame.into())).await.is_err() {
                break;
            }
        }
        let _ = sink.send(Message::Close(None)).await;
    });

    while let Some(message) = source.next().await {
        match message {
            Ok(Message::Close(_)) | Err(_) => break,
            // Inbound frames from dashboards are ignored.
            Ok(_) => {}
        }
    }
    debug!(%session_id, subscriber = %id, "subscriber transport closed");
    broadcaster.unsubscribe(session_id, id);
    let _ = writer.await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::{qr_update_data, BroadcastKind};
    use serde_json::Value;
    use tokio_tungstenite::tungstenite::protocol::Role;

    #[test]
    fn empty_allow_list_accepts_all_origins() {
        let policy = OriginPolicy::default();
        assert!(policy.is_allowed(None));
        assert!(policy.is_allowed(Some("https://anywhere.example")));
    }

    #[test]
    fn allow_list_matches_exactly() {
        let policy = OriginPolicy::new(vec!["https://dash.example".to_string()]);
        assert!(policy.is_allowed(Some("https://dash.example")));
        assert!(!policy.is_allowed(Some("https://evil.example")));
        assert!(!policy.is_allowed(None));
    }

    #[tokio::test]
    async fn pump_writes_published_frames_and_closes() {
        let (client_io, server_io) = tokio::io::duplex(64 * 1024);
        let server =
            WebSocketStream::from_raw_socket(server_io, Role::Server, None).await;
        let mut client =
            WebSocketStream::from_raw_socket(client_io, Role::Client, None).await;

        let broadcaster = Broadcaster::new(16);
        let session_id = Uuid::new_v4();
        let pump_broadcaster = broadcaster.clone();
        let pump = tokio::spawn(async move {
            pump_subscriber(server, &pump_broadcaster, session_id).await;
        });

        // Registration goes through the coordinator; wait for it.
        while broadcaster.subscriber_count(session_id).await == 0 {
            tokio::task::yield_now().await;
        }
        broadcaster.publish(session_id, BroadcastKind::QrUpdate, qr_update_data("qr-1"));

        let frame = client.next().await.unwrap().unwrap();
        let value: Value = serde_json::from_str(frame.to_text().unwrap()).unwrap();
        assert_eq!(value["type"], "qr_update");
        assert_eq!(value["data"]["qr_code"], "qr-1");

        // Client goes away; the pump must unregister the subscriber.
        client.close(None).await.unwrap();
        pump.await.unwrap();
        assert_eq!(broadcaster.subscriber_count(session_id).await, 0);
    }
}
