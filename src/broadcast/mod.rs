//! Event Broadcaster: fans session events out to dashboard subscribers.
//!
//! All state is owned by a single coordinator task and mutated through a
//! command channel. Each subscriber gets a bounded queue; a full queue means
//! the consumer is too slow and the subscriber is closed and dropped, so
//! event ingress never blocks on a stalled dashboard.

pub mod ws;

pub use ws::{pump_subscriber, OriginPolicy};

use crate::types::{DeviceInfo, SessionStatus};
use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};
use uuid::Uuid;

/// Display hint broadcast with QR codes; the client's QR channel remains
/// authoritative for real expiry.
pub const QR_EXPIRES_SECS: u64 = 60;

/// Outbound message types.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BroadcastKind {
    QrUpdate,
    StatusUpdate,
    MessageReceived,
}

impl BroadcastKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::QrUpdate => "qr_update",
            Self::StatusUpdate => "status_update",
            Self::MessageReceived => "message_received",
        }
    }
}

pub type SubscriberId = Uuid;

/// A registered subscriber's receiving half.
pub struct Subscription {
    pub id: SubscriberId,
    pub session_id: Uuid,
    /// Serialized frames, in publish order. Closed when the subscriber is
    /// dropped for falling behind or unregistered.
    pub rx: mpsc::Receiver<String>,
}

#[derive(Serialize)]
struct EventFrame<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    data: Value,
    timestamp: String,
}

enum Command {
    Register {
        session_id: Uuid,
        id: SubscriberId,
        tx: mpsc::Sender<String>,
    },
    Unregister {
        session_id: Uuid,
        id: SubscriberId,
    },
    Publish {
        session_id: Uuid,
        frame: String,
    },
    SubscriberCount {
        session_id: Uuid,
        reply: oneshot::Sender<usize>,
    },
}

/// Cloneable handle to the coordinator task.
#[derive(Clone)]
pub struct Broadcaster {
    tx: mpsc::UnboundedSender<Command>,
    queue_capacity: usize,
}

impl Broadcaster {
    pub fn new(queue_capacity: usize) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(coordinator(rx));
        Self { tx, queue_capacity }
    }

    /// Register a subscriber for a session's events.
    pub fn subscribe(&self, session_id: Uuid) -> Subscription {
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        let id = Uuid::new_v4();
        let _ = self.tx.send(Command::Register { session_id, id, tx });
        Subscription { id, session_id, rx }
    }

    pub fn unsubscribe(&self, session_id: Uuid, id: SubscriberId) {
        let _ = self.tx.send(Command::Unregister { session_id, id });
    }

    /// Serialize `{type, data, timestamp}` once and enqueue it to every live
    /// subscriber of the session.
    pub fn publish(&self, session_id: Uuid, kind: BroadcastKind, data: Value) {
        let frame = EventFrame {
            kind: kind.as_str(),
            data,
            timestamp: Utc::now().to_rfc3339(),
        };
        let frame = match serde_json::to_string(&frame) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(%err, "dropping unserializable broadcast frame");
                return;
            }
        };
        let _ = self.tx.send(Command::Publish { session_id, frame });
    }

    /// Live subscriber count for a session (0 once the coordinator is gone).
    pub async fn subscriber_count(&self, session_id: Uuid) -> usize {
        let (reply, rx) = oneshot::channel();
        if self
            .tx
            .send(Command::SubscriberCount { session_id, reply })
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

async fn coordinator(mut rx: mpsc::UnboundedReceiver<Command>) {
    let mut sessions: HashMap<Uuid, HashMap<SubscriberId, mpsc::Sender<String>>> = HashMap::new();
    while let Some(command) = rx.recv().await {
        match command {
            Command::Register { session_id, id, tx } => {
                sessions.entry(session_id).or_default().insert(id, tx);
                debug!(%session_id, subscriber = %id, "subscriber registered");
            }
            Command::Unregister { session_id, id } => {
                if let Some(subscribers) = sessions.get_mut(&session_id) {
                    subscribers.remove(&id);
                    if subscribers.is_empty() {
                        sessions.remove(&session_id);
                    }
                }
            }
            Command::Publish { session_id, frame } => {
                let Some(subscribers) = sessions.get_mut(&session_id) else {
                    continue;
                };
                let mut dropped = Vec::new();
                for (id, tx) in subscribers.iter() {
                    match tx.try_send(frame.clone()) {
                        Ok(()) => {}
                        Err(TrySendError::Full(_)) => {
                            warn!(%session_id, subscriber = %id, "slow subscriber dropped");
                            dropped.push(*id);
                        }
                        Err(TrySendError::Closed(_)) => dropped.push(*id),
                    }
                }
                for id in dropped {
                    subscribers.remove(&id);
                }
                if subscribers.is_empty() {
                    sessions.remove(&session_id);
                }
            }
            Command::SubscriberCount { session_id, reply } => {
                let count = sessions.get(&session_id).map_or(0, HashMap::len);
                let _ = reply.send(count);
            }
        }
    }
}

/// `qr_update` data payload.
pub fn qr_update_data(code: &str) -> Value {
    json!({ "qr_code": code, "expires_in": QR_EXPIRES_SECS })
}

/// `status_update` data payload.
pub fn status_update_data(
    status: SessionStatus,
    phone_number: Option<&str>,
    device_info: Option<&DeviceInfo>,
) -> Value {
    let mut data = json!({ "status": status.as_str() });
    if let Some(phone) = phone_number.filter(|p| !p.is_empty()) {
        data["phone_number"] = json!(phone);
    }
    if let Some(info) = device_info.filter(|i| !i.is_empty()) {
        data["device_info"] = json!(info);
    }
    data
}

/// `message_received` data payload.
pub fn message_received_data(message: Value) -> Value {
    json!({ "message": message })
}
