//! WA Client port.
//!
//! The real WhatsApp protocol stack lives behind these traits; the gateway
//! drives it and reacts to its events. [`mock`] provides a scriptable
//! in-process implementation for tests and local runs.

mod device;
pub mod events;
pub mod mock;

pub use device::{Device, DeviceStore};
pub use events::{
    ContextInfo, ExtendedText, ImageContent, InboundMessage, LocationContent, MediaBytes,
    MediaPart, MediaRef, MessageContent, MessageInfo, QrEvent, WaEvent,
};

use crate::error::Result;
use crate::types::{ChatPresence, Jid, MessageId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Type alias for event handlers so client fields stay Send + Sync.
pub type EventHandler = Box<dyn Fn(WaEvent) + Send + Sync>;

/// Response from sending a message.
#[derive(Clone, Debug)]
pub struct SendResponse {
    pub id: MessageId,
    pub timestamp: DateTime<Utc>,
}

/// Per-session connection to WhatsApp Web.
///
/// Send, download and presence calls are safe to enter concurrently from
/// event-handler tasks.
#[async_trait]
pub trait WaClient: Send + Sync {
    /// Drive the client to its connect state. For an unpaired device the QR
    /// channel must be opened first.
    async fn connect(&self) -> Result<()>;

    /// Tear down the connection. Idempotent, best-effort.
    async fn disconnect(&self);

    fn is_connected(&self) -> bool;

    /// JID from the client's in-memory store, when paired.
    async fn logged_in_jid(&self) -> Option<Jid>;

    /// Stream of pairing codes. Must be called before [`connect`] on an
    /// unpaired device.
    async fn qr_channel(&self) -> Result<mpsc::Receiver<QrEvent>>;

    /// Send a plain text message to a chat.
    async fn send_text(&self, to: &Jid, body: &str) -> Result<SendResponse>;

    /// Send a composing/paused chat presence.
    async fn send_chat_presence(&self, to: &Jid, presence: ChatPresence) -> Result<()>;

    /// Download the bytes of a media part.
    async fn download(&self, media: &MediaRef) -> Result<MediaBytes>;

    /// Register an event handler (called for every event).
    async fn add_event_handler(&self, handler: EventHandler);
}

/// Builds live clients for the registry. This is the seam to the concrete
/// protocol library: production wires the real stack here, tests wire
/// [`mock::MockClientFactory`].
#[async_trait]
pub trait WaClientFactory: Send + Sync {
    async fn create(&self, device: Device) -> Result<Arc<dyn WaClient>>;
}
