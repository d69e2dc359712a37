//! Persistence port: sessions, message log, analytics.
//!
//! The registry and runtime never touch SQL directly; they go through
//! [`SessionRepository`]. [`sqlite::SqliteRepository`] is the durable
//! adapter, [`memory::MemoryRepository`] backs tests.

pub mod memory;
pub mod sqlite;

pub use memory::MemoryRepository;
pub use sqlite::SqliteRepository;

use crate::error::Result;
use crate::types::{DeviceInfo, Direction, MessageType, SessionStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// One user-visible session: a name + webhook URL bound to at most one
/// WhatsApp device.
#[derive(Clone, Debug)]
pub struct Session {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub webhook_url: String,
    pub status: SessionStatus,
    /// Full JID (user@server:device) once pairing has succeeded, else "".
    pub phone_number: String,
    pub device_info: Option<DeviceInfo>,
    pub last_connected: Option<DateTime<Utc>>,
    pub group_response_enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Parameters for creating a session (the REST boundary validates them).
#[derive(Clone, Debug)]
pub struct NewSession {
    pub user_id: Uuid,
    pub name: String,
    pub webhook_url: String,
    pub group_response_enabled: bool,
}

/// One message log row, either direction.
#[derive(Clone, Debug)]
pub struct MessageLogRecord {
    pub session_id: Uuid,
    pub direction: Direction,
    pub from_number: String,
    pub to_number: String,
    pub message_type: MessageType,
    pub content: String,
    pub media_url: Option<String>,
    pub group_id: Option<String>,
    pub group_name: Option<String>,
    pub is_group: bool,
    pub quoted_message_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// One analytics row, written once per inbound message that reaches the
/// dispatch stage.
#[derive(Clone, Debug)]
pub struct AnalyticsRecord {
    pub session_id: Uuid,
    pub message_id: String,
    pub from_number: String,
    pub message_type: MessageType,
    pub is_group: bool,
    pub is_mention: bool,
    pub webhook_sent: bool,
    pub webhook_success: bool,
    pub webhook_response_time_ms: i64,
    pub webhook_status_code: Option<u16>,
    pub error_message: Option<String>,
}

/// Durable store of sessions, analytics rows and the message log.
#[async_trait]
pub trait SessionRepository: Send + Sync {
    /// Insert a new session in `disconnected` state. `(user_id, name)` must
    /// be unique.
    async fn create_session(&self, new: NewSession) -> Result<Session>;

    async fn get_session(&self, id: Uuid) -> Result<Option<Session>>;

    /// Update status and, when given, phone number / device info. A status
    /// of `connected` also bumps `last_connected`. `phone_number: Some("")`
    /// clears the stored JID; `None` leaves it untouched.
    async fn update_session_status(
        &self,
        id: Uuid,
        status: SessionStatus,
        phone_number: Option<&str>,
        device_info: Option<&DeviceInfo>,
    ) -> Result<()>;

    /// Sessions whose stored JID is non-empty, regardless of persisted
    /// status. Used by boot recovery.
    async fn sessions_with_stored_jid(&self) -> Result<Vec<Session>>;

    /// Delete a session; analytics and log rows cascade.
    async fn delete_session(&self, id: Uuid) -> Result<()>;

    async fn insert_message_log(&self, record: MessageLogRecord) -> Result<()>;

    async fn insert_analytics(&self, record: AnalyticsRecord) -> Result<()>;
}
