//! In-memory repository (tests and single-run setups; not persistent).

use super::{AnalyticsRecord, MessageLogRecord, NewSession, Session, SessionRepository};
use crate::error::{Result, StoreError};
use crate::types::{DeviceInfo, SessionStatus};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
pub struct MemoryRepository {
    sessions: RwLock<HashMap<Uuid, Session>>,
    message_log: RwLock<Vec<MessageLogRecord>>,
    analytics: RwLock<Vec<AnalyticsRecord>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the message log, oldest first.
    pub fn message_log(&self) -> Vec<MessageLogRecord> {
        self.message_log
            .read()
            .map(|log| log.clone())
            .unwrap_or_default()
    }

    /// Snapshot of the analytics rows, oldest first.
    pub fn analytics(&self) -> Vec<AnalyticsRecord> {
        self.analytics
            .read()
            .map(|rows| rows.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl SessionRepository for MemoryRepository {
    async fn create_session(&self, new: NewSession) -> Result<Session> {
        let mut sessions = self
            .sessions
            .write()
            .map_err(|e| StoreError::Save(e.to_string()))?;
        if sessions
            .values()
            .any(|s| s.user_id == new.user_id && s.name == new.name)
        {
            return Err(StoreError::Save(format!("session name taken: {}", new.name)).into());
        }
        let now = Utc::now();
        let session = Session {
            id: Uuid::new_v4(),
            user_id: new.user_id,
            name: new.name,
            webhook_url: new.webhook_url,
            status: SessionStatus::Disconnected,
            phone_number: String::new(),
            device_info: None,
            last_connected: None,
            group_response_enabled: new.group_response_enabled,
            created_at: now,
            updated_at: now,
        };
        sessions.insert(session.id, session.clone());
        Ok(session)
    }

    async fn get_session(&self, id: Uuid) -> Result<Option<Session>> {
        let sessions = self
            .sessions
            .read()
            .map_err(|e| StoreError::Load(e.to_string()))?;
        Ok(sessions.get(&id).cloned())
    }

    async fn update_session_status(
        &self,
        id: Uuid,
        status: SessionStatus,
        phone_number: Option<&str>,
        device_info: Option<&DeviceInfo>,
    ) -> Result<()> {
        let mut sessions = self
            .sessions
            .write()
            .map_err(|e| StoreError::Save(e.to_string()))?;
        let session = sessions
            .get_mut(&id)
            .ok_or_else(|| StoreError::Save(format!("no session {id}")))?;
        let now = Utc::now();
        session.status = status;
        if let Some(phone) = phone_number {
            session.phone_number = phone.to_string();
        }
        if let Some(info) = device_info {
            session.device_info = Some(info.clone());
        }
        if status == SessionStatus::Connected {
            session.last_connected = Some(now);
        }
        session.updated_at = now;
        Ok(())
    }

    async fn sessions_with_stored_jid(&self) -> Result<Vec<Session>> {
        let sessions = self
            .sessions
            .read()
            .map_err(|e| StoreError::Load(e.to_string()))?;
        Ok(sessions
            .values()
            .filter(|s| !s.phone_number.is_empty())
            .cloned()
            .collect())
    }

    async fn delete_session(&self, id: Uuid) -> Result<()> {
        self.sessions
            .write()
            .map_err(|e| StoreError::Save(e.to_string()))?
            .remove(&id);
        self.message_log
            .write()
            .map_err(|e| StoreError::Save(e.to_string()))?
            .retain(|r| r.session_id != id);
        self.analytics
            .write()
            .map_err(|e| StoreError::Save(e.to_string()))?
            .retain(|r| r.session_id != id);
        Ok(())
    }

    async fn insert_message_log(&self, record: MessageLogRecord) -> Result<()> {
        self.message_log
            .write()
            .map_err(|e| StoreError::Save(e.to_string()))?
            .push(record);
        Ok(())
    }

    async fn insert_analytics(&self, record: AnalyticsRecord) -> Result<()> {
        self.analytics
            .write()
            .map_err(|e| StoreError::Save(e.to_string()))?
            .push(record);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn enforces_owner_name_uniqueness() {
        let repo = MemoryRepository::new();
        let user_id = Uuid::new_v4();
        let new = |name: &str| NewSession {
            user_id,
            name: name.to_string(),
            webhook_url: String::new(),
            group_response_enabled: true,
        };
        repo.create_session(new("bot")).await.unwrap();
        assert!(repo.create_session(new("bot")).await.is_err());
        repo.create_session(new("other")).await.unwrap();
    }

    #[tokio::test]
    async fn delete_drops_dependent_rows() {
        let repo = MemoryRepository::new();
        let session = repo
            .create_session(NewSession {
                user_id: Uuid::new_v4(),
                name: "bot".into(),
                webhook_url: String::new(),
                group_response_enabled: false,
            })
            .await
            .unwrap();
        repo.insert_analytics(AnalyticsRecord {
            session_id: session.id,
            message_id: "A".into(),
            from_number: "1".into(),
            message_type: crate::types::MessageType::Text,
            is_group: false,
            is_mention: false,
            webhook_sent: true,
            webhook_success: false,
            webhook_response_time_ms: 1,
            webhook_status_code: None,
            error_message: Some("boom".into()),
        })
        .await
        .unwrap();
        repo.delete_session(session.id).await.unwrap();
        assert!(repo.analytics().is_empty());
        assert!(repo.get_session(session.id).await.unwrap().is_none());
    }
}
