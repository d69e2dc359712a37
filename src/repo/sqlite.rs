//! SQLite persistence adapter.
//!
//! One pool serves the gateway tables and the WA library's device records
//! (`wa_devices`). Schema is bootstrapped at connect; the status enum and
//! `(user_id, name)` uniqueness are enforced in SQL.

use super::{AnalyticsRecord, MessageLogRecord, NewSession, Session, SessionRepository};
use crate::error::{Result, StoreError};
use crate::types::{DeviceInfo, SessionStatus};
use crate::wa::{Device, DeviceStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use uuid::Uuid;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS sessions (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    name TEXT NOT NULL,
    webhook_url TEXT NOT NULL DEFAULT '',
    status TEXT NOT NULL DEFAULT 'disconnected'
        CHECK (status IN ('disconnected', 'qr', 'connected')),
    phone_number TEXT NOT NULL DEFAULT '',
    device_info TEXT,
    last_connected TEXT,
    is_group_response_enabled INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE (user_id, name)
);

CREATE TABLE IF NOT EXISTS messages_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT NOT NULL REFERENCES sessions(id) ON DELETE CASCADE,
    direction TEXT NOT NULL CHECK (direction IN ('incoming', 'outgoing')),
    from_number TEXT NOT NULL,
    to_number TEXT NOT NULL DEFAULT '',
    message_type TEXT NOT NULL,
    content TEXT NOT NULL DEFAULT '',
    media_url TEXT,
    group_id TEXT,
    group_name TEXT,
    is_group INTEGER NOT NULL DEFAULT 0,
    quoted_message_id TEXT,
    timestamp TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS analytics (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT NOT NULL REFERENCES sessions(id) ON DELETE CASCADE,
    message_id TEXT NOT NULL,
    from_number TEXT NOT NULL,
    message_type TEXT NOT NULL,
    is_group INTEGER NOT NULL DEFAULT 0,
    is_mention INTEGER NOT NULL DEFAULT 0,
    webhook_sent INTEGER NOT NULL DEFAULT 0,
    webhook_success INTEGER NOT NULL DEFAULT 0,
    webhook_response_time_ms INTEGER NOT NULL DEFAULT 0,
    webhook_status_code INTEGER,
    error_message TEXT,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS wa_devices (
    jid TEXT PRIMARY KEY,
    lid TEXT,
    platform TEXT,
    business_name TEXT,
    key_material BLOB,
    registration_id INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_messages_log_session ON messages_log(session_id, timestamp);
CREATE INDEX IF NOT EXISTS idx_analytics_session ON analytics(session_id, created_at);
"#;

#[derive(Clone)]
pub struct SqliteRepository {
    pool: SqlitePool,
}

impl SqliteRepository {
    /// Open (creating if missing) and bootstrap the schema. In-memory URLs
    /// are pinned to a single connection so every query sees one database.
    pub async fn connect(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(StoreError::from)?
            .create_if_missing(true)
            .foreign_keys(true);
        let max_connections = if url.contains(":memory:") { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(StoreError::from)?;
        for statement in SCHEMA.split(';').filter(|s| !s.trim().is_empty()) {
            sqlx::query(statement)
                .execute(&pool)
                .await
                .map_err(StoreError::from)?;
        }
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn session_from_row(row: &SqliteRow) -> std::result::Result<Session, StoreError> {
    let id: String = row.try_get("id").map_err(StoreError::from)?;
    let user_id: String = row.try_get("user_id").map_err(StoreError::from)?;
    let status: String = row.try_get("status").map_err(StoreError::from)?;
    let device_info: Option<String> = row.try_get("device_info").map_err(StoreError::from)?;
    let device_info = match device_info.as_deref() {
        Some(json) if !json.is_empty() => {
            Some(serde_json::from_str(json).map_err(|e| StoreError::Load(e.to_string()))?)
        }
        _ => None,
    };
    Ok(Session {
        id: Uuid::parse_str(&id).map_err(|e| StoreError::Load(e.to_string()))?,
        user_id: Uuid::parse_str(&user_id).map_err(|e| StoreError::Load(e.to_string()))?,
        name: row.try_get("name").map_err(StoreError::from)?,
        webhook_url: row.try_get("webhook_url").map_err(StoreError::from)?,
        status: status
            .parse::<SessionStatus>()
            .map_err(StoreError::Load)?,
        phone_number: row.try_get("phone_number").map_err(StoreError::from)?,
        device_info,
        last_connected: row.try_get("last_connected").map_err(StoreError::from)?,
        group_response_enabled: row
            .try_get("is_group_response_enabled")
            .map_err(StoreError::from)?,
        created_at: row.try_get("created_at").map_err(StoreError::from)?,
        updated_at: row.try_get("updated_at").map_err(StoreError::from)?,
    })
}

#[async_trait]
impl SessionRepository for SqliteRepository {
    async fn create_session(&self, new: NewSession) -> Result<Session> {
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
        sqlx::query(
            "INSERT INTO sessions \
             (id, user_id, name, webhook_url, status, phone_number, \
              is_group_response_enabled, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(session.id.to_string())
        .bind(session.user_id.to_string())
        .bind(&session.name)
        .bind(&session.webhook_url)
        .bind(session.status.as_str())
        .bind(&session.phone_number)
        .bind(session.group_response_enabled)
        .bind(session.created_at)
        .bind(session.updated_at)
        .execute(&self.pool)
        .await
        .map_err(StoreError::from)?;
        Ok(session)
    }

    async fn get_session(&self, id: Uuid) -> Result<Option<Session>> {
        let row = sqlx::query("SELECT * FROM sessions WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::from)?;
        row.as_ref().map(session_from_row).transpose().map_err(Into::into)
    }

    async fn update_session_status(
        &self,
        id: Uuid,
        status: SessionStatus,
        phone_number: Option<&str>,
        device_info: Option<&DeviceInfo>,
    ) -> Result<()> {
        let now = Utc::now();
        let last_connected: Option<DateTime<Utc>> = match status {
            SessionStatus::Connected => Some(now),
            _ => None,
        };
        let device_info_json = device_info
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| StoreError::Save(e.to_string()))?;
        sqlx::query(
            "UPDATE sessions SET \
             status = ?, \
             phone_number = COALESCE(?, phone_number), \
             device_info = COALESCE(?, device_info), \
             last_connected = COALESCE(?, last_connected), \
             updated_at = ? \
             WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(phone_number)
        .bind(device_info_json)
        .bind(last_connected)
        .bind(now)
        .bind(id.to_string())
        .execute(&self.pool)
        .await
        .map_err(StoreError::from)?;
        Ok(())
    }

    async fn sessions_with_stored_jid(&self) -> Result<Vec<Session>> {
        let rows = sqlx::query("SELECT * FROM sessions WHERE phone_number != ''")
            .fetch_all(&self.pool)
            .await
            .map_err(StoreError::from)?;
        rows.iter()
            .map(|r| session_from_row(r).map_err(Into::into))
            .collect()
    }

    async fn delete_session(&self, id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM sessions WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(StoreError::from)?;
        Ok(())
    }

    async fn insert_message_log(&self, record: MessageLogRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO messages_log \
             (session_id, direction, from_number, to_number, message_type, content, \
              media_url, group_id, group_name, is_group, quoted_message_id, timestamp) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(record.session_id.to_string())
        .bind(record.direction.as_str())
        .bind(&record.from_number)
        .bind(&record.to_number)
        .bind(record.message_type.as_str())
        .bind(&record.content)
        .bind(&record.media_url)
        .bind(&record.group_id)
        .bind(&record.group_name)
        .bind(record.is_group)
        .bind(&record.quoted_message_id)
        .bind(record.timestamp)
        .execute(&self.pool)
        .await
        .map_err(StoreError::from)?;
        Ok(())
    }

    async fn insert_analytics(&self, record: AnalyticsRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO analytics \
             (session_id, message_id, from_number, message_type, is_group, is_mention, \
              webhook_sent, webhook_success, webhook_response_time_ms, \
              webhook_status_code, error_message, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(record.session_id.to_string())
        .bind(&record.message_id)
        .bind(&record.from_number)
        .bind(record.message_type.as_str())
        .bind(record.is_group)
        .bind(record.is_mention)
        .bind(record.webhook_sent)
        .bind(record.webhook_success)
        .bind(record.webhook_response_time_ms)
        .bind(record.webhook_status_code.map(|c| c as i64))
        .bind(&record.error_message)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(StoreError::from)?;
        Ok(())
    }
}

#[async_trait]
impl DeviceStore for SqliteRepository {
    async fn get_device(&self, jid: &crate::types::Jid) -> Result<Option<Device>> {
        let row = sqlx::query("SELECT * FROM wa_devices WHERE jid = ?")
            .bind(jid.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::from)?;
        row.as_ref().map(device_from_row).transpose().map_err(Into::into)
    }

    async fn get_all_devices(&self) -> Result<Vec<Device>> {
        let rows = sqlx::query("SELECT * FROM wa_devices")
            .fetch_all(&self.pool)
            .await
            .map_err(StoreError::from)?;
        rows.iter()
            .map(|r| device_from_row(r).map_err(Into::into))
            .collect()
    }

    async fn new_device(&self) -> Result<Device> {
        Ok(Device {
            registration_id: rand::random(),
            ..Default::default()
        })
    }

    async fn save(&self, device: &Device) -> Result<()> {
        let Some(jid) = &device.id else {
            return Err(StoreError::DeviceNotPaired.into());
        };
        sqlx::query(
            "INSERT INTO wa_devices \
             (jid, lid, platform, business_name, key_material, registration_id) \
             VALUES (?, ?, ?, ?, ?, ?) \
             ON CONFLICT(jid) DO UPDATE SET \
             lid = excluded.lid, platform = excluded.platform, \
             business_name = excluded.business_name, \
             key_material = excluded.key_material, \
             registration_id = excluded.registration_id",
        )
        .bind(jid.to_string())
        .bind(device.lid.as_ref().map(|j| j.to_string()))
        .bind(&device.platform)
        .bind(&device.business_name)
        .bind(&device.key_material)
        .bind(device.registration_id as i64)
        .execute(&self.pool)
        .await
        .map_err(StoreError::from)?;
        Ok(())
    }

    async fn delete(&self, jid: &crate::types::Jid) -> Result<()> {
        sqlx::query("DELETE FROM wa_devices WHERE jid = ?")
            .bind(jid.to_string())
            .execute(&self.pool)
            .await
            .map_err(StoreError::from)?;
        Ok(())
    }
}

fn device_from_row(row: &SqliteRow) -> std::result::Result<Device, StoreError> {
    let jid: String = row.try_get("jid").map_err(StoreError::from)?;
    let lid: Option<String> = row.try_get("lid").map_err(StoreError::from)?;
    let registration_id: i64 = row.try_get("registration_id").map_err(StoreError::from)?;
    Ok(Device {
        id: jid.parse().ok(),
        lid: lid.and_then(|s| s.parse().ok()),
        platform: row.try_get("platform").map_err(StoreError::from)?,
        business_name: row.try_get("business_name").map_err(StoreError::from)?,
        key_material: row.try_get("key_material").map_err(StoreError::from)?,
        registration_id: registration_id as u32,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Jid;

    async fn repo() -> SqliteRepository {
        SqliteRepository::connect("sqlite::memory:").await.unwrap()
    }

    fn new_session(name: &str) -> NewSession {
        NewSession {
            user_id: Uuid::new_v4(),
            name: name.to_string(),
            webhook_url: "https://hooks.example/ai".to_string(),
            group_response_enabled: false,
        }
    }

    #[tokio::test]
    async fn create_and_get_roundtrip() {
        let repo = repo().await;
        let created = repo.create_session(new_session("bot")).await.unwrap();
        let loaded = repo.get_session(created.id).await.unwrap().unwrap();
        assert_eq!(loaded.name, "bot");
        assert_eq!(loaded.status, SessionStatus::Disconnected);
        assert_eq!(loaded.phone_number, "");
        assert!(loaded.last_connected.is_none());
        assert!(repo.get_session(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_owner_name_rejected() {
        let repo = repo().await;
        let user_id = Uuid::new_v4();
        let mut first = new_session("bot");
        first.user_id = user_id;
        let mut second = new_session("bot");
        second.user_id = user_id;
        repo.create_session(first).await.unwrap();
        assert!(repo.create_session(second).await.is_err());
    }

    #[tokio::test]
    async fn connected_status_bumps_last_connected_and_sets_phone() {
        let repo = repo().await;
        let session = repo.create_session(new_session("bot")).await.unwrap();
        let info = DeviceInfo {
            platform: Some("smba".into()),
            ..Default::default()
        };
        repo.update_session_status(
            session.id,
            SessionStatus::Connected,
            Some("6281@s.whatsapp.net:12"),
            Some(&info),
        )
        .await
        .unwrap();
        let loaded = repo.get_session(session.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, SessionStatus::Connected);
        assert_eq!(loaded.phone_number, "6281@s.whatsapp.net:12");
        assert_eq!(loaded.device_info.unwrap(), info);
        assert!(loaded.last_connected.is_some());
    }

    #[tokio::test]
    async fn none_phone_leaves_stored_jid_untouched() {
        let repo = repo().await;
        let session = repo.create_session(new_session("bot")).await.unwrap();
        repo.update_session_status(
            session.id,
            SessionStatus::Connected,
            Some("6281@s.whatsapp.net"),
            None,
        )
        .await
        .unwrap();
        repo.update_session_status(session.id, SessionStatus::Disconnected, None, None)
            .await
            .unwrap();
        let loaded = repo.get_session(session.id).await.unwrap().unwrap();
        assert_eq!(loaded.phone_number, "6281@s.whatsapp.net");

        repo.update_session_status(session.id, SessionStatus::Disconnected, Some(""), None)
            .await
            .unwrap();
        let loaded = repo.get_session(session.id).await.unwrap().unwrap();
        assert_eq!(loaded.phone_number, "");
    }

    #[tokio::test]
    async fn recovery_scan_ignores_status() {
        let repo = repo().await;
        let paired = repo.create_session(new_session("paired")).await.unwrap();
        let _unpaired = repo.create_session(new_session("unpaired")).await.unwrap();
        repo.update_session_status(
            paired.id,
            SessionStatus::Disconnected,
            Some("6281@s.whatsapp.net"),
            None,
        )
        .await
        .unwrap();
        let found = repo.sessions_with_stored_jid().await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, paired.id);
    }

    #[tokio::test]
    async fn delete_cascades_to_logs_and_analytics() {
        let repo = repo().await;
        let session = repo.create_session(new_session("bot")).await.unwrap();
        repo.insert_message_log(MessageLogRecord {
            session_id: session.id,
            direction: crate::types::Direction::Incoming,
            from_number: "6281".into(),
            to_number: String::new(),
            message_type: crate::types::MessageType::Text,
            content: "hello".into(),
            media_url: None,
            group_id: None,
            group_name: None,
            is_group: false,
            quoted_message_id: None,
            timestamp: Utc::now(),
        })
        .await
        .unwrap();
        repo.insert_analytics(AnalyticsRecord {
            session_id: session.id,
            message_id: "ABC".into(),
            from_number: "6281".into(),
            message_type: crate::types::MessageType::Text,
            is_group: false,
            is_mention: false,
            webhook_sent: true,
            webhook_success: true,
            webhook_response_time_ms: 42,
            webhook_status_code: Some(200),
            error_message: None,
        })
        .await
        .unwrap();

        repo.delete_session(session.id).await.unwrap();
        let logs: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM messages_log")
            .fetch_one(repo.pool())
            .await
            .unwrap();
        let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM analytics")
            .fetch_one(repo.pool())
            .await
            .unwrap();
        assert_eq!(logs, 0);
        assert_eq!(rows, 0);
    }

    #[tokio::test]
    async fn device_store_roundtrip() {
        let repo = repo().await;
        let jid: Jid = "6281@s.whatsapp.net:12".parse().unwrap();
        let device = Device {
            id: Some(jid.clone()),
            lid: jid.lid_alias(),
            platform: Some("smba".into()),
            business_name: None,
            key_material: Some(vec![1, 2, 3]),
            registration_id: 7,
        };
        repo.save(&device).await.unwrap();
        let loaded = repo.get_device(&jid).await.unwrap().unwrap();
        assert_eq!(loaded.id.unwrap(), jid);
        assert_eq!(loaded.key_material.unwrap(), vec![1, 2, 3]);
        assert_eq!(repo.get_all_devices().await.unwrap().len(), 1);

        repo.delete(&jid).await.unwrap();
        assert!(repo.get_device(&jid).await.unwrap().is_none());
        assert!(repo.save(&Device::default()).await.is_err());
    }
}
