//! Session Registry: the process-wide map of session id → live client.
//!
//! All mutations of the live set are serialized through one lock, and the
//! lock is never held across I/O: connect checks the map, releases, does
//! its device lookups, then re-checks before inserting. The loser of a
//! concurrent connect simply observes the winner's status.

use crate::broadcast::{qr_update_data, status_update_data, BroadcastKind, Broadcaster};
use crate::config::GatewayConfig;
use crate::error::{Error, Result};
use crate::repo::{Session, SessionRepository};
use crate::runtime;
use crate::types::{Jid, SessionStatus};
use crate::wa::{Device, DeviceStore, QrEvent, WaClient, WaClientFactory};
use crate::webhook::WebhookDispatcher;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Result of driving a session towards its connected state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// Pairing required; QR codes are being broadcast.
    Qr,
    Connected,
}

pub struct SessionRegistry {
    clients: RwLock<HashMap<Uuid, Arc<dyn WaClient>>>,
    repo: Arc<dyn SessionRepository>,
    devices: Arc<dyn DeviceStore>,
    factory: Arc<dyn WaClientFactory>,
    broadcaster: Broadcaster,
    dispatcher: Arc<WebhookDispatcher>,
    config: GatewayConfig,
}

impl SessionRegistry {
    pub fn new(
        config: GatewayConfig,
        repo: Arc<dyn SessionRepository>,
        devices: Arc<dyn DeviceStore>,
        factory: Arc<dyn WaClientFactory>,
        broadcaster: Broadcaster,
    ) -> Arc<Self> {
        let dispatcher = Arc::new(WebhookDispatcher::new(config.webhook.clone()));
        Arc::new(Self {
            clients: RwLock::new(HashMap::new()),
            repo,
            devices,
            factory,
            broadcaster,
            dispatcher,
            config,
        })
    }

    pub fn repo(&self) -> &Arc<dyn SessionRepository> {
        &self.repo
    }

    pub fn broadcaster(&self) -> &Broadcaster {
        &self.broadcaster
    }

    pub(crate) fn dispatcher(&self) -> &Arc<WebhookDispatcher> {
        &self.dispatcher
    }

    pub(crate) fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Drive the session towards connected, creating the live client if
    /// needed. A session that already has a live client reports that
    /// client's observed status instead of reconnecting.
    pub async fn connect(self: &Arc<Self>, session_id: Uuid) -> Result<ConnectOutcome> {
        {
            let clients = self.clients.read().await;
            if let Some(client) = clients.get(&session_id) {
                return Ok(observed_outcome(client));
            }
        }

        let session = self
            .repo
            .get_session(session_id)
            .await?
            .ok_or(Error::SessionNotFound(session_id))?;
        let device = self.resolve_device(&session).await?;
        let needs_pairing = !device.is_paired();
        let client = self.factory.create(device).await?;

        {
            let mut clients = self.clients.write().await;
            if let Some(existing) = clients.get(&session_id) {
                // Lost a connect race; the winner's client stands.
                return Ok(observed_outcome(existing));
            }
            clients.insert(session_id, Arc::clone(&client));
        }

        runtime::attach_handler(self, session_id, &client).await;

        let outcome = if needs_pairing {
            // The QR channel must exist before connect starts emitting codes.
            match client.qr_channel().await {
                Ok(rx) => self.spawn_qr_pump(session_id, rx),
                Err(err) => {
                    self.remove(session_id).await;
                    return Err(err);
                }
            }
            ConnectOutcome::Qr
        } else {
            ConnectOutcome::Connected
        };

        if let Err(err) = client.connect().await {
            self.remove(session_id).await;
            return Err(err);
        }

        if outcome == ConnectOutcome::Qr {
            if let Err(err) = self
                .repo
                .update_session_status(session_id, SessionStatus::Qr, None, None)
                .await
            {
                warn!(%session_id, %err, "failed to persist qr status");
            }
            self.broadcaster.publish(
                session_id,
                BroadcastKind::StatusUpdate,
                status_update_data(SessionStatus::Qr, None, None),
            );
        }

        info!(%session_id, ?outcome, "session connect started");
        Ok(outcome)
    }

    /// Tear down the live client. `update_status` is false during process
    /// shutdown so the stored JID and status survive for boot recovery.
    pub async fn disconnect(&self, session_id: Uuid, update_status: bool) -> Result<()> {
        let client = self.clients.write().await.remove(&session_id);
        if let Some(client) = client {
            client.disconnect().await;
            debug!(%session_id, "live client torn down");
        }
        if update_status {
            self.repo
                .update_session_status(session_id, SessionStatus::Disconnected, None, None)
                .await?;
            self.broadcaster.publish(
                session_id,
                BroadcastKind::StatusUpdate,
                status_update_data(SessionStatus::Disconnected, None, None),
            );
        }
        Ok(())
    }

    /// Non-blocking read-side lookup.
    pub async fn get(&self, session_id: Uuid) -> Option<Arc<dyn WaClient>> {
        self.clients.read().await.get(&session_id).cloned()
    }

    /// Drop the live client without touching persisted state.
    pub(crate) async fn remove(&self, session_id: Uuid) -> Option<Arc<dyn WaClient>> {
        self.clients.write().await.remove(&session_id)
    }

    /// Best-effort disconnect of every live client. The key set is
    /// snapshotted under the lock, then the lock is released before any
    /// client I/O; a hung handle cannot stall the rest.
    pub async fn shutdown(&self) {
        let ids: Vec<Uuid> = self.clients.read().await.keys().copied().collect();
        info!(sessions = ids.len(), "registry shutting down");
        for session_id in ids {
            match tokio::time::timeout(Duration::from_secs(5), self.disconnect(session_id, false))
                .await
            {
                Ok(Err(err)) => warn!(%session_id, %err, "shutdown disconnect failed"),
                Err(_) => warn!(%session_id, "shutdown disconnect timed out"),
                Ok(Ok(())) => {}
            }
        }
    }

    /// Load (or lazily create) the device record backing a session.
    ///
    /// A stored JID is looked up directly first; on miss, all devices are
    /// scanned by (user, server) to heal JID strings that lost their device
    /// suffix, and the full JID is persisted back. Anything unresolvable
    /// falls back to a fresh device, forcing a re-scan rather than failing.
    async fn resolve_device(&self, session: &Session) -> Result<Device> {
        if let Some(stored) = Jid::normalize_stored(&session.phone_number) {
            if let Some(device) = self.devices.get_device(&stored).await? {
                return Ok(device);
            }
            let all = self.devices.get_all_devices().await?;
            let matched = all.into_iter().find(|d| {
                d.id.as_ref()
                    .is_some_and(|id| id.user == stored.user && id.server == stored.server)
            });
            if let Some(device) = matched {
                if let Some(full) = &device.id {
                    let full = full.to_string();
                    if full != session.phone_number {
                        self.repo
                            .update_session_status(
                                session.id,
                                session.status,
                                Some(&full),
                                None,
                            )
                            .await?;
                        debug!(session_id = %session.id, jid = %full, "healed stored JID");
                    }
                }
                return Ok(device);
            }
            warn!(session_id = %session.id, stored = %stored, "stored JID has no device; re-pairing");
        }
        self.devices.new_device().await
    }

    fn spawn_qr_pump(&self, session_id: Uuid, mut rx: mpsc::Receiver<QrEvent>) {
        let broadcaster = self.broadcaster.clone();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                match event {
                    QrEvent::Code(code) => {
                        broadcaster.publish(
                            session_id,
                            BroadcastKind::QrUpdate,
                            qr_update_data(&code),
                        );
                    }
                    QrEvent::Success => {
                        debug!(%session_id, "qr scan succeeded");
                        break;
                    }
                    QrEvent::Timeout => {
                        debug!(%session_id, "qr channel timed out");
                        break;
                    }
                }
            }
        });
    }
}

fn observed_outcome(client: &Arc<dyn WaClient>) -> ConnectOutcome {
    if client.is_connected() {
        ConnectOutcome::Connected
    } else {
        ConnectOutcome::Qr
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repo::{MemoryRepository, NewSession};
    use crate::wa::mock::{MemoryDeviceStore, MockClientFactory};
    use crate::types::DEFAULT_USER_SERVER;
    use serde_json::Value;

    struct Harness {
        registry: Arc<SessionRegistry>,
        repo: Arc<MemoryRepository>,
        devices: Arc<MemoryDeviceStore>,
        factory: Arc<MockClientFactory>,
        broadcaster: Broadcaster,
    }

    fn harness() -> Harness {
        let repo = Arc::new(MemoryRepository::new());
        let devices = Arc::new(MemoryDeviceStore::new());
        let factory = Arc::new(MockClientFactory::new(devices.clone()));
        let broadcaster = Broadcaster::new(16);
        let registry = SessionRegistry::new(
            GatewayConfig::default(),
            repo.clone(),
            devices.clone(),
            factory.clone(),
            broadcaster.clone(),
        );
        Harness {
            registry,
            repo,
            devices,
            factory,
            broadcaster,
        }
    }

    /// Let spawned event-handler tasks drain before asserting on state.
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    async fn make_session(h: &Harness, name: &str) -> Session {
        h.repo
            .create_session(NewSession {
                user_id: Uuid::new_v4(),
                name: name.to_string(),
                webhook_url: "https://hooks.example/ai".to_string(),
                group_response_enabled: false,
            })
            .await
            .unwrap()
    }

    async fn pair_device(h: &Harness, session: &Session, jid: &Jid) {
        h.devices
            .save(&Device {
                id: Some(jid.clone()),
                ..Default::default()
            })
            .await
            .unwrap();
        h.repo
            .update_session_status(
                session.id,
                SessionStatus::Disconnected,
                Some(&jid.to_string()),
                None,
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn connect_unknown_session_fails() {
        let h = harness();
        let err = h.registry.connect(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, Error::SessionNotFound(_)));
    }

    #[tokio::test]
    async fn first_connect_of_unpaired_session_returns_qr_and_broadcasts_codes() {
        let h = harness();
        let session = make_session(&h, "bot").await;
        let mut sub = h.broadcaster.subscribe(session.id);

        let outcome = h.registry.connect(session.id).await.unwrap();
        assert_eq!(outcome, ConnectOutcome::Qr);
        assert_eq!(h.factory.created_count(), 1);
        assert!(h.registry.get(session.id).await.is_some());

        let mut seen_qr = false;
        for _ in 0..3 {
            let frame: Value =
                serde_json::from_str(&sub.rx.recv().await.unwrap()).unwrap();
            if frame["type"] == "qr_update" {
                assert_eq!(frame["data"]["qr_code"], "mock-qr-1");
                assert_eq!(frame["data"]["expires_in"], 60);
                seen_qr = true;
                break;
            }
        }
        assert!(seen_qr);
        let stored = h.repo.get_session(session.id).await.unwrap().unwrap();
        assert_eq!(stored.status, SessionStatus::Qr);
    }

    #[tokio::test]
    async fn second_connect_reuses_live_client() {
        let h = harness();
        let session = make_session(&h, "bot").await;
        let jid = Jid::new_ad("6281", 12, DEFAULT_USER_SERVER);
        pair_device(&h, &session, &jid).await;

        assert_eq!(
            h.registry.connect(session.id).await.unwrap(),
            ConnectOutcome::Connected
        );
        assert_eq!(
            h.registry.connect(session.id).await.unwrap(),
            ConnectOutcome::Connected
        );
        assert_eq!(h.factory.created_count(), 1);
    }

    #[tokio::test]
    async fn stored_jid_without_device_suffix_is_healed() {
        let h = harness();
        let session = make_session(&h, "bot").await;
        let full = Jid::new_ad("6281", 12, DEFAULT_USER_SERVER);
        h.devices
            .save(&Device {
                id: Some(full.clone()),
                ..Default::default()
            })
            .await
            .unwrap();
        // Stored form lost the device suffix (and the server).
        h.repo
            .update_session_status(session.id, SessionStatus::Disconnected, Some("6281"), None)
            .await
            .unwrap();

        let outcome = h.registry.connect(session.id).await.unwrap();
        assert_eq!(outcome, ConnectOutcome::Connected);
        let stored = h.repo.get_session(session.id).await.unwrap().unwrap();
        assert_eq!(stored.phone_number, full.to_string());
    }

    #[tokio::test]
    async fn qr_channel_failure_cleans_up_half_inserted_client() {
        use crate::error::ClientError;

        let h = harness();
        let session = make_session(&h, "bot").await;
        h.factory.fail_qr_channels(true);

        let err = h.registry.connect(session.id).await.unwrap_err();
        assert!(matches!(err, Error::Client(ClientError::QrChannel(_))));
        assert!(h.registry.get(session.id).await.is_none());

        // A retry once the fault clears gets a working client.
        h.factory.fail_qr_channels(false);
        assert_eq!(
            h.registry.connect(session.id).await.unwrap(),
            ConnectOutcome::Qr
        );
        assert!(h.registry.get(session.id).await.is_some());
    }

    #[tokio::test]
    async fn unresolvable_stored_jid_falls_back_to_fresh_device() {
        let h = harness();
        let session = make_session(&h, "bot").await;
        h.repo
            .update_session_status(
                session.id,
                SessionStatus::Disconnected,
                Some("9999@s.whatsapp.net"),
                None,
            )
            .await
            .unwrap();
        let outcome = h.registry.connect(session.id).await.unwrap();
        assert_eq!(outcome, ConnectOutcome::Qr);
    }

    #[tokio::test]
    async fn disconnect_updates_status_only_when_asked() {
        let h = harness();
        let session = make_session(&h, "bot").await;
        let jid = Jid::new_ad("6281", 12, DEFAULT_USER_SERVER);
        pair_device(&h, &session, &jid).await;
        h.repo
            .update_session_status(session.id, SessionStatus::Connected, None, None)
            .await
            .unwrap();

        h.registry.connect(session.id).await.unwrap();
        settle().await;
        h.registry.disconnect(session.id, false).await.unwrap();
        assert!(h.registry.get(session.id).await.is_none());
        let stored = h.repo.get_session(session.id).await.unwrap().unwrap();
        assert_eq!(stored.status, SessionStatus::Connected);
        assert_eq!(stored.phone_number, jid.to_string());

        h.registry.connect(session.id).await.unwrap();
        settle().await;
        h.registry.disconnect(session.id, true).await.unwrap();
        let stored = h.repo.get_session(session.id).await.unwrap().unwrap();
        assert_eq!(stored.status, SessionStatus::Disconnected);
        // Stored JID survives either way so recovery can find the session.
        assert_eq!(stored.phone_number, jid.to_string());
    }

    #[tokio::test]
    async fn shutdown_disconnects_everything_without_status_writes() {
        let h = harness();
        let a = make_session(&h, "a").await;
        let b = make_session(&h, "b").await;
        for (session, user) in [(&a, "111"), (&b, "222")] {
            let jid = Jid::new_ad(user, 1, DEFAULT_USER_SERVER);
            pair_device(&h, session, &jid).await;
            h.repo
                .update_session_status(session.id, SessionStatus::Connected, None, None)
                .await
                .unwrap();
            h.registry.connect(session.id).await.unwrap();
        }
        settle().await;

        h.registry.shutdown().await;
        assert!(h.registry.get(a.id).await.is_none());
        assert!(h.registry.get(b.id).await.is_none());
        for session in [&a, &b] {
            let stored = h.repo.get_session(session.id).await.unwrap().unwrap();
            assert_eq!(stored.status, SessionStatus::Connected);
        }
    }
}
