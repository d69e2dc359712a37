//! Scriptable in-process WA client for tests and local runs.
//!
//! Not a protocol implementation: tests feed it events and inspect what the
//! gateway asked it to send.

use super::{
    Device, DeviceStore, EventHandler, MediaBytes, MediaRef, QrEvent, SendResponse, WaClient,
    WaEvent,
};
use crate::error::{ClientError, Result, StoreError};
use crate::types::{ChatPresence, Jid};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, RwLock};

/// A message the gateway sent through the mock.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SentMessage {
    pub to: Jid,
    pub body: String,
}

pub struct MockWaClient {
    device: RwLock<Device>,
    store: Arc<dyn DeviceStore>,
    connected: AtomicBool,
    handlers: RwLock<Vec<EventHandler>>,
    qr_codes: Vec<String>,
    qr_tx: Mutex<Option<mpsc::Sender<QrEvent>>>,
    sent: Mutex<Vec<SentMessage>>,
    presence: Mutex<Vec<(Jid, ChatPresence)>>,
    media: Mutex<HashMap<String, MediaBytes>>,
    fail_downloads: AtomicBool,
    fail_sends: AtomicBool,
    fail_qr_channel: AtomicBool,
}

impl MockWaClient {
    pub fn new(device: Device, store: Arc<dyn DeviceStore>) -> Self {
        Self {
            device: RwLock::new(device),
            store,
            connected: AtomicBool::new(false),
            handlers: RwLock::new(Vec::new()),
            qr_codes: vec!["mock-qr-1".to_string(), "mock-qr-2".to_string()],
            qr_tx: Mutex::new(None),
            sent: Mutex::new(Vec::new()),
            presence: Mutex::new(Vec::new()),
            media: Mutex::new(HashMap::new()),
            fail_downloads: AtomicBool::new(false),
            fail_sends: AtomicBool::new(false),
            fail_qr_channel: AtomicBool::new(false),
        }
    }

    /// Dispatch an event to all registered handlers.
    pub async fn emit(&self, event: WaEvent) {
        let handlers = self.handlers.read().await;
        for handler in handlers.iter() {
            handler(event.clone());
        }
    }

    /// Simulate a successful QR scan: persist the device identity and emit
    /// `PairSuccess`, then `Connected` (the library emits both).
    pub async fn complete_pairing(&self, jid: Jid, platform: &str, business_name: &str) {
        {
            let mut device = self.device.write().await;
            device.id = Some(jid.clone());
            device.lid = jid.lid_alias();
            device.platform = Some(platform.to_string());
            device.business_name = Some(business_name.to_string());
            if let Err(err) = self.store.save(&device).await {
                tracing::warn!(%err, "mock device save failed");
            }
        }
        if let Some(tx) = self.qr_tx.lock().ok().and_then(|mut tx| tx.take()) {
            let _ = tx.try_send(QrEvent::Success);
        }
        self.emit(WaEvent::PairSuccess {
            jid,
            platform: platform.to_string(),
            business_name: business_name.to_string(),
        })
        .await;
        self.emit(WaEvent::Connected).await;
    }

    /// Simulate the phone unlinking this device: delete the device record,
    /// drop the connection and emit `LoggedOut`.
    pub async fn logout(&self) {
        let jid = self.device.write().await.id.take();
        if let Some(jid) = jid {
            if let Err(err) = self.store.delete(&jid).await {
                tracing::warn!(%err, "mock device delete failed");
            }
        }
        self.connected.store(false, Ordering::SeqCst);
        self.emit(WaEvent::LoggedOut).await;
    }

    pub fn sent_messages(&self) -> Vec<SentMessage> {
        self.sent.lock().map(|sent| sent.clone()).unwrap_or_default()
    }

    pub fn presence_log(&self) -> Vec<(Jid, ChatPresence)> {
        self.presence
            .lock()
            .map(|presence| presence.clone())
            .unwrap_or_default()
    }

    /// Preload bytes served for a media direct path.
    pub fn add_media(&self, direct_path: &str, bytes: MediaBytes) {
        if let Ok(mut media) = self.media.lock() {
            media.insert(direct_path.to_string(), bytes);
        }
    }

    pub fn fail_downloads(&self, fail: bool) {
        self.fail_downloads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    pub fn fail_qr_channel(&self, fail: bool) {
        self.fail_qr_channel.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl WaClient for MockWaClient {
    async fn connect(&self) -> Result<()> {
        self.connected.store(true, Ordering::SeqCst);
        if self.device.read().await.is_paired() {
            // Paired devices authenticate straight away.
            self.emit(WaEvent::Connected).await;
        } else {
            let tx = self
                .qr_tx
                .lock()
                .map_err(|_| ClientError::Connect("qr channel lock poisoned".into()))?
                .clone();
            if let Some(tx) = tx {
                // Unpaired devices start pumping QR codes the moment they connect.
                for code in &self.qr_codes {
                    let _ = tx.try_send(QrEvent::Code(code.clone()));
                }
            }
        }
        Ok(())
    }

    async fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
        if let Ok(mut tx) = self.qr_tx.lock() {
            tx.take();
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn logged_in_jid(&self) -> Option<Jid> {
        self.device.read().await.id.clone()
    }

    async fn qr_channel(&self) -> Result<mpsc::Receiver<QrEvent>> {
        if self.fail_qr_channel.load(Ordering::SeqCst) {
            return Err(ClientError::QrChannel("mock qr channel failure".into()).into());
        }
        let (tx, rx) = mpsc::channel(8);
        *self
            .qr_tx
            .lock()
            .map_err(|_| ClientError::QrChannel("lock poisoned".into()))? = Some(tx);
        Ok(rx)
    }

    async fn send_text(&self, to: &Jid, body: &str) -> Result<SendResponse> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(ClientError::Send("mock send failure".into()).into());
        }
        if !self.is_connected() {
            return Err(ClientError::NotConnected.into());
        }
        self.sent
            .lock()
            .map_err(|_| ClientError::Send("lock poisoned".into()))?
            .push(SentMessage {
                to: to.clone(),
                body: body.to_string(),
            });
        Ok(SendResponse {
            id: crate::types::generate_message_id(),
            timestamp: chrono::Utc::now(),
        })
    }

    async fn send_chat_presence(&self, to: &Jid, presence: ChatPresence) -> Result<()> {
        self.presence
            .lock()
            .map_err(|_| ClientError::Send("lock poisoned".into()))?
            .push((to.clone(), presence));
        Ok(())
    }

    async fn download(&self, media: &MediaRef) -> Result<MediaBytes> {
        if self.fail_downloads.load(Ordering::SeqCst) {
            return Err(ClientError::Download("mock download failure".into()).into());
        }
        self.media
            .lock()
            .map_err(|_| ClientError::Download("lock poisoned".into()))?
            .get(&media.direct_path)
            .cloned()
            .ok_or_else(|| ClientError::Download(format!("no media at {}", media.direct_path)).into())
    }

    async fn add_event_handler(&self, handler: EventHandler) {
        self.handlers.write().await.push(handler);
    }
}

/// Factory producing [`MockWaClient`]s and retaining handles so tests can
/// drive the clients the registry created.
pub struct MockClientFactory {
    store: Arc<dyn DeviceStore>,
    created: Mutex<Vec<Arc<MockWaClient>>>,
    fail_next: AtomicBool,
    fail_qr_channels: AtomicBool,
}

impl MockClientFactory {
    pub fn new(store: Arc<dyn DeviceStore>) -> Self {
        Self {
            store,
            created: Mutex::new(Vec::new()),
            fail_next: AtomicBool::new(false),
            fail_qr_channels: AtomicBool::new(false),
        }
    }

    /// Most recently created client, if any.
    pub fn last(&self) -> Option<Arc<MockWaClient>> {
        self.created.lock().ok().and_then(|c| c.last().cloned())
    }

    pub fn created_count(&self) -> usize {
        self.created.lock().map(|c| c.len()).unwrap_or(0)
    }

    /// Make the next `create` call fail.
    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    /// Make every client created from here on fail its `qr_channel` call.
    pub fn fail_qr_channels(&self, fail: bool) {
        self.fail_qr_channels.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl super::WaClientFactory for MockClientFactory {
    async fn create(&self, device: Device) -> Result<Arc<dyn WaClient>> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(ClientError::Connect("mock factory failure".into()).into());
        }
        let client = Arc::new(MockWaClient::new(device, Arc::clone(&self.store)));
        if self.fail_qr_channels.load(Ordering::SeqCst) {
            client.fail_qr_channel(true);
        }
        self.created
            .lock()
            .map_err(|_| ClientError::Connect("lock poisoned".into()))?
            .push(Arc::clone(&client));
        Ok(client)
    }
}

/// In-memory device store.
pub struct MemoryDeviceStore {
    devices: std::sync::RwLock<HashMap<String, Device>>,
}

impl MemoryDeviceStore {
    pub fn new() -> Self {
        Self {
            devices: std::sync::RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryDeviceStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DeviceStore for MemoryDeviceStore {
    async fn get_device(&self, jid: &Jid) -> Result<Option<Device>> {
        let devices = self
            .devices
            .read()
            .map_err(|e| StoreError::Load(e.to_string()))?;
        Ok(devices.get(&jid.to_string()).cloned())
    }

    async fn get_all_devices(&self) -> Result<Vec<Device>> {
        let devices = self
            .devices
            .read()
            .map_err(|e| StoreError::Load(e.to_string()))?;
        Ok(devices
            .values()
            .filter(|d| d.id.is_some())
            .cloned()
            .collect())
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
        self.devices
            .write()
            .map_err(|e| StoreError::Save(e.to_string()))?
            .insert(jid.to_string(), device.clone());
        Ok(())
    }

    async fn delete(&self, jid: &Jid) -> Result<()> {
        self.devices
            .write()
            .map_err(|e| StoreError::Save(e.to_string()))?
            .remove(&jid.to_string());
        Ok(())
    }
}
