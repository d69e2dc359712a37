//! Device records for paired WhatsApp identities.

use crate::error::Result;
use crate::types::Jid;
use async_trait::async_trait;

/// One linked device. The protocol library owns the key material; the
/// gateway only cares about the identity and descriptor fields.
#[derive(Clone, Debug, Default)]
pub struct Device {
    /// Full JID after pairing (None before the QR is scanned).
    pub id: Option<Jid>,
    /// Hidden-user alias the server assigned at pairing, when known.
    pub lid: Option<Jid>,
    pub platform: Option<String>,
    pub business_name: Option<String>,
    /// Opaque protocol state blob (noise/identity/prekeys), round-tripped
    /// for the protocol library.
    pub key_material: Option<Vec<u8>>,
    pub registration_id: u32,
}

impl Device {
    pub fn is_paired(&self) -> bool {
        self.id.is_some()
    }
}

/// Store for device records. The WA protocol library persists its own
/// devices through this; the registry reads them to bind sessions.
///
/// Implementations are expected to remove a device on logout and to persist
/// one on pair success.
#[async_trait]
pub trait DeviceStore: Send + Sync {
    /// Get device by JID. Device-suffix differences are significant.
    async fn get_device(&self, jid: &Jid) -> Result<Option<Device>>;

    /// All paired devices.
    async fn get_all_devices(&self) -> Result<Vec<Device>>;

    /// Fresh, unpaired device record. Pairing fills in the identity.
    async fn new_device(&self) -> Result<Device>;

    /// Save device state (after pairing or key changes).
    async fn save(&self, device: &Device) -> Result<()>;

    /// Delete device (logout).
    async fn delete(&self, jid: &Jid) -> Result<()>;
}
