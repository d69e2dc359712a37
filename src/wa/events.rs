//! Events emitted by a WA client to its registered handlers.

use crate::types::{Jid, MessageId};
use bytes::Bytes;
use chrono::{DateTime, Utc};

/// Events a [`WaClient`](super::WaClient) implementation delivers to the
/// session runtime. Delivery order per client follows the underlying
/// library; handlers fan out per-message work on their own.
#[derive(Clone, Debug)]
pub enum WaEvent {
    /// Pairing completed after scanning a QR code. `jid` is the full
    /// user@server:device form.
    PairSuccess {
        jid: Jid,
        platform: String,
        business_name: String,
    },

    /// Client connected and authenticated. Also fired on reconnects of a
    /// previously paired device, which never re-emit `PairSuccess`.
    Connected,

    /// Unpaired from the phone; the device record is gone.
    LoggedOut,

    /// Incoming message (decrypted).
    Message(Box<InboundMessage>),
}

/// One decrypted inbound message: envelope info plus content parts.
#[derive(Clone, Debug)]
pub struct InboundMessage {
    pub info: MessageInfo,
    pub content: MessageContent,
}

/// Envelope of an inbound message.
#[derive(Clone, Debug)]
pub struct MessageInfo {
    pub id: MessageId,
    pub sender: Jid,
    pub chat: Jid,
    pub is_group: bool,
    pub push_name: String,
    pub timestamp: DateTime<Utc>,
}

/// Content parts of a message. Mirrors the wire shape: every part is
/// optional and parts that can address users carry a [`ContextInfo`].
#[derive(Clone, Debug, Default)]
pub struct MessageContent {
    /// Plain text body.
    pub conversation: Option<String>,
    pub extended_text: Option<ExtendedText>,
    pub image: Option<ImageContent>,
    pub video: Option<MediaPart>,
    pub document: Option<MediaPart>,
    pub audio: Option<MediaPart>,
    pub sticker: Option<MediaPart>,
    pub location: Option<LocationContent>,
    pub live_location: Option<LocationContent>,
}

impl MessageContent {
    /// All context-infos present on any part, in declaration order.
    pub fn context_infos(&self) -> impl Iterator<Item = &ContextInfo> {
        let parts = [
            self.extended_text.as_ref().and_then(|p| p.context.as_ref()),
            self.image.as_ref().and_then(|p| p.context.as_ref()),
            self.video.as_ref().and_then(|p| p.context.as_ref()),
            self.document.as_ref().and_then(|p| p.context.as_ref()),
            self.audio.as_ref().and_then(|p| p.context.as_ref()),
            self.sticker.as_ref().and_then(|p| p.context.as_ref()),
            self.location.as_ref().and_then(|p| p.context.as_ref()),
            self.live_location.as_ref().and_then(|p| p.context.as_ref()),
        ];
        parts.into_iter().flatten()
    }

    /// First quoted-message id found on any part.
    pub fn quoted_message_id(&self) -> Option<&str> {
        self.context_infos()
            .find_map(|c| c.quoted_message_id.as_deref())
    }
}

/// Extended (formatted / linked / reply) text part.
#[derive(Clone, Debug, Default)]
pub struct ExtendedText {
    pub text: String,
    pub context: Option<ContextInfo>,
}

/// Image part with downloadable media.
#[derive(Clone, Debug)]
pub struct ImageContent {
    pub mimetype: String,
    pub caption: String,
    pub media: MediaRef,
    pub context: Option<ContextInfo>,
}

/// Non-image media part. Only its context-info participates in the inbound
/// pipeline; media materialization handles images only.
#[derive(Clone, Debug, Default)]
pub struct MediaPart {
    pub mimetype: String,
    pub caption: Option<String>,
    pub media: Option<MediaRef>,
    pub context: Option<ContextInfo>,
}

/// Location-ish part; carries only addressing metadata for the gateway.
#[derive(Clone, Debug, Default)]
pub struct LocationContent {
    pub context: Option<ContextInfo>,
}

/// Addressing metadata attached to a message part.
#[derive(Clone, Debug, Default)]
pub struct ContextInfo {
    /// JID strings explicitly mentioned by this part.
    pub mentioned_jids: Vec<String>,
    pub quoted_message_id: Option<MessageId>,
}

/// Opaque handle to downloadable media, resolved by the client that
/// produced it.
#[derive(Clone, Debug, Default)]
pub struct MediaRef {
    pub direct_path: String,
    pub file_length: u64,
}

/// QR pairing channel items.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum QrEvent {
    /// A fresh code to render; codes rotate until scanned.
    Code(String),
    Success,
    Timeout,
}

/// Bytes of a downloaded media part.
pub type MediaBytes = Bytes;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_infos_walks_all_parts() {
        let content = MessageContent {
            extended_text: Some(ExtendedText {
                text: "hi".into(),
                context: Some(ContextInfo {
                    mentioned_jids: vec!["1@s.whatsapp.net".into()],
                    quoted_message_id: None,
                }),
            }),
            image: Some(ImageContent {
                mimetype: "image/jpeg".into(),
                caption: "look".into(),
                media: MediaRef::default(),
                context: Some(ContextInfo {
                    mentioned_jids: vec!["2@lid".into()],
                    quoted_message_id: Some("ABC".into()),
                }),
            }),
            ..Default::default()
        };
        let mentioned: Vec<_> = content
            .context_infos()
            .flat_map(|c| c.mentioned_jids.iter())
            .collect();
        assert_eq!(mentioned, ["1@s.whatsapp.net", "2@lid"]);
        assert_eq!(content.quoted_message_id(), Some("ABC"));
    }

    #[test]
    fn empty_content_has_no_context() {
        let content = MessageContent::default();
        assert_eq!(content.context_infos().count(), 0);
        assert!(content.quoted_message_id().is_none());
    }
}
