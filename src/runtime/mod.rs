//! Session Runtime: the event handler attached to every live client.
//!
//! One handler value exists per session; it captures only the session id
//! and a weak registry reference, never the client itself, so lookups
//! always go through the registry. Each inbound message is processed in its own
//! task so the client's event loop stays responsive, and every branch of
//! the pipeline is best-effort: a failed analytics write never stops the
//! reply, a failed reply never poisons the next message.

pub mod mention;

use crate::broadcast::{message_received_data, status_update_data, BroadcastKind};
use crate::registry::SessionRegistry;
use crate::repo::{AnalyticsRecord, MessageLogRecord, Session};
use crate::types::{ChatPresence, DeviceInfo, Direction, Jid, MessageType, SessionStatus};
use crate::wa::{InboundMessage, MessageContent, WaClient, WaEvent};
use crate::webhook::{GroupInfo, WebhookPayload};
use chrono::Utc;
use serde_json::json;
use std::sync::{Arc, Weak};
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Appended to the text when an image body cannot be materialized; the
/// payload then falls back to plain JSON.
const MEDIA_FALLBACK_SUFFIX: &str = "\n\n[image attachment unavailable: download failed]";

/// Attach the runtime's event handler to a freshly created client. Events
/// fan out into their own tasks; a dead registry (process shutdown) turns
/// them into no-ops.
pub(crate) async fn attach_handler(
    registry: &Arc<SessionRegistry>,
    session_id: Uuid,
    client: &Arc<dyn WaClient>,
) {
    let weak: Weak<SessionRegistry> = Arc::downgrade(registry);
    client
        .add_event_handler(Box::new(move |event| {
            let Some(registry) = weak.upgrade() else {
                return;
            };
            tokio::spawn(async move {
                handle_event(registry, session_id, event).await;
            });
        }))
        .await;
}

async fn handle_event(registry: Arc<SessionRegistry>, session_id: Uuid, event: WaEvent) {
    match event {
        WaEvent::PairSuccess {
            jid,
            platform,
            business_name,
        } => on_pair_success(&registry, session_id, jid, platform, business_name).await,
        WaEvent::Connected => on_connected(&registry, session_id).await,
        WaEvent::LoggedOut => on_logged_out(&registry, session_id).await,
        WaEvent::Message(message) => process_message(registry, session_id, *message).await,
    }
}

async fn on_pair_success(
    registry: &Arc<SessionRegistry>,
    session_id: Uuid,
    jid: Jid,
    platform: String,
    business_name: String,
) {
    info!(%session_id, %jid, %platform, %business_name, "session paired");
    let device_info = DeviceInfo {
        platform: Some(platform).filter(|p| !p.is_empty()),
        manufacturer: None,
        model: None,
    };
    let phone = jid.to_string();
    if let Err(err) = registry
        .repo()
        .update_session_status(
            session_id,
            SessionStatus::Connected,
            Some(&phone),
            Some(&device_info),
        )
        .await
    {
        warn!(%session_id, %err, "pair-success status write failed");
    }
    registry.broadcaster().publish(
        session_id,
        BroadcastKind::StatusUpdate,
        status_update_data(SessionStatus::Connected, Some(&phone), Some(&device_info)),
    );
}

/// Reconnects of previously paired devices never re-emit `PairSuccess`, so
/// the connected handler re-derives the JID: live store first, persisted
/// value as fallback.
async fn on_connected(registry: &Arc<SessionRegistry>, session_id: Uuid) {
    let live_jid = match registry.get(session_id).await {
        Some(client) => client.logged_in_jid().await,
        None => None,
    };
    let phone = match live_jid {
        Some(jid) => jid.to_string(),
        None => match registry.repo().get_session(session_id).await {
            Ok(Some(session)) => session.phone_number,
            _ => String::new(),
        },
    };
    info!(%session_id, phone = %phone, "session connected");
    if let Err(err) = registry
        .repo()
        .update_session_status(session_id, SessionStatus::Connected, Some(&phone), None)
        .await
    {
        warn!(%session_id, %err, "connected status write failed");
    }
    registry.broadcaster().publish(
        session_id,
        BroadcastKind::StatusUpdate,
        status_update_data(SessionStatus::Connected, Some(&phone), None),
    );
}

async fn on_logged_out(registry: &Arc<SessionRegistry>, session_id: Uuid) {
    info!(%session_id, "session logged out");
    if let Err(err) = registry
        .repo()
        .update_session_status(session_id, SessionStatus::Disconnected, Some(""), None)
        .await
    {
        warn!(%session_id, %err, "logged-out status write failed");
    }
    registry.broadcaster().publish(
        session_id,
        BroadcastKind::StatusUpdate,
        status_update_data(SessionStatus::Disconnected, None, None),
    );
    if let Some(client) = registry.remove(session_id).await {
        client.disconnect().await;
    }
}

/// The inbound hot path. Runs in its own task per message.
async fn process_message(registry: Arc<SessionRegistry>, session_id: Uuid, message: InboundMessage) {
    let session = match registry.repo().get_session(session_id).await {
        Ok(Some(session)) => session,
        Ok(None) => {
            warn!(%session_id, "message event for unknown session");
            return;
        }
        Err(err) => {
            warn!(%session_id, %err, "session lookup failed");
            return;
        }
    };

    let info = &message.info;
    let content = &message.content;

    let text = select_text(content);
    let has_image = content.image.is_some();
    // Status updates and protocol messages have neither text nor image.
    if text.is_empty() && !has_image {
        debug!(%session_id, message_id = %info.id, "dropping contentless message");
        return;
    }

    let mut payload = WebhookPayload {
        session_id,
        from: info.sender.user.clone(),
        push_name: info.push_name.clone(),
        message: text,
        timestamp: info.timestamp,
        is_group: info.is_group,
        group_info: info.is_group.then(|| GroupInfo {
            id: info.chat.user.clone(),
            name: String::new(),
        }),
        message_type: if has_image {
            MessageType::Image
        } else {
            MessageType::Text
        },
        media_data: None,
        media_mimetype: None,
        media_filename: None,
    };

    registry.broadcaster().publish(
        session_id,
        BroadcastKind::MessageReceived,
        message_received_data(json!({
            "id": info.id,
            "from": payload.from,
            "push_name": payload.push_name,
            "message": payload.message,
            "message_type": payload.message_type,
            "is_group": payload.is_group,
            "timestamp": info.timestamp.to_rfc3339(),
        })),
    );

    spawn_log_write(
        Arc::clone(&registry),
        MessageLogRecord {
            session_id,
            direction: Direction::Incoming,
            from_number: info.sender.user.clone(),
            to_number: String::new(),
            message_type: payload.message_type,
            content: payload.message.clone(),
            media_url: None,
            group_id: info.is_group.then(|| info.chat.user.clone()),
            group_name: None,
            is_group: info.is_group,
            quoted_message_id: content.quoted_message_id().map(str::to_string),
            timestamp: info.timestamp,
        },
    );

    let mut is_mention = false;
    if info.is_group {
        if !session.group_response_enabled {
            debug!(%session_id, "group responses disabled; dropping");
            return;
        }
        let Some(bot_jid) = bot_jid(&registry, session_id, &session).await else {
            debug!(%session_id, "no bot JID known; cannot match mentions");
            return;
        };
        is_mention = mention::is_mentioned(content, &payload.message, &[bot_jid]);
        if !is_mention {
            debug!(%session_id, message_id = %info.id, "group message without mention; dropping");
            return;
        }
    }

    let Some(client) = registry.get(session_id).await else {
        warn!(%session_id, "no live client for message pipeline");
        return;
    };

    if let Some(image) = &content.image {
        let deadline = registry.config().media_download_timeout;
        match tokio::time::timeout(deadline, client.download(&image.media)).await {
            Ok(Ok(bytes)) => {
                let unix = info.timestamp.timestamp();
                let extension = image_extension(&image.mimetype);
                payload.media_filename = Some(format!("image_{unix}.{extension}"));
                payload.media_mimetype = Some(image.mimetype.clone());
                payload.media_data = Some(bytes);
            }
            Ok(Err(err)) => {
                warn!(%session_id, %err, "image download failed; sending as text");
                payload.message.push_str(MEDIA_FALLBACK_SUFFIX);
            }
            Err(_) => {
                warn!(%session_id, "image download timed out; sending as text");
                payload.message.push_str(MEDIA_FALLBACK_SUFFIX);
            }
        }
    }

    if let Err(err) = client
        .send_chat_presence(&info.chat, ChatPresence::Composing)
        .await
    {
        debug!(%session_id, %err, "composing presence failed");
    }

    let start = Instant::now();
    let result = registry
        .dispatcher()
        .dispatch(&session.webhook_url, &payload)
        .await;
    let response_time_ms = start.elapsed().as_millis() as i64;

    spawn_analytics_write(
        Arc::clone(&registry),
        AnalyticsRecord {
            session_id,
            message_id: info.id.clone(),
            from_number: payload.from.clone(),
            message_type: payload.message_type,
            is_group: info.is_group,
            is_mention,
            webhook_sent: true,
            webhook_success: result.is_ok(),
            webhook_response_time_ms: response_time_ms,
            webhook_status_code: match &result {
                Ok(reply) => reply.status,
                Err(err) => err.last_status(),
            },
            error_message: result.as_ref().err().map(|err| err.to_string()),
        },
    );

    if let Err(err) = client
        .send_chat_presence(&info.chat, ChatPresence::Paused)
        .await
    {
        debug!(%session_id, %err, "paused presence failed");
    }

    // Final webhook failure ends the pipeline silently; analytics already
    // recorded the outcome.
    let reply = match result {
        Ok(reply) => reply.text,
        Err(_) => return,
    };
    if reply.is_empty() {
        return;
    }

    match client.send_text(&info.chat, &reply).await {
        Ok(response) => {
            debug!(%session_id, message_id = %response.id, "reply sent");
            let from_number = match client.logged_in_jid().await {
                Some(jid) => jid.user,
                None => Jid::normalize_stored(&session.phone_number)
                    .map(|j| j.user)
                    .unwrap_or_default(),
            };
            spawn_log_write(
                Arc::clone(&registry),
                MessageLogRecord {
                    session_id,
                    direction: Direction::Outgoing,
                    from_number,
                    to_number: info.chat.user.clone(),
                    message_type: MessageType::Text,
                    content: reply,
                    media_url: None,
                    group_id: info.is_group.then(|| info.chat.user.clone()),
                    group_name: None,
                    is_group: info.is_group,
                    quoted_message_id: None,
                    timestamp: Utc::now(),
                },
            );
        }
        Err(err) => {
            warn!(%session_id, %err, "reply send failed");
        }
    }
}

/// Text of an inbound message: plain body, then extended text, then image
/// caption; first non-empty wins.
fn select_text(content: &MessageContent) -> String {
    if let Some(body) = content.conversation.as_ref().filter(|s| !s.is_empty()) {
        return body.clone();
    }
    if let Some(extended) = content
        .extended_text
        .as_ref()
        .filter(|e| !e.text.is_empty())
    {
        return extended.text.clone();
    }
    if let Some(image) = content.image.as_ref().filter(|i| !i.caption.is_empty()) {
        return image.caption.clone();
    }
    String::new()
}

/// Extension-correct suffix for the materialized image filename.
fn image_extension(mimetype: &str) -> &'static str {
    match mimetype.split(';').next().unwrap_or("").trim() {
        "image/jpeg" | "image/jpg" => "jpg",
        "image/png" => "png",
        "image/webp" => "webp",
        "image/gif" => "gif",
        _ => "bin",
    }
}

/// The bot's own JID: live client store first, persisted value second.
async fn bot_jid(
    registry: &Arc<SessionRegistry>,
    session_id: Uuid,
    session: &Session,
) -> Option<Jid> {
    if let Some(client) = registry.get(session_id).await {
        if let Some(jid) = client.logged_in_jid().await {
            return Some(jid);
        }
    }
    Jid::normalize_stored(&session.phone_number)
}

fn spawn_log_write(registry: Arc<SessionRegistry>, record: MessageLogRecord) {
    tokio::spawn(async move {
        if let Err(err) = registry.repo().insert_message_log(record).await {
            warn!(%err, "message log write failed");
        }
    });
}

fn spawn_analytics_write(registry: Arc<SessionRegistry>, record: AnalyticsRecord) {
    tokio::spawn(async move {
        if let Err(err) = registry.repo().insert_analytics(record).await {
            warn!(%err, "analytics write failed");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wa::{ExtendedText, ImageContent, MediaRef};

    #[test]
    fn text_selection_prefers_body_then_extended_then_caption() {
        let mut content = MessageContent {
            conversation: Some("body".into()),
            extended_text: Some(ExtendedText {
                text: "extended".into(),
                context: None,
            }),
            image: Some(ImageContent {
                mimetype: "image/png".into(),
                caption: "caption".into(),
                media: MediaRef::default(),
                context: None,
            }),
            ..Default::default()
        };
        assert_eq!(select_text(&content), "body");
        content.conversation = None;
        assert_eq!(select_text(&content), "extended");
        content.extended_text = None;
        assert_eq!(select_text(&content), "caption");
        content.image = None;
        assert_eq!(select_text(&content), "");
    }

    #[test]
    fn empty_strings_do_not_count_as_text() {
        let content = MessageContent {
            conversation: Some(String::new()),
            extended_text: Some(ExtendedText {
                text: "fallback".into(),
                context: None,
            }),
            ..Default::default()
        };
        assert_eq!(select_text(&content), "fallback");
    }

    #[test]
    fn image_extensions_follow_mime() {
        assert_eq!(image_extension("image/jpeg"), "jpg");
        assert_eq!(image_extension("image/jpeg; q=0.9"), "jpg");
        assert_eq!(image_extension("image/png"), "png");
        assert_eq!(image_extension("image/webp"), "webp");
        assert_eq!(image_extension("application/pdf"), "bin");
    }
}
