//! Webhook Dispatcher: turns an inbound-message payload into an HTTP call
//! and a reply string.
//!
//! Payloads with media go out as `multipart/form-data` with a `file` part;
//! everything else is JSON. Delivery retries with linear backoff and the
//! body is rebuilt per attempt so retries never see a drained reader.

mod reply;

pub use reply::extract_reply;

use crate::config::WebhookConfig;
use crate::error::DispatchError;
use crate::types::MessageType;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use reqwest::multipart::{Form, Part};
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

/// Group descriptor forwarded to webhooks for group messages.
#[derive(Clone, Debug, Serialize)]
pub struct GroupInfo {
    pub id: String,
    pub name: String,
}

/// Everything the webhook learns about one inbound message. Consumed once
/// per message by [`WebhookDispatcher::dispatch`].
#[derive(Clone, Debug)]
pub struct WebhookPayload {
    pub session_id: Uuid,
    /// Bare user of the sender JID.
    pub from: String,
    pub push_name: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub is_group: bool,
    pub group_info: Option<GroupInfo>,
    pub message_type: MessageType,
    pub media_data: Option<Bytes>,
    pub media_mimetype: Option<String>,
    pub media_filename: Option<String>,
}

impl WebhookPayload {
    pub fn has_media(&self) -> bool {
        self.media_data.as_ref().is_some_and(|d| !d.is_empty())
    }
}

/// Successful dispatch: extracted reply text plus the HTTP status observed.
/// `status` is `None` only for the empty-URL short circuit.
#[derive(Clone, Debug)]
pub struct DispatchReply {
    pub text: String,
    pub status: Option<u16>,
}

/// Wire shape of the JSON body (and the logical fields of the multipart
/// form). `to` is always empty.
#[derive(Serialize)]
struct WebhookBody<'a> {
    session_id: String,
    from: &'a str,
    to: &'a str,
    message: &'a str,
    timestamp: String,
    is_group: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    group_info: Option<&'a GroupInfo>,
    push_name: &'a str,
    message_type: MessageType,
}

impl<'a> WebhookBody<'a> {
    fn from_payload(payload: &'a WebhookPayload) -> Self {
        Self {
            session_id: payload.session_id.to_string(),
            from: &payload.from,
            to: "",
            message: &payload.message,
            timestamp: payload.timestamp.to_rfc3339(),
            is_group: payload.is_group,
            group_info: payload.group_info.as_ref(),
            push_name: &payload.push_name,
            message_type: payload.message_type,
        }
    }
}

pub struct WebhookDispatcher {
    http: reqwest::Client,
    config: WebhookConfig,
}

impl WebhookDispatcher {
    pub fn new(config: WebhookConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }

    /// POST the payload to `url` and extract the reply text. An empty URL
    /// returns immediately with no reply and no attempt made.
    pub async fn dispatch(
        &self,
        url: &str,
        payload: &WebhookPayload,
    ) -> std::result::Result<DispatchReply, DispatchError> {
        if url.is_empty() {
            return Ok(DispatchReply {
                text: String::new(),
                status: None,
            });
        }
        let timeout = if payload.has_media() {
            self.config.media_timeout
        } else {
            self.config.text_timeout
        };

        let mut last_status = None;
        let mut last_error = String::new();
        for attempt in 0..self.config.max_attempts {
            if attempt > 0 {
                tokio::time::sleep(Duration::from_secs(attempt as u64)).await;
            }
            match self.build_request(url, payload, timeout).send().await {
                Ok(response) => {
                    let status = response.status();
                    last_status = Some(status.as_u16());
                    if status.is_success() {
                        let body = response.text().await.unwrap_or_default();
                        debug!(%url, status = status.as_u16(), attempt, "webhook delivered");
                        return Ok(DispatchReply {
                            text: extract_reply(&body),
                            status: Some(status.as_u16()),
                        });
                    }
                    last_error = format!("webhook returned status {}", status.as_u16());
                    warn!(%url, status = status.as_u16(), attempt, "webhook attempt failed");
                }
                Err(err) => {
                    last_error = format!("transport: {err}");
                    warn!(%url, %err, attempt, "webhook attempt failed");
                }
            }
        }
        Err(DispatchError::RetriesExhausted {
            attempts: self.config.max_attempts,
            last_status,
            last_error,
        })
    }

    /// A fresh request for one attempt. Multipart forms cannot be reused
    /// once sent, so the whole body is rebuilt here.
    fn build_request(
        &self,
        url: &str,
        payload: &WebhookPayload,
        timeout: Duration,
    ) -> reqwest::RequestBuilder {
        let builder = self.http.post(url).timeout(timeout);
        let Some(media) = payload.media_data.as_ref().filter(|d| !d.is_empty()) else {
            return builder.json(&WebhookBody::from_payload(payload));
        };

        let mut form = Form::new()
            .text("session_id", payload.session_id.to_string())
            .text("from", payload.from.clone())
            .text("to", String::new())
            .text("message", payload.message.clone())
            .text("timestamp", payload.timestamp.to_rfc3339())
            .text("is_group", payload.is_group.to_string())
            .text("push_name", payload.push_name.clone())
            .text("message_type", payload.message_type.as_str());
        if let Some(group) = &payload.group_info {
            form = form.text(
                "group_info",
                serde_json::to_string(group).unwrap_or_default(),
            );
        }
        let filename = payload
            .media_filename
            .clone()
            .unwrap_or_else(|| "file".to_string());
        let part = Part::bytes(media.to_vec()).file_name(filename.clone());
        let part = match payload.media_mimetype.as_deref() {
            Some(mime) => match part.mime_str(mime) {
                Ok(part) => part,
                Err(_) => Part::bytes(media.to_vec()).file_name(filename),
            },
            None => part,
        };
        builder.multipart(form.part("file", part))
    }
}
