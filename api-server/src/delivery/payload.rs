//! Bodies sent to webhook endpoints and to the mail relay.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::addresses::{Mailbox, parse_optional_blob};
use crate::models::{Message, MessageDirection};

pub const MESSAGE_EVENT: &str = "message.received";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookPayload {
    pub event: &'static str,
    pub id: Uuid,
    pub message_id: String,
    pub direction: MessageDirection,
    pub subject: String,
    pub from: Vec<Mailbox>,
    pub to: Vec<Mailbox>,
    pub cc: Vec<Mailbox>,
    pub thread_id: Option<Uuid>,
    pub in_reply_to: Option<String>,
    pub text_body: Option<String>,
    pub html_body: Option<String>,
    pub sent_at: DateTime<Utc>,
    pub timestamp: DateTime<Utc>,
}

impl WebhookPayload {
    /// Unreadable address blobs become empty lists; the receiver still gets the message.
    pub fn from_message(message: &Message) -> Self {
        Self {
            event: MESSAGE_EVENT,
            id: message.id,
            message_id: message.message_id.clone(),
            direction: message.direction,
            subject: message.subject.clone(),
            from: parse_optional_blob(message.from_blob.as_deref()).value,
            to: parse_optional_blob(message.to_blob.as_deref()).value,
            cc: parse_optional_blob(message.cc_blob.as_deref()).value,
            thread_id: message.thread_id,
            in_reply_to: message.in_reply_to.clone(),
            text_body: message.text_body.clone(),
            html_body: message.html_body.clone(),
            sent_at: message.sent_at,
            timestamp: Utc::now(),
        }
    }
}

/// Request understood by the HTTP mail relay.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayRequest {
    pub from: String,
    pub reply_to: Option<String>,
    pub to: Vec<String>,
    pub subject: String,
    pub text: Option<String>,
    pub html: Option<String>,
    pub headers: RelayHeaders,
}

#[derive(Debug, Clone, Serialize)]
pub struct RelayHeaders {
    #[serde(rename = "In-Reply-To", skip_serializing_if = "Option::is_none")]
    pub in_reply_to: Option<String>,
    #[serde(rename = "References", skip_serializing_if = "Option::is_none")]
    pub references: Option<String>,
    #[serde(rename = "X-Original-Message-ID")]
    pub original_message_id: String,
}

impl RelayRequest {
    pub fn forward(message: &Message, relay_from: &str, recipients: Vec<String>) -> Self {
        let reply_to = parse_optional_blob(message.from_blob.as_deref())
            .value
            .into_iter()
            .next()
            .map(|mailbox| mailbox.display());

        let references = if message.references.is_empty() {
            None
        } else {
            Some(
                message
                    .references
                    .iter()
                    .map(|id| format!("<{id}>"))
                    .collect::<Vec<_>>()
                    .join(" "),
            )
        };

        Self {
            from: relay_from.to_string(),
            reply_to,
            to: recipients,
            subject: message.subject.clone(),
            text: message.text_body.clone(),
            html: message.html_body.clone(),
            headers: RelayHeaders {
                in_reply_to: message.in_reply_to.as_ref().map(|id| format!("<{id}>")),
                references,
                original_message_id: format!("<{}>", message.message_id),
            },
        }
    }
}
