use chrono::{DateTime, Utc};
use rocket_db_pools::sqlx::{self, FromRow};
use rocket_okapi::okapi::schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::addresses::Mailbox;

// ===== Enumerations (mirrored as Postgres enum types) =====

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "message_direction", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum MessageDirection {
    Inbound,
    Outbound,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "endpoint_kind", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum EndpointKind {
    Webhook,
    Email,
    EmailGroup,
}

impl EndpointKind {
    /// Delivery channel used when pushing a message to this kind of endpoint.
    pub fn delivery_type(self) -> DeliveryType {
        match self {
            EndpointKind::Webhook => DeliveryType::Webhook,
            EndpointKind::Email | EndpointKind::EmailGroup => DeliveryType::EmailForward,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "delivery_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DeliveryType {
    Webhook,
    EmailForward,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "delivery_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    Success,
    Failed,
}

// ===== Accounts =====

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Account {
    pub id: i32,
    pub email: String,
    pub display_name: Option<String>,
    pub disabled: bool,
    pub token_version: i32,
}

// ===== Messages =====

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: Uuid,
    pub user_id: i32,
    pub direction: MessageDirection,
    pub message_id: String,
    pub in_reply_to: Option<String>,
    pub references: Vec<String>,
    pub subject: String,
    pub from_blob: Option<String>,
    pub to_blob: Option<String>,
    pub cc_blob: Option<String>,
    pub text_body: Option<String>,
    pub html_body: Option<String>,
    pub sent_at: DateTime<Utc>,
    pub thread_id: Option<Uuid>,
    pub thread_position: Option<i32>,
    pub endpoint_id: Option<Uuid>,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

/// Message as accepted by the store before it is linked to a thread.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub user_id: i32,
    pub direction: MessageDirection,
    pub message_id: String,
    pub in_reply_to: Option<String>,
    pub references: Vec<String>,
    pub subject: String,
    pub from_blob: Option<String>,
    pub to_blob: Option<String>,
    pub cc_blob: Option<String>,
    pub text_body: Option<String>,
    pub html_body: Option<String>,
    pub sent_at: DateTime<Utc>,
    pub endpoint_id: Option<Uuid>,
}

impl NewMessage {
    /// Materialize the row that gets inserted once thread placement is known.
    pub fn into_message(self, id: Uuid, thread_id: Uuid, position: i32) -> Message {
        Message {
            id,
            user_id: self.user_id,
            direction: self.direction,
            message_id: self.message_id,
            in_reply_to: self.in_reply_to,
            references: self.references,
            subject: self.subject,
            from_blob: self.from_blob,
            to_blob: self.to_blob,
            cc_blob: self.cc_blob,
            text_body: self.text_body,
            html_body: self.html_body,
            sent_at: self.sent_at,
            thread_id: Some(thread_id),
            thread_position: Some(position),
            endpoint_id: self.endpoint_id,
            is_read: false,
            created_at: Utc::now(),
        }
    }
}

/// Strip angle brackets and surrounding whitespace from a Message-ID.
pub fn normalize_message_id(raw: &str) -> Option<String> {
    let cleaned = raw.trim().trim_matches(&['<', '>'][..]).trim();
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned.replace('\0', ""))
    }
}

/// Split a References header (or a list of them) into individual normalized ids.
pub fn normalize_references<I, S>(values: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut ids = Vec::new();
    for value in values {
        for token in value.as_ref().split_whitespace() {
            if let Some(id) = normalize_message_id(token) {
                if !ids.contains(&id) {
                    ids.push(id);
                }
            }
        }
    }
    ids
}

// ===== Threads =====

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Thread {
    pub id: Uuid,
    pub user_id: i32,
    pub root_message_id: String,
    pub normalized_subject: String,
    pub participants: Vec<Mailbox>,
    pub message_count: i32,
    pub last_message_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

// ===== Endpoints & deliveries =====

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Endpoint {
    pub id: Uuid,
    pub user_id: i32,
    pub name: String,
    pub kind: EndpointKind,
    pub config: Value,
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryAttempt {
    pub id: Uuid,
    pub message_id: Uuid,
    pub endpoint_id: Uuid,
    pub delivery_type: DeliveryType,
    pub status: DeliveryStatus,
    pub attempts: i32,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub response_data: Option<Value>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewDeliveryAttempt {
    pub message_id: Uuid,
    pub endpoint_id: Uuid,
    pub delivery_type: DeliveryType,
    pub status: DeliveryStatus,
    pub attempts: i32,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub response_data: Option<Value>,
    pub error: Option<String>,
}
