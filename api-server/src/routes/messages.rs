//! Message ingest and lookup.

use chrono::{DateTime, Utc};
use rocket::State;
use rocket::http::Status;
use rocket::response::status;
use rocket::serde::json::Json;
use rocket_okapi::okapi::schemars::JsonSchema;
use rocket_okapi::openapi;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::models::{
    DeliveryAttempt, Message, MessageDirection, NewMessage, normalize_message_id,
    normalize_references,
};
use crate::routes::helpers::owned_message;
use crate::state::AppState;
use crate::threading::{ThreadAssembler, ThreadMatch};

/// A message handed to the service by a mail gateway or client.
#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct IngestMessageRequest {
    pub direction: MessageDirection,
    pub message_id: String,
    #[serde(default)]
    pub in_reply_to: Option<String>,
    /// Either individual ids or whole References header values.
    #[serde(default)]
    pub references: Vec<String>,
    #[serde(default)]
    pub subject: String,
    /// Address blobs: a mailbox string, a list of them, or `{addresses: [...]}` objects.
    #[serde(default)]
    pub from: Option<Value>,
    #[serde(default)]
    pub to: Option<Value>,
    #[serde(default)]
    pub cc: Option<Value>,
    #[serde(default)]
    pub text_body: Option<String>,
    #[serde(default)]
    pub html_body: Option<String>,
    #[serde(default)]
    pub sent_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub endpoint_id: Option<Uuid>,
}

#[derive(Debug, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct IngestMessageResponse {
    pub message: Message,
    pub thread_id: Uuid,
    pub thread_position: i32,
    pub matched: ThreadMatch,
    pub parse_errors: Vec<String>,
    /// Attempts recorded by the immediate dispatch, if one ran.
    pub deliveries: Vec<DeliveryAttempt>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dispatch_error: Option<String>,
}

/// Store the wire form of an address field as the text blob kept on the message.
fn blob_from_value(value: Option<Value>) -> Option<String> {
    match value? {
        Value::Null => None,
        Value::String(text) if text.trim().is_empty() => None,
        Value::String(text) => Some(text),
        other => Some(other.to_string()),
    }
}

impl IngestMessageRequest {
    fn into_new_message(self, user_id: i32) -> Result<NewMessage, ApiError> {
        let message_id = normalize_message_id(&self.message_id)
            .ok_or_else(|| ApiError::BadRequest("messageId is required".to_string()))?;

        Ok(NewMessage {
            user_id,
            direction: self.direction,
            message_id,
            in_reply_to: self.in_reply_to.as_deref().and_then(normalize_message_id),
            references: normalize_references(&self.references),
            subject: self.subject.trim().to_string(),
            from_blob: blob_from_value(self.from),
            to_blob: blob_from_value(self.to),
            cc_blob: blob_from_value(self.cc),
            text_body: self.text_body,
            html_body: self.html_body,
            sent_at: self.sent_at.unwrap_or_else(Utc::now),
            endpoint_id: self.endpoint_id,
        })
    }
}

/// Ingest a message, place it into a thread and dispatch it to its endpoint.
#[openapi(tag = "Messages")]
#[post("/messages", data = "<request>")]
pub async fn ingest_message(
    user: AuthUser,
    state: &State<AppState>,
    request: Json<IngestMessageRequest>,
) -> Result<status::Custom<Json<IngestMessageResponse>>, ApiError> {
    let new_message = request.into_inner().into_new_message(user.id)?;

    let endpoint = match new_message.endpoint_id {
        Some(endpoint_id) => Some(
            state
                .store
                .get_endpoint(endpoint_id)
                .await?
                .filter(|endpoint| endpoint.user_id == user.id)
                .ok_or_else(|| ApiError::BadRequest("Unknown endpoint".to_string()))?,
        ),
        None => None,
    };

    let assignment = ThreadAssembler::new(state.store.as_ref(), &state.threading)
        .assemble(new_message)
        .await?;
    let parse_errors: Vec<String> = assignment.issues.iter().map(ToString::to_string).collect();

    let dispatch_target = endpoint
        .filter(|endpoint| endpoint.is_active)
        .filter(|_| assignment.message.direction == MessageDirection::Inbound);

    let (deliveries, dispatch_error) = if let Some(target) = dispatch_target {
        match state
            .dispatcher
            .dispatch(user.id, assignment.message.id, target.id)
            .await
        {
            Ok(summary) => (summary.deliveries, None),
            Err(err) => {
                log::warn!(
                    "dispatch of message {} failed: {}",
                    assignment.message.id,
                    err
                );
                let recorded = state.store.list_deliveries(assignment.message.id).await?;
                (recorded, Some(err.to_string()))
            }
        }
    } else {
        (Vec::new(), None)
    };

    Ok(status::Custom(
        Status::Created,
        Json(IngestMessageResponse {
            thread_id: assignment.thread.id,
            thread_position: assignment.position(),
            matched: assignment.matched,
            message: assignment.message,
            parse_errors,
            deliveries,
            dispatch_error,
        }),
    ))
}

/// Retrieve a single message owned by the caller.
#[openapi(tag = "Messages")]
#[get("/messages/<message_id>")]
pub async fn get_message(
    user: AuthUser,
    state: &State<AppState>,
    message_id: Uuid,
) -> Result<Json<Message>, ApiError> {
    let message = owned_message(state, user.id, message_id).await?;
    Ok(Json(message))
}

/// Delivery attempts recorded for a message, newest first.
#[openapi(tag = "Messages")]
#[get("/messages/<message_id>/deliveries")]
pub async fn list_message_deliveries(
    user: AuthUser,
    state: &State<AppState>,
    message_id: Uuid,
) -> Result<Json<Vec<DeliveryAttempt>>, ApiError> {
    let message = owned_message(state, user.id, message_id).await?;
    let deliveries = state.store.list_deliveries(message.id).await?;
    Ok(Json(deliveries))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn structured_address_fields_become_json_blobs() {
        assert_eq!(
            blob_from_value(Some(json!("Alice <a@x.com>"))).as_deref(),
            Some("Alice <a@x.com>")
        );
        assert_eq!(
            blob_from_value(Some(json!(["a@x.com"]))).as_deref(),
            Some(r#"["a@x.com"]"#)
        );
        assert_eq!(blob_from_value(Some(json!(" "))), None);
        assert_eq!(blob_from_value(Some(Value::Null)), None);
    }

    #[test]
    fn message_ids_are_normalized_on_ingest() {
        let request: IngestMessageRequest = serde_json::from_value(json!({
            "direction": "inbound",
            "messageId": "<abc@x>",
            "inReplyTo": "<parent@x>",
            "references": ["<root@x> <parent@x>"],
            "subject": "  Re: hi ",
        }))
        .unwrap();

        let message = request.into_new_message(7).unwrap();
        assert_eq!(message.message_id, "abc@x");
        assert_eq!(message.in_reply_to.as_deref(), Some("parent@x"));
        assert_eq!(message.references, vec!["root@x", "parent@x"]);
        assert_eq!(message.subject, "Re: hi");
        assert_eq!(message.user_id, 7);
    }

    #[test]
    fn blank_message_id_is_rejected() {
        let request: IngestMessageRequest =
            serde_json::from_value(json!({ "direction": "outbound", "messageId": "<>" })).unwrap();
        assert!(matches!(
            request.into_new_message(1),
            Err(ApiError::BadRequest(_))
        ));
    }
}
