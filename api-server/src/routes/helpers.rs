//! Shared helper functions for Rocket route handlers.

use rocket::State;
use uuid::Uuid;

use crate::error::ApiError;
use crate::models::Message;
use crate::state::AppState;

/// Parse a client-supplied identifier, rejecting blanks and malformed values.
pub fn parse_uuid(raw: Option<&str>, field: &str) -> Result<Uuid, ApiError> {
    let raw = raw
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| ApiError::BadRequest(format!("{field} is required")))?;
    Uuid::parse_str(raw).map_err(|_| ApiError::BadRequest(format!("{field} is not a valid id")))
}

/// Load a message owned by `user_id`.
///
/// Returns [`ApiError::NotFound`] when the message does not exist for this account.
pub async fn owned_message(
    state: &State<AppState>,
    user_id: i32,
    message_id: Uuid,
) -> Result<Message, ApiError> {
    state
        .store
        .get_message(user_id, message_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Message not found".to_string()))
}
