//! Thread listing and detail endpoints.

use rocket::State;
use rocket::serde::json::Json;
use rocket_okapi::okapi::schemars::JsonSchema;
use rocket_okapi::openapi;
use serde::Serialize;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::models::Thread;
use crate::routes::params::{Page, PaginationParams};
use crate::state::AppState;
use crate::threading::{
    ExtractError, ThreadedMessage, collect_participants, order_thread, thread_participants,
};

#[derive(Debug, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ThreadDetail {
    pub thread: Thread,
    pub participants: Vec<String>,
    pub parse_errors: Vec<String>,
    pub messages: Vec<ThreadedMessage>,
}

#[derive(Debug, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantsResponse {
    pub participants: Vec<String>,
    pub parse_errors: Vec<String>,
}

/// List the caller's threads, most recently active first.
#[openapi(tag = "Threads")]
#[get("/threads?<params..>")]
pub async fn list_threads(
    user: AuthUser,
    state: &State<AppState>,
    params: Option<PaginationParams>,
) -> Result<Json<Page<Thread>>, ApiError> {
    let params = params.unwrap_or_default();
    let threads = state
        .store
        .list_threads(user.id, params.size() + 1, params.offset())
        .await?;

    Ok(Json(Page::from_overfetch(threads, &params)))
}

/// Thread metadata, participants and messages in conversation order.
#[openapi(tag = "Threads")]
#[get("/threads/<thread_id>")]
pub async fn get_thread(
    user: AuthUser,
    state: &State<AppState>,
    thread_id: Uuid,
) -> Result<Json<ThreadDetail>, ApiError> {
    let thread = state
        .store
        .get_thread(user.id, thread_id)
        .await?
        .ok_or(ExtractError::ThreadNotFound)?;

    let messages = state.store.list_thread_messages(user.id, thread.id).await?;
    let participants = collect_participants(&messages);
    let parse_errors = participants.issue_messages();

    Ok(Json(ThreadDetail {
        thread,
        participants: participants.value,
        parse_errors,
        messages: order_thread(messages),
    }))
}

/// Unique participants of a thread as `Name <email>` or bare addresses.
#[openapi(tag = "Threads")]
#[get("/threads/<thread_id>/participants")]
pub async fn get_thread_participants(
    user: AuthUser,
    state: &State<AppState>,
    thread_id: Uuid,
) -> Result<Json<ParticipantsResponse>, ApiError> {
    let participants = thread_participants(state.store.as_ref(), user.id, thread_id).await?;
    let parse_errors = participants.issue_messages();

    Ok(Json(ParticipantsResponse {
        participants: participants.value,
        parse_errors,
    }))
}
