use rocket::http::Status;
use rocket::response::{self, Responder};
use rocket::serde::json::Json;
use rocket::{Catcher, Request, Response};
use rocket_okapi::okapi::openapi3::Responses;
use rocket_okapi::r#gen::OpenApiGenerator;
use rocket_okapi::response::OpenApiResponderInner;
use serde::Serialize;
use std::io::Cursor;

use crate::auth::AuthError;
use crate::auth::guards::AuthFailure;
use crate::delivery::{DispatchError, RetryError};
use crate::store::StoreError;
use crate::threading::participants::ExtractError;

#[derive(Debug)]
pub enum ApiError {
    Unauthorized(String),
    Forbidden(String),
    NotFound(String),
    BadRequest(String),
    InvalidState(String),
    DatabaseError(String),
    InternalError(String),
}

#[derive(Serialize)]
pub struct ErrorBody {
    pub success: bool,
    pub error: String,
}

impl ErrorBody {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: error.into(),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self)
            .unwrap_or_else(|_| r#"{"success":false,"error":"Failed to serialize error"}"#.into())
    }
}

impl ApiError {
    pub fn status(&self) -> Status {
        match self {
            ApiError::Unauthorized(_) => Status::Unauthorized,
            ApiError::Forbidden(_) => Status::Forbidden,
            ApiError::NotFound(_) => Status::NotFound,
            ApiError::BadRequest(_) => Status::BadRequest,
            ApiError::InvalidState(_) => Status::Conflict,
            ApiError::DatabaseError(_) | ApiError::InternalError(_) => {
                Status::InternalServerError
            }
        }
    }
}

impl<'r> Responder<'r, 'static> for ApiError {
    fn respond_to(self, _: &'r Request<'_>) -> response::Result<'static> {
        let status = self.status();
        let message = match self {
            ApiError::DatabaseError(e) => {
                log::error!("database error: {}", e);
                "Database error".to_string()
            }
            ApiError::InternalError(msg) => {
                log::error!("internal error: {}", msg);
                msg
            }
            ApiError::InvalidState(msg) => {
                log::debug!("invalid state: {}", msg);
                msg
            }
            ApiError::NotFound(msg) => {
                log::debug!("not found: {}", msg);
                msg
            }
            ApiError::BadRequest(msg)
            | ApiError::Unauthorized(msg)
            | ApiError::Forbidden(msg) => {
                log::debug!("rejected request ({}): {}", status.code, msg);
                msg
            }
        };

        let json = ErrorBody::new(message).to_json();

        Response::build()
            .status(status)
            .header(rocket::http::ContentType::JSON)
            .sized_body(json.len(), Cursor::new(json))
            .ok()
    }
}

impl OpenApiResponderInner for ApiError {
    fn responses(_generator: &mut OpenApiGenerator) -> rocket_okapi::Result<Responses> {
        Ok(Responses::default())
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Missing(what) => ApiError::NotFound(format!("{} not found", capitalize(what))),
            StoreError::Database(e) => ApiError::DatabaseError(e.to_string()),
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err.status().code {
            403 => ApiError::Forbidden(err.public_message()),
            401 => ApiError::Unauthorized(err.public_message()),
            _ => ApiError::InternalError(err.to_string()),
        }
    }
}

impl From<ExtractError> for ApiError {
    fn from(err: ExtractError) -> Self {
        match err {
            ExtractError::ThreadNotFound => ApiError::NotFound(err.to_string()),
            ExtractError::Store(e) => e.into(),
        }
    }
}

impl From<DispatchError> for ApiError {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::MessageNotFound => ApiError::NotFound(err.to_string()),
            DispatchError::NoEndpoint | DispatchError::EndpointInactive(_) => {
                ApiError::InvalidState(err.to_string())
            }
            DispatchError::Store(e) => e.into(),
            DispatchError::Delivery { .. } | DispatchError::Http(_) => {
                ApiError::InternalError(err.to_string())
            }
        }
    }
}

impl From<RetryError> for ApiError {
    fn from(err: RetryError) -> Self {
        match err {
            RetryError::MessageNotFound
            | RetryError::DeliveryNotFound
            | RetryError::EndpointNotFound => ApiError::NotFound(err.to_string()),
            RetryError::EndpointInactive => ApiError::InvalidState(err.to_string()),
            RetryError::DispatchFailed { .. } => ApiError::InternalError(err.to_string()),
            RetryError::Store(e) => e.into(),
        }
    }
}

fn catcher_response(status: Status, message: String) -> (Status, Json<ErrorBody>) {
    (status, Json(ErrorBody::new(message)))
}

fn auth_failure(request: &Request<'_>) -> Option<String> {
    request.local_cache(AuthFailure::default).0.clone()
}

#[catch(400)]
fn bad_request(_: &Request<'_>) -> (Status, Json<ErrorBody>) {
    catcher_response(Status::BadRequest, "Bad request".into())
}

#[catch(401)]
fn unauthorized(request: &Request<'_>) -> (Status, Json<ErrorBody>) {
    let message = auth_failure(request).unwrap_or_else(|| "Unauthorized".into());
    catcher_response(Status::Unauthorized, message)
}

#[catch(403)]
fn forbidden(request: &Request<'_>) -> (Status, Json<ErrorBody>) {
    let message = auth_failure(request).unwrap_or_else(|| "Forbidden".into());
    catcher_response(Status::Forbidden, message)
}

#[catch(404)]
fn not_found(_: &Request<'_>) -> (Status, Json<ErrorBody>) {
    catcher_response(Status::NotFound, "Not found".into())
}

#[catch(422)]
fn unprocessable(_: &Request<'_>) -> (Status, Json<ErrorBody>) {
    catcher_response(Status::UnprocessableEntity, "Malformed request".into())
}

#[catch(500)]
fn internal_error(request: &Request<'_>) -> (Status, Json<ErrorBody>) {
    let message = auth_failure(request).unwrap_or_else(|| "Internal server error".into());
    catcher_response(Status::InternalServerError, message)
}

#[catch(default)]
fn default_catcher(status: Status, _: &Request<'_>) -> (Status, Json<ErrorBody>) {
    let reason = status.reason().unwrap_or("Request failed");
    catcher_response(status, reason.into())
}

/// JSON catchers so no request ends in an HTML error page.
pub fn json_catchers() -> Vec<Catcher> {
    catchers![
        bad_request,
        unauthorized,
        forbidden,
        not_found,
        unprocessable,
        internal_error,
        default_catcher
    ]
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_errors_map_to_statuses() {
        assert_eq!(
            ApiError::from(RetryError::DeliveryNotFound).status(),
            Status::NotFound
        );
        assert_eq!(
            ApiError::from(RetryError::EndpointInactive).status(),
            Status::Conflict
        );
    }

    #[test]
    fn auth_errors_keep_their_status() {
        let disabled = ApiError::from(AuthError::AccountDisabled);
        assert!(matches!(disabled, ApiError::Forbidden(ref msg) if msg == "Account disabled"));
        let expired = ApiError::from(AuthError::TokenExpired);
        assert!(matches!(expired, ApiError::Unauthorized(ref msg) if msg == "Unauthorized"));
        let config = ApiError::from(AuthError::Config("no secret".into()));
        assert_eq!(config.status(), Status::InternalServerError);
    }

    #[test]
    fn missing_rows_become_not_found() {
        let err = ApiError::from(StoreError::Missing("thread"));
        assert!(matches!(err, ApiError::NotFound(ref msg) if msg == "Thread not found"));
    }

    #[test]
    fn error_body_is_unsuccessful() {
        assert_eq!(
            ErrorBody::new("nope").to_json(),
            r#"{"success":false,"error":"nope"}"#
        );
    }
}
