//! Manual retry of recorded delivery attempts.

use rocket::State;
use rocket::http::Status;
use rocket::response::status;
use rocket::serde::json::Json;
use rocket_okapi::okapi::schemars::JsonSchema;
use rocket_okapi::openapi;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::delivery::{RetryCoordinator, RetryError};
use crate::error::ApiError;
use crate::models::DeliveryAttempt;
use crate::routes::helpers::parse_uuid;
use crate::state::AppState;

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RetryDeliveryRequest {
    #[serde(default)]
    pub delivery_id: Option<String>,
}

#[derive(Debug, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RetryDeliveryResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivery_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivery: Option<DeliveryAttempt>,
}

/// Retry one delivery attempt of a message.
///
/// Lookup and endpoint failures are reported as `{success: false, error}` with
/// 404 or 409. A failed dispatch answers 500 with the delivery id and the error.
#[openapi(tag = "Deliveries")]
#[post("/messages/<message_id>/retry-delivery", data = "<request>")]
pub async fn retry_delivery(
    user: AuthUser,
    state: &State<AppState>,
    message_id: Uuid,
    request: Option<Json<RetryDeliveryRequest>>,
) -> Result<status::Custom<Json<RetryDeliveryResponse>>, ApiError> {
    let raw_id = request.and_then(|body| body.into_inner().delivery_id);
    let delivery_id = parse_uuid(raw_id.as_deref(), "deliveryId")?;

    let coordinator = RetryCoordinator::new(state.store.as_ref(), state.dispatcher.as_ref());
    match coordinator.retry(user.id, message_id, delivery_id).await {
        Ok(outcome) => Ok(status::Custom(
            Status::Ok,
            Json(RetryDeliveryResponse {
                success: true,
                message: "Delivery retried successfully".to_string(),
                delivery_id: Some(outcome.delivery.id),
                error: None,
                delivery: Some(outcome.delivery),
            }),
        )),
        Err(RetryError::DispatchFailed { delivery, source }) => Ok(status::Custom(
            Status::InternalServerError,
            Json(RetryDeliveryResponse {
                success: false,
                message: "Failed to retry delivery".to_string(),
                delivery_id: Some(delivery.id),
                error: Some(source.to_string()),
                delivery: Some(*delivery),
            }),
        )),
        Err(err) => Err(err.into()),
    }
}
