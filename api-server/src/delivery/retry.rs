//! Manual retry of a recorded delivery attempt.
//!
//! ```text
//! pending ──dispatch ok──▶ success
//!    │                        │
//!    └──dispatch error──▶ failed
//!
//! any status ──retry──▶ pending (attempts + 1)
//! ```
//!
//! The attempt is persisted as `pending` before the dispatcher runs.

use chrono::Utc;
use log::{info, warn};
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

use super::dispatch::{DispatchError, DispatchSummary, Dispatcher};
use crate::models::DeliveryAttempt;
use crate::store::{MailStore, StoreError};

#[derive(Debug, Error)]
pub enum RetryError {
    #[error("Message not found")]
    MessageNotFound,
    #[error("Delivery record not found")]
    DeliveryNotFound,
    #[error("Endpoint not found")]
    EndpointNotFound,
    #[error("Endpoint is not active")]
    EndpointInactive,
    #[error("Failed to retry delivery: {source}")]
    DispatchFailed {
        delivery: Box<DeliveryAttempt>,
        source: DispatchError,
    },
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone)]
pub struct RetryOutcome {
    /// The retried attempt as left after dispatch.
    pub delivery: DeliveryAttempt,
    pub dispatch: DispatchSummary,
}

pub struct RetryCoordinator<'a> {
    store: &'a dyn MailStore,
    dispatcher: &'a dyn Dispatcher,
}

impl<'a> RetryCoordinator<'a> {
    pub fn new(store: &'a dyn MailStore, dispatcher: &'a dyn Dispatcher) -> Self {
        Self { store, dispatcher }
    }

    /// Retry `delivery_id` of a message owned by `user_id`.
    ///
    /// Ownership and endpoint checks happen before any write; an inactive endpoint
    /// leaves the attempt untouched.
    pub async fn retry(
        &self,
        user_id: i32,
        message_id: Uuid,
        delivery_id: Uuid,
    ) -> Result<RetryOutcome, RetryError> {
        let message = self
            .store
            .get_message(user_id, message_id)
            .await?
            .ok_or(RetryError::MessageNotFound)?;

        let delivery = self
            .store
            .get_delivery(delivery_id)
            .await?
            .filter(|delivery| delivery.message_id == message.id)
            .ok_or(RetryError::DeliveryNotFound)?;

        let endpoint = self
            .store
            .get_endpoint(delivery.endpoint_id)
            .await?
            .ok_or(RetryError::EndpointNotFound)?;
        if !endpoint.is_active {
            return Err(RetryError::EndpointInactive);
        }

        let pending = self
            .store
            .begin_retry(delivery.id, Utc::now())
            .await?
            .ok_or(RetryError::DeliveryNotFound)?;
        info!(
            "retrying delivery {} of message {} (attempt {}, was {})",
            pending.id,
            message.id,
            pending.attempts,
            delivery.status.as_str()
        );

        match self
            .dispatcher
            .dispatch(user_id, message.id, endpoint.id)
            .await
        {
            Ok(dispatch) => Ok(RetryOutcome {
                delivery: pending,
                dispatch,
            }),
            Err(source) => {
                let error = source.to_string();
                warn!("retry of delivery {} failed: {}", pending.id, error);
                let failed = self
                    .store
                    .mark_failed(pending.id, &error, Some(json!({ "error": error })))
                    .await?
                    .unwrap_or(pending);
                Err(RetryError::DispatchFailed {
                    delivery: Box::new(failed),
                    source,
                })
            }
        }
    }
}
