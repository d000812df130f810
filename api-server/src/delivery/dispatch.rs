//! Pushes a stored message to the endpoint it was routed to.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use log::{debug, warn};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Value, json};
use thiserror::Error;
use uuid::Uuid;

use super::config::DispatchConfig;
use super::payload::{RelayRequest, WebhookPayload};
use super::status::DeliveryEvent;
use crate::models::{
    DeliveryAttempt, DeliveryStatus, Endpoint, EndpointKind, Message, NewDeliveryAttempt,
};
use crate::store::{MailStore, StoreError};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Message not found")]
    MessageNotFound,
    #[error("Endpoint not found")]
    NoEndpoint,
    #[error("Endpoint {0} is not active")]
    EndpointInactive(Uuid),
    #[error("delivery to endpoint {endpoint_id} failed: {reason}")]
    Delivery { endpoint_id: Uuid, reason: String },
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Attempts recorded by one dispatch.
#[derive(Debug, Clone, Default)]
pub struct DispatchSummary {
    pub deliveries: Vec<DeliveryAttempt>,
}

/// Delivers a message to one endpoint and records what happened.
#[rocket::async_trait]
pub trait Dispatcher: Send + Sync {
    async fn dispatch(
        &self,
        user_id: i32,
        message_id: Uuid,
        endpoint_id: Uuid,
    ) -> Result<DispatchSummary, DispatchError>;
}

#[derive(Debug, Deserialize)]
struct WebhookConfig {
    url: String,
    #[serde(default)]
    headers: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct ForwardConfig {
    #[serde(default, rename = "forwardTo", alias = "email", alias = "address")]
    forward_to: Option<String>,
    #[serde(default, alias = "addresses")]
    emails: Vec<String>,
}

impl ForwardConfig {
    fn recipients(self) -> Vec<String> {
        self.forward_to
            .into_iter()
            .chain(self.emails)
            .map(|addr| addr.trim().to_string())
            .filter(|addr| !addr.is_empty())
            .collect()
    }
}

/// Status and (truncated) body of an HTTP exchange.
#[derive(Debug, Clone)]
struct ResponseMeta {
    status: u16,
    body: String,
}

impl ResponseMeta {
    fn to_json(&self) -> Value {
        json!({ "status": self.status, "body": self.body })
    }
}

#[derive(Debug)]
struct AttemptFailure {
    error: String,
    response: Option<ResponseMeta>,
}

impl AttemptFailure {
    fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            response: None,
        }
    }
}

pub struct HttpDispatcher {
    store: Arc<dyn MailStore>,
    http: Client,
    config: DispatchConfig,
}

impl HttpDispatcher {
    pub fn new(store: Arc<dyn MailStore>, config: DispatchConfig) -> Result<Self, DispatchError> {
        let http = Client::builder()
            .timeout(config.request_timeout)
            .user_agent(config.user_agent.clone())
            .build()?;

        Ok(Self {
            store,
            http,
            config,
        })
    }

    async fn deliver(
        &self,
        message: &Message,
        endpoint: &Endpoint,
    ) -> Result<ResponseMeta, AttemptFailure> {
        match endpoint.kind {
            EndpointKind::Webhook => self.post_webhook(message, endpoint).await,
            EndpointKind::Email | EndpointKind::EmailGroup => {
                self.forward_email(message, endpoint).await
            }
        }
    }

    async fn post_webhook(
        &self,
        message: &Message,
        endpoint: &Endpoint,
    ) -> Result<ResponseMeta, AttemptFailure> {
        let config: WebhookConfig = serde_json::from_value(endpoint.config.clone())
            .map_err(|err| AttemptFailure::new(format!("invalid webhook config: {err}")))?;

        let mut request = self
            .http
            .post(&config.url)
            .json(&WebhookPayload::from_message(message));
        for (name, value) in &config.headers {
            request = request.header(name.as_str(), value.as_str());
        }

        debug!("dispatch: POST webhook {} for message {}", config.url, message.id);
        let response = request
            .send()
            .await
            .map_err(|err| AttemptFailure::new(format!("webhook request failed: {err}")))?;

        self.read_response(response).await
    }

    async fn forward_email(
        &self,
        message: &Message,
        endpoint: &Endpoint,
    ) -> Result<ResponseMeta, AttemptFailure> {
        let relay = self
            .config
            .relay
            .as_ref()
            .ok_or_else(|| AttemptFailure::new("mail relay is not configured"))?;

        let config: ForwardConfig = serde_json::from_value(endpoint.config.clone())
            .map_err(|err| AttemptFailure::new(format!("invalid email config: {err}")))?;
        let recipients = config.recipients();
        if recipients.is_empty() {
            return Err(AttemptFailure::new("endpoint has no recipient addresses"));
        }

        let body = RelayRequest::forward(message, &relay.from, recipients);
        let mut request = self.http.post(format!("{}/send", relay.url)).json(&body);
        if let Some(key) = &relay.api_key {
            request = request.bearer_auth(key);
        }

        debug!(
            "dispatch: forwarding message {} to {} recipient(s)",
            message.id,
            body.to.len()
        );
        let response = request
            .send()
            .await
            .map_err(|err| AttemptFailure::new(format!("mail relay request failed: {err}")))?;

        self.read_response(response).await
    }

    async fn read_response(
        &self,
        response: reqwest::Response,
    ) -> Result<ResponseMeta, AttemptFailure> {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let meta = ResponseMeta {
            status: status.as_u16(),
            body: body.chars().take(self.config.response_body_limit).collect(),
        };

        if status.is_success() {
            Ok(meta)
        } else {
            Err(AttemptFailure {
                error: format!("endpoint responded with HTTP {}", status.as_u16()),
                response: Some(meta),
            })
        }
    }
}

#[rocket::async_trait]
impl Dispatcher for HttpDispatcher {
    async fn dispatch(
        &self,
        user_id: i32,
        message_id: Uuid,
        endpoint_id: Uuid,
    ) -> Result<DispatchSummary, DispatchError> {
        let message = self
            .store
            .get_message(user_id, message_id)
            .await?
            .ok_or(DispatchError::MessageNotFound)?;

        let endpoint = self
            .store
            .get_endpoint(endpoint_id)
            .await?
            .filter(|endpoint| endpoint.user_id == user_id)
            .ok_or(DispatchError::NoEndpoint)?;
        if !endpoint.is_active {
            return Err(DispatchError::EndpointInactive(endpoint.id));
        }

        let outcome = self.deliver(&message, &endpoint).await;
        let (event, response_data, error) = match outcome {
            Ok(meta) => (DeliveryEvent::DispatchSucceeded, Some(meta.to_json()), None),
            Err(failure) => {
                warn!(
                    "dispatch: delivery of message {} to endpoint {} failed: {}",
                    message.id, endpoint.id, failure.error
                );
                (
                    DeliveryEvent::DispatchFailed,
                    failure.response.as_ref().map(ResponseMeta::to_json),
                    Some(failure.error),
                )
            }
        };

        let recorded = self
            .store
            .insert_delivery(NewDeliveryAttempt {
                message_id: message.id,
                endpoint_id: endpoint.id,
                delivery_type: endpoint.kind.delivery_type(),
                status: DeliveryStatus::Pending.transition(event),
                attempts: 1,
                last_attempt_at: Some(Utc::now()),
                response_data,
                error: error.clone(),
            })
            .await?;

        match error {
            None => Ok(DispatchSummary {
                deliveries: vec![recorded],
            }),
            Some(reason) => Err(DispatchError::Delivery {
                endpoint_id: endpoint.id,
                reason,
            }),
        }
    }
}
