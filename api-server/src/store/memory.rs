//! In-process [`MailStore`] used by tests.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use uuid::Uuid;

use super::{MailStore, NewThread, StoreError, StoreResult};
use crate::addresses::Mailbox;
use crate::delivery::status::DeliveryEvent;
use crate::models::{
    Account, DeliveryAttempt, Endpoint, EndpointKind, Message, NewDeliveryAttempt,
    NewMessage, Thread,
};
use crate::threading::participants::ParticipantSet;

#[derive(Default)]
struct Tables {
    accounts: HashMap<i32, Account>,
    messages: Vec<Message>,
    threads: HashMap<Uuid, Thread>,
    endpoints: HashMap<Uuid, Endpoint>,
    deliveries: Vec<DeliveryAttempt>,
}

/// Store backed by plain collections behind a single lock.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_account(&self, id: i32, email: &str) -> Account {
        let account = Account {
            id,
            email: email.to_string(),
            display_name: None,
            disabled: false,
            token_version: 0,
        };
        self.tables.lock().accounts.insert(id, account.clone());
        account
    }

    pub fn disable_account(&self, id: i32) {
        if let Some(account) = self.tables.lock().accounts.get_mut(&id) {
            account.disabled = true;
        }
    }

    pub fn insert_endpoint(
        &self,
        user_id: i32,
        name: &str,
        kind: EndpointKind,
        config: Value,
        is_active: bool,
    ) -> Endpoint {
        let endpoint = Endpoint {
            id: Uuid::new_v4(),
            user_id,
            name: name.to_string(),
            kind,
            config,
            is_active,
        };
        self.tables
            .lock()
            .endpoints
            .insert(endpoint.id, endpoint.clone());
        endpoint
    }

    pub fn set_endpoint_active(&self, endpoint_id: Uuid, is_active: bool) {
        if let Some(endpoint) = self.tables.lock().endpoints.get_mut(&endpoint_id) {
            endpoint.is_active = is_active;
        }
    }

    pub fn thread_count(&self, user_id: i32) -> usize {
        self.tables
            .lock()
            .threads
            .values()
            .filter(|t| t.user_id == user_id)
            .count()
    }
}

#[rocket::async_trait]
impl MailStore for MemoryStore {
    async fn find_account(&self, user_id: i32) -> StoreResult<Option<Account>> {
        Ok(self.tables.lock().accounts.get(&user_id).cloned())
    }

    async fn get_message(&self, user_id: i32, id: Uuid) -> StoreResult<Option<Message>> {
        Ok(self
            .tables
            .lock()
            .messages
            .iter()
            .find(|m| m.id == id && m.user_id == user_id)
            .cloned())
    }

    async fn list_thread_messages(
        &self,
        user_id: i32,
        thread_id: Uuid,
    ) -> StoreResult<Vec<Message>> {
        let tables = self.tables.lock();
        let mut messages: Vec<Message> = tables
            .messages
            .iter()
            .filter(|m| m.user_id == user_id && m.thread_id == Some(thread_id))
            .cloned()
            .collect();
        messages.sort_by_key(|m| m.thread_position);
        Ok(messages)
    }

    async fn get_thread(&self, user_id: i32, thread_id: Uuid) -> StoreResult<Option<Thread>> {
        Ok(self
            .tables
            .lock()
            .threads
            .get(&thread_id)
            .filter(|t| t.user_id == user_id)
            .cloned())
    }

    async fn list_threads(&self, user_id: i32, limit: i64, offset: i64) -> StoreResult<Vec<Thread>> {
        let tables = self.tables.lock();
        let mut threads: Vec<Thread> = tables
            .threads
            .values()
            .filter(|t| t.user_id == user_id)
            .cloned()
            .collect();
        threads.sort_by(|a, b| b.last_message_at.cmp(&a.last_message_at));
        Ok(threads
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn find_thread_by_message_ids(
        &self,
        user_id: i32,
        message_ids: &[String],
    ) -> StoreResult<Option<Thread>> {
        let tables = self.tables.lock();

        let member = tables
            .messages
            .iter()
            .filter(|m| m.user_id == user_id && message_ids.contains(&m.message_id))
            .filter_map(|m| m.thread_id)
            .filter_map(|id| tables.threads.get(&id))
            .max_by_key(|t| t.last_message_at);
        if let Some(thread) = member {
            return Ok(Some(thread.clone()));
        }

        Ok(tables
            .threads
            .values()
            .filter(|t| t.user_id == user_id && message_ids.contains(&t.root_message_id))
            .max_by_key(|t| t.last_message_at)
            .cloned())
    }

    async fn find_threads_by_subject(
        &self,
        user_id: i32,
        normalized_subject: &str,
        since: DateTime<Utc>,
    ) -> StoreResult<Vec<Thread>> {
        let tables = self.tables.lock();
        let mut threads: Vec<Thread> = tables
            .threads
            .values()
            .filter(|t| {
                t.user_id == user_id
                    && t.normalized_subject == normalized_subject
                    && t.last_message_at >= since
            })
            .cloned()
            .collect();
        threads.sort_by(|a, b| b.last_message_at.cmp(&a.last_message_at));
        Ok(threads)
    }

    async fn create_thread(
        &self,
        message: NewMessage,
        thread: NewThread,
    ) -> StoreResult<(Thread, Message)> {
        let mut tables = self.tables.lock();
        let created = Thread {
            id: Uuid::new_v4(),
            user_id: message.user_id,
            root_message_id: thread.root_message_id,
            normalized_subject: thread.normalized_subject,
            participants: thread.participants,
            message_count: 1,
            last_message_at: message.sent_at,
            created_at: Utc::now(),
        };
        let stored = message.into_message(Uuid::new_v4(), created.id, 0);

        tables.threads.insert(created.id, created.clone());
        tables.messages.push(stored.clone());
        Ok((created, stored))
    }

    async fn append_to_thread(
        &self,
        thread_id: Uuid,
        message: NewMessage,
        participants: &[Mailbox],
    ) -> StoreResult<(Thread, Message)> {
        let mut tables = self.tables.lock();
        let thread = tables
            .threads
            .get_mut(&thread_id)
            .filter(|t| t.user_id == message.user_id)
            .ok_or(StoreError::Missing("thread"))?;

        let position = thread.message_count;
        thread.message_count += 1;
        thread.last_message_at = thread.last_message_at.max(message.sent_at);

        let mut merged = ParticipantSet::from_mailboxes(thread.participants.iter().cloned());
        if merged.extend(participants.iter().cloned()) {
            thread.participants = merged.mailboxes();
        }

        let updated = thread.clone();
        let stored = message.into_message(Uuid::new_v4(), thread_id, position);
        tables.messages.push(stored.clone());
        Ok((updated, stored))
    }

    async fn get_endpoint(&self, endpoint_id: Uuid) -> StoreResult<Option<Endpoint>> {
        Ok(self.tables.lock().endpoints.get(&endpoint_id).cloned())
    }

    async fn get_delivery(&self, delivery_id: Uuid) -> StoreResult<Option<DeliveryAttempt>> {
        Ok(self
            .tables
            .lock()
            .deliveries
            .iter()
            .find(|d| d.id == delivery_id)
            .cloned())
    }

    async fn list_deliveries(&self, message_id: Uuid) -> StoreResult<Vec<DeliveryAttempt>> {
        let tables = self.tables.lock();
        let mut deliveries: Vec<DeliveryAttempt> = tables
            .deliveries
            .iter()
            .filter(|d| d.message_id == message_id)
            .cloned()
            .collect();
        deliveries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(deliveries)
    }

    async fn insert_delivery(&self, attempt: NewDeliveryAttempt) -> StoreResult<DeliveryAttempt> {
        let now = Utc::now();
        let delivery = DeliveryAttempt {
            id: Uuid::new_v4(),
            message_id: attempt.message_id,
            endpoint_id: attempt.endpoint_id,
            delivery_type: attempt.delivery_type,
            status: attempt.status,
            attempts: attempt.attempts,
            last_attempt_at: attempt.last_attempt_at,
            response_data: attempt.response_data,
            error: attempt.error,
            created_at: now,
            updated_at: now,
        };
        self.tables.lock().deliveries.push(delivery.clone());
        Ok(delivery)
    }

    async fn begin_retry(
        &self,
        delivery_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<DeliveryAttempt>> {
        let mut tables = self.tables.lock();
        Ok(tables
            .deliveries
            .iter_mut()
            .find(|d| d.id == delivery_id)
            .map(|delivery| {
                delivery.status = delivery.status.transition(DeliveryEvent::RetryStarted);
                delivery.attempts += 1;
                delivery.last_attempt_at = Some(now);
                delivery.error = None;
                delivery.updated_at = now;
                delivery.clone()
            }))
    }

    async fn mark_failed(
        &self,
        delivery_id: Uuid,
        error: &str,
        response_data: Option<Value>,
    ) -> StoreResult<Option<DeliveryAttempt>> {
        let mut tables = self.tables.lock();
        Ok(tables
            .deliveries
            .iter_mut()
            .find(|d| d.id == delivery_id)
            .map(|delivery| {
                delivery.status = delivery.status.transition(DeliveryEvent::DispatchFailed);
                delivery.error = Some(error.to_string());
                if response_data.is_some() {
                    delivery.response_data = response_data;
                }
                delivery.updated_at = Utc::now();
                delivery.clone()
            }))
    }
}
