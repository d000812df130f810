//! Persistence seam.
//!
//! Request handlers and the threading/delivery components never touch a global
//! connection. They receive an `Arc<dyn MailStore>` through Rocket state, which is
//! a [`PgStore`] in production and a [`MemoryStore`] in tests.

use chrono::{DateTime, Utc};
use rocket_db_pools::sqlx;
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::addresses::Mailbox;
use crate::models::{
    Account, DeliveryAttempt, Endpoint, Message, NewDeliveryAttempt, NewMessage, Thread,
};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("{0} not found")]
    Missing(&'static str),
}

/// Seed data for a thread created around its root message.
#[derive(Debug, Clone)]
pub struct NewThread {
    pub root_message_id: String,
    pub normalized_subject: String,
    pub participants: Vec<Mailbox>,
}

#[rocket::async_trait]
pub trait MailStore: Send + Sync {
    // ----- accounts -----
    async fn find_account(&self, user_id: i32) -> StoreResult<Option<Account>>;

    // ----- messages -----
    async fn get_message(&self, user_id: i32, id: Uuid) -> StoreResult<Option<Message>>;

    /// Messages of a thread ordered by their position.
    async fn list_thread_messages(&self, user_id: i32, thread_id: Uuid)
    -> StoreResult<Vec<Message>>;

    // ----- threads -----
    async fn get_thread(&self, user_id: i32, thread_id: Uuid) -> StoreResult<Option<Thread>>;

    /// Threads ordered by most recent activity.
    async fn list_threads(&self, user_id: i32, limit: i64, offset: i64)
    -> StoreResult<Vec<Thread>>;

    /// Thread containing a message with one of `message_ids`, falling back to a
    /// thread rooted at one of them.
    async fn find_thread_by_message_ids(
        &self,
        user_id: i32,
        message_ids: &[String],
    ) -> StoreResult<Option<Thread>>;

    /// Threads with this normalized subject active since `since`, newest first.
    async fn find_threads_by_subject(
        &self,
        user_id: i32,
        normalized_subject: &str,
        since: DateTime<Utc>,
    ) -> StoreResult<Vec<Thread>>;

    /// Atomically create a thread and insert `message` as its root at position 0.
    async fn create_thread(
        &self,
        message: NewMessage,
        thread: NewThread,
    ) -> StoreResult<(Thread, Message)>;

    /// Atomically append `message` to a thread: the message takes the current count
    /// as its position, the count grows by one, last activity and participants are
    /// merged.
    async fn append_to_thread(
        &self,
        thread_id: Uuid,
        message: NewMessage,
        participants: &[Mailbox],
    ) -> StoreResult<(Thread, Message)>;

    // ----- endpoints -----
    async fn get_endpoint(&self, endpoint_id: Uuid) -> StoreResult<Option<Endpoint>>;

    // ----- delivery attempts -----
    async fn get_delivery(&self, delivery_id: Uuid) -> StoreResult<Option<DeliveryAttempt>>;

    /// Attempts for a message, newest first.
    async fn list_deliveries(&self, message_id: Uuid) -> StoreResult<Vec<DeliveryAttempt>>;

    async fn insert_delivery(&self, attempt: NewDeliveryAttempt) -> StoreResult<DeliveryAttempt>;

    /// Mark an attempt `pending`, bump its counter and stamp the attempt time.
    async fn begin_retry(
        &self,
        delivery_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<DeliveryAttempt>>;

    /// Mark an attempt `failed`, keeping the error text and response metadata.
    async fn mark_failed(
        &self,
        delivery_id: Uuid,
        error: &str,
        response_data: Option<Value>,
    ) -> StoreResult<Option<DeliveryAttempt>>;
}
