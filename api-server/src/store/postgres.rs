//! PostgreSQL implementation of [`MailStore`].

use chrono::{DateTime, Utc};
use rocket_db_pools::sqlx::{self, FromRow, PgPool, Postgres, Transaction, types::Json};
use serde_json::Value;
use uuid::Uuid;

use super::{MailStore, NewThread, StoreError, StoreResult};
use crate::addresses::Mailbox;
use crate::models::{
    Account, DeliveryAttempt, Endpoint, Message, NewDeliveryAttempt, NewMessage, Thread,
};
use crate::threading::participants::ParticipantSet;

const MESSAGE_COLUMNS: &str = r#"id, user_id, direction, message_id, in_reply_to, "references",
    subject, from_blob, to_blob, cc_blob, text_body, html_body, sent_at, thread_id,
    thread_position, endpoint_id, is_read, created_at"#;

const THREAD_COLUMNS: &str = "id, user_id, root_message_id, normalized_subject, participants, \
    message_count, last_message_at, created_at";

const DELIVERY_COLUMNS: &str = "id, message_id, endpoint_id, delivery_type, status, attempts, \
    last_attempt_at, response_data, error, created_at, updated_at";

pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// Apply pending schema migrations.
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    MIGRATOR.run(pool).await
}

#[derive(FromRow)]
struct ThreadRow {
    id: Uuid,
    user_id: i32,
    root_message_id: String,
    normalized_subject: String,
    participants: Json<Vec<Mailbox>>,
    message_count: i32,
    last_message_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
}

impl From<ThreadRow> for Thread {
    fn from(row: ThreadRow) -> Self {
        Thread {
            id: row.id,
            user_id: row.user_id,
            root_message_id: row.root_message_id,
            normalized_subject: row.normalized_subject,
            participants: row.participants.0,
            message_count: row.message_count,
            last_message_at: row.last_message_at,
            created_at: row.created_at,
        }
    }
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn insert_message(
        tx: &mut Transaction<'_, Postgres>,
        message: NewMessage,
        thread_id: Uuid,
        position: i32,
    ) -> Result<Message, sqlx::Error> {
        let query = format!(
            r#"INSERT INTO messages (id, user_id, direction, message_id, in_reply_to, "references",
                   subject, from_blob, to_blob, cc_blob, text_body, html_body, sent_at, thread_id,
                   thread_position, endpoint_id)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
               RETURNING {MESSAGE_COLUMNS}"#
        );

        sqlx::query_as::<_, Message>(&query)
            .bind(Uuid::new_v4())
            .bind(message.user_id)
            .bind(message.direction)
            .bind(&message.message_id)
            .bind(&message.in_reply_to)
            .bind(&message.references)
            .bind(&message.subject)
            .bind(&message.from_blob)
            .bind(&message.to_blob)
            .bind(&message.cc_blob)
            .bind(&message.text_body)
            .bind(&message.html_body)
            .bind(message.sent_at)
            .bind(thread_id)
            .bind(position)
            .bind(message.endpoint_id)
            .fetch_one(&mut **tx)
            .await
    }
}

#[rocket::async_trait]
impl MailStore for PgStore {
    async fn find_account(&self, user_id: i32) -> StoreResult<Option<Account>> {
        let account = sqlx::query_as::<_, Account>(
            "SELECT id, email, display_name, disabled, token_version FROM users WHERE id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(account)
    }

    async fn get_message(&self, user_id: i32, id: Uuid) -> StoreResult<Option<Message>> {
        let query = format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = $1 AND user_id = $2");
        let message = sqlx::query_as::<_, Message>(&query)
            .bind(id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(message)
    }

    async fn list_thread_messages(
        &self,
        user_id: i32,
        thread_id: Uuid,
    ) -> StoreResult<Vec<Message>> {
        let query = format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages
             WHERE user_id = $1 AND thread_id = $2
             ORDER BY thread_position ASC, sent_at ASC"
        );
        let messages = sqlx::query_as::<_, Message>(&query)
            .bind(user_id)
            .bind(thread_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(messages)
    }

    async fn get_thread(&self, user_id: i32, thread_id: Uuid) -> StoreResult<Option<Thread>> {
        let query =
            format!("SELECT {THREAD_COLUMNS} FROM email_threads WHERE id = $1 AND user_id = $2");
        let row = sqlx::query_as::<_, ThreadRow>(&query)
            .bind(thread_id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(Thread::from))
    }

    async fn list_threads(&self, user_id: i32, limit: i64, offset: i64) -> StoreResult<Vec<Thread>> {
        let query = format!(
            "SELECT {THREAD_COLUMNS} FROM email_threads
             WHERE user_id = $1
             ORDER BY last_message_at DESC
             LIMIT $2 OFFSET $3"
        );
        let rows = sqlx::query_as::<_, ThreadRow>(&query)
            .bind(user_id)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(Thread::from).collect())
    }

    async fn find_thread_by_message_ids(
        &self,
        user_id: i32,
        message_ids: &[String],
    ) -> StoreResult<Option<Thread>> {
        let member_query = r#"
            SELECT t.id, t.user_id, t.root_message_id, t.normalized_subject, t.participants,
                   t.message_count, t.last_message_at, t.created_at
            FROM email_threads t
            JOIN messages m ON m.thread_id = t.id
            WHERE m.user_id = $1 AND t.user_id = $1 AND m.message_id = ANY($2)
            ORDER BY t.last_message_at DESC
            LIMIT 1
        "#;
        let member = sqlx::query_as::<_, ThreadRow>(member_query)
            .bind(user_id)
            .bind(message_ids)
            .fetch_optional(&self.pool)
            .await?;
        if let Some(row) = member {
            return Ok(Some(row.into()));
        }

        let root_query = format!(
            "SELECT {THREAD_COLUMNS} FROM email_threads
             WHERE user_id = $1 AND root_message_id = ANY($2)
             ORDER BY last_message_at DESC
             LIMIT 1"
        );
        let root = sqlx::query_as::<_, ThreadRow>(&root_query)
            .bind(user_id)
            .bind(message_ids)
            .fetch_optional(&self.pool)
            .await?;

        Ok(root.map(Thread::from))
    }

    async fn find_threads_by_subject(
        &self,
        user_id: i32,
        normalized_subject: &str,
        since: DateTime<Utc>,
    ) -> StoreResult<Vec<Thread>> {
        let query = format!(
            "SELECT {THREAD_COLUMNS} FROM email_threads
             WHERE user_id = $1 AND normalized_subject = $2 AND last_message_at >= $3
             ORDER BY last_message_at DESC
             LIMIT 20"
        );
        let rows = sqlx::query_as::<_, ThreadRow>(&query)
            .bind(user_id)
            .bind(normalized_subject)
            .bind(since)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(Thread::from).collect())
    }

    async fn create_thread(
        &self,
        message: NewMessage,
        thread: NewThread,
    ) -> StoreResult<(Thread, Message)> {
        let mut tx = self.pool.begin().await?;

        let query = format!(
            "INSERT INTO email_threads
                 (id, user_id, root_message_id, normalized_subject, participants, message_count, last_message_at)
             VALUES ($1, $2, $3, $4, $5, 1, $6)
             RETURNING {THREAD_COLUMNS}"
        );
        let created: Thread = sqlx::query_as::<_, ThreadRow>(&query)
            .bind(Uuid::new_v4())
            .bind(message.user_id)
            .bind(&thread.root_message_id)
            .bind(&thread.normalized_subject)
            .bind(Json(&thread.participants))
            .bind(message.sent_at)
            .fetch_one(&mut *tx)
            .await?
            .into();

        let stored = Self::insert_message(&mut tx, message, created.id, 0).await?;
        tx.commit().await?;

        Ok((created, stored))
    }

    async fn append_to_thread(
        &self,
        thread_id: Uuid,
        message: NewMessage,
        participants: &[Mailbox],
    ) -> StoreResult<(Thread, Message)> {
        let mut tx = self.pool.begin().await?;

        let lock_query = format!(
            "SELECT {THREAD_COLUMNS} FROM email_threads WHERE id = $1 AND user_id = $2 FOR UPDATE"
        );
        let current: Thread = sqlx::query_as::<_, ThreadRow>(&lock_query)
            .bind(thread_id)
            .bind(message.user_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(StoreError::Missing("thread"))?
            .into();

        let position = current.message_count;
        let mut merged = ParticipantSet::from_mailboxes(current.participants);
        merged.extend(participants.iter().cloned());

        let update_query = format!(
            "UPDATE email_threads
             SET message_count = message_count + 1,
                 last_message_at = GREATEST(last_message_at, $2),
                 participants = $3
             WHERE id = $1
             RETURNING {THREAD_COLUMNS}"
        );
        let updated: Thread = sqlx::query_as::<_, ThreadRow>(&update_query)
            .bind(thread_id)
            .bind(message.sent_at)
            .bind(Json(merged.mailboxes()))
            .fetch_one(&mut *tx)
            .await?
            .into();

        let stored = Self::insert_message(&mut tx, message, thread_id, position).await?;
        tx.commit().await?;

        Ok((updated, stored))
    }

    async fn get_endpoint(&self, endpoint_id: Uuid) -> StoreResult<Option<Endpoint>> {
        let endpoint = sqlx::query_as::<_, Endpoint>(
            "SELECT id, user_id, name, kind, config, is_active FROM endpoints WHERE id = $1",
        )
        .bind(endpoint_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(endpoint)
    }

    async fn get_delivery(&self, delivery_id: Uuid) -> StoreResult<Option<DeliveryAttempt>> {
        let query = format!("SELECT {DELIVERY_COLUMNS} FROM delivery_attempts WHERE id = $1");
        let delivery = sqlx::query_as::<_, DeliveryAttempt>(&query)
            .bind(delivery_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(delivery)
    }

    async fn list_deliveries(&self, message_id: Uuid) -> StoreResult<Vec<DeliveryAttempt>> {
        let query = format!(
            "SELECT {DELIVERY_COLUMNS} FROM delivery_attempts
             WHERE message_id = $1
             ORDER BY created_at DESC"
        );
        let deliveries = sqlx::query_as::<_, DeliveryAttempt>(&query)
            .bind(message_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(deliveries)
    }

    async fn insert_delivery(&self, attempt: NewDeliveryAttempt) -> StoreResult<DeliveryAttempt> {
        let query = format!(
            "INSERT INTO delivery_attempts
                 (id, message_id, endpoint_id, delivery_type, status, attempts, last_attempt_at,
                  response_data, error)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
             RETURNING {DELIVERY_COLUMNS}"
        );
        let delivery = sqlx::query_as::<_, DeliveryAttempt>(&query)
            .bind(Uuid::new_v4())
            .bind(attempt.message_id)
            .bind(attempt.endpoint_id)
            .bind(attempt.delivery_type)
            .bind(attempt.status)
            .bind(attempt.attempts)
            .bind(attempt.last_attempt_at)
            .bind(attempt.response_data)
            .bind(attempt.error)
            .fetch_one(&self.pool)
            .await?;

        Ok(delivery)
    }

    async fn begin_retry(
        &self,
        delivery_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<DeliveryAttempt>> {
        let query = format!(
            "UPDATE delivery_attempts
             SET status = 'pending', attempts = attempts + 1, last_attempt_at = $2,
                 error = NULL, updated_at = $2
             WHERE id = $1
             RETURNING {DELIVERY_COLUMNS}"
        );
        let delivery = sqlx::query_as::<_, DeliveryAttempt>(&query)
            .bind(delivery_id)
            .bind(now)
            .fetch_optional(&self.pool)
            .await?;

        Ok(delivery)
    }

    async fn mark_failed(
        &self,
        delivery_id: Uuid,
        error: &str,
        response_data: Option<Value>,
    ) -> StoreResult<Option<DeliveryAttempt>> {
        let query = format!(
            "UPDATE delivery_attempts
             SET status = 'failed', error = $2,
                 response_data = COALESCE($3, response_data), updated_at = NOW()
             WHERE id = $1
             RETURNING {DELIVERY_COLUMNS}"
        );
        let delivery = sqlx::query_as::<_, DeliveryAttempt>(&query)
            .bind(delivery_id)
            .bind(error)
            .bind(response_data)
            .fetch_optional(&self.pool)
            .await?;

        Ok(delivery)
    }
}
