use chrono::{DateTime, Duration, TimeZone, Utc};
use mailflow_api::delivery::{RetryCoordinator, RetryError};
use mailflow_api::models::{
    DeliveryStatus, DeliveryType, MessageDirection, NewDeliveryAttempt, NewMessage,
};
use mailflow_api::store::{MailStore, NewThread, PgStore};
use mailflow_api::test_support::{StubDispatcher, TestDatabase, TestDatabaseError};
use mailflow_api::threading::{ThreadAssembler, ThreadMatch, ThreadingConfig};
use serde_json::json;
use uuid::Uuid;

async fn provision() -> Option<TestDatabase> {
    match TestDatabase::new_from_env().await {
        Ok(db) => Some(db),
        Err(TestDatabaseError::MissingUrl) => {
            eprintln!("skipping database test: TEST_DATABASE_URL not set");
            None
        }
        Err(err) => panic!("failed to provision test database: {err:?}"),
    }
}

async fn insert_user(pool: &sqlx::PgPool, email: &str) -> i32 {
    sqlx::query_scalar("INSERT INTO users (email) VALUES ($1) RETURNING id")
        .bind(email)
        .fetch_one(pool)
        .await
        .expect("user inserted")
}

async fn insert_endpoint(pool: &sqlx::PgPool, user_id: i32) -> Uuid {
    let id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO endpoints (id, user_id, name, kind, config, is_active) \
         VALUES ($1, $2, 'hook', 'webhook', $3, TRUE)",
    )
    .bind(id)
    .bind(user_id)
    .bind(json!({ "url": "http://hook.invalid" }))
    .execute(pool)
    .await
    .expect("endpoint inserted");
    id
}

fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap()
}

fn inbound(user_id: i32, message_id: &str, from: &str, reply_to: Option<&str>) -> NewMessage {
    NewMessage {
        user_id,
        direction: MessageDirection::Inbound,
        message_id: message_id.to_string(),
        in_reply_to: reply_to.map(str::to_string),
        references: reply_to.map(|id| vec![id.to_string()]).unwrap_or_default(),
        subject: "Re: Invoice".to_string(),
        from_blob: Some(json!({ "addresses": [{ "name": "", "address": from }] }).to_string()),
        to_blob: Some(r#"["Support <support@acme.test>"]"#.to_string()),
        cc_blob: None,
        text_body: None,
        html_body: None,
        sent_at: base_time(),
        endpoint_id: None,
    }
}

#[tokio::test]
async fn reply_joins_thread_and_count_grows_by_one() {
    let Some(test_db) = provision().await else {
        return;
    };
    let pool = test_db.pool_clone();
    let user_id = insert_user(&pool, "owner@acme.test").await;

    let store = PgStore::new(pool.clone());
    let config = ThreadingConfig::default();
    let assembler = ThreadAssembler::new(&store, &config);

    let root = assembler
        .assemble(inbound(user_id, "root@x", "a@x.com", None))
        .await
        .expect("root stored");
    assert_eq!(root.matched, ThreadMatch::Created);

    let mut reply = inbound(user_id, "reply@x", "b@x.com", Some("root@x"));
    reply.sent_at = base_time() + Duration::minutes(10);
    let reply = assembler.assemble(reply).await.expect("reply stored");

    assert_eq!(reply.matched, ThreadMatch::Reference);
    assert_eq!(reply.thread.id, root.thread.id);
    assert_eq!(reply.thread.message_count, 2);
    assert_eq!(reply.position(), 1);
    assert_eq!(reply.thread.last_message_at, base_time() + Duration::minutes(10));

    let addresses: Vec<&str> = reply
        .thread
        .participants
        .iter()
        .map(|m| m.address.as_str())
        .collect();
    assert_eq!(addresses, vec!["a@x.com", "support@acme.test", "b@x.com"]);

    let found = store
        .find_thread_by_message_ids(user_id, &["reply@x".to_string()])
        .await
        .expect("lookup")
        .expect("thread found by member id");
    assert_eq!(found.id, root.thread.id);
    assert!(
        store
            .find_thread_by_message_ids(user_id, &["unknown@x".to_string()])
            .await
            .expect("lookup")
            .is_none()
    );

    let thread_rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM email_threads")
        .fetch_one(&pool)
        .await
        .expect("count threads");
    assert_eq!(thread_rows, 1);
    let messages = store
        .list_thread_messages(user_id, root.thread.id)
        .await
        .expect("messages");
    let positions: Vec<Option<i32>> = messages.iter().map(|m| m.thread_position).collect();
    assert_eq!(positions, vec![Some(0), Some(1)]);

    test_db.close().await.expect("failed to drop test database");
}

#[tokio::test]
async fn retry_after_success_marks_failed_and_counts_attempt() {
    let Some(test_db) = provision().await else {
        return;
    };
    let pool = test_db.pool_clone();
    let user_id = insert_user(&pool, "owner@acme.test").await;
    let endpoint_id = insert_endpoint(&pool, user_id).await;

    let store = PgStore::new(pool.clone());
    let mut message = inbound(user_id, "routed@x", "a@x.com", None);
    message.endpoint_id = Some(endpoint_id);
    let seed = NewThread {
        root_message_id: "routed@x".to_string(),
        normalized_subject: "invoice".to_string(),
        participants: Vec::new(),
    };
    let (_, message) = store.create_thread(message, seed).await.expect("message stored");

    let delivery = store
        .insert_delivery(NewDeliveryAttempt {
            message_id: message.id,
            endpoint_id,
            delivery_type: DeliveryType::Webhook,
            status: DeliveryStatus::Success,
            attempts: 1,
            last_attempt_at: Some(base_time()),
            response_data: Some(json!({ "status": 200 })),
            error: None,
        })
        .await
        .expect("delivery stored");

    let dispatcher = StubDispatcher::failing("connection refused");
    let err = RetryCoordinator::new(&store, &dispatcher)
        .retry(user_id, message.id, delivery.id)
        .await
        .expect_err("dispatch fails");
    assert!(matches!(err, RetryError::DispatchFailed { .. }));

    let stored = store
        .get_delivery(delivery.id)
        .await
        .expect("lookup")
        .expect("delivery exists");
    assert_eq!(stored.status, DeliveryStatus::Failed);
    assert_eq!(stored.attempts, 2);
    assert!(stored.error.as_deref().unwrap_or_default().contains("connection refused"));
    assert!(stored.response_data.expect("response data")["error"].is_string());
    assert!(stored.last_attempt_at.expect("stamped") > base_time());

    sqlx::query("UPDATE endpoints SET is_active = FALSE WHERE id = $1")
        .bind(endpoint_id)
        .execute(&pool)
        .await
        .expect("endpoint deactivated");
    let err = RetryCoordinator::new(&store, &dispatcher)
        .retry(user_id, message.id, delivery.id)
        .await
        .expect_err("inactive endpoint");
    assert!(matches!(err, RetryError::EndpointInactive));

    let unchanged = store
        .get_delivery(delivery.id)
        .await
        .expect("lookup")
        .expect("delivery exists");
    assert_eq!(unchanged.attempts, 2);
    assert_eq!(dispatcher.calls().len(), 1);

    test_db.close().await.expect("failed to drop test database");
}
