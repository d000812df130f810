use std::sync::Arc;

use mailflow_api::routes::messages::{get_message, ingest_message, list_message_deliveries};
use mailflow_api::routes::threads::{get_thread, get_thread_participants, list_threads};
use mailflow_api::store::MemoryStore;
use mailflow_api::test_support::{StubDispatcher, TestRocketBuilder, bearer_header};
use rocket::http::{ContentType, Status};
use rocket::local::asynchronous::Client;
use rocket::routes;
use serde_json::{Value, json};

async fn client(store: Arc<MemoryStore>, dispatcher: Arc<StubDispatcher>) -> Client {
    TestRocketBuilder::new()
        .with_store(store)
        .with_dispatcher(dispatcher)
        .mount_api_routes(routes![
            ingest_message,
            get_message,
            list_message_deliveries,
            list_threads,
            get_thread,
            get_thread_participants
        ])
        .async_client()
        .await
}

fn store() -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    store.insert_account(1, "owner@acme.test");
    store.insert_account(2, "other@acme.test");
    store
}

async fn ingest(client: &Client, user_id: i32, body: Value) -> Value {
    let response = client
        .post("/api/v1/messages")
        .header(ContentType::JSON)
        .header(bearer_header(user_id, "owner@acme.test", 0))
        .body(body.to_string())
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Created);
    response.into_json().await.expect("json body")
}

async fn get_json(client: &Client, user_id: i32, uri: String) -> (Status, Value) {
    let response = client
        .get(uri)
        .header(bearer_header(user_id, "owner@acme.test", 0))
        .dispatch()
        .await;
    let status = response.status();
    (status, response.into_json().await.expect("json body"))
}

#[tokio::test]
async fn reply_joins_the_thread_of_its_parent() {
    let store = store();
    let client = client(store.clone(), Arc::new(StubDispatcher::succeeding())).await;

    let root = ingest(
        &client,
        1,
        json!({
            "direction": "inbound",
            "messageId": "<root@alice.test>",
            "subject": "Quarterly numbers",
            "from": { "addresses": [{ "name": "Alice", "address": "a@x.com" }] },
            "to": ["support@acme.test"],
            "sentAt": "2025-03-01T10:00:00Z"
        }),
    )
    .await;
    assert_eq!(root["matched"], "created");
    assert_eq!(root["threadPosition"], 0);

    let reply = ingest(
        &client,
        1,
        json!({
            "direction": "outbound",
            "messageId": "<reply@acme.test>",
            "inReplyTo": "<root@alice.test>",
            "references": ["<root@alice.test>"],
            "subject": "Re: Quarterly numbers",
            "from": "Support <support@acme.test>",
            "to": ["a@x.com"],
            "sentAt": "2025-03-01T11:00:00Z"
        }),
    )
    .await;
    assert_eq!(reply["matched"], "reference");
    assert_eq!(reply["threadId"], root["threadId"]);
    assert_eq!(reply["threadPosition"], 1);
    assert_eq!(store.thread_count(1), 1);

    let thread_id = root["threadId"].as_str().expect("thread id").to_string();
    let (status, detail) = get_json(&client, 1, format!("/api/v1/threads/{thread_id}")).await;
    assert_eq!(status, Status::Ok);
    assert_eq!(detail["thread"]["messageCount"], 2);
    let messages = detail["messages"].as_array().expect("messages");
    assert_eq!(messages[0]["messageId"], "root@alice.test");
    assert_eq!(messages[0]["depth"], 0);
    assert_eq!(messages[1]["messageId"], "reply@acme.test");
    assert_eq!(messages[1]["depth"], 1);
}

#[tokio::test]
async fn named_occurrence_wins_in_participants() {
    let store = store();
    let client = client(store, Arc::new(StubDispatcher::succeeding())).await;

    let first = ingest(
        &client,
        1,
        json!({
            "direction": "inbound",
            "messageId": "a1@x.com",
            "subject": "Lunch",
            "from": { "addresses": [{ "address": "a@x.com" }] },
        }),
    )
    .await;
    ingest(
        &client,
        1,
        json!({
            "direction": "inbound",
            "messageId": "a2@x.com",
            "inReplyTo": "a1@x.com",
            "subject": "Re: Lunch",
            "from": { "addresses": [{ "name": "Alice", "address": "a@x.com" }] },
        }),
    )
    .await;

    let thread_id = first["threadId"].as_str().expect("thread id").to_string();
    let (status, body) = get_json(
        &client,
        1,
        format!("/api/v1/threads/{thread_id}/participants"),
    )
    .await;
    assert_eq!(status, Status::Ok);
    assert_eq!(body["participants"], json!(["Alice <a@x.com>"]));
    assert_eq!(body["parseErrors"], json!([]));
}

#[tokio::test]
async fn malformed_blobs_are_reported_but_do_not_fail() {
    let store = store();
    let client = client(store, Arc::new(StubDispatcher::succeeding())).await;

    let first = ingest(
        &client,
        1,
        json!({
            "direction": "inbound",
            "messageId": "m1@x.com",
            "subject": "Broken headers",
            "from": "{\"addresses\": [",
            "to": ["bob@x.com"],
        }),
    )
    .await;
    assert_eq!(first["parseErrors"].as_array().expect("errors").len(), 1);

    let thread_id = first["threadId"].as_str().expect("thread id").to_string();
    let (status, body) = get_json(
        &client,
        1,
        format!("/api/v1/threads/{thread_id}/participants"),
    )
    .await;
    assert_eq!(status, Status::Ok);
    assert_eq!(body["participants"], json!(["bob@x.com"]));
    assert_eq!(body["parseErrors"].as_array().expect("errors").len(), 1);
}

#[tokio::test]
async fn threads_are_scoped_to_their_account() {
    let store = store();
    let client = client(store, Arc::new(StubDispatcher::succeeding())).await;

    let created = ingest(
        &client,
        1,
        json!({ "direction": "inbound", "messageId": "x@y", "subject": "Private" }),
    )
    .await;
    let thread_id = created["threadId"].as_str().expect("thread id").to_string();

    let (status, body) = get_json(&client, 2, format!("/api/v1/threads/{thread_id}")).await;
    assert_eq!(status, Status::NotFound);
    assert_eq!(body["error"], "Thread not found");

    let (status, page) = get_json(&client, 2, "/api/v1/threads".to_string()).await;
    assert_eq!(status, Status::Ok);
    assert_eq!(page["items"], json!([]));

    let (_, page) = get_json(&client, 1, "/api/v1/threads?page=1&size=10".to_string()).await;
    assert_eq!(page["items"].as_array().expect("items").len(), 1);
    assert_eq!(page["hasMore"], false);
}

#[tokio::test]
async fn inbound_message_with_active_endpoint_is_dispatched() {
    let store = store();
    let endpoint = store.insert_endpoint(
        1,
        "hook",
        mailflow_api::models::EndpointKind::Webhook,
        json!({ "url": "https://hooks.acme.test" }),
        true,
    );
    let dispatcher = Arc::new(StubDispatcher::failing("connection refused"));
    let client = client(store, dispatcher.clone()).await;

    let created = ingest(
        &client,
        1,
        json!({
            "direction": "inbound",
            "messageId": "routed@x",
            "subject": "Routed",
            "endpointId": endpoint.id,
        }),
    )
    .await;

    assert_eq!(dispatcher.calls().len(), 1);
    assert_eq!(dispatcher.calls()[0].2, endpoint.id);
    assert!(
        created["dispatchError"]
            .as_str()
            .expect("dispatch error")
            .contains("connection refused")
    );

    let message_id = created["message"]["id"].as_str().expect("id").to_string();
    let (status, message) = get_json(&client, 1, format!("/api/v1/messages/{message_id}")).await;
    assert_eq!(status, Status::Ok);
    assert_eq!(message["endpointId"], endpoint.id.to_string());

    let (status, deliveries) = get_json(
        &client,
        1,
        format!("/api/v1/messages/{message_id}/deliveries"),
    )
    .await;
    assert_eq!(status, Status::Ok);
    assert_eq!(deliveries, json!([]));
}
