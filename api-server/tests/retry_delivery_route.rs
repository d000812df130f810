use std::sync::Arc;

use chrono::Utc;
use mailflow_api::models::{
    DeliveryAttempt, DeliveryStatus, EndpointKind, Message, MessageDirection, NewDeliveryAttempt,
    NewMessage,
};
use mailflow_api::routes::deliveries::retry_delivery;
use mailflow_api::store::{MailStore, MemoryStore, NewThread};
use mailflow_api::test_support::{StubDispatcher, TestRocketBuilder, bearer_header};
use rocket::http::{ContentType, Status};
use rocket::local::asynchronous::Client;
use rocket::routes;
use serde_json::{Value, json};
use uuid::Uuid;

struct Setup {
    store: Arc<MemoryStore>,
    message: Message,
    delivery: DeliveryAttempt,
    endpoint_id: Uuid,
}

async fn setup(status: DeliveryStatus) -> Setup {
    let store = Arc::new(MemoryStore::new());
    store.insert_account(1, "owner@acme.test");
    let endpoint = store.insert_endpoint(
        1,
        "crm hook",
        EndpointKind::Webhook,
        json!({ "url": "https://hooks.acme.test/mail" }),
        true,
    );

    let new_message = NewMessage {
        user_id: 1,
        direction: MessageDirection::Inbound,
        message_id: "order-42@shop.test".into(),
        in_reply_to: None,
        references: Vec::new(),
        subject: "Order 42".into(),
        from_blob: Some("Customer <c@shop.test>".into()),
        to_blob: Some(r#"["support@acme.test"]"#.into()),
        cc_blob: None,
        text_body: Some("Where is my order?".into()),
        html_body: None,
        sent_at: Utc::now(),
        endpoint_id: Some(endpoint.id),
    };
    let seed = NewThread {
        root_message_id: new_message.message_id.clone(),
        normalized_subject: "order 42".into(),
        participants: Vec::new(),
    };
    let (_, message) = store
        .create_thread(new_message, seed)
        .await
        .expect("thread created");

    let delivery = store
        .insert_delivery(NewDeliveryAttempt {
            message_id: message.id,
            endpoint_id: endpoint.id,
            delivery_type: endpoint.kind.delivery_type(),
            status,
            attempts: 1,
            last_attempt_at: Some(Utc::now()),
            response_data: None,
            error: None,
        })
        .await
        .expect("delivery recorded");

    Setup {
        store,
        message,
        delivery,
        endpoint_id: endpoint.id,
    }
}

async fn client(store: Arc<MemoryStore>, dispatcher: Arc<StubDispatcher>) -> Client {
    TestRocketBuilder::new()
        .with_store(store)
        .with_dispatcher(dispatcher)
        .mount_api_routes(routes![retry_delivery])
        .async_client()
        .await
}

fn retry_uri(message_id: Uuid) -> String {
    format!("/api/v1/messages/{message_id}/retry-delivery")
}

#[tokio::test]
async fn unknown_delivery_is_reported_as_not_found() {
    let setup = setup(DeliveryStatus::Failed).await;
    let client = client(setup.store.clone(), Arc::new(StubDispatcher::succeeding())).await;

    let response = client
        .post(retry_uri(setup.message.id))
        .header(ContentType::JSON)
        .header(bearer_header(1, "owner@acme.test", 0))
        .body(json!({ "deliveryId": Uuid::new_v4() }).to_string())
        .dispatch()
        .await;

    assert_eq!(response.status(), Status::NotFound);
    let body: Value = response.into_json().await.expect("json body");
    assert_eq!(
        body,
        json!({ "success": false, "error": "Delivery record not found" })
    );
}

#[tokio::test]
async fn successful_retry_bumps_attempts() {
    let setup = setup(DeliveryStatus::Failed).await;
    let dispatcher = Arc::new(StubDispatcher::succeeding());
    let client = client(setup.store.clone(), dispatcher.clone()).await;

    let response = client
        .post(retry_uri(setup.message.id))
        .header(ContentType::JSON)
        .header(bearer_header(1, "owner@acme.test", 0))
        .body(json!({ "deliveryId": setup.delivery.id }).to_string())
        .dispatch()
        .await;

    assert_eq!(response.status(), Status::Ok);
    let body: Value = response.into_json().await.expect("json body");
    assert_eq!(body["success"], true);
    assert_eq!(body["deliveryId"], setup.delivery.id.to_string());
    assert_eq!(body["delivery"]["attempts"], 2);
    assert_eq!(body["delivery"]["status"], "pending");
    assert_eq!(
        dispatcher.calls(),
        vec![(1, setup.message.id, setup.endpoint_id)]
    );
}

#[tokio::test]
async fn failed_dispatch_after_success_answers_500_and_marks_failed() {
    let setup = setup(DeliveryStatus::Success).await;
    let dispatcher = Arc::new(StubDispatcher::failing("webhook responded with HTTP 502"));
    let client = client(setup.store.clone(), dispatcher).await;

    let response = client
        .post(retry_uri(setup.message.id))
        .header(ContentType::JSON)
        .header(bearer_header(1, "owner@acme.test", 0))
        .body(json!({ "deliveryId": setup.delivery.id }).to_string())
        .dispatch()
        .await;

    assert_eq!(response.status(), Status::InternalServerError);
    let body: Value = response.into_json().await.expect("json body");
    assert_eq!(body["success"], false);
    assert_eq!(body["deliveryId"], setup.delivery.id.to_string());
    assert!(
        body["error"]
            .as_str()
            .expect("error text")
            .contains("HTTP 502")
    );

    let stored = setup
        .store
        .get_delivery(setup.delivery.id)
        .await
        .unwrap()
        .expect("delivery still present");
    assert_eq!(stored.status, DeliveryStatus::Failed);
    assert_eq!(stored.attempts, 2);
}

#[tokio::test]
async fn inactive_endpoint_is_a_conflict_and_changes_nothing() {
    let setup = setup(DeliveryStatus::Failed).await;
    setup.store.set_endpoint_active(setup.endpoint_id, false);
    let dispatcher = Arc::new(StubDispatcher::succeeding());
    let client = client(setup.store.clone(), dispatcher.clone()).await;

    let response = client
        .post(retry_uri(setup.message.id))
        .header(ContentType::JSON)
        .header(bearer_header(1, "owner@acme.test", 0))
        .body(json!({ "deliveryId": setup.delivery.id }).to_string())
        .dispatch()
        .await;

    assert_eq!(response.status(), Status::Conflict);
    let body: Value = response.into_json().await.expect("json body");
    assert_eq!(body["error"], "Endpoint is not active");

    let stored = setup
        .store
        .get_delivery(setup.delivery.id)
        .await
        .unwrap()
        .expect("delivery still present");
    assert_eq!(stored.attempts, 1);
    assert!(dispatcher.calls().is_empty());
}

#[tokio::test]
async fn missing_or_malformed_delivery_id_is_bad_request() {
    let setup = setup(DeliveryStatus::Failed).await;
    let client = client(setup.store.clone(), Arc::new(StubDispatcher::succeeding())).await;

    for body in [json!({}), json!({ "deliveryId": "not-a-uuid" })] {
        let response = client
            .post(retry_uri(setup.message.id))
            .header(ContentType::JSON)
            .header(bearer_header(1, "owner@acme.test", 0))
            .body(body.to_string())
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::BadRequest);
        let body: Value = response.into_json().await.expect("json body");
        assert_eq!(body["success"], false);
    }
}

#[tokio::test]
async fn requests_without_a_session_are_rejected() {
    let setup = setup(DeliveryStatus::Failed).await;
    let client = client(setup.store.clone(), Arc::new(StubDispatcher::succeeding())).await;

    let response = client
        .post(retry_uri(setup.message.id))
        .header(ContentType::JSON)
        .body(json!({ "deliveryId": setup.delivery.id }).to_string())
        .dispatch()
        .await;

    assert_eq!(response.status(), Status::Unauthorized);
    let body: Value = response.into_json().await.expect("json body");
    assert_eq!(body, json!({ "success": false, "error": "Unauthorized" }));
}

#[tokio::test]
async fn other_accounts_cannot_see_the_message() {
    let setup = setup(DeliveryStatus::Failed).await;
    setup.store.insert_account(2, "intruder@acme.test");
    let client = client(setup.store.clone(), Arc::new(StubDispatcher::succeeding())).await;

    let response = client
        .post(retry_uri(setup.message.id))
        .header(ContentType::JSON)
        .header(bearer_header(2, "intruder@acme.test", 0))
        .body(json!({ "deliveryId": setup.delivery.id }).to_string())
        .dispatch()
        .await;

    assert_eq!(response.status(), Status::NotFound);
    let body: Value = response.into_json().await.expect("json body");
    assert_eq!(body["error"], "Message not found");
}

#[tokio::test]
async fn disabled_accounts_are_forbidden() {
    let setup = setup(DeliveryStatus::Failed).await;
    setup.store.disable_account(1);
    let client = client(setup.store.clone(), Arc::new(StubDispatcher::succeeding())).await;

    let response = client
        .post(retry_uri(setup.message.id))
        .header(ContentType::JSON)
        .header(bearer_header(1, "owner@acme.test", 0))
        .body(json!({ "deliveryId": setup.delivery.id }).to_string())
        .dispatch()
        .await;

    assert_eq!(response.status(), Status::Forbidden);
    let body: Value = response.into_json().await.expect("json body");
    assert_eq!(body["error"], "Account disabled");
}
