use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use chrono::{Duration, Utc};
use serde_json::json;
use tower::ServiceExt;
use uuid::Uuid;
use wiremock::matchers::{body_partial_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use shared_utils::signature::sign_payload;
use shared_utils::test_utils::{MockStoreRows, TestConfig};
use webhook_cell::router::webhook_routes;

const SECRET: &str = "test-webhook-secret";

fn test_app(store_uri: &str) -> Router {
    webhook_routes(TestConfig::with_store_url(store_uri).to_arc())
}

fn signed_request(body: serde_json::Value, signature: Option<String>) -> Request<Body> {
    let raw = body.to_string();
    let signature = signature.unwrap_or_else(|| sign_payload(SECRET, raw.as_bytes()));
    Request::builder()
        .method("POST")
        .uri("/messaging")
        .header("content-type", "application/json")
        .header("X-Hub-Signature-256", signature)
        .body(Body::from(raw))
        .unwrap()
}

fn status_payload(message_id: &str, status: &str) -> serde_json::Value {
    json!({
        "entry": [{
            "changes": [{
                "value": {
                    "statuses": [{ "id": message_id, "status": status }]
                }
            }]
        }]
    })
}

fn button_reply_payload(message_id: &str, button_id: &str) -> serde_json::Value {
    json!({
        "entry": [{
            "changes": [{
                "value": {
                    "messages": [{
                        "id": message_id,
                        "from": "5215512345678",
                        "interactive": {
                            "button_reply": { "id": button_id, "title": "Confirmar" }
                        }
                    }]
                }
            }]
        }]
    })
}

async fn mock_dedup_insert(server: &MockServer, fresh: bool) {
    let rows = if fresh {
        json!([{ "id": Uuid::new_v4() }])
    } else {
        json!([])
    };
    Mock::given(method("POST"))
        .and(path("/rest/v1/webhook_events"))
        .respond_with(ResponseTemplate::new(201).set_body_json(rows))
        .mount(server)
        .await;
}

#[tokio::test]
async fn bad_signature_is_rejected_with_401() {
    let server = MockServer::start().await;

    let request = signed_request(
        status_payload("wamid.1", "delivered"),
        Some("sha256=deadbeef".to_string()),
    );
    let response = test_app(&server.uri()).oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    // Nothing was written.
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn delivered_status_is_recorded_on_the_reminder() {
    let server = MockServer::start().await;
    mock_dedup_insert(&server, true).await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/reminders"))
        .and(query_param("provider_message_id", "eq.wamid.42"))
        .and(body_partial_json(json!({ "delivery_status": "delivered" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockStoreRows::reminder(Uuid::new_v4(), Uuid::new_v4(), 1, 1440, true)
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let response = test_app(&server.uri())
        .oneshot(signed_request(status_payload("wamid.42", "delivered"), None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let payload: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(payload["report"]["statuses_recorded"], 1);
}

#[tokio::test]
async fn duplicate_delivery_is_a_no_op() {
    let server = MockServer::start().await;
    mock_dedup_insert(&server, false).await;

    // No PATCH mock mounted: a write attempt would fail the test through
    // the unmatched-request panic below.
    let response = test_app(&server.uri())
        .oneshot(signed_request(status_payload("wamid.42", "read"), None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let payload: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(payload["report"]["duplicates_skipped"], 1);
    assert_eq!(payload["report"]["statuses_recorded"], 0);
}

#[tokio::test]
async fn confirmar_reply_confirms_the_appointment() {
    let server = MockServer::start().await;
    mock_dedup_insert(&server, true).await;

    let appointment_id = Uuid::new_v4();
    let start = Utc::now() + Duration::days(1);

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockStoreRows::appointment(
                appointment_id, Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(),
                start, start + Duration::minutes(30), "pending_confirmation",
            )
        ])))
        .mount(&server)
        .await;

    let mut confirmed = MockStoreRows::appointment(
        appointment_id, Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(),
        start, start + Duration::minutes(30), "confirmed",
    );
    confirmed["revision"] = json!(2);

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("status", "eq.pending_confirmation"))
        .and(body_partial_json(json!({ "status": "confirmed" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([confirmed])))
        .expect(1)
        .mount(&server)
        .await;

    let button_id = format!("confirmar:{}", appointment_id);
    let response = test_app(&server.uri())
        .oneshot(signed_request(
            button_reply_payload("wamid.reply.1", &button_id),
            None,
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let payload: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(payload["report"]["replies_processed"], 1);
}

#[tokio::test]
async fn cancelar_reply_cancels_with_reply_reason() {
    let server = MockServer::start().await;
    mock_dedup_insert(&server, true).await;

    let appointment_id = Uuid::new_v4();
    let start = Utc::now() + Duration::days(1);

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockStoreRows::appointment(
                appointment_id, Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(),
                start, start + Duration::minutes(30), "confirmed",
            )
        ])))
        .mount(&server)
        .await;

    let mut cancelled = MockStoreRows::appointment(
        appointment_id, Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(),
        start, start + Duration::minutes(30), "cancelled",
    );
    cancelled["revision"] = json!(2);

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .and(body_partial_json(json!({
            "status": "cancelled",
            "cancellation_reason": "patient_whatsapp_reply"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([cancelled])))
        .expect(1)
        .mount(&server)
        .await;

    // Cancellation also disables unsent reminders.
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/reminders"))
        .and(body_partial_json(json!({ "enabled": false })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;

    let button_id = format!("cancelar:{}", appointment_id);
    let response = test_app(&server.uri())
        .oneshot(signed_request(
            button_reply_payload("wamid.reply.2", &button_id),
            None,
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn stale_reply_on_terminal_appointment_still_answers_200() {
    let server = MockServer::start().await;
    mock_dedup_insert(&server, true).await;

    let appointment_id = Uuid::new_v4();
    let start = Utc::now() + Duration::days(1);

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockStoreRows::appointment(
                appointment_id, Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(),
                start, start + Duration::minutes(30), "cancelled",
            )
        ])))
        .mount(&server)
        .await;

    let button_id = format!("confirmar:{}", appointment_id);
    let response = test_app(&server.uri())
        .oneshot(signed_request(
            button_reply_payload("wamid.reply.3", &button_id),
            None,
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let payload: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(payload["report"]["errors_logged"], 1);
    assert_eq!(payload["report"]["replies_processed"], 0);
}
