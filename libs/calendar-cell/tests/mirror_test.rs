use std::sync::Arc;

use chrono::{Duration, Utc};
use serde_json::json;
use uuid::Uuid;
use wiremock::matchers::{header, method, path, path_regex, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use calendar_cell::models::{CalendarAction, CalendarError, CalendarPush};
use calendar_cell::CalendarMirrorService;
use shared_database::StoreClient;
use shared_utils::test_utils::TestConfig;

fn sample_push(action: CalendarAction, revision: i64) -> CalendarPush {
    let start = Utc::now() + Duration::days(1);
    CalendarPush {
        appointment_id: Uuid::new_v4(),
        revision,
        action,
        doctor_id: Uuid::new_v4(),
        start_time: start,
        end_time: start + Duration::minutes(30),
        summary: "Consulta - Juan Pérez".to_string(),
    }
}

fn build_mirror(store_uri: &str, calendar_uri: &str) -> CalendarMirrorService {
    let mut config = TestConfig::with_store_url(store_uri).to_app_config();
    config.calendar_api_url = calendar_uri.to_string();
    config.calendar_api_token = "test-calendar-token".to_string();
    let store = Arc::new(StoreClient::new(&config));
    CalendarMirrorService::new(&config, store)
}

#[tokio::test]
async fn upsert_carries_idempotency_key_and_records_link() {
    let store_server = MockServer::start().await;
    let calendar_server = MockServer::start().await;

    let push = sample_push(CalendarAction::Upsert, 3);
    let expected_key = format!("{}:3", push.appointment_id);

    Mock::given(method("POST"))
        .and(path("/events"))
        .and(header("Idempotency-Key", expected_key.as_str()))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "id": "evt_abc123"
        })))
        .expect(1)
        .mount(&calendar_server)
        .await;

    // No existing link row, so the upsert falls through to an insert.
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/calendar_links"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&store_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/calendar_links"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([{
            "id": Uuid::new_v4(),
            "appointment_id": push.appointment_id,
            "external_event_id": "evt_abc123",
            "last_synced_revision": 3,
            "sync_status": "synced",
            "updated_at": Utc::now().to_rfc3339()
        }])))
        .expect(1)
        .mount(&store_server)
        .await;

    let mirror = build_mirror(&store_server.uri(), &calendar_server.uri());
    mirror.push(&push).await.unwrap();
}

#[tokio::test]
async fn invalidate_deletes_external_event() {
    let store_server = MockServer::start().await;
    let calendar_server = MockServer::start().await;

    let push = sample_push(CalendarAction::Invalidate, 4);

    Mock::given(method("GET"))
        .and(path("/rest/v1/calendar_links"))
        .and(query_param(
            "appointment_id",
            format!("eq.{}", push.appointment_id).as_str(),
        ))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
            "external_event_id": "evt_abc123"
        }])))
        .mount(&store_server)
        .await;

    Mock::given(method("DELETE"))
        .and(path_regex(r"^/events/evt_abc123$"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&calendar_server)
        .await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/calendar_links"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
            "id": Uuid::new_v4(),
            "appointment_id": push.appointment_id,
            "external_event_id": "evt_abc123",
            "last_synced_revision": 4,
            "sync_status": "invalidated",
            "updated_at": Utc::now().to_rfc3339()
        }])))
        .expect(1)
        .mount(&store_server)
        .await;

    let mirror = build_mirror(&store_server.uri(), &calendar_server.uri());
    mirror.push(&push).await.unwrap();
}

#[tokio::test]
async fn invalidate_without_link_is_a_no_op() {
    let store_server = MockServer::start().await;
    let calendar_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/calendar_links"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&store_server)
        .await;

    let mirror = build_mirror(&store_server.uri(), &calendar_server.uri());
    mirror
        .push(&sample_push(CalendarAction::Invalidate, 2))
        .await
        .unwrap();

    // No DELETE ever reached the calendar.
    assert!(calendar_server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn provider_rejection_marks_link_failed() {
    let store_server = MockServer::start().await;
    let calendar_server = MockServer::start().await;

    let push = sample_push(CalendarAction::Upsert, 1);

    Mock::given(method("POST"))
        .and(path("/events"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&calendar_server)
        .await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/calendar_links"))
        .and(wiremock::matchers::body_partial_json(
            json!({ "sync_status": "failed" }),
        ))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
            "id": Uuid::new_v4(),
            "appointment_id": push.appointment_id,
            "external_event_id": null,
            "last_synced_revision": 1,
            "sync_status": "failed",
            "updated_at": Utc::now().to_rfc3339()
        }])))
        .expect(1)
        .mount(&store_server)
        .await;

    let mirror = build_mirror(&store_server.uri(), &calendar_server.uri());
    let err = mirror.push(&push).await.unwrap_err();
    assert!(matches!(err, CalendarError::Transport(_)));
}
