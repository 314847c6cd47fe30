use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use chrono::{Duration, Utc};
use serde_json::json;
use tower::ServiceExt;
use uuid::Uuid;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use availability_cell::router::availability_routes;
use shared_utils::test_utils::{MockStoreRows, TestConfig};

fn test_app(store_uri: &str) -> Router {
    availability_routes(TestConfig::with_store_url(store_uri).to_arc())
}

#[tokio::test]
async fn listing_returns_slots_with_busy_markers() {
    let server = MockServer::start().await;
    let doctor_id = Uuid::new_v4();
    let office_id = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path("/rest/v1/doctors"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockStoreRows::doctor(doctor_id, office_id)
        ])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/offices"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockStoreRows::office(office_id, doctor_id, "America/Mexico_City")
        ])))
        .mount(&server)
        .await;

    // Monday template, 09:00-18:00 with a 14:00-15:00 lunch.
    Mock::given(method("GET"))
        .and(path("/rest/v1/availability_templates"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockStoreRows::availability_template(doctor_id, 1)
        ])))
        .mount(&server)
        .await;

    // One booked appointment occupying the 11:00 wall-clock slot (17:00Z).
    let blocking_id = Uuid::new_v4();
    let busy_start = "2025-06-02T17:00:00Z".parse().unwrap();
    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockStoreRows::appointment(
                blocking_id, doctor_id, Uuid::new_v4(), office_id,
                busy_start, busy_start + Duration::minutes(30), "confirmed",
            )
        ])))
        .mount(&server)
        .await;

    let request = Request::builder()
        .method("GET")
        .uri(&format!(
            "/?doctor={}&start=2025-06-02&end=2025-06-02",
            doctor_id
        ))
        .body(Body::empty())
        .unwrap();

    let response = test_app(&server.uri()).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let payload: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(payload["tz"], "America/Mexico_City");

    let slots = payload["slots"].as_array().unwrap();
    // 09:00-14:00 and 15:00-18:00 in 30-minute slots.
    assert_eq!(slots.len(), 16);

    let busy: Vec<_> = slots.iter().filter(|s| s["available"] == false).collect();
    assert_eq!(busy.len(), 1);
    let busy_slot_start: chrono::DateTime<Utc> =
        busy[0]["start_time"].as_str().unwrap().parse().unwrap();
    assert_eq!(busy_slot_start, busy_start);
    assert_eq!(busy[0]["blocking_appointment_id"], blocking_id.to_string());
}

#[tokio::test]
async fn unknown_doctor_is_404() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/doctors"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let request = Request::builder()
        .method("GET")
        .uri(&format!(
            "/?doctor={}&start=2025-06-02&end=2025-06-02",
            Uuid::new_v4()
        ))
        .body(Body::empty())
        .unwrap();

    let response = test_app(&server.uri()).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn range_beyond_cap_is_rejected() {
    let server = MockServer::start().await;

    let request = Request::builder()
        .method("GET")
        .uri(&format!(
            "/?doctor={}&start=2025-01-01&end=2025-06-01",
            Uuid::new_v4()
        ))
        .body(Body::empty())
        .unwrap();

    let response = test_app(&server.uri()).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let payload: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(payload["error"], "range_too_large");
}
