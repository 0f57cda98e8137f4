use std::sync::Arc;

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode, header},
};
use chrono::Duration;
use serde_json::{Value, json};
use tower::ServiceExt;

use rollcall::{
    AppState, Config, routes,
    store::{MemoryStore, clock::ManualClock},
};

// Shared test context
struct TestContext {
    app: Router,
    clock: Arc<ManualClock>,
}

impl TestContext {
    fn new() -> Self {
        let clock = Arc::new(ManualClock::default());
        let store = MemoryStore::with_clock(clock.clone());
        let config = Config {
            session_validity_secs: 300,
            ..Config::default()
        };
        let app = routes::router(AppState::new(store, config), None);
        Self { app, clock }
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, Option<String>, Value) {
        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let set_cookie = response
            .headers()
            .get(header::SET_COOKIE)
            .map(|v| v.to_str().unwrap().to_string());
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, set_cookie, body)
    }

    async fn post(&self, uri: &str, body: Value) -> (StatusCode, Option<String>, Value) {
        self.send(
            Request::post(uri)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
    }

    async fn get(&self, uri: &str) -> (StatusCode, Value) {
        let (status, _, body) = self
            .send(Request::get(uri).body(Body::empty()).unwrap())
            .await;
        (status, body)
    }

    async fn create_session(&self, instructor: &str, subject: &str) -> (StatusCode, Value) {
        let (status, _, body) = self
            .post(
                "/api/sessions",
                json!({ "instructor": instructor, "subject": subject, "class_name": "CSE-A" }),
            )
            .await;
        (status, body)
    }

    async fn submit(&self, session_id: &str, roll: &str, device: &str) -> (StatusCode, Value) {
        let (status, _, body) = self
            .post(
                &format!("/api/sessions/{}/attendance", session_id),
                json!({ "roll": roll, "name": format!("Student {}", roll), "device_id": device }),
            )
            .await;
        (status, body)
    }
}

#[tokio::test]
async fn test_classroom_flow() {
    let context = TestContext::new();

    // Step 1: Instructor opens a session
    let (status, session) = context.create_session("Dr.X", "Math 101").await;
    assert_eq!(status, StatusCode::CREATED, "Session creation failed");
    let id = session["id"].as_str().unwrap().to_string();
    assert_eq!(session["subject_id"], "MATH_101");
    assert_eq!(session["live"], true);
    assert_eq!(session["validity_secs"], 300);
    assert!(session["link"]
        .as_str()
        .unwrap()
        .ends_with(&format!("/student.html?session={}", id)));

    // Step 2: First submission is accepted
    context.clock.advance(Duration::seconds(10));
    let (status, body) = context.submit(&id, "101", "dev1").await;
    assert_eq!(status, StatusCode::CREATED, "Submission failed");
    assert_eq!(body["roll"], "101");

    // Step 3: Same roll again
    let (status, body) = context.submit(&id, "101", "dev2").await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["kind"], "attendance_exists");

    // Step 4: Same device, another roll
    let (status, body) = context.submit(&id, "102", "dev1").await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["kind"], "device_already_used");
    assert_eq!(body["identity"], "101");

    // Step 5: Past the deadline
    context.clock.advance(Duration::seconds(400));
    let (status, body) = context.submit(&id, "103", "dev3").await;
    assert_eq!(status, StatusCode::GONE);
    assert_eq!(body["kind"], "session_expired");

    let (status, body) = context.get(&format!("/api/sessions/{}", id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["live"], false);
    assert_eq!(body["remaining_ms"], 0);

    // Step 6: The owner reads the roll
    let (status, body) = context
        .get(&format!("/api/sessions/{}/attendance?instructor=Dr.X", id))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 1);
    assert_eq!(body["records"][0]["roll"], "101");
    assert_eq!(body["devices"].as_array().unwrap().len(), 1);
    assert_eq!(body["devices"][0]["device_id"], "dev1");
    assert_eq!(body["devices"][0]["roll"], "101");
}

#[tokio::test]
async fn test_subject_ownership() {
    let context = TestContext::new();

    let (status, _) = context.create_session("Dr.X", "MATH101").await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = context.create_session("Dr.Y", "math101").await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["kind"], "ownership_violation");
    assert_eq!(body["owner"], "Dr.X");

    let (status, _) = context.create_session("Dr.X", "math101").await;
    assert_eq!(status, StatusCode::CREATED, "Owner must be able to reuse the subject");

    let (status, body) = context.get("/api/subjects").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 1);
    let subjects = body["subjects"].as_array().unwrap();
    assert_eq!(subjects[0]["subject_id"], "MATH101");
    assert_eq!(subjects[0]["owner"], "Dr.X");
}

#[tokio::test]
async fn test_open_session_authorization() {
    let context = TestContext::new();
    let (_, session) = context.create_session("Dr.X", "PHY").await;
    let link = session["link"].as_str().unwrap().to_string();

    let (status, _, body) = context
        .post("/api/sessions/open", json!({ "link": link, "instructor": "Dr.X" }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], session["id"]);

    let (status, _, body) = context
        .post("/api/sessions/open", json!({ "link": link, "instructor": "Dr.Y" }))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["kind"], "unauthorized");
    assert_eq!(body["owner"], "Dr.X");

    let (status, _, body) = context
        .post("/api/sessions/open", json!({ "link": link }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "missing_identity");

    let (status, _, body) = context
        .post("/api/sessions/open", json!({ "link": "https://elsewhere.test/", "instructor": "Dr.X" }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "validation");
}

#[tokio::test]
async fn test_explicit_expiry() {
    let context = TestContext::new();
    let (_, session) = context.create_session("Dr.X", "CHEM").await;
    let id = session["id"].as_str().unwrap().to_string();

    let (status, _, body) = context
        .post(&format!("/api/sessions/{}/expire?instructor=Dr.Y", id), json!({}))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["kind"], "unauthorized");

    for _ in 0..2 {
        let (status, _, body) = context
            .post(&format!("/api/sessions/{}/expire?instructor=Dr.X", id), json!({}))
            .await;
        assert_eq!(status, StatusCode::OK, "Expiry must be repeatable");
        assert_eq!(body["expired"], true);
    }

    let (status, body) = context.submit(&id, "101", "dev1").await;
    assert_eq!(status, StatusCode::GONE);
    assert_eq!(body["kind"], "session_expired");
}

#[tokio::test]
async fn test_unknown_sessions() {
    let context = TestContext::new();

    let (status, body) = context.submit("not-a-session", "101", "dev1").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["kind"], "session_not_found");

    let (status, body) = context
        .get("/api/sessions/00000000-0000-4000-8000-000000000000")
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["kind"], "session_not_found");
}

#[tokio::test]
async fn test_device_cookie_is_issued_and_honoured() {
    let context = TestContext::new();
    let (_, session) = context.create_session("Dr.X", "BIO").await;
    let uri = format!("/api/sessions/{}/attendance", session["id"].as_str().unwrap());

    // No device id: the server issues one as a cookie
    let (status, set_cookie, _) = context
        .post(&uri, json!({ "roll": "101", "name": "Alice" }))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let set_cookie = set_cookie.expect("Device cookie not set");
    let device_cookie = set_cookie.split(';').next().unwrap().trim().to_string();
    assert!(device_cookie.starts_with("device_id=client_"));

    // Same browser, another roll
    let (status, _, body) = context
        .send(
            Request::post(&uri)
                .header(header::CONTENT_TYPE, "application/json")
                .header(header::COOKIE, device_cookie)
                .body(Body::from(json!({ "roll": "102", "name": "Bob" }).to_string()))
                .unwrap(),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["kind"], "device_already_used");
    assert_eq!(body["identity"], "101");
}

#[tokio::test]
async fn test_blank_fields_are_rejected() {
    let context = TestContext::new();

    let (status, _) = context.create_session("  ", "MATH").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, session) = context.create_session("Dr.X", "MATH").await;
    let (status, body) = context
        .submit(session["id"].as_str().unwrap(), "   ", "dev1")
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "validation");
}
