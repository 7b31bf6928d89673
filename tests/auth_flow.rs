use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    Router,
};
use serde_json::{json, Value as JsonValue};
use storefront_auth::{
    app::build_app,
    auth::{memory::MemoryUserStore, repo::UserStore, repo_types::OtpChallenge},
    config::{AppConfig, JwtConfig, PasswordConfig, SmsBackend, StoreBackend},
    sms::{DeliveryError, OtpSender},
    state::AppState,
};
use time::{Duration, OffsetDateTime};
use tower::ServiceExt;

const PHONE: &str = "+15551234567";
const EMAIL: &str = "ada@example.com";
const PASSWORD: &str = "correct-horse-battery";

#[derive(Default)]
struct RecordingSender {
    sent: Mutex<Vec<(String, String)>>,
    fail: Mutex<bool>,
}

impl RecordingSender {
    fn last_code(&self) -> String {
        self.sent.lock().unwrap().last().expect("an sms").1.clone()
    }
}

#[async_trait]
impl OtpSender for RecordingSender {
    async fn send(&self, phone: &str, code: &str) -> Result<(), DeliveryError> {
        if *self.fail.lock().unwrap() {
            return Err(DeliveryError::Rejected {
                status: 503,
                body: "provider outage".into(),
            });
        }
        self.sent.lock().unwrap().push((phone.into(), code.into()));
        Ok(())
    }
}

struct Harness {
    app: Router,
    state: AppState,
    sms: Arc<RecordingSender>,
}

fn harness() -> Harness {
    let config = AppConfig {
        store: StoreBackend::Memory,
        database_url: None,
        database_max_connections: 1,
        jwt: JwtConfig {
            secret: "test_secret_key".into(),
            issuer: "storefront".into(),
            audience: "storefront-users".into(),
            ttl_minutes: 60,
        },
        password: PasswordConfig {
            memory_kib: 1024,
            iterations: 1,
            parallelism: 1,
        },
        otp_ttl_seconds: 300,
        reset_requires_otp: false,
        sms: SmsBackend::Log,
    };
    let sms = Arc::new(RecordingSender::default());
    let state = AppState::from_parts(
        Arc::new(config),
        Arc::new(MemoryUserStore::new()),
        sms.clone(),
    )
    .expect("state");
    Harness {
        app: build_app(state.clone()),
        state,
        sms,
    }
}

async fn call(app: &Router, req: Request<Body>) -> (StatusCode, JsonValue) {
    let res = app.clone().oneshot(req).await.expect("response");
    let status = res.status();
    let bytes = to_bytes(res.into_body(), usize::MAX).await.expect("body");
    let json = serde_json::from_slice(&bytes).unwrap_or(JsonValue::Null);
    (status, json)
}

async fn post(app: &Router, path: &str, body: JsonValue) -> (StatusCode, JsonValue) {
    let req = Request::builder()
        .method("POST")
        .uri(path)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    call(app, req).await
}

async fn register_default(app: &Router) {
    let (status, body) = post(
        app,
        "/register",
        json!({
            "name": "Ada",
            "email": EMAIL,
            "phone": PHONE,
            "password": PASSWORD,
            "role": "Customer"
        }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
}

#[tokio::test]
async fn register_then_duplicate_conflicts() {
    let h = harness();
    register_default(&h.app).await;

    let (status, body) = post(
        &h.app,
        "/register",
        json!({
            "name": "Other",
            "email": "other@example.com",
            "phone": PHONE,
            "password": PASSWORD,
            "role": "Vendor"
        }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Email or phone already exists");

    let (status, _) = post(
        &h.app,
        "/register",
        json!({
            "name": "Other",
            "email": "ADA@example.com",
            "phone": "+15559999999",
            "password": PASSWORD,
            "role": "Vendor"
        }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn register_requires_every_field() {
    let h = harness();
    let (status, body) = post(
        &h.app,
        "/register",
        json!({ "name": "Ada", "email": EMAIL, "phone": PHONE, "password": PASSWORD }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Please provide all required fields");
    assert!(h.sms.sent.lock().unwrap().is_empty());
}

#[tokio::test]
async fn otp_scenario_end_to_end() {
    let h = harness();
    register_default(&h.app).await;

    let before = OffsetDateTime::now_utc();
    let (status, _) = post(&h.app, "/send-otp", json!({ "phone": PHONE })).await;
    assert_eq!(status, StatusCode::OK);

    let code = h.sms.last_code();
    assert_eq!(code.len(), 6);
    assert!(code.chars().all(|c| c.is_ascii_digit()));

    let user = h.state.store.find_by_phone(PHONE).await.unwrap().unwrap();
    let otp = user.otp.expect("outstanding challenge");
    assert_eq!(otp.code, code);
    let ttl = otp.expires_at - before;
    assert!(ttl >= Duration::minutes(5) && ttl < Duration::minutes(5) + Duration::seconds(5));

    let wrong = if code == "100000" { "100001" } else { "100000" };
    let (status, body) = post(&h.app, "/verify-otp", json!({ "phone": PHONE, "otp": wrong })).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["message"], "Invalid or expired OTP");

    let (status, body) = post(&h.app, "/verify-otp", json!({ "phone": PHONE, "otp": code })).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert!(body["token"].as_str().is_some_and(|t| !t.is_empty()));

    let user = h.state.store.find_by_phone(PHONE).await.unwrap().unwrap();
    assert!(user.is_active);
    assert!(user.otp.is_none());

    let (status, _) = post(&h.app, "/verify-otp", json!({ "phone": PHONE, "otp": code })).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn expired_otp_is_unauthorized() {
    let h = harness();
    register_default(&h.app).await;
    let user = h.state.store.find_by_phone(PHONE).await.unwrap().unwrap();
    h.state
        .store
        .set_otp(
            user.id,
            &OtpChallenge {
                code: "424242".into(),
                expires_at: OffsetDateTime::now_utc() - Duration::seconds(1),
            },
        )
        .await
        .unwrap();

    let (status, _) = post(&h.app, "/verify-otp", json!({ "phone": PHONE, "otp": "424242" })).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn unknown_phone_is_not_found() {
    let h = harness();
    let (status, body) = post(&h.app, "/send-otp", json!({ "phone": "+15550000000" })).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["message"], "User not found");

    let (status, _) = post(
        &h.app,
        "/verify-otp",
        json!({ "phone": "+15550000000", "otp": "123456" }),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn delivery_failure_is_500_and_leaves_no_challenge() {
    let h = harness();
    register_default(&h.app).await;
    *h.sms.fail.lock().unwrap() = true;

    let (status, body) = post(&h.app, "/send-otp", json!({ "phone": PHONE })).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["message"].is_string());

    let user = h.state.store.find_by_phone(PHONE).await.unwrap().unwrap();
    assert!(user.otp.is_none());
}

#[tokio::test]
async fn login_returns_hour_token_without_secrets() {
    let h = harness();
    register_default(&h.app).await;

    let (status, body) = post(&h.app, "/login", json!({ "email": EMAIL, "password": PASSWORD })).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["user"]["email"], EMAIL);
    assert_eq!(body["user"]["role"], "Customer");
    assert!(body["user"].get("password").is_none());
    assert!(body["user"].get("password_hash").is_none());
    assert!(!body.to_string().contains("$argon2"));

    let token = body["token"].as_str().unwrap();
    let claims = h.state.jwt.verify(token).unwrap();
    assert_eq!(claims.exp - claims.iat, 3600);

    let req = Request::builder()
        .uri("/me")
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap();
    let (status, me) = call(&h.app, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(me["phone"], PHONE);
    assert_eq!(me["isActive"], false);
}

#[tokio::test]
async fn login_failures() {
    let h = harness();
    register_default(&h.app).await;

    let (status, _) = post(&h.app, "/login", json!({ "password": PASSWORD })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = post(&h.app, "/login", json!({ "phone": PHONE })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = post(
        &h.app,
        "/login",
        json!({ "email": "nobody@example.com", "password": PASSWORD }),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = post(&h.app, "/login", json!({ "phone": PHONE, "password": "wrong-password" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Invalid credentials");
}

#[tokio::test]
async fn forgot_password_without_new_password_keeps_old_one() {
    let h = harness();
    register_default(&h.app).await;
    let before = h.state.store.find_by_phone(PHONE).await.unwrap().unwrap();

    let (status, _) = post(&h.app, "/forgot-password", json!({ "email": EMAIL })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let after = h.state.store.find_by_phone(PHONE).await.unwrap().unwrap();
    assert_eq!(before.password_hash, after.password_hash);

    let (status, _) = post(
        &h.app,
        "/forgot-password",
        json!({ "email": "nobody@example.com", "newPassword": "whatever-long" }),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn forgot_password_replaces_password() {
    let h = harness();
    register_default(&h.app).await;

    let (status, _) = post(
        &h.app,
        "/forgot-password",
        json!({ "email": EMAIL, "newPassword": "a-brand-new-secret" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = post(&h.app, "/login", json!({ "email": EMAIL, "password": PASSWORD })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = post(
        &h.app,
        "/login",
        json!({ "email": EMAIL, "password": "a-brand-new-secret" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn me_rejects_missing_or_bad_token() {
    let h = harness();
    let req = Request::builder().uri("/me").body(Body::empty()).unwrap();
    let (status, _) = call(&h.app, req).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let req = Request::builder()
        .uri("/me")
        .header(header::AUTHORIZATION, "Bearer not-a-jwt")
        .body(Body::empty())
        .unwrap();
    let (status, body) = call(&h.app, req).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["message"], "Invalid or expired token");
}

#[tokio::test]
async fn unreadable_bodies_get_json_message() {
    let h = harness();

    let (status, body) = post(&h.app, "/register", json!({ "name": 5 })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"].is_string(), "{body}");

    let req = Request::builder()
        .method("POST")
        .uri("/login")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{\"email\":"))
        .unwrap();
    let (status, body) = call(&h.app, req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"].is_string(), "{body}");

    let req = Request::builder()
        .method("POST")
        .uri("/send-otp")
        .body(Body::from(json!({ "phone": PHONE }).to_string()))
        .unwrap();
    let (status, body) = call(&h.app, req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"].is_string(), "{body}");
    assert!(h.sms.sent.lock().unwrap().is_empty());
}

#[tokio::test]
async fn login_with_stale_email_uses_phone() {
    let h = harness();
    register_default(&h.app).await;

    let (status, body) = post(
        &h.app,
        "/login",
        json!({ "email": "old@example.com", "phone": PHONE, "password": PASSWORD }),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["user"]["email"], EMAIL);
}
