//! # Integration Tests for formgate-api
//!
//! Drives the assembled router: health probes, the sign-up form (full and
//! partial validation), message pages in both presentations, the login
//! gate, and envelope metrics.

use std::io::Write;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use formgate_api::state::{AppConfig, AppState};

/// Helper: build the test app with default configuration.
fn test_app() -> axum::Router {
    formgate_api::app(AppState::new()).unwrap()
}

/// Helper: build the test app from a configuration.
fn test_app_with(config: AppConfig) -> (axum::Router, AppState) {
    let state = AppState::with_config(config).unwrap();
    (formgate_api::app(state.clone()).unwrap(), state)
}

/// Helper: read response body as string.
async fn body_string(response: axum::http::Response<Body>) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

/// Helper: read response body as JSON.
async fn body_json(response: axum::http::Response<Body>) -> Value {
    serde_json::from_str(&body_string(response).await).unwrap()
}

/// Helper: URL-encode sign-up fields under the form prefix.
fn signup_body(fields: &[(&str, &str)]) -> String {
    let mut body = url::form_urlencoded::Serializer::new(String::new());
    for (name, value) in fields {
        body.append_pair(&format!("signup-{name}"), value);
    }
    body.finish()
}

fn post_signup(uri: &str, body: String) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .header("X-Requested-With", "XMLHttpRequest")
        .body(Body::from(body))
        .unwrap()
}

fn future_date(offset_years: i32) -> String {
    use chrono::Datelike;
    let today = chrono::Local::now().date_naive();
    format!("{}-06-01", today.year() + offset_years)
}

// -- Health Probes ------------------------------------------------------------

#[tokio::test]
async fn test_liveness_probe() {
    let response = test_app()
        .oneshot(
            Request::builder()
                .uri("/health/liveness")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, "ok");
}

#[tokio::test]
async fn test_readiness_probe() {
    let response = test_app()
        .oneshot(
            Request::builder()
                .uri("/health/readiness")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, "ready");
}

// -- Sign-up Form -------------------------------------------------------------

#[tokio::test]
async fn test_signup_valid_submission() {
    let body = signup_body(&[
        ("username", "ada"),
        ("email", "ada@example.com"),
        ("password", "analytical engine"),
        ("password2", "analytical engine"),
        ("start", &future_date(1)),
        ("end", &future_date(2)),
    ]);
    let response = test_app().oneshot(post_signup("/signup/", body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let env = body_json(response).await;
    assert_eq!(env["formgate"], "envelope");
    assert_eq!(env["results"], json!({"username": "ada"}));
    assert_eq!(env["toast"][0]["html"], "Welcome, ada!");
    assert_eq!(env["toast"][0]["duration"], 5000);
}

#[tokio::test]
async fn test_signup_invalid_submission_lists_errors_in_field_order() {
    let body = signup_body(&[
        ("username", "samesame"),
        ("password", "samesame"),
        ("password2", "different"),
        ("start", &future_date(2)),
        ("end", &future_date(1)),
    ]);
    let response = test_app().oneshot(post_signup("/signup/", body)).await.unwrap();
    let env = body_json(response).await;

    let names: Vec<&str> = env["form_error"]
        .as_array()
        .unwrap()
        .iter()
        .map(|entry| entry[0].as_str().unwrap())
        .collect();
    assert_eq!(
        names,
        [
            "signup-username",
            "signup-email",
            "signup-phone",
            "signup-password",
            "signup-password2",
            "signup-start",
            "signup-end",
        ]
    );
    assert_eq!(
        env["form_error"][1],
        json!([
            "signup-email",
            "Email",
            ["At least 1 of an email address or phone number is required."]
        ])
    );
    assert_eq!(
        env["form_error"][5][2],
        json!(["Start date must be before End date."])
    );
    assert!(env.get("partial").is_none());
    assert_eq!(env["toast"][0]["class_name"], "toast-error");
}

#[tokio::test]
async fn test_signup_partial_validation_stops_at_cutoff() {
    let body = signup_body(&[("username", "not a slug!"), ("email", "ada@example.com")]);
    let response = test_app()
        .oneshot(post_signup(
            "/signup/?_partial=signup-email&_focus=signup-phone",
            body,
        ))
        .await
        .unwrap();
    let env = body_json(response).await;
    assert_eq!(
        env["partial"],
        json!({"last_field": "signup-email", "focus_field": "signup-phone"})
    );
    assert_eq!(env["form_error"].as_array().unwrap().len(), 1);
    assert_eq!(env["form_error"][0][0], "signup-username");
    assert!(env.get("toast").is_none());
}

#[tokio::test]
async fn test_signup_date_before_today_is_rejected() {
    let body = signup_body(&[
        ("username", "ada"),
        ("phone", "555 0100"),
        ("password", "analytical engine"),
        ("password2", "analytical engine"),
        ("start", "2001-01-01"),
        ("end", &future_date(1)),
    ]);
    let response = test_app().oneshot(post_signup("/signup/", body)).await.unwrap();
    let env = body_json(response).await;
    let entries = env["form_error"].as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(
        entries[0],
        json!(["signup-start", "Start date", ["Today must not be after Start date."]])
    );
}

#[tokio::test]
async fn test_signup_wrong_content_type_is_generic_exception() {
    let request = Request::builder()
        .method("POST")
        .uri("/signup/")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{}"))
        .unwrap();
    let response = test_app().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let env = body_json(response).await;
    assert_eq!(env["exception"]["title"], "Exception");
    assert_eq!(env["exception"]["message"], "An exception occurred.");
}

#[tokio::test]
async fn test_signup_message_override_from_table() {
    let mut table = tempfile::NamedTempFile::new().unwrap();
    write!(
        table,
        "forms:\n  signup:\n    contact__min_required: 'Tell us how to reach you.'\n"
    )
    .unwrap();
    let (app, _) = test_app_with(AppConfig {
        message_tables: vec![table.path().to_path_buf()],
        ..AppConfig::default()
    });
    let body = signup_body(&[("username", "ada")]);
    let response = app
        .oneshot(post_signup("/signup/?_partial=signup-phone", body))
        .await
        .unwrap();
    let env = body_json(response).await;
    assert_eq!(
        env["form_error"][0],
        json!(["signup-email", "Email", ["Tell us how to reach you."]])
    );
}

// -- Message Pages ------------------------------------------------------------

#[tokio::test]
async fn test_message_page_full_html() {
    let response = test_app()
        .oneshot(
            Request::builder()
                .uri("/message/error/404")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let html = body_string(response).await;
    assert!(html.starts_with("<!DOCTYPE html>"));
    assert!(html.contains("<h1>Page Not Found</h1>"));
}

#[tokio::test]
async fn test_message_page_as_modal_envelope() {
    let response = test_app()
        .oneshot(
            Request::builder()
                .uri("/message/error/database-contention")
                .header("X-Requested-With", "XMLHttpRequest")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let env = body_json(response).await;
    assert_eq!(env["modal"]["code"], 4);
    assert_eq!(env["modal"]["title"], "Please Try Again");
    assert!(env["modal"]["message"]
        .as_str()
        .unwrap()
        .starts_with("<div class=\"message-page\">"));
}

#[tokio::test]
async fn test_message_page_three_segments_from_file() {
    let mut pages = tempfile::NamedTempFile::new().unwrap();
    write!(
        pages,
        "help/forms/partial:\n  title: Checking as you type\n  body: '<p>Fields are checked when you leave them.</p>'\n"
    )
    .unwrap();
    let (app, _) = test_app_with(AppConfig {
        message_pages: Some(pages.path().to_path_buf()),
        ..AppConfig::default()
    });
    let response = app
        .oneshot(
            Request::builder()
                .uri("/message/help/forms/partial")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_string(response)
        .await
        .contains("<title>Checking as you type</title>"));
}

#[tokio::test]
async fn test_unknown_message_page() {
    let response = test_app()
        .oneshot(
            Request::builder()
                .uri("/message/nope/missing")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "NOT_FOUND");

    let response = test_app()
        .oneshot(
            Request::builder()
                .uri("/message/nope/missing")
                .header("X-Requested-With", "XMLHttpRequest")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let env = body_json(response).await;
    assert_eq!(env["error"]["title"], "Not Found");
}

#[tokio::test]
async fn test_unknown_route_shows_not_found_page() {
    let response = test_app()
        .oneshot(
            Request::builder()
                .uri("/no/such/route")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let html = body_string(response).await;
    assert!(html.starts_with("<!DOCTYPE html>"));
    assert!(html.contains("<h1>Page Not Found</h1>"));
}

#[tokio::test]
async fn test_unknown_route_managed_gets_modal_envelope() {
    let response = test_app()
        .oneshot(
            Request::builder()
                .uri("/no/such/route")
                .header("X-Requested-With", "XMLHttpRequest")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let env = body_json(response).await;
    assert_eq!(env["formgate"], "envelope");
    assert_eq!(env["modal"]["title"], "Page Not Found");
}

// -- Login Gate ---------------------------------------------------------------

fn gated_config() -> AppConfig {
    AppConfig {
        login_required: true,
        auth_token: Some("test-secret".to_string()),
        ..AppConfig::default()
    }
}

#[tokio::test]
async fn test_login_gate_redirects_managed_request() {
    let (app, _) = test_app_with(gated_config());
    let response = app
        .oneshot(post_signup("/signup/", String::new()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let env = body_json(response).await;
    assert_eq!(env["location"], "/login/?next=%2Fsignup%2F");
}

#[tokio::test]
async fn test_login_gate_answers_signup_with_envelope_without_hint() {
    let (app, _) = test_app_with(gated_config());
    let request = Request::builder()
        .method("POST")
        .uri("/signup/")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let env = body_json(response).await;
    assert_eq!(env["location"], "/login/?next=%2Fsignup%2F");
}

#[tokio::test]
async fn test_login_gate_accepts_token_and_spares_public_routes() {
    let (app, _) = test_app_with(gated_config());
    let mut request = post_signup(
        "/signup/?_partial=signup-username",
        signup_body(&[("username", "ada")]),
    );
    request
        .headers_mut()
        .insert(header::AUTHORIZATION, "Bearer test-secret".parse().unwrap());
    let env = body_json(app.clone().oneshot(request).await.unwrap()).await;
    assert_eq!(env["form_error"], json!([]));

    let response = app
        .oneshot(
            Request::builder()
                .uri("/message/error/403")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

// -- Metrics ------------------------------------------------------------------

#[tokio::test]
async fn test_metrics_count_envelopes() {
    let (app, state) = test_app_with(AppConfig::default());
    let invalid = signup_body(&[("username", "ada")]);
    app.clone()
        .oneshot(post_signup("/signup/", invalid))
        .await
        .unwrap();
    let bad = Request::builder()
        .method("POST")
        .uri("/signup/")
        .header(header::CONTENT_TYPE, "text/plain")
        .body(Body::from("x"))
        .unwrap();
    app.clone().oneshot(bad).await.unwrap();
    app.oneshot(
        Request::builder()
            .uri("/message/error/404")
            .body(Body::empty())
            .unwrap(),
    )
    .await
    .unwrap();

    assert_eq!(state.metrics.requests(), 3);
    assert_eq!(state.metrics.managed(), 2);
    assert_eq!(state.metrics.form_errors(), 1);
    assert_eq!(state.metrics.faults(), 1);
    assert_eq!(state.metrics.errors(), 0);
}
