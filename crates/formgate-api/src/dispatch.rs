//! # Request Dispatcher
//!
//! The single place where handler outcomes become responses. Every route
//! declares how it is managed:
//!
//! | [`Management`] | Envelope enforcement |
//! |----------------|----------------------|
//! | `NeverManaged` | none; faults use the plain JSON error body |
//! | `Sniff` | when the client sends `X-Requested-With: XMLHttpRequest` |
//! | `AlwaysManaged` | always |
//!
//! For a managed request the handler's reply must be a
//! [`ResponseEnvelope`]. Anything else is replaced by an `error` envelope
//! naming the offending response type. Faults are converted in this order,
//! first match wins:
//!
//! 1. Diagnostic mode: `exception` envelope with the fault class, message,
//!    and cause chain.
//! 2. Transient storage contention (when reporting is enabled): `error`
//!    envelope carrying the pre-rendered contention page.
//! 3. Anything else: one `error` log record with the path, then a fixed
//!    generic `exception` envelope.
//!
//! Envelope responses always answer 200; the outcome lives in the body.
//! Unmanaged requests pass through untouched, except that transient storage
//! contention can be answered with the full contention page when
//! `report_unmanaged_storage_errors` is set.

use std::future::Future;

use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::Json;
use formgate_core::{codes, Notice, OutcomeKind, ResponseEnvelope};

use crate::error::AppFault;
use crate::extractors::RequestContext;
use crate::messaging::{MessagePageId, Presentation};
use crate::state::AppState;

/// How a route's responses are normalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Management {
    /// Responses pass through as the handler built them.
    NeverManaged,
    /// Managed when the client sends the request hint.
    Sniff,
    /// Always managed.
    AlwaysManaged,
}

impl Management {
    /// Whether this request gets envelope enforcement.
    pub fn is_managed(self, ctx: &RequestContext) -> bool {
        self.managed_with_hint(ctx.ajax_hint)
    }

    /// [`is_managed`](Self::is_managed) from the bare request hint.
    pub fn managed_with_hint(self, ajax_hint: bool) -> bool {
        match self {
            Self::NeverManaged => false,
            Self::Sniff => ajax_hint,
            Self::AlwaysManaged => true,
        }
    }
}

/// What a handler produced.
#[derive(Debug)]
pub enum Reply {
    /// The protocol response.
    Envelope(ResponseEnvelope),
    /// Any other response; only valid for unmanaged requests.
    Page(Response),
}

impl From<ResponseEnvelope> for Reply {
    fn from(envelope: ResponseEnvelope) -> Self {
        Self::Envelope(envelope)
    }
}

/// Attached to every envelope response for metrics and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvelopeMeta {
    /// The outcome.
    pub kind: OutcomeKind,
    /// Fault class, when the envelope replaced a fault.
    pub fault: Option<&'static str>,
}

/// An envelope ready to be sent.
#[derive(Debug, Clone)]
pub struct Envelope {
    envelope: ResponseEnvelope,
    fault: Option<&'static str>,
}

impl Envelope {
    /// A normal envelope.
    pub fn new(envelope: ResponseEnvelope) -> Self {
        Self {
            envelope,
            fault: None,
        }
    }

    /// An envelope standing in for a fault of class `kind`.
    pub fn fault(envelope: ResponseEnvelope, kind: &'static str) -> Self {
        Self {
            envelope,
            fault: Some(kind),
        }
    }
}

impl From<ResponseEnvelope> for Envelope {
    fn from(envelope: ResponseEnvelope) -> Self {
        Self::new(envelope)
    }
}

impl IntoResponse for Envelope {
    fn into_response(self) -> Response {
        let meta = EnvelopeMeta {
            kind: self.envelope.kind(),
            fault: self.fault,
        };
        let mut response = (StatusCode::OK, Json(self.envelope)).into_response();
        response.extensions_mut().insert(meta);
        response
    }
}

/// The fixed envelope for faults in normal operating mode.
pub fn generic_exception() -> ResponseEnvelope {
    ResponseEnvelope::exception(Notice::new(
        codes::EXCEPTION,
        "Exception",
        "An exception occurred.",
    ))
}

/// Run `handler` and normalize its outcome for this request.
pub async fn dispatch<F, Fut>(
    state: &AppState,
    ctx: &RequestContext,
    management: Management,
    handler: F,
) -> Response
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Reply, AppFault>>,
{
    let managed = management.is_managed(ctx);
    if state.config.dump_requests {
        tracing::info!(
            method = %ctx.method,
            path = %ctx.path,
            query = ?ctx.query,
            managed,
            "request"
        );
    }

    let result = handler().await;

    if !managed {
        return match result {
            Ok(Reply::Page(response)) => response,
            Ok(Reply::Envelope(envelope)) => {
                log_envelope(state, ctx, &envelope);
                Envelope::new(envelope).into_response()
            }
            Err(fault) => unmanaged_fault(state, ctx, fault),
        };
    }

    let envelope = match result {
        Ok(Reply::Envelope(envelope)) => Envelope::new(envelope),
        Ok(Reply::Page(response)) => {
            let response_type = describe_response(&response);
            tracing::warn!(
                path = %ctx.path,
                response_type = %response_type,
                "managed request produced a non-envelope response"
            );
            Envelope::new(ResponseEnvelope::error(Notice::new(
                codes::INVALID_RESPONSE,
                "Invalid Response Type",
                format!("Request generated an invalid response type ({response_type})"),
            )))
        }
        Err(fault) => managed_fault(state, ctx, fault),
    };
    log_envelope(state, ctx, &envelope.envelope);
    envelope.into_response()
}

fn managed_fault(state: &AppState, ctx: &RequestContext, fault: AppFault) -> Envelope {
    let kind = fault.kind();

    if state.config.diagnostic {
        let notice = Notice::new(codes::EXCEPTION, kind, fault.to_string())
            .size("large")
            .backtrace(fault.trace());
        return Envelope::fault(ResponseEnvelope::exception(notice), kind);
    }

    if fault.is_transient_storage() && state.config.report_managed_storage_errors {
        match state
            .pages
            .render(&MessagePageId::storage_contention(), Presentation::Embedded)
        {
            Ok(page) => {
                tracing::warn!(path = %ctx.path, error = %fault, "storage contention");
                let notice = Notice::new(codes::STORAGE_CONTENTION, page.title, page.html);
                return Envelope::fault(ResponseEnvelope::error(notice), kind);
            }
            Err(err) => {
                tracing::warn!(error = %err, "storage contention page unavailable");
            }
        }
    }

    tracing::error!(
        path = %ctx.path,
        status_code = 500,
        fault_kind = kind,
        error = %fault,
        "unhandled fault"
    );
    Envelope::fault(generic_exception(), kind)
}

fn unmanaged_fault(state: &AppState, ctx: &RequestContext, fault: AppFault) -> Response {
    if fault.is_transient_storage() && state.config.report_unmanaged_storage_errors {
        match state
            .pages
            .render(&MessagePageId::storage_contention(), Presentation::FullPage)
        {
            Ok(page) => {
                tracing::warn!(path = %ctx.path, error = %fault, "storage contention");
                return (StatusCode::SERVICE_UNAVAILABLE, Html(page.html)).into_response();
            }
            Err(err) => {
                tracing::warn!(error = %err, "storage contention page unavailable");
            }
        }
    }
    fault.into_response()
}

fn describe_response(response: &Response) -> String {
    response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| format!("status {}", response.status().as_u16()))
}

fn log_envelope(state: &AppState, ctx: &RequestContext, envelope: &ResponseEnvelope) {
    if state.config.dump_requests {
        tracing::info!(
            path = %ctx.path,
            outcome = envelope.kind().as_str(),
            envelope = %envelope.to_value(),
            "response"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::StaticMessagePages;
    use crate::state::AppConfig;
    use formgate_core::MessageCatalog;
    use http_body_util::BodyExt;

    fn state_with(config: AppConfig) -> AppState {
        AppState::with_parts(
            config,
            MessageCatalog::with_defaults(),
            StaticMessagePages::builtin(),
        )
    }

    fn ajax() -> RequestContext {
        RequestContext {
            ajax_hint: true,
            ..RequestContext::new("/things/")
        }
    }

    async fn json(response: Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn run(
        state: &AppState,
        ctx: &RequestContext,
        management: Management,
        result: Result<Reply, AppFault>,
    ) -> Response {
        dispatch(state, ctx, management, move || async move { result }).await
    }

    // -- Classification -------------------------------------------------------

    #[test]
    fn management_classification() {
        let plain = RequestContext::new("/");
        assert!(!Management::NeverManaged.is_managed(&ajax()));
        assert!(Management::Sniff.is_managed(&ajax()));
        assert!(!Management::Sniff.is_managed(&plain));
        assert!(Management::AlwaysManaged.is_managed(&plain));
    }

    // -- Managed replies ------------------------------------------------------

    #[tokio::test]
    async fn envelope_passes_through() {
        let state = state_with(AppConfig::default());
        let response = run(
            &state,
            &ajax(),
            Management::AlwaysManaged,
            Ok(ResponseEnvelope::redirect("/next/").into()),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let meta = *response.extensions().get::<EnvelopeMeta>().unwrap();
        assert_eq!(meta.kind, OutcomeKind::Redirect);
        assert_eq!(meta.fault, None);
        let body = json(response).await;
        assert_eq!(body["formgate"], "envelope");
        assert_eq!(body["location"], "/next/");
    }

    #[tokio::test]
    async fn page_reply_to_managed_request_fails_closed() {
        let state = state_with(AppConfig::default());
        let page = Html("<p>hello</p>").into_response();
        let body = json(run(&state, &ajax(), Management::Sniff, Ok(Reply::Page(page))).await).await;
        assert_eq!(body["error"]["code"], codes::INVALID_RESPONSE);
        assert_eq!(body["error"]["title"], "Invalid Response Type");
        assert_eq!(
            body["error"]["message"],
            "Request generated an invalid response type (text/html; charset=utf-8)"
        );
    }

    // -- Managed faults -------------------------------------------------------

    #[tokio::test]
    async fn diagnostic_mode_exposes_fault() {
        let state = state_with(AppConfig {
            diagnostic: true,
            ..AppConfig::default()
        });
        let fault = AppFault::Internal(anyhow::anyhow!("root cause").context("saving profile"));
        let response = run(&state, &ajax(), Management::AlwaysManaged, Err(fault)).await;
        assert_eq!(
            response.extensions().get::<EnvelopeMeta>().unwrap().fault,
            Some("Internal")
        );
        let body = json(response).await;
        assert_eq!(body["exception"]["code"], codes::EXCEPTION);
        assert_eq!(body["exception"]["title"], "Internal");
        assert_eq!(body["exception"]["message"], "saving profile");
        assert!(body["exception"]["backtrace"]
            .as_str()
            .unwrap()
            .contains("root cause"));
    }

    #[tokio::test]
    async fn diagnostic_mode_wins_over_contention_page() {
        let state = state_with(AppConfig {
            diagnostic: true,
            ..AppConfig::default()
        });
        let fault = AppFault::from(sqlx::Error::PoolTimedOut);
        let body = json(run(&state, &ajax(), Management::AlwaysManaged, Err(fault)).await).await;
        assert_eq!(body["exception"]["title"], "StorageContention");
    }

    #[tokio::test]
    async fn contention_gets_the_try_again_page() {
        let state = state_with(AppConfig::default());
        let fault = AppFault::from(sqlx::Error::PoolTimedOut);
        let body = json(run(&state, &ajax(), Management::AlwaysManaged, Err(fault)).await).await;
        assert_eq!(body["error"]["code"], codes::STORAGE_CONTENTION);
        assert_eq!(body["error"]["title"], "Please Try Again");
        assert!(body["error"]["message"]
            .as_str()
            .unwrap()
            .starts_with("<div class=\"message-page\">"));
        assert!(!body.to_string().contains("pool timed out"));
    }

    #[tokio::test]
    async fn contention_reporting_can_be_disabled() {
        let state = state_with(AppConfig {
            report_managed_storage_errors: false,
            ..AppConfig::default()
        });
        let fault = AppFault::from(sqlx::Error::PoolTimedOut);
        let body = json(run(&state, &ajax(), Management::AlwaysManaged, Err(fault)).await).await;
        assert_eq!(body["exception"]["title"], "Exception");
    }

    #[tokio::test]
    async fn other_faults_get_the_generic_exception() {
        let state = state_with(AppConfig::default());
        let fault = AppFault::Internal(anyhow::anyhow!("secret connection string"));
        let response = run(&state, &ajax(), Management::AlwaysManaged, Err(fault)).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json(response).await;
        assert_eq!(
            body,
            serde_json::json!({
                "formgate": "envelope",
                "exception": {"code": 0, "title": "Exception", "message": "An exception occurred."}
            })
        );
    }

    // -- Unmanaged ------------------------------------------------------------

    #[tokio::test]
    async fn unmanaged_page_passes_through() {
        let state = state_with(AppConfig::default());
        let page = (StatusCode::IM_A_TEAPOT, "short and stout").into_response();
        let response = run(
            &state,
            &RequestContext::new("/"),
            Management::Sniff,
            Ok(Reply::Page(page)),
        )
        .await;
        assert_eq!(response.status(), StatusCode::IM_A_TEAPOT);
        assert!(response.extensions().get::<EnvelopeMeta>().is_none());
    }

    #[tokio::test]
    async fn unmanaged_fault_uses_error_body() {
        let state = state_with(AppConfig::default());
        let fault = AppFault::Internal(anyhow::anyhow!("boom"));
        let response = run(
            &state,
            &RequestContext::new("/"),
            Management::NeverManaged,
            Err(fault),
        )
        .await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = json(response).await;
        assert_eq!(body["error"]["code"], "INTERNAL_ERROR");
    }

    #[tokio::test]
    async fn unmanaged_contention_page_when_enabled() {
        let state = state_with(AppConfig {
            report_unmanaged_storage_errors: true,
            ..AppConfig::default()
        });
        let fault = AppFault::from(sqlx::Error::PoolTimedOut);
        let response = run(
            &state,
            &RequestContext::new("/"),
            Management::NeverManaged,
            Err(fault),
        )
        .await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let html = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(html.contains("<h1>Please Try Again</h1>"));
    }
}
