//! # Login Gate
//!
//! When `login_required` is set, gated routes need a bearer token matching
//! the configured secret. Unauthenticated requests are sent to the login
//! URL: managed requests get a `redirect` envelope, everything else a
//! `303 See Other`. The original path travels along as the `next` query
//! parameter.
//!
//! A gated router declares its [`Management`] by installing it as a request
//! extension outside the gate. Without one the gate sniffs the
//! `X-Requested-With` hint.

use axum::extract::Request;
use axum::http::{header, HeaderMap};
use axum::middleware::Next;
use axum::response::{IntoResponse, Redirect, Response};
use formgate_core::ResponseEnvelope;
use subtle::ConstantTimeEq;

use crate::dispatch::{Envelope, Management};
use crate::extractors::is_ajax;
use crate::state::AppConfig;

/// Gate configuration injected into request extensions.
///
/// Custom `Debug` redacts the token value to prevent credential leakage in logs.
#[derive(Clone)]
pub struct LoginGate {
    pub required: bool,
    pub token: Option<String>,
    pub login_url: String,
}

impl LoginGate {
    /// The gate described by `config`.
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            required: config.login_required,
            token: config.auth_token.clone(),
            login_url: config.login_url.clone(),
        }
    }

    /// Login URL carrying `next` so the client can come back.
    fn redirect_target(&self, next: &str) -> String {
        let encoded: String = url::form_urlencoded::byte_serialize(next.as_bytes()).collect();
        let separator = if self.login_url.contains('?') { '&' } else { '?' };
        format!("{}{separator}next={encoded}", self.login_url)
    }
}

impl std::fmt::Debug for LoginGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginGate")
            .field("required", &self.required)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .field("login_url", &self.login_url)
            .finish()
    }
}

/// Constant-time comparison of bearer tokens.
///
/// When lengths differ, performs a dummy comparison so timing does not
/// depend on where the mismatch is.
fn constant_time_token_eq(provided: &str, expected: &str) -> bool {
    let provided = provided.as_bytes();
    let expected = expected.as_bytes();
    if provided.len() != expected.len() {
        let _ = expected.ct_eq(expected);
        return false;
    }
    provided.ct_eq(expected).into()
}

/// Check the `Authorization` header against `expected`.
fn check_bearer(headers: &HeaderMap, expected: Option<&str>) -> Result<(), &'static str> {
    let Some(expected) = expected else {
        return Err("no token configured");
    };
    match headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
    {
        Some(value) => match value.strip_prefix("Bearer ") {
            Some(provided) if constant_time_token_eq(provided, expected) => Ok(()),
            Some(_) => Err("invalid bearer token"),
            None => Err("authorization header must use Bearer scheme"),
        },
        None => Err("missing authorization header"),
    }
}

/// Send unauthenticated requests to the login URL.
///
/// Does nothing when no [`LoginGate`] is installed or the gate is off.
pub async fn login_gate_middleware(request: Request, next: Next) -> Response {
    let gate = request
        .extensions()
        .get::<LoginGate>()
        .filter(|gate| gate.required)
        .cloned();
    let Some(gate) = gate else {
        return next.run(request).await;
    };

    match check_bearer(request.headers(), gate.token.as_deref()) {
        Ok(()) => next.run(request).await,
        Err(reason) => {
            let path = request
                .uri()
                .path_and_query()
                .map(|pq| pq.as_str())
                .unwrap_or("/");
            tracing::warn!(reason, path, "login required");
            let target = gate.redirect_target(path);
            let management = request
                .extensions()
                .get::<Management>()
                .copied()
                .unwrap_or(Management::Sniff);
            if management.managed_with_hint(is_ajax(request.headers())) {
                Envelope::new(ResponseEnvelope::redirect(target)).into_response()
            } else {
                Redirect::to(&target).into_response()
            }
        }
    }
}
