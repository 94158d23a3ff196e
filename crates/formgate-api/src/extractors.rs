//! # Custom Extractors
//!
//! [`RequestContext`] carries what the dispatcher and form views need from
//! the request head: the path, the query parameters, and the managed-request
//! hint. [`extract_form`] maps URL-encoded bodies to [`SubmittedData`],
//! turning parse failures into [`AppFault::BadRequest`].

use std::collections::HashMap;
use std::convert::Infallible;

use axum::extract::rejection::FormRejection;
use axum::extract::{FromRequestParts, Query};
use axum::http::request::Parts;
use axum::http::{HeaderMap, Method};
use axum::Form;
use formgate_core::SubmittedData;

use crate::error::AppFault;

/// Header a client sets to ask for an envelope response.
pub const REQUESTED_WITH_HEADER: &str = "x-requested-with";

/// Value of [`REQUESTED_WITH_HEADER`] marking a managed request.
pub const REQUESTED_WITH_VALUE: &str = "XMLHttpRequest";

/// Whether the client asked for an envelope response.
pub fn is_ajax(headers: &HeaderMap) -> bool {
    headers
        .get(REQUESTED_WITH_HEADER)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case(REQUESTED_WITH_VALUE))
}

/// Request head as seen by the dispatcher.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub method: Method,
    pub path: String,
    pub query: HashMap<String, String>,
    pub ajax_hint: bool,
}

impl RequestContext {
    /// A context for `path` with no query and no hint.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    /// A query parameter.
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(String::as_str)
    }
}

impl<S: Send + Sync> FromRequestParts<S> for RequestContext {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        // A malformed query string is treated as empty rather than rejected.
        let query = Query::<HashMap<String, String>>::try_from_uri(&parts.uri)
            .map(|Query(query)| query)
            .unwrap_or_default();
        Ok(Self {
            method: parts.method.clone(),
            path: parts.uri.path().to_string(),
            query,
            ajax_hint: is_ajax(&parts.headers),
        })
    }
}

/// Extract a URL-encoded body, mapping rejections to [`AppFault::BadRequest`].
///
/// Handlers take the body as a `Result` so the rejection reaches the
/// dispatcher instead of short-circuiting as a plain-text 4xx:
/// ```ignore
/// async fn handler(body: Result<Form<Vec<(String, String)>>, FormRejection>) -> Response {
///     dispatch(&state, &ctx, Management::AlwaysManaged, || async {
///         let data = extract_form(body)?;
///         // use data...
///     }).await
/// }
/// ```
pub fn extract_form(
    result: Result<Form<Vec<(String, String)>>, FormRejection>,
) -> Result<SubmittedData, AppFault> {
    result
        .map(|Form(pairs)| SubmittedData::from_pairs(pairs))
        .map_err(|err| AppFault::BadRequest(err.body_text()))
}
