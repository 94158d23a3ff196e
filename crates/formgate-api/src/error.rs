//! # Service Faults
//!
//! [`AppFault`] is everything a handler can raise. Managed requests never
//! see it directly: the dispatcher converts it into an `exception` or
//! `error` envelope. The [`IntoResponse`] impl here covers unmanaged
//! requests only, with a structured JSON body that never exposes internal
//! error text.
//!
//! Storage errors are classified on conversion: lock contention,
//! serialization failures, and pool exhaustion are
//! [`AppFault::StorageContention`]; everything else is
//! [`AppFault::Storage`].

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use formgate_core::{ConfigError, FormgateError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::messaging::RenderError;

/// SQLSTATE codes treated as transient contention: serialization failure,
/// deadlock detected, lock not available.
const CONTENTION_SQLSTATES: &[&str] = &["40001", "40P01", "55P03"];

/// Structured JSON error body for unmanaged responses.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

/// Inner error detail.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetail {
    /// Machine-readable error code (e.g., "NOT_FOUND", "INTERNAL_ERROR").
    pub code: String,
    /// Human-readable error message.
    pub message: String,
    /// Additional details, present only for client errors.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// A fault raised while handling a request.
#[derive(Error, Debug)]
pub enum AppFault {
    /// Transient storage contention; retrying may succeed.
    #[error("storage contention: {0}")]
    StorageContention(#[source] sqlx::Error),

    /// Any other storage failure.
    #[error("storage error: {0}")]
    Storage(#[source] sqlx::Error),

    /// A form, rule, catalog, or envelope is wired up incorrectly.
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigError),

    /// A message page could not be rendered.
    #[error("message rendering error: {0}")]
    Rendering(#[from] RenderError),

    /// The request body could not be parsed.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Anything else.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl AppFault {
    /// Stable class name, shown as the title of diagnostic exception
    /// envelopes and attached to log records.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::StorageContention(_) => "StorageContention",
            Self::Storage(_) => "Storage",
            Self::Configuration(_) => "Configuration",
            Self::Rendering(_) => "Rendering",
            Self::BadRequest(_) => "BadRequest",
            Self::Internal(_) => "Internal",
        }
    }

    /// Whether this is transient storage contention.
    pub fn is_transient_storage(&self) -> bool {
        matches!(self, Self::StorageContention(_))
    }

    /// The error and its causes, one per line, outermost first.
    pub fn trace(&self) -> String {
        let mut lines = vec![format!("0: {self}")];
        let mut source = std::error::Error::source(self);
        while let Some(err) = source {
            lines.push(format!("{}: {err}", lines.len()));
            source = err.source();
        }
        lines.join("\n")
    }

    /// Return the HTTP status code and machine-readable error code for this fault.
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            Self::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            Self::Rendering(RenderError::NotFound(_)) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            Self::StorageContention(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, "STORAGE_CONTENTION")
            }
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        }
    }
}

impl From<sqlx::Error> for AppFault {
    fn from(err: sqlx::Error) -> Self {
        if is_contention(&err) {
            Self::StorageContention(err)
        } else {
            Self::Storage(err)
        }
    }
}

impl From<FormgateError> for AppFault {
    fn from(err: FormgateError) -> Self {
        match err {
            FormgateError::Config(config) => Self::Configuration(config),
            other => Self::Internal(other.into()),
        }
    }
}

fn is_contention(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::PoolTimedOut => true,
        sqlx::Error::Database(db) => db
            .code()
            .is_some_and(|code| CONTENTION_SQLSTATES.iter().any(|state| code == *state)),
        _ => false,
    }
}

impl IntoResponse for AppFault {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        // Never expose server-side fault text to clients.
        let message = match status {
            StatusCode::BAD_REQUEST | StatusCode::NOT_FOUND => self.to_string(),
            StatusCode::SERVICE_UNAVAILABLE => {
                "The service is busy; please try again".to_string()
            }
            _ => "An internal error occurred".to_string(),
        };

        if status.is_server_error() {
            tracing::error!(error = %self, fault_kind = self.kind(), status_code = status.as_u16(), "unmanaged request failed");
        }

        let body = ErrorBody {
            error: ErrorDetail {
                code: code.to_string(),
                message,
                details: None,
            },
        };

        (status, Json(body)).into_response()
    }
}

/// Failures while starting the service.
#[derive(Error, Debug)]
pub enum StartupError {
    /// An environment setting could not be parsed.
    #[error("invalid setting {name}={value:?}: {reason}")]
    InvalidSetting {
        /// Variable name.
        name: String,
        /// Raw value.
        value: String,
        /// What was expected.
        reason: String,
    },

    /// Settings that cannot be combined.
    #[error("inconsistent settings: {0}")]
    Inconsistent(String),

    /// Message tables failed to load.
    #[error("failed to load message tables: {0}")]
    Catalog(#[from] FormgateError),

    /// Message pages failed to load.
    #[error("failed to load message pages: {0}")]
    Pages(#[from] RenderError),

    /// A built-in view is misconfigured.
    #[error("invalid view configuration: {0}")]
    View(#[from] ConfigError),
}
