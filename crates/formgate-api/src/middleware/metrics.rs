//! # Envelope Metrics
//!
//! Lightweight request metrics using atomic counters. Besides raw request
//! and HTTP error counts, the middleware reads the [`EnvelopeMeta`] the
//! dispatcher attaches to every envelope response, so managed outcomes are
//! counted even though they all answer 200.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::extract::Request;
use axum::middleware::Next;
use axum::response::Response;
use formgate_core::OutcomeKind;

use crate::dispatch::EnvelopeMeta;

/// Shared metrics state.
#[derive(Debug, Clone)]
pub struct ApiMetrics {
    pub request_count: Arc<AtomicU64>,
    pub error_count: Arc<AtomicU64>,
    pub managed_count: Arc<AtomicU64>,
    pub fault_count: Arc<AtomicU64>,
    pub form_error_count: Arc<AtomicU64>,
}

impl ApiMetrics {
    /// Create a new metrics instance.
    pub fn new() -> Self {
        Self {
            request_count: Arc::new(AtomicU64::new(0)),
            error_count: Arc::new(AtomicU64::new(0)),
            managed_count: Arc::new(AtomicU64::new(0)),
            fault_count: Arc::new(AtomicU64::new(0)),
            form_error_count: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Requests seen.
    pub fn requests(&self) -> u64 {
        self.request_count.load(Ordering::Relaxed)
    }

    /// Responses with a 4xx or 5xx status.
    pub fn errors(&self) -> u64 {
        self.error_count.load(Ordering::Relaxed)
    }

    /// Envelope responses.
    pub fn managed(&self) -> u64 {
        self.managed_count.load(Ordering::Relaxed)
    }

    /// Envelopes produced from a fault or panic.
    pub fn faults(&self) -> u64 {
        self.fault_count.load(Ordering::Relaxed)
    }

    /// Form-error envelopes.
    pub fn form_errors(&self) -> u64 {
        self.form_error_count.load(Ordering::Relaxed)
    }

    fn record(&self, response: &Response) {
        self.request_count.fetch_add(1, Ordering::Relaxed);
        if response.status().is_server_error() || response.status().is_client_error() {
            self.error_count.fetch_add(1, Ordering::Relaxed);
        }
        if let Some(meta) = response.extensions().get::<EnvelopeMeta>() {
            self.managed_count.fetch_add(1, Ordering::Relaxed);
            if meta.fault.is_some() {
                self.fault_count.fetch_add(1, Ordering::Relaxed);
            }
            if meta.kind == OutcomeKind::FormError {
                self.form_error_count.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

impl Default for ApiMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Middleware that updates the counters from each response.
pub async fn metrics_middleware(request: Request, next: Next) -> Response {
    let metrics = request.extensions().get::<ApiMetrics>().cloned();

    let response = next.run(request).await;

    if let Some(m) = metrics {
        m.record(&response);
    }

    response
}
