//! # Panic Containment
//!
//! Wraps the router in `tower_http::catch_panic::CatchPanicLayer` so a
//! panicking handler still answers with an `exception` envelope. In
//! diagnostic mode the panic payload is shown; otherwise the client gets
//! the fixed generic notice and the payload is logged once.

use std::any::Any;

use axum::body::Body;
use axum::http::Response;
use axum::response::IntoResponse;
use formgate_core::{codes, Notice, ResponseEnvelope};
use tower_http::catch_panic::{CatchPanicLayer, ResponseForPanic};

use crate::dispatch::{generic_exception, Envelope};

/// Fault kind reported for panics.
pub const PANIC_KIND: &str = "Panic";

/// Turns a panic payload into an envelope response.
#[derive(Debug, Clone, Copy)]
pub struct PanicEnvelope {
    diagnostic: bool,
}

impl ResponseForPanic for PanicEnvelope {
    type ResponseBody = Body;

    fn response_for_panic(&mut self, err: Box<dyn Any + Send + 'static>) -> Response<Body> {
        let detail = panic_message(err.as_ref());
        let envelope = if self.diagnostic {
            ResponseEnvelope::exception(
                Notice::new(codes::EXCEPTION, PANIC_KIND, detail).size("large"),
            )
        } else {
            tracing::error!(status_code = 500, fault_kind = PANIC_KIND, panic = %detail, "handler panicked");
            generic_exception()
        };
        Envelope::fault(envelope, PANIC_KIND).into_response()
    }
}

/// The panic layer.
pub fn layer(diagnostic: bool) -> CatchPanicLayer<PanicEnvelope> {
    CatchPanicLayer::custom(PanicEnvelope { diagnostic })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic with a non-string payload".to_string()
    }
}
