//! # Message Page Routes
//!
//! `GET /message/{category}/{part1}[/{part2}]` shows a message page. The
//! route sniffs the request: managed requests get a modal envelope with the
//! embedded fragment, everything else the full HTML page. Unknown pages are
//! a 404 for browsers and an `error` envelope for managed clients.
//!
//! [`not_found`] is the router fallback: it shows the `error/404` page the
//! same way, with status 404 for browsers.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use formgate_core::{codes, Notice, ResponseEnvelope};

use crate::dispatch::{dispatch, Management, Reply};
use crate::error::AppFault;
use crate::extractors::RequestContext;
use crate::messaging::{MessagePageId, Presentation, RenderError};
use crate::state::AppState;

/// Build the message router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/message/{category}/{part1}", get(show_message))
        .route("/message/{category}/{part1}/{part2}", get(show_message_detail))
}

/// GET /message/{category}/{part1}
async fn show_message(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path((category, part1)): Path<(String, String)>,
) -> Response {
    render(&state, &ctx, MessagePageId::new(category, part1), StatusCode::OK).await
}

/// GET /message/{category}/{part1}/{part2}
async fn show_message_detail(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path((category, part1, part2)): Path<(String, String, String)>,
) -> Response {
    let id = MessagePageId::new(category, part1).with_part2(part2);
    render(&state, &ctx, id, StatusCode::OK).await
}

/// Fallback for unmatched routes.
pub async fn not_found(State(state): State<AppState>, ctx: RequestContext) -> Response {
    tracing::debug!(path = %ctx.path, "no route");
    render(&state, &ctx, MessagePageId::not_found(), StatusCode::NOT_FOUND).await
}

/// Managed requests always get 200; `page_status` applies to full pages.
async fn render(
    state: &AppState,
    ctx: &RequestContext,
    id: MessagePageId,
    page_status: StatusCode,
) -> Response {
    let management = Management::Sniff;
    let managed = management.is_managed(ctx);
    let presentation = if managed {
        Presentation::Embedded
    } else {
        Presentation::FullPage
    };

    dispatch(state, ctx, management, || async {
        match state.pages.render(&id, presentation) {
            Ok(page) if managed => Ok(Reply::Envelope(ResponseEnvelope::modal(Notice::new(
                codes::MESSAGE,
                page.title,
                page.html,
            ))?)),
            Ok(page) => Ok(Reply::Page((page_status, Html(page.html)).into_response())),
            Err(RenderError::NotFound(key)) if managed => {
                Ok(Reply::Envelope(ResponseEnvelope::error(Notice::new(
                    codes::MESSAGE,
                    "Not Found",
                    format!("There is no message '{key}'."),
                ))))
            }
            Err(err) => Err(AppFault::from(err)),
        }
    })
    .await
}
