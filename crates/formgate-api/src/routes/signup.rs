//! # Sign-up Form
//!
//! `POST /signup/` accepts a URL-encoded registration and answers with an
//! envelope. The form uses every multi-field rule:
//!
//! - `contact`: at least one of email or phone.
//! - `passwords`: password and confirmation match.
//! - `distinct`: username and password differ.
//! - `dates`: today ≤ start < end, with today as a non-field operand.
//!
//! Clients validate as the user types by posting to
//! `/signup/?_partial=<field>&_focus=<next field>`.

use std::sync::Arc;

use axum::extract::rejection::FormRejection;
use axum::extract::State;
use axum::response::Response;
use axum::routing::post;
use axum::{Form, Router};
use formgate_core::{
    ConfigError, FieldKind, FieldSpec, FieldValue, FormErrorExtra, FormInstance, FormSpec,
    Mixed, NonField, RequireMatch, RequireOrdering, RequireSome, RequireUnique, RuleOperand,
};
use serde_json::json;

use crate::dispatch::{dispatch, Management};
use crate::error::AppFault;
use crate::extractors::{extract_form, RequestContext};
use crate::state::AppState;
use crate::views::{Flow, FormHooks, FormRequest, FormView, HookFuture, ProcessOutcome};

/// Prefix of every sign-up field.
pub const PREFIX: &str = "signup";

/// Sign-up answers with envelopes only.
pub const MANAGEMENT: Management = Management::AlwaysManaged;

/// Build the sign-up router.
pub fn router() -> Result<Router<AppState>, ConfigError> {
    let view = Arc::new(FormView::builder().form(SignupForm).build()?);
    Ok(Router::new().route(
        "/signup/",
        post(
            move |State(state): State<AppState>,
                  ctx: RequestContext,
                  body: Result<Form<Vec<(String, String)>>, FormRejection>| {
                let view = Arc::clone(&view);
                async move { submit(&view, &state, &ctx, body).await }
            },
        ),
    ))
}

async fn submit(
    view: &FormView,
    state: &AppState,
    ctx: &RequestContext,
    body: Result<Form<Vec<(String, String)>>, FormRejection>,
) -> Response {
    dispatch(state, ctx, MANAGEMENT, move || async move {
        let data = extract_form(body)?;
        view.handle(state, ctx, data).await
    })
    .await
}

/// The sign-up form declaration.
pub fn signup_form() -> FormSpec {
    let today = NonField::deferred(|_| FieldValue::Date(chrono::Local::now().date_naive()))
        .with_label("Today");

    FormSpec::new("signup")
        .with_prefix(PREFIX)
        .field(
            FieldSpec::new("username", "Username", FieldKind::Slug)
                .required()
                .max_length(30),
        )
        .field(FieldSpec::new("email", "Email", FieldKind::Email))
        .field(FieldSpec::new("phone", "Phone", FieldKind::Text).max_length(20))
        .field(
            FieldSpec::new("password", "Password", FieldKind::Text)
                .required()
                .min_length(8),
        )
        .field(FieldSpec::new("password2", "Password (again)", FieldKind::Text).required())
        .field(FieldSpec::new("start", "Start date", FieldKind::Date))
        .field(FieldSpec::new("end", "End date", FieldKind::Date))
        .rule(RequireSome::new("contact", ["email", "phone"]).label("an email address or phone number"))
        .rule(RequireMatch::new("passwords", ["password", "password2"]))
        .rule(RequireUnique::new("distinct", ["username", "password"]))
        .rule(
            RequireOrdering::new(
                "dates",
                [
                    RuleOperand::from(today),
                    RuleOperand::from("start"),
                    RuleOperand::from("end"),
                ],
            )
            .allow_equal_at([0]),
        )
}

struct SignupForm;

impl FormHooks for SignupForm {
    fn build(&self, _req: &FormRequest) -> Result<FormSpec, AppFault> {
        Ok(signup_form())
    }

    fn process_invalid(
        &self,
        _form: &FormInstance,
        req: &FormRequest,
    ) -> Result<Flow<FormErrorExtra>, AppFault> {
        Ok(Flow::Continue(FormErrorExtra {
            toast: Some(vec![req
                .state
                .toast("Please correct the highlighted fields.")
                .class_name("toast-error")]),
            ..FormErrorExtra::default()
        }))
    }

    fn process_form<'a>(
        &'a self,
        form: &'a FormInstance,
        req: &'a FormRequest,
    ) -> HookFuture<'a, Result<ProcessOutcome, AppFault>> {
        Box::pin(async move {
            let username = form
                .cleaned("username")
                .map(ToString::to_string)
                .unwrap_or_default();
            tracing::info!(username = %username, "sign-up accepted");
            let envelope = formgate_core::ResponseEnvelope::mixed(Mixed {
                results: Some(json!({ "username": username })),
                toast: Some(vec![req.state.toast(format!("Welcome, {username}!"))]),
                ..Mixed::default()
            })?;
            Ok(ProcessOutcome::Envelope(envelope))
        })
    }
}
