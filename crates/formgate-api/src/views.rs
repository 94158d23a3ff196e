//! # Form Views
//!
//! A [`FormView`] handles the POST side of one page: it identifies the
//! submitted form, binds and validates it, and answers with a form-error,
//! redirect, or success envelope.
//!
//! ## Flow
//!
//! ```text
//! prepare_request → resolve alias → build form → prepare_form
//!   ├─ partial (?_partial=<field>): process_partial → form-error envelope with `partial`
//!   └─ full: invalid → process_invalid → form-error envelope
//!            valid   → process_form → Redirect | Envelope | Default
//!                       Default → form target_url → page target_url → configured response
//! ```
//!
//! Per-form behaviour lives in a [`FormHooks`] implementation, one per
//! form alias. Every preparation hook returns a [`Flow`], so a hook can stop
//! the pipeline with its own envelope.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use formgate_core::{
    codes, ConfigError, FormErrorExtra, FormInstance, FormSpec, Mixed, Notice,
    ResponseEnvelope, SubmittedData, ValidationMode,
};

use crate::dispatch::Reply;
use crate::error::AppFault;
use crate::extractors::RequestContext;
use crate::state::AppState;

/// Query parameter naming the partial-validation cutoff field.
pub const PARTIAL_PARAM: &str = "_partial";

/// Query parameter naming the field to refocus after a partial pass.
pub const FOCUS_PARAM: &str = "_focus";

/// Submitted field identifying the form in multi-form views; sent either
/// as `<alias>-form_alias` or unprefixed.
pub const FORM_ALIAS_FIELD: &str = "form_alias";

/// Continue the pipeline with a value, or stop with an envelope.
#[derive(Debug)]
pub enum Flow<T> {
    Continue(T),
    ShortCircuit(ResponseEnvelope),
}

/// What `process_form` decided.
#[derive(Debug)]
pub enum ProcessOutcome {
    /// Send the client to this URL.
    Redirect(String),
    /// Answer with this envelope.
    Envelope(ResponseEnvelope),
    /// Fall back to the configured target URL or response.
    Default,
}

/// Boxed future returned by async hooks.
pub type HookFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Per-request information available to hooks.
#[derive(Clone)]
pub struct FormRequest {
    pub state: AppState,
    pub path: String,
    /// Alias of the submitted form; `None` in single-form views.
    pub alias: Option<String>,
    /// Partial-validation cutoff, as submitted (prefixed).
    pub partial: Option<String>,
    /// Field to refocus after a partial pass.
    pub focus: Option<String>,
}

/// Behaviour for one form. Only [`build`](FormHooks::build) is required.
pub trait FormHooks: Send + Sync {
    /// Declare the form for this request.
    fn build(&self, req: &FormRequest) -> Result<FormSpec, AppFault>;

    /// Adjust the bound form before validation.
    fn prepare_form(&self, _form: &mut FormInstance, _req: &FormRequest) -> Result<Flow<()>, AppFault> {
        Ok(Flow::Continue(()))
    }

    /// Inspect a partially validated form. The returned extras go into the
    /// form-error envelope.
    fn process_partial(
        &self,
        _form: &FormInstance,
        _req: &FormRequest,
    ) -> Result<Flow<FormErrorExtra>, AppFault> {
        Ok(Flow::Continue(FormErrorExtra::default()))
    }

    /// Inspect an invalid form. The returned extras go into the form-error
    /// envelope.
    fn process_invalid(
        &self,
        _form: &FormInstance,
        _req: &FormRequest,
    ) -> Result<Flow<FormErrorExtra>, AppFault> {
        Ok(Flow::Continue(FormErrorExtra::default()))
    }

    /// Act on a valid form.
    fn process_form<'a>(
        &'a self,
        _form: &'a FormInstance,
        _req: &'a FormRequest,
    ) -> HookFuture<'a, Result<ProcessOutcome, AppFault>> {
        Box::pin(async { Ok(ProcessOutcome::Default) })
    }

    /// Where to go after a valid submission when `process_form` returns
    /// [`ProcessOutcome::Default`].
    fn target_url(&self) -> Option<&str> {
        None
    }
}

type PrepareRequest = dyn Fn(&FormRequest) -> Result<Flow<()>, AppFault> + Send + Sync;

enum FormSet {
    Single(Arc<dyn FormHooks>),
    Aliased(BTreeMap<String, Arc<dyn FormHooks>>),
}

/// Handles submissions for one page.
pub struct FormView {
    forms: FormSet,
    target_url: Option<String>,
    always_partially_validate: bool,
    response: Option<Mixed>,
    prepare_request: Option<Box<PrepareRequest>>,
}

/// Builder for [`FormView`].
#[derive(Default)]
pub struct FormViewBuilder {
    single: Option<Arc<dyn FormHooks>>,
    aliased: BTreeMap<String, Arc<dyn FormHooks>>,
    target_url: Option<String>,
    always_partially_validate: bool,
    response: Option<Mixed>,
    prepare_request: Option<Box<PrepareRequest>>,
}

impl FormViewBuilder {
    /// The view's only form.
    pub fn form(mut self, hooks: impl FormHooks + 'static) -> Self {
        self.single = Some(Arc::new(hooks));
        self
    }

    /// Add a form under `alias`. Unprefixed forms take the alias as prefix.
    pub fn alias(mut self, alias: impl Into<String>, hooks: impl FormHooks + 'static) -> Self {
        self.aliased.insert(alias.into(), Arc::new(hooks));
        self
    }

    /// Page-wide redirect target after a valid submission.
    pub fn target_url(mut self, url: impl Into<String>) -> Self {
        self.target_url = Some(url.into());
        self
    }

    /// Treat every submission as partial, up to the form's last field.
    pub fn always_partially_validate(mut self) -> Self {
        self.always_partially_validate = true;
        self
    }

    /// Success response when no target URL applies.
    pub fn response(mut self, response: Mixed) -> Self {
        self.response = Some(response);
        self
    }

    /// Hook run before the form is identified.
    pub fn prepare_request(
        mut self,
        hook: impl Fn(&FormRequest) -> Result<Flow<()>, AppFault> + Send + Sync + 'static,
    ) -> Self {
        self.prepare_request = Some(Box::new(hook));
        self
    }

    /// Finish the view. Exactly one of `form` or `alias` must be used.
    pub fn build(self) -> Result<FormView, ConfigError> {
        let forms = match (self.single, self.aliased.is_empty()) {
            (Some(_), false) => {
                return Err(ConfigError::ConflictingFormConfig(
                    "a view takes either a single form or aliased forms, not both".into(),
                ))
            }
            (None, true) => {
                return Err(ConfigError::ConflictingFormConfig(
                    "a view needs a single form or at least one aliased form".into(),
                ))
            }
            (Some(single), true) => FormSet::Single(single),
            (None, false) => FormSet::Aliased(self.aliased),
        };
        if let Some(response) = &self.response {
            ResponseEnvelope::mixed(response.clone())?;
        }
        Ok(FormView {
            forms,
            target_url: self.target_url,
            always_partially_validate: self.always_partially_validate,
            response: self.response,
            prepare_request: self.prepare_request,
        })
    }
}

impl FormView {
    /// Start configuring a view.
    pub fn builder() -> FormViewBuilder {
        FormViewBuilder::default()
    }

    /// Process one submission.
    pub async fn handle(
        &self,
        state: &AppState,
        ctx: &RequestContext,
        data: SubmittedData,
    ) -> Result<Reply, AppFault> {
        if state.config.dump_requests {
            tracing::info!(path = %ctx.path, submitted = ?data, "form submission");
        }

        let mut req = FormRequest {
            state: state.clone(),
            path: ctx.path.clone(),
            alias: None,
            partial: ctx.query_param(PARTIAL_PARAM).map(str::to_string),
            focus: ctx.query_param(FOCUS_PARAM).map(str::to_string),
        };

        if let Some(prepare) = &self.prepare_request {
            if let Flow::ShortCircuit(envelope) = prepare(&req)? {
                return Ok(envelope.into());
            }
        }

        let Some((alias, hooks)) = self.resolve(&data) else {
            tracing::warn!(path = %ctx.path, "submission names no configured form");
            return Ok(ResponseEnvelope::error(Notice::new(
                codes::UNKNOWN_FORM,
                "Unknown Form",
                "The submitted form could not be identified.",
            ))
            .into());
        };
        req.alias = alias.map(str::to_string);

        let mut spec = hooks.build(&req)?;
        if spec.prefix().is_none() {
            if let Some(alias) = alias {
                spec = spec.with_prefix(alias);
            }
        }
        let mut form = FormInstance::new(spec, Arc::clone(&state.catalog), data)?;

        if let Flow::ShortCircuit(envelope) = hooks.prepare_form(&mut form, &req)? {
            return Ok(envelope.into());
        }

        if self.always_partially_validate && req.partial.is_none() {
            req.partial = form
                .spec()
                .fields()
                .last()
                .map(|field| form.spec().add_prefix(field.name()));
        }

        if let Some(cutoff) = req.partial.clone() {
            form.validate(&ValidationMode::PartialUpTo(cutoff.clone()))?;
            let extra = match hooks.process_partial(&form, &req)? {
                Flow::ShortCircuit(envelope) => return Ok(envelope.into()),
                Flow::Continue(extra) => extra,
            };
            let envelope =
                ResponseEnvelope::form_errors(&form, Some(cutoff.as_str()), req.focus.as_deref(), extra)?;
            return Ok(envelope.into());
        }

        if !form.validate(&ValidationMode::Full)? {
            let extra = match hooks.process_invalid(&form, &req)? {
                Flow::ShortCircuit(envelope) => return Ok(envelope.into()),
                Flow::Continue(extra) => extra,
            };
            return Ok(ResponseEnvelope::form_errors(&form, None, None, extra)?.into());
        }

        match hooks.process_form(&form, &req).await? {
            ProcessOutcome::Envelope(envelope) => return Ok(envelope.into()),
            ProcessOutcome::Redirect(url) => return Ok(ResponseEnvelope::redirect(url).into()),
            ProcessOutcome::Default => {}
        }

        if let Some(url) = hooks.target_url().or(self.target_url.as_deref()) {
            return Ok(ResponseEnvelope::redirect(url).into());
        }
        match &self.response {
            Some(response) => Ok(ResponseEnvelope::mixed(response.clone())?.into()),
            None => Err(ConfigError::InvalidEnvelope(format!(
                "form view at '{}' has no target_url or response for a valid submission",
                ctx.path
            ))
            .into()),
        }
    }

    fn resolve(&self, data: &SubmittedData) -> Option<(Option<&str>, &Arc<dyn FormHooks>)> {
        match &self.forms {
            FormSet::Single(hooks) => Some((None, hooks)),
            FormSet::Aliased(forms) => forms
                .iter()
                .find(|(alias, _)| {
                    data.get(&format!("{alias}-{FORM_ALIAS_FIELD}")) == Some(alias.as_str())
                })
                .or_else(|| {
                    data.get(FORM_ALIAS_FIELD)
                        .and_then(|alias| forms.get_key_value(alias))
                })
                .map(|(alias, hooks)| (Some(alias.as_str()), hooks)),
        }
    }
}
