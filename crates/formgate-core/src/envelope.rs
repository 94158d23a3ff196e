//! # Response Envelope — The Canonical Wire Shape
//!
//! Every managed response is one JSON object carrying the protocol marker
//! `"formgate": "envelope"` and exactly one outcome:
//!
//! | Outcome | Keys |
//! |---------|------|
//! | mixed | `results?`, `modal?`, `toast?`, `html?` (at least one) |
//! | redirect | `location` |
//! | error | `error {code, title, message, size?}` |
//! | exception | `exception {code, title, message, size?, backtrace?}` |
//! | form error | `form_error [[name, label, [msgs]], ...]`, `partial?`, `error?`, `html?`, `toast?` |
//!
//! The marker lets the client tell a protocol response apart from any
//! other JSON it happens to receive. A payload carrying a different marker
//! value does not deserialize.

use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ConfigError;
use crate::form::{FormInstance, ALL_FIELDS};

/// Key of the protocol marker.
pub const PROTOCOL_KEY: &str = "formgate";

/// Value of the protocol marker.
pub const PROTOCOL_VALUE: &str = "envelope";

/// Toast duration used when none is configured, in milliseconds.
pub const DEFAULT_TOAST_DURATION_MS: u64 = 5000;

/// Well-known notice codes.
pub mod codes {
    /// Generic or diagnostic exception.
    pub const EXCEPTION: i64 = 0;
    /// A handler produced something other than an envelope.
    pub const INVALID_RESPONSE: i64 = 1;
    /// Transient storage contention.
    pub const STORAGE_CONTENTION: i64 = 2;
    /// The submitted form alias is not configured on the view.
    pub const UNKNOWN_FORM: i64 = 3;
    /// A message page.
    pub const MESSAGE: i64 = 4;
}

/// The fixed protocol marker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProtocolMarker;

impl Serialize for ProtocolMarker {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(PROTOCOL_VALUE)
    }
}

impl<'de> Deserialize<'de> for ProtocolMarker {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        if value == PROTOCOL_VALUE {
            Ok(Self)
        } else {
            Err(de::Error::custom(format!(
                "expected protocol marker '{PROTOCOL_VALUE}', got '{value}'"
            )))
        }
    }
}

/// A titled message: modal, error banner, or exception report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notice {
    /// Numeric code; see [`codes`].
    pub code: i64,
    /// Title line.
    pub title: String,
    /// Body text or HTML.
    pub message: String,
    /// Client-side size hint (e.g. `"large"`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
    /// Formatted trace; diagnostic mode only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backtrace: Option<String>,
}

impl Notice {
    /// A notice without size or backtrace.
    pub fn new(code: i64, title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code,
            title: title.into(),
            message: message.into(),
            size: None,
            backtrace: None,
        }
    }

    /// Set the size hint.
    pub fn size(mut self, size: impl Into<String>) -> Self {
        self.size = Some(size.into());
        self
    }

    /// Attach a formatted trace.
    pub fn backtrace(mut self, trace: impl Into<String>) -> Self {
        self.backtrace = Some(trace.into());
        self
    }
}

/// A transient client-side notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Toast {
    /// Display time in milliseconds.
    pub duration: u64,
    /// HTML content.
    pub html: String,
    /// Extra CSS class.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_name: Option<String>,
}

impl Toast {
    /// A toast with the default duration.
    pub fn new(html: impl Into<String>) -> Self {
        Self {
            duration: DEFAULT_TOAST_DURATION_MS,
            html: html.into(),
            class_name: None,
        }
    }

    /// Override the duration.
    pub fn duration(mut self, ms: u64) -> Self {
        self.duration = ms;
        self
    }

    /// Add a CSS class.
    pub fn class_name(mut self, class: impl Into<String>) -> Self {
        self.class_name = Some(class.into());
        self
    }
}

/// Replace the content of the element with `id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HtmlUpdate {
    /// Target element id.
    pub id: String,
    /// Replacement HTML.
    pub html: String,
    /// Classes to add.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_add: Option<String>,
    /// Classes to remove.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_remove: Option<String>,
}

impl HtmlUpdate {
    /// Plain content replacement.
    pub fn new(id: impl Into<String>, html: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            html: html.into(),
            class_add: None,
            class_remove: None,
        }
    }

    /// Classes to add after replacement.
    pub fn class_add(mut self, classes: impl Into<String>) -> Self {
        self.class_add = Some(classes.into());
        self
    }

    /// Classes to remove after replacement.
    pub fn class_remove(mut self, classes: impl Into<String>) -> Self {
        self.class_remove = Some(classes.into());
        self
    }
}

/// Success payload with any combination of results, modal, toasts, and
/// HTML updates.
///
/// Deserializing applies the same checks as [`ResponseEnvelope::mixed`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "MixedParts")]
pub struct Mixed {
    /// Opaque data passed through to the caller.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results: Option<Value>,
    /// Modal dialog.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modal: Option<Notice>,
    /// Toasts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub toast: Option<Vec<Toast>>,
    /// HTML fragment updates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html: Option<Vec<HtmlUpdate>>,
}

impl Mixed {
    fn is_empty(&self) -> bool {
        self.results.is_none() && self.modal.is_none() && self.toast.is_none() && self.html.is_none()
    }

    fn check(&self) -> Result<(), ConfigError> {
        if self.is_empty() {
            return Err(ConfigError::InvalidEnvelope(
                "mixed response needs at least one of results, modal, toast, or html".into(),
            ));
        }
        if let Some(modal) = &self.modal {
            if modal.message.trim().is_empty() {
                return Err(ConfigError::InvalidEnvelope("modal requires a message".into()));
            }
        }
        Ok(())
    }
}

/// Wire form of [`Mixed`] before validation.
#[derive(Deserialize)]
struct MixedParts {
    #[serde(default)]
    results: Option<Value>,
    #[serde(default)]
    modal: Option<Notice>,
    #[serde(default)]
    toast: Option<Vec<Toast>>,
    #[serde(default)]
    html: Option<Vec<HtmlUpdate>>,
}

impl TryFrom<MixedParts> for Mixed {
    type Error = ConfigError;

    fn try_from(parts: MixedParts) -> Result<Self, Self::Error> {
        let mixed = Mixed {
            results: parts.results,
            modal: parts.modal,
            toast: parts.toast,
            html: parts.html,
        };
        mixed.check()?;
        Ok(mixed)
    }
}

/// One `[prefixed name, label, messages]` triple; name and label are
/// `null` for form-wide errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormErrorEntry(pub Option<String>, pub Option<String>, pub Vec<String>);

impl FormErrorEntry {
    /// Prefixed field name, or `None` for form-wide errors.
    pub fn name(&self) -> Option<&str> {
        self.0.as_deref()
    }

    /// Field label, or `None` for form-wide errors.
    pub fn label(&self) -> Option<&str> {
        self.1.as_deref()
    }

    /// Rendered messages.
    pub fn messages(&self) -> &[String] {
        &self.2
    }
}

/// Marks a partial-validation response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialInfo {
    /// The cutoff field, as submitted (prefixed).
    pub last_field: String,
    /// Where the client should restore focus.
    pub focus_field: Option<String>,
}

/// Extras a handler may attach to a form-error envelope.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FormErrorExtra {
    /// Error banner.
    pub error: Option<Notice>,
    /// HTML updates.
    pub html: Option<Vec<HtmlUpdate>>,
    /// Toasts.
    pub toast: Option<Vec<Toast>>,
}

impl FormErrorExtra {
    /// Overlay `other` onto `self`; fields set in `other` win.
    pub fn merge(mut self, other: FormErrorExtra) -> Self {
        if other.error.is_some() {
            self.error = other.error;
        }
        if other.html.is_some() {
            self.html = other.html;
        }
        if other.toast.is_some() {
            self.toast = other.toast;
        }
        self
    }
}

/// Body of a form-error outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormErrorBody {
    /// Error triples in field declaration order, form-wide last.
    pub form_error: Vec<FormErrorEntry>,
    /// Present on partial-validation responses.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partial: Option<PartialInfo>,
    /// Error banner.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Notice>,
    /// HTML updates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html: Option<Vec<HtmlUpdate>>,
    /// Toasts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub toast: Option<Vec<Toast>>,
}

/// Exactly one outcome per envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Outcome {
    /// Validation errors.
    FormError(FormErrorBody),
    /// Navigate elsewhere.
    Redirect {
        /// Target URL.
        location: String,
    },
    /// A handled error.
    Error {
        /// The error notice.
        error: Notice,
    },
    /// An unhandled fault.
    Exception {
        /// The exception notice.
        exception: Notice,
    },
    /// Success.
    Mixed(Mixed),
}

/// Outcome discriminant, for metrics and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutcomeKind {
    /// Mixed success.
    Mixed,
    /// Redirect.
    Redirect,
    /// Error.
    Error,
    /// Exception.
    Exception,
    /// Form error.
    FormError,
}

impl OutcomeKind {
    /// Stable snake_case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mixed => "mixed",
            Self::Redirect => "redirect",
            Self::Error => "error",
            Self::Exception => "exception",
            Self::FormError => "form_error",
        }
    }
}

/// The canonical response envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    #[serde(rename = "formgate")]
    marker: ProtocolMarker,
    #[serde(flatten)]
    outcome: Outcome,
}

impl ResponseEnvelope {
    fn from_outcome(outcome: Outcome) -> Self {
        Self {
            marker: ProtocolMarker,
            outcome,
        }
    }

    /// Plain success: `results: {}`.
    pub fn success() -> Self {
        Self::data(Value::Object(Default::default()))
    }

    /// Success carrying opaque data.
    pub fn data(results: Value) -> Self {
        Self::from_outcome(Outcome::Mixed(Mixed {
            results: Some(results),
            ..Mixed::default()
        }))
    }

    /// Success updating HTML fragments.
    pub fn html(updates: Vec<HtmlUpdate>) -> Self {
        Self::from_outcome(Outcome::Mixed(Mixed {
            html: Some(updates),
            ..Mixed::default()
        }))
    }

    /// Success showing a single toast.
    pub fn toast(toast: Toast) -> Self {
        Self::toasts(vec![toast])
    }

    /// Success showing several toasts.
    pub fn toasts(toasts: Vec<Toast>) -> Self {
        Self::from_outcome(Outcome::Mixed(Mixed {
            toast: Some(toasts),
            ..Mixed::default()
        }))
    }

    /// Success showing a modal. The modal must have a message.
    pub fn modal(modal: Notice) -> Result<Self, ConfigError> {
        Self::mixed(Mixed {
            modal: Some(modal),
            ..Mixed::default()
        })
    }

    /// Success with any combination of parts; at least one is required.
    pub fn mixed(mixed: Mixed) -> Result<Self, ConfigError> {
        mixed.check()?;
        Ok(Self::from_outcome(Outcome::Mixed(mixed)))
    }

    /// Redirect to `location`.
    pub fn redirect(location: impl Into<String>) -> Self {
        Self::from_outcome(Outcome::Redirect {
            location: location.into(),
        })
    }

    /// A handled error.
    pub fn error(notice: Notice) -> Self {
        Self::from_outcome(Outcome::Error { error: notice })
    }

    /// An unhandled fault.
    pub fn exception(notice: Notice) -> Self {
        Self::from_outcome(Outcome::Exception { exception: notice })
    }

    /// Project a validated form's errors.
    ///
    /// `cutoff` and `focus` are the prefixed names from the partial request;
    /// when `cutoff` is set the envelope carries a `partial` block and may
    /// have no errors at all. Without a cutoff an error-free form is a
    /// [`ConfigError::EmptyFormErrors`].
    pub fn form_errors(
        form: &FormInstance,
        cutoff: Option<&str>,
        focus: Option<&str>,
        extra: FormErrorExtra,
    ) -> Result<Self, ConfigError> {
        if cutoff.is_none() && form.errors().is_empty() {
            return Err(ConfigError::EmptyFormErrors {
                form: form.spec().name().to_string(),
            });
        }

        let spec = form.spec();
        let mut entries: Vec<FormErrorEntry> = spec
            .fields()
            .iter()
            .filter_map(|field| {
                let messages = form.field_errors(field.name());
                (!messages.is_empty()).then(|| {
                    FormErrorEntry(
                        Some(spec.add_prefix(field.name())),
                        Some(field.label().to_string()),
                        messages.to_vec(),
                    )
                })
            })
            .collect();
        let global = form.field_errors(ALL_FIELDS);
        if !global.is_empty() {
            entries.push(FormErrorEntry(None, None, global.to_vec()));
        }

        Ok(Self::from_outcome(Outcome::FormError(FormErrorBody {
            form_error: entries,
            partial: cutoff.map(|last| PartialInfo {
                last_field: last.to_string(),
                focus_field: focus.map(str::to_string),
            }),
            error: extra.error,
            html: extra.html,
            toast: extra.toast,
        })))
    }

    /// The outcome.
    pub fn outcome(&self) -> &Outcome {
        &self.outcome
    }

    /// The outcome discriminant.
    pub fn kind(&self) -> OutcomeKind {
        match &self.outcome {
            Outcome::Mixed(_) => OutcomeKind::Mixed,
            Outcome::Redirect { .. } => OutcomeKind::Redirect,
            Outcome::Error { .. } => OutcomeKind::Error,
            Outcome::Exception { .. } => OutcomeKind::Exception,
            Outcome::FormError(_) => OutcomeKind::FormError,
        }
    }

    /// The form-error triple for a prefixed field name.
    pub fn form_error_entry(&self, prefixed_name: &str) -> Option<&FormErrorEntry> {
        match &self.outcome {
            Outcome::FormError(body) => body
                .form_error
                .iter()
                .find(|entry| entry.name() == Some(prefixed_name)),
            _ => None,
        }
    }

    /// Serialize to a JSON value.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| Value::Null)
    }
}
