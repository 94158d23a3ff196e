//! # formgate-core — Form Validation and Response Envelopes
//!
//! The validation and response contract of formgate, with no HTTP
//! dependency. Everything a handler needs to validate a submission and
//! answer in the canonical envelope lives here; the service layer in
//! `formgate-api` only wires it to requests.
//!
//! ## Key Design Principles
//!
//! 1. **Unknown message codes are bugs.** Every code a field kind or rule
//!    can raise is resolved when the form is bound. A code with no message
//!    at any level is a [`ConfigError::UnknownErrorCode`], never a silent
//!    pass-through.
//!
//! 2. **Capability tags instead of type hierarchies.** Each [`FieldKind`]
//!    carries a static, ordered tag chain that drives message fallback.
//!
//! 3. **Partial validation drops, it does not suppress.** Rules always see
//!    every cleaned field; errors beyond the cutoff are removed after the
//!    pass, and rules skip themselves when their fields are out of range.
//!
//! 4. **One envelope shape.** [`ResponseEnvelope`] is a tagged union with a
//!    fixed protocol marker; exactly one outcome is populated.
//!
//! ## Crate Policy
//!
//! - No dependencies on other `formgate-*` crates (this is the leaf of the DAG).
//! - No `unsafe` code.
//! - No `panic!()` or `.unwrap()` outside tests; `expect` only on constant
//!   regex patterns.
//! - Configuration faults are values ([`ConfigError`]), never log lines.

pub mod catalog;
pub mod envelope;
pub mod error;
pub mod field;
pub mod form;
pub mod language;
pub mod rules;

// Re-export primary types for ergonomic imports.
pub use catalog::{MessageCatalog, MessageEntry, MessageTable, Params};
pub use envelope::{
    codes, FormErrorEntry, FormErrorExtra, HtmlUpdate, Mixed, Notice, Outcome, OutcomeKind,
    PartialInfo, ResponseEnvelope, Toast, PROTOCOL_KEY, PROTOCOL_VALUE,
};
pub use error::{ConfigError, FormgateError};
pub use field::{FieldKind, FieldSpec, FieldValue, SubmittedData};
pub use form::{FormInstance, FormSpec, ValidationMode, ALL_FIELDS};
pub use language::join_labels;
pub use rules::{
    MultiFieldRule, NonField, RequireMatch, RequireOrdering, RequireSome, RequireUnique,
    RuleOperand,
};
