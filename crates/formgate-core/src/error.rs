//! # Error Types — Configuration Faults and Source Errors
//!
//! Every error in this crate is a *programming or configuration* fault.
//! Expected user-input problems never surface here: they are recorded in a
//! form's error map and projected into a form-error envelope.
//!
//! ## Design
//!
//! - Configuration faults fail loudly with the form, field, and code that
//!   triggered them. They are never downgraded to a pass-through.
//! - `ConfigError` is `Clone + PartialEq` so tests can assert on exact
//!   variants and handlers can carry it across await points cheaply.

use thiserror::Error;

/// Top-level error type for formgate.
#[derive(Error, Debug)]
pub enum FormgateError {
    /// A configuration fault in a form, rule, catalog, or envelope.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A message table could not be parsed.
    #[error("message table parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// A message table could not be read.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// A fatal configuration fault.
///
/// None of these variants describe bad user input. Each one points at a
/// form declaration, a rule, a message table, or a handler that is wired up
/// incorrectly.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A field was declared without a label.
    #[error("field '{field}' on form '{form}' has no label")]
    MissingLabel {
        /// Form name.
        form: String,
        /// Field name.
        field: String,
    },

    /// No message entry exists for an error code at any resolution level.
    #[error("no message for code '{code}' (form '{form}', field '{field}', tags [{tags}])")]
    UnknownErrorCode {
        /// Form name.
        form: String,
        /// Field or rule name used as the lookup key.
        field: String,
        /// The unresolved error code.
        code: String,
        /// Capability tags that were walked, comma-separated.
        tags: String,
    },

    /// A rule or cutoff named a field the form does not declare.
    #[error("form '{form}' has no field named '{field}'")]
    UnknownField {
        /// Form name.
        form: String,
        /// The unknown field name.
        field: String,
    },

    /// Two fields on one form share a name.
    #[error("form '{form}' declares field '{field}' more than once")]
    DuplicateField {
        /// Form name.
        form: String,
        /// The duplicated field name.
        field: String,
    },

    /// A non-field operand was supplied to a rule that only accepts fields.
    #[error("rule '{rule}' on form '{form}' accepts only fields, but was given a non-field value")]
    NonFieldOperand {
        /// Rule name.
        rule: String,
        /// Form name.
        form: String,
    },

    /// Two ordering operands hold values of kinds that cannot be compared.
    #[error("rule '{rule}' cannot compare {left} with {right}")]
    IncomparableValues {
        /// Rule name.
        rule: String,
        /// Kind of the left operand.
        left: String,
        /// Kind of the right operand.
        right: String,
    },

    /// Label composition has no joiner for the locale.
    #[error("label composition is not implemented for locale '{0}'")]
    UnsupportedLocale(String),

    /// A message template references a parameter that was not supplied.
    #[error("message template '{template}' requires parameter '{param}'")]
    MissingParameter {
        /// The missing parameter name.
        param: String,
        /// The template text.
        template: String,
    },

    /// A form-error envelope was requested for a form with no errors and no
    /// partial cutoff.
    #[error("form-error envelope requested for form '{form}' with no errors and no partial cutoff")]
    EmptyFormErrors {
        /// Form name.
        form: String,
    },

    /// An envelope would violate the wire contract.
    #[error("invalid envelope: {0}")]
    InvalidEnvelope(String),

    /// A view declares both a single form and an alias map, or neither.
    #[error("conflicting form configuration: {0}")]
    ConflictingFormConfig(String),

    /// A message table source is malformed.
    #[error("message table source '{source_name}': {reason}")]
    CatalogSource {
        /// Path or label of the source.
        source_name: String,
        /// What is wrong with it.
        reason: String,
    },
}
