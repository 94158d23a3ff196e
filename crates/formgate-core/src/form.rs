//! # Forms — Declarations, Instances, and the Validation Engine
//!
//! A [`FormSpec`] is an immutable declaration: name, optional prefix,
//! locale, ordered fields, and multi-field rules. It is built fresh per
//! request and never mutated once bound.
//!
//! A [`FormInstance`] binds a spec to a catalog and one submission, then
//! validates once in either [`ValidationMode::Full`] or
//! [`ValidationMode::PartialUpTo`].
//!
//! ## Partial Validation
//!
//! 1. Every field is cleaned, in declaration order.
//! 2. Every rule runs against the cleaned values. Rules skip themselves when
//!    one of their fields lies beyond the cutoff.
//! 3. Errors on fields beyond the cutoff are dropped *after* the pass.
//!    Form-wide errors are always kept.
//!
//! An unknown cutoff name puts every field in range, so focusing a
//! non-field control (a submit button, say) behaves like full validation.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;

use crate::catalog::{MessageCatalog, Params};
use crate::error::ConfigError;
use crate::field::{FieldSpec, FieldValue, SubmittedData};
use crate::language::{join_labels, DEFAULT_LOCALE};
use crate::rules::{MultiFieldRule, RuleOperand, RuleScope};

/// Error-map key for form-wide errors.
pub const ALL_FIELDS: &str = "__all__";

/// Cleaned values of every field that passed its own cleaning. `None`
/// means the field was empty and optional.
pub type CleanedData = BTreeMap<String, Option<FieldValue>>;

/// Rendered messages per field name, plus [`ALL_FIELDS`].
pub type ErrorMap = BTreeMap<String, Vec<String>>;

/// How much of the form to validate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationMode {
    /// Every field.
    Full,
    /// Fields up to and including the named one (prefixed or not).
    PartialUpTo(String),
}

impl ValidationMode {
    /// `PartialUpTo` when a cutoff is given, otherwise `Full`.
    pub fn from_cutoff(cutoff: Option<&str>) -> Self {
        match cutoff {
            Some(name) if !name.is_empty() => Self::PartialUpTo(name.to_string()),
            _ => Self::Full,
        }
    }

    /// The cutoff name, if partial.
    pub fn cutoff(&self) -> Option<&str> {
        match self {
            Self::Full => None,
            Self::PartialUpTo(name) => Some(name),
        }
    }
}

/// An immutable form declaration.
#[derive(Debug)]
pub struct FormSpec {
    name: String,
    prefix: Option<String>,
    locale: String,
    fields: Vec<FieldSpec>,
    rules: Vec<MultiFieldRule>,
}

impl FormSpec {
    /// An empty form. `name` selects form-specific message overrides.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            prefix: None,
            locale: DEFAULT_LOCALE.to_string(),
            fields: Vec::new(),
            rules: Vec::new(),
        }
    }

    /// Prefix submitted names with `prefix-`.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        self.prefix = (!prefix.is_empty()).then_some(prefix);
        self
    }

    /// Locale used for label composition.
    pub fn with_locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = locale.into();
        self
    }

    /// Append a field; declaration order is significant.
    pub fn field(mut self, field: FieldSpec) -> Self {
        self.fields.push(field);
        self
    }

    /// Append a multi-field rule; rules run in the order added.
    pub fn rule(mut self, rule: impl Into<MultiFieldRule>) -> Self {
        self.rules.push(rule.into());
        self
    }

    /// Form name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Prefix, if any.
    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }

    /// Locale.
    pub fn locale(&self) -> &str {
        &self.locale
    }

    /// Fields in declaration order.
    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    /// Rules in evaluation order.
    pub fn rules(&self) -> &[MultiFieldRule] {
        &self.rules
    }

    /// Look up a field by unprefixed name.
    pub fn get_field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name() == name)
    }

    /// `prefix-name`, or `name` when unprefixed.
    pub fn add_prefix(&self, name: &str) -> String {
        match &self.prefix {
            Some(prefix) => format!("{prefix}-{name}"),
            None => name.to_string(),
        }
    }

    /// Strip this form's prefix from `name` if present.
    pub fn strip_prefix<'n>(&self, name: &'n str) -> &'n str {
        self.prefix
            .as_deref()
            .and_then(|prefix| name.strip_prefix(prefix))
            .and_then(|rest| rest.strip_prefix('-'))
            .unwrap_or(name)
    }

    /// Check the declaration against `catalog`.
    ///
    /// Fails on a missing label, a duplicate field, a rule naming an
    /// undeclared field, a non-field operand on a field-only rule, or any
    /// error code (field or rule) the catalog cannot resolve.
    pub fn check(&self, catalog: &MessageCatalog) -> Result<(), ConfigError> {
        join_labels::<&str>(&[], &self.locale)?;
        let mut seen = HashSet::new();
        for field in &self.fields {
            if !seen.insert(field.name()) {
                return Err(ConfigError::DuplicateField {
                    form: self.name.clone(),
                    field: field.name().to_string(),
                });
            }
            if field.label().trim().is_empty() {
                return Err(ConfigError::MissingLabel {
                    form: self.name.clone(),
                    field: field.name().to_string(),
                });
            }
            let tags = field.kind().capability_tags();
            for code in field.kind().error_codes() {
                catalog.resolve(&self.name, tags, field.name(), code)?;
            }
        }

        for rule in &self.rules {
            for operand in rule.operands() {
                match operand {
                    RuleOperand::Field(name) if !seen.contains(name.as_str()) => {
                        return Err(ConfigError::UnknownField {
                            form: self.name.clone(),
                            field: name.clone(),
                        });
                    }
                    RuleOperand::NonField(_) if !rule.accepts_non_fields() => {
                        return Err(ConfigError::NonFieldOperand {
                            rule: rule.name().to_string(),
                            form: self.name.clone(),
                        });
                    }
                    _ => {}
                }
            }
            for code in rule.error_codes() {
                catalog.resolve(&self.name, &[], rule.name(), code)?;
            }
        }
        Ok(())
    }
}

/// One submission bound to a form declaration.
#[derive(Debug)]
pub struct FormInstance {
    spec: FormSpec,
    catalog: Arc<MessageCatalog>,
    data: SubmittedData,
    cleaned: CleanedData,
    errors: ErrorMap,
    validated: bool,
}

impl FormInstance {
    /// Bind `spec` to a submission. Fails if the declaration is
    /// misconfigured (see [`FormSpec::check`]).
    pub fn new(
        spec: FormSpec,
        catalog: Arc<MessageCatalog>,
        data: SubmittedData,
    ) -> Result<Self, ConfigError> {
        spec.check(&catalog)?;
        Ok(Self {
            spec,
            catalog,
            data,
            cleaned: CleanedData::new(),
            errors: ErrorMap::new(),
            validated: false,
        })
    }

    /// The declaration.
    pub fn spec(&self) -> &FormSpec {
        &self.spec
    }

    /// The raw submission.
    pub fn data(&self) -> &SubmittedData {
        &self.data
    }

    /// Run the validation pass and return whether the form is valid.
    ///
    /// The pass runs once; later calls report the stored outcome without
    /// re-validating.
    pub fn validate(&mut self, mode: &ValidationMode) -> Result<bool, ConfigError> {
        if self.validated {
            return Ok(self.is_valid());
        }

        let partial = self.partial_set(mode);
        self.clean_fields()?;

        let mut scope = RuleScope {
            form: &self.spec.name,
            locale: &self.spec.locale,
            catalog: &self.catalog,
            fields: &self.spec.fields,
            cleaned: &self.cleaned,
            partial: partial.as_ref(),
            errors: &mut self.errors,
        };
        for rule in &self.spec.rules {
            rule.apply(&mut scope)?;
        }

        if let Some(in_range) = &partial {
            self.errors
                .retain(|name, _| name == ALL_FIELDS || in_range.contains(name));
        }
        self.validated = true;
        Ok(self.is_valid())
    }

    /// Whether the form has been validated and carries no errors.
    pub fn is_valid(&self) -> bool {
        self.validated && self.errors.is_empty()
    }

    /// Whether the validation pass has run.
    pub fn is_validated(&self) -> bool {
        self.validated
    }

    /// Every error, keyed by unprefixed field name or [`ALL_FIELDS`].
    pub fn errors(&self) -> &ErrorMap {
        &self.errors
    }

    /// Errors on one field.
    pub fn field_errors(&self, name: &str) -> &[String] {
        self.errors.get(name).map(Vec::as_slice).unwrap_or_default()
    }

    /// Form-wide errors.
    pub fn form_errors(&self) -> &[String] {
        self.field_errors(ALL_FIELDS)
    }

    /// Cleaned values.
    pub fn cleaned_data(&self) -> &CleanedData {
        &self.cleaned
    }

    /// The cleaned value of one field, if it cleaned to a value.
    pub fn cleaned(&self, name: &str) -> Option<&FieldValue> {
        self.cleaned.get(name).and_then(Option::as_ref)
    }

    /// Attach an error to a field after validation, e.g. a uniqueness
    /// failure only the handler can detect. The message resolves through
    /// the field's capability chain.
    pub fn add_error(&mut self, field: &str, code: &str, params: &Params) -> Result<(), ConfigError> {
        let spec = self
            .spec
            .get_field(field)
            .ok_or_else(|| ConfigError::UnknownField {
                form: self.spec.name.clone(),
                field: field.to_string(),
            })?;
        let message = self.catalog.render(
            &self.spec.name,
            spec.kind().capability_tags(),
            spec.name(),
            code,
            spec.label(),
            params,
        )?;
        self.cleaned.remove(field);
        self.errors.entry(field.to_string()).or_default().push(message);
        Ok(())
    }

    /// Attach a form-wide error.
    pub fn add_form_error(&mut self, code: &str, params: &Params) -> Result<(), ConfigError> {
        let message = self
            .catalog
            .render(&self.spec.name, &[], ALL_FIELDS, code, "", params)?;
        self.errors.entry(ALL_FIELDS.to_string()).or_default().push(message);
        Ok(())
    }

    fn partial_set(&self, mode: &ValidationMode) -> Option<BTreeSet<String>> {
        let cutoff = self.spec.strip_prefix(mode.cutoff()?);
        let names = self.spec.fields.iter().map(|f| f.name().to_string());
        Some(match self.spec.fields.iter().position(|f| f.name() == cutoff) {
            Some(idx) => names.take(idx + 1).collect(),
            None => names.collect(),
        })
    }

    fn clean_fields(&mut self) -> Result<(), ConfigError> {
        for field in &self.spec.fields {
            let raw = self.data.get_all(&self.spec.add_prefix(field.name()));
            match field.clean(raw) {
                Ok(value) => {
                    self.cleaned.insert(field.name().to_string(), value);
                }
                Err(failure) => {
                    let message = self.catalog.render(
                        &self.spec.name,
                        field.kind().capability_tags(),
                        field.name(),
                        failure.code,
                        field.label(),
                        &failure.params,
                    )?;
                    self.errors
                        .entry(field.name().to_string())
                        .or_default()
                        .push(message);
                }
            }
        }
        Ok(())
    }
}
