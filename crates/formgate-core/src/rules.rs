//! # Multi-Field Rules
//!
//! Cross-field validators that run after every field has been cleaned.
//! Each rule writes into the form's error map and reports whether it
//! passed; none of them fail for bad user input.
//!
//! | Rule | Codes | Skips when |
//! |------|-------|------------|
//! | [`RequireSome`] | `min_required`, `max_allowed` | any field outside the partial set |
//! | [`RequireMatch`] | `nomatch` | any field outside the partial set or invalid |
//! | [`RequireUnique`] | `not_unique` | any field outside the partial set |
//! | [`RequireOrdering`] | `wrong_order`, `wrong_order_equal` | any field outside the partial set; per pair, either side absent |
//!
//! Rule messages are resolved with the rule name standing in for the field
//! name, so a form table can override `rule1__min_required` per rule.
//!
//! Only [`RequireOrdering`] accepts [`NonField`] operands. Passing one to
//! any other rule is a [`ConfigError::NonFieldOperand`], detected when the
//! form is bound.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;

use once_cell::sync::OnceCell;

use crate::catalog::{MessageCatalog, Params};
use crate::error::ConfigError;
use crate::field::{FieldSpec, FieldValue};
use crate::form::{CleanedData, ErrorMap};
use crate::language::join_labels;

type Compute = Box<dyn Fn(&CleanedData) -> FieldValue + Send + Sync>;

enum NonFieldSource {
    Literal(FieldValue),
    Deferred {
        compute: Compute,
        memo: OnceCell<FieldValue>,
    },
}

/// A value that is not a form field, usable as an ordering endpoint
/// (e.g. "today").
///
/// Deferred values are computed at most once and memoized.
pub struct NonField {
    label: Option<String>,
    source: NonFieldSource,
}

impl NonField {
    /// A fixed value.
    pub fn literal(value: FieldValue) -> Self {
        Self {
            label: None,
            source: NonFieldSource::Literal(value),
        }
    }

    /// A value computed from the cleaned data on first use.
    pub fn deferred(compute: impl Fn(&CleanedData) -> FieldValue + Send + Sync + 'static) -> Self {
        Self {
            label: None,
            source: NonFieldSource::Deferred {
                compute: Box::new(compute),
                memo: OnceCell::new(),
            },
        }
    }

    /// Label used in messages; defaults to the value's display text.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// The operand's value.
    pub fn value(&self, cleaned: &CleanedData) -> &FieldValue {
        match &self.source {
            NonFieldSource::Literal(value) => value,
            NonFieldSource::Deferred { compute, memo } => memo.get_or_init(|| compute(cleaned)),
        }
    }

    /// The operand's label.
    pub fn label(&self, cleaned: &CleanedData) -> String {
        match &self.label {
            Some(label) => label.clone(),
            None => self.value(cleaned).to_string(),
        }
    }
}

impl fmt::Debug for NonField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let source = match &self.source {
            NonFieldSource::Literal(value) => format!("Literal({value:?})"),
            NonFieldSource::Deferred { memo, .. } => match memo.get() {
                Some(value) => format!("Deferred(memo = {value:?})"),
                None => "Deferred(pending)".to_string(),
            },
        };
        f.debug_struct("NonField")
            .field("label", &self.label)
            .field("source", &source)
            .finish()
    }
}

/// One operand of a multi-field rule.
#[derive(Debug)]
pub enum RuleOperand {
    /// A declared field, by unprefixed name.
    Field(String),
    /// A value from outside the form.
    NonField(NonField),
}

impl RuleOperand {
    /// The field name, if this operand is a field.
    pub fn field_name(&self) -> Option<&str> {
        match self {
            Self::Field(name) => Some(name),
            Self::NonField(_) => None,
        }
    }
}

impl From<&str> for RuleOperand {
    fn from(name: &str) -> Self {
        Self::Field(name.to_string())
    }
}

impl From<String> for RuleOperand {
    fn from(name: String) -> Self {
        Self::Field(name)
    }
}

impl From<NonField> for RuleOperand {
    fn from(value: NonField) -> Self {
        Self::NonField(value)
    }
}

fn operands<I, O>(items: I) -> Vec<RuleOperand>
where
    I: IntoIterator<Item = O>,
    O: Into<RuleOperand>,
{
    items.into_iter().map(Into::into).collect()
}

/// Require between `min` and `max` of the fields to have a value.
///
/// Boolean fields always have a value (`false` when unchecked), so they
/// are not meaningful here.
#[derive(Debug)]
pub struct RequireSome {
    name: String,
    operands: Vec<RuleOperand>,
    min: usize,
    max: Option<usize>,
    label: Option<String>,
}

impl RequireSome {
    /// At least one of `fields`, no upper bound.
    pub fn new<I, O>(name: impl Into<String>, fields: I) -> Self
    where
        I: IntoIterator<Item = O>,
        O: Into<RuleOperand>,
    {
        Self {
            name: name.into(),
            operands: operands(fields),
            min: 1,
            max: None,
            label: None,
        }
    }

    /// Minimum number of fields with a value.
    pub fn min(mut self, min: usize) -> Self {
        self.min = min;
        self
    }

    /// Maximum number of fields with a value.
    pub fn max(mut self, max: usize) -> Self {
        self.max = Some(max);
        self
    }

    /// Composite label used in place of the joined field labels.
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    fn apply(&self, scope: &mut RuleScope<'_>) -> Result<bool, ConfigError> {
        if !scope.are_present(&self.operands) {
            return Ok(true);
        }
        let values = scope.field_values(&self.name, &self.operands)?;
        let given = values
            .iter()
            .filter(|v| v.is_some_and(|v| !v.is_empty()))
            .count();

        let mut ok = true;
        if given < self.min {
            let params = single_param("min_required", self.min);
            scope.add_errors(&self.name, &self.operands, "min_required", self.label.as_deref(), &params)?;
            ok = false;
        }
        if let Some(max) = self.max {
            if given > max {
                let params = single_param("max_allowed", max);
                scope.add_errors(&self.name, &self.operands, "max_allowed", self.label.as_deref(), &params)?;
                ok = false;
            }
        }
        Ok(ok)
    }
}

/// Require every field to hold the same value (e.g. password confirmation).
#[derive(Debug)]
pub struct RequireMatch {
    name: String,
    operands: Vec<RuleOperand>,
    label: Option<String>,
}

impl RequireMatch {
    /// Match all of `fields` against the first.
    pub fn new<I, O>(name: impl Into<String>, fields: I) -> Self
    where
        I: IntoIterator<Item = O>,
        O: Into<RuleOperand>,
    {
        Self {
            name: name.into(),
            operands: operands(fields),
            label: None,
        }
    }

    /// Composite label used in place of the joined field labels.
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    fn apply(&self, scope: &mut RuleScope<'_>) -> Result<bool, ConfigError> {
        if !scope.are_present(&self.operands) || !scope.are_valid(&self.operands) {
            return Ok(true);
        }
        let values = scope.field_values(&self.name, &self.operands)?;
        let Some((first, rest)) = values.split_first() else {
            return Ok(true);
        };
        if rest.iter().all(|v| v == first) {
            return Ok(true);
        }
        scope.add_errors(&self.name, &self.operands, "nomatch", self.label.as_deref(), &Params::new())?;
        Ok(false)
    }
}

/// Require non-empty values to be pairwise distinct.
///
/// Only fields that take part in a duplicate pair are flagged. Empty values
/// never duplicate each other.
#[derive(Debug)]
pub struct RequireUnique {
    name: String,
    operands: Vec<RuleOperand>,
}

impl RequireUnique {
    /// Distinctness over `fields`.
    pub fn new<I, O>(name: impl Into<String>, fields: I) -> Self
    where
        I: IntoIterator<Item = O>,
        O: Into<RuleOperand>,
    {
        Self {
            name: name.into(),
            operands: operands(fields),
        }
    }

    fn apply(&self, scope: &mut RuleScope<'_>) -> Result<bool, ConfigError> {
        if !scope.are_present(&self.operands) {
            return Ok(true);
        }
        let values = scope.field_values(&self.name, &self.operands)?;
        let filled: Vec<Option<&FieldValue>> = values
            .iter()
            .map(|v| v.filter(|v| !v.is_empty()))
            .collect();

        let mut flagged = vec![false; filled.len()];
        for i in 0..filled.len() {
            let Some(a) = filled[i] else { continue };
            for j in (i + 1)..filled.len() {
                if filled[j] == Some(a) {
                    flagged[i] = true;
                    flagged[j] = true;
                }
            }
        }
        if !flagged.contains(&true) {
            return Ok(true);
        }

        // The label names the whole set, not only the duplicates.
        let label = scope.composite_label(&self.operands)?;
        let targets: Vec<&RuleOperand> = self
            .operands
            .iter()
            .zip(&flagged)
            .filter_map(|(op, hit)| hit.then_some(op))
            .collect();
        scope.add_errors_to(&self.name, &targets, "not_unique", &label, &Params::new())?;
        Ok(false)
    }
}

/// Require adjacent operands to be strictly increasing, or non-decreasing
/// at the positions listed in `allow_equal_at`.
#[derive(Debug)]
pub struct RequireOrdering {
    name: String,
    operands: Vec<RuleOperand>,
    allow_equal_at: BTreeSet<usize>,
}

impl RequireOrdering {
    /// Strict ordering over `operands`.
    pub fn new<I, O>(name: impl Into<String>, operands_in_order: I) -> Self
    where
        I: IntoIterator<Item = O>,
        O: Into<RuleOperand>,
    {
        Self {
            name: name.into(),
            operands: operands(operands_in_order),
            allow_equal_at: BTreeSet::new(),
        }
    }

    /// Pair positions (0 = first pair) where equality is allowed.
    pub fn allow_equal_at(mut self, positions: impl IntoIterator<Item = usize>) -> Self {
        self.allow_equal_at = positions.into_iter().collect();
        self
    }

    fn apply(&self, scope: &mut RuleScope<'_>) -> Result<bool, ConfigError> {
        if !scope.are_present(&self.operands) {
            return Ok(true);
        }

        let mut ok = true;
        for (i, pair) in self.operands.windows(2).enumerate() {
            let (left, right) = (&pair[0], &pair[1]);
            let (Some(a), Some(b)) = (scope.operand_value(left), scope.operand_value(right)) else {
                continue;
            };
            let ordering = a.compare(&b).ok_or_else(|| ConfigError::IncomparableValues {
                rule: self.name.clone(),
                left: a.kind_name().to_string(),
                right: b.kind_name().to_string(),
            })?;

            let (passed, code) = if self.allow_equal_at.contains(&i) {
                (ordering != Ordering::Greater, "wrong_order_equal")
            } else {
                (ordering == Ordering::Less, "wrong_order")
            };
            if passed {
                continue;
            }

            let mut params = Params::new();
            params.insert("fieldname1".into(), scope.operand_label(left));
            params.insert("fieldname2".into(), scope.operand_label(right));
            let label = scope.composite_label(pair)?;
            scope.add_errors_to(&self.name, &[left, right], code, &label, &params)?;
            ok = false;
        }
        Ok(ok)
    }
}

/// Any of the four multi-field rules.
#[derive(Debug)]
pub enum MultiFieldRule {
    /// See [`RequireSome`].
    Some(RequireSome),
    /// See [`RequireMatch`].
    Match(RequireMatch),
    /// See [`RequireUnique`].
    Unique(RequireUnique),
    /// See [`RequireOrdering`].
    Ordering(RequireOrdering),
}

impl MultiFieldRule {
    /// The rule name, used as the message lookup key.
    pub fn name(&self) -> &str {
        match self {
            Self::Some(r) => &r.name,
            Self::Match(r) => &r.name,
            Self::Unique(r) => &r.name,
            Self::Ordering(r) => &r.name,
        }
    }

    /// The rule's operands.
    pub fn operands(&self) -> &[RuleOperand] {
        match self {
            Self::Some(r) => &r.operands,
            Self::Match(r) => &r.operands,
            Self::Unique(r) => &r.operands,
            Self::Ordering(r) => &r.operands,
        }
    }

    /// Whether [`NonField`] operands are allowed.
    pub fn accepts_non_fields(&self) -> bool {
        matches!(self, Self::Ordering(_))
    }

    /// Every code the rule can raise with its current configuration.
    pub fn error_codes(&self) -> Vec<&'static str> {
        match self {
            Self::Some(r) => {
                let mut codes = vec!["min_required"];
                if r.max.is_some() {
                    codes.push("max_allowed");
                }
                codes
            }
            Self::Match(_) => vec!["nomatch"],
            Self::Unique(_) => vec!["not_unique"],
            Self::Ordering(r) => {
                let mut codes = vec!["wrong_order"];
                if !r.allow_equal_at.is_empty() {
                    codes.push("wrong_order_equal");
                }
                codes
            }
        }
    }

    pub(crate) fn apply(&self, scope: &mut RuleScope<'_>) -> Result<bool, ConfigError> {
        match self {
            Self::Some(r) => r.apply(scope),
            Self::Match(r) => r.apply(scope),
            Self::Unique(r) => r.apply(scope),
            Self::Ordering(r) => r.apply(scope),
        }
    }
}

impl From<RequireSome> for MultiFieldRule {
    fn from(rule: RequireSome) -> Self {
        Self::Some(rule)
    }
}

impl From<RequireMatch> for MultiFieldRule {
    fn from(rule: RequireMatch) -> Self {
        Self::Match(rule)
    }
}

impl From<RequireUnique> for MultiFieldRule {
    fn from(rule: RequireUnique) -> Self {
        Self::Unique(rule)
    }
}

impl From<RequireOrdering> for MultiFieldRule {
    fn from(rule: RequireOrdering) -> Self {
        Self::Ordering(rule)
    }
}

fn single_param(name: &str, value: usize) -> Params {
    let mut params = Params::new();
    params.insert(name.to_string(), value.to_string());
    params
}

/// The view of a form a rule sees during one validation pass.
pub(crate) struct RuleScope<'a> {
    pub form: &'a str,
    pub locale: &'a str,
    pub catalog: &'a MessageCatalog,
    pub fields: &'a [FieldSpec],
    pub cleaned: &'a CleanedData,
    pub partial: Option<&'a BTreeSet<String>>,
    pub errors: &'a mut ErrorMap,
}

impl<'a> RuleScope<'a> {
    /// True in full mode; otherwise true only if every field operand is in
    /// the partial set.
    fn are_present(&self, operands: &[RuleOperand]) -> bool {
        match self.partial {
            None => true,
            Some(set) => operands
                .iter()
                .filter_map(RuleOperand::field_name)
                .all(|name| set.contains(name)),
        }
    }

    /// True if every field operand cleaned without error.
    fn are_valid(&self, operands: &[RuleOperand]) -> bool {
        operands
            .iter()
            .filter_map(RuleOperand::field_name)
            .all(|name| self.cleaned.contains_key(name))
    }

    /// Values of field-only operands; a non-field here is a programming error.
    fn field_values(
        &self,
        rule: &str,
        operands: &[RuleOperand],
    ) -> Result<Vec<Option<&'a FieldValue>>, ConfigError> {
        operands
            .iter()
            .map(|op| match op {
                RuleOperand::Field(name) => Ok(self.cleaned.get(name).and_then(Option::as_ref)),
                RuleOperand::NonField(_) => Err(ConfigError::NonFieldOperand {
                    rule: rule.to_string(),
                    form: self.form.to_string(),
                }),
            })
            .collect()
    }

    fn operand_value(&self, operand: &RuleOperand) -> Option<FieldValue> {
        match operand {
            RuleOperand::Field(name) => self.cleaned.get(name).cloned().flatten(),
            RuleOperand::NonField(nf) => Some(nf.value(self.cleaned).clone()),
        }
    }

    fn field_label<'n>(&'n self, name: &'n str) -> &'n str {
        self.fields
            .iter()
            .find(|f| f.name() == name)
            .map(FieldSpec::label)
            .unwrap_or(name)
    }

    fn operand_label(&self, operand: &RuleOperand) -> String {
        match operand {
            RuleOperand::Field(name) => self.field_label(name).to_string(),
            RuleOperand::NonField(nf) => nf.label(self.cleaned),
        }
    }

    /// Joined labels of the field operands; non-fields are left out.
    fn composite_label(&self, operands: &[RuleOperand]) -> Result<String, ConfigError> {
        let labels: Vec<&str> = operands
            .iter()
            .filter_map(RuleOperand::field_name)
            .map(|name| self.field_label(name))
            .collect();
        join_labels(&labels, self.locale)
    }

    fn add_errors(
        &mut self,
        rule: &str,
        operands: &[RuleOperand],
        code: &str,
        label: Option<&str>,
        params: &Params,
    ) -> Result<(), ConfigError> {
        let label = match label {
            Some(label) => label.to_string(),
            None => self.composite_label(operands)?,
        };
        let targets: Vec<&RuleOperand> = operands.iter().collect();
        self.add_errors_to(rule, &targets, code, &label, params)
    }

    /// Attach the same rendered message to every field operand in `targets`.
    fn add_errors_to(
        &mut self,
        rule: &str,
        targets: &[&RuleOperand],
        code: &str,
        label: &str,
        params: &Params,
    ) -> Result<(), ConfigError> {
        let message = self.catalog.render(self.form, &[], rule, code, label, params)?;
        for name in targets.iter().filter_map(|op| op.field_name()) {
            self.errors
                .entry(name.to_string())
                .or_default()
                .push(message.clone());
        }
        Ok(())
    }
}
