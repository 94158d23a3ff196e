//! # Fields — Kinds, Declarations, and Single-Field Cleaning
//!
//! A [`FieldSpec`] declares one input on a form: its name, its mandatory
//! label, its [`FieldKind`], and its constraints. Cleaning turns the raw
//! submitted strings into a typed [`FieldValue`] or a [`FieldFailure`]
//! carrying an error code and template parameters.
//!
//! ## Capability Tags
//!
//! Each kind carries a static, ordered chain of capability tags (most
//! derived first). The message catalog walks this chain when looking up
//! `<tag>__<code>` entries, so an `Email` field picks up `email__invalid`
//! before the generic `invalid`.
//!
//! ## Empty Input
//!
//! An empty or whitespace-only submission is *absent*. Absence is only an
//! error when the field is `required`.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::catalog::Params;

static EMAIL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9.!#$%&'*+/=?^_`{|}~-]+@[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?(?:\.[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?)+$")
        .expect("email pattern is valid")
});

static SLUG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[-A-Za-z0-9_]+$").expect("slug pattern is valid"));

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y", "%m/%d/%y"];
const DATE_TIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M:%S",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
];
const TIME_FORMATS: &[&str] = &["%H:%M:%S", "%H:%M"];

/// The built-in field kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    /// Checkbox; absent means `false`.
    Boolean,
    /// Tri-state yes/no/unknown.
    NullBoolean,
    /// Free text.
    Text,
    /// Letters, digits, underscores and hyphens.
    Slug,
    /// Email address.
    Email,
    /// Absolute http(s) URL.
    Url,
    /// Whole number.
    Integer,
    /// Decimal number.
    Float,
    /// Calendar date.
    Date,
    /// Date and time without zone.
    DateTime,
    /// Time of day.
    Time,
    /// One value from a fixed set.
    Choice,
    /// Any number of values from a fixed set.
    MultipleChoice,
    /// Hidden text input.
    Hidden,
}

impl FieldKind {
    /// Capability tags, most-derived first.
    pub fn capability_tags(&self) -> &'static [&'static str] {
        match self {
            Self::Boolean => &["boolean", "field"],
            Self::NullBoolean => &["null_boolean", "boolean", "field"],
            Self::Text => &["text", "field"],
            Self::Slug => &["slug", "text", "field"],
            Self::Email => &["email", "text", "field"],
            Self::Url => &["url", "text", "field"],
            Self::Integer => &["integer", "field"],
            Self::Float => &["float", "integer", "field"],
            Self::Date => &["date", "base_temporal", "field"],
            Self::DateTime => &["date_time", "base_temporal", "field"],
            Self::Time => &["time", "base_temporal", "field"],
            Self::Choice => &["choice", "field"],
            Self::MultipleChoice => &["multiple_choice", "choice", "field"],
            Self::Hidden => &["hidden", "text", "field"],
        }
    }

    /// Every error code cleaning a field of this kind can raise.
    pub fn error_codes(&self) -> &'static [&'static str] {
        match self {
            Self::Boolean => &["required"],
            Self::NullBoolean => &[],
            Self::Text => &["required", "max_length", "min_length"],
            Self::Slug | Self::Email | Self::Url => {
                &["required", "max_length", "min_length", "invalid"]
            }
            Self::Integer | Self::Float => &["required", "invalid", "max_value", "min_value"],
            Self::Date | Self::DateTime | Self::Time => &["required", "invalid"],
            Self::Choice => &["required", "invalid_choice"],
            Self::MultipleChoice => &["required", "invalid_choice", "invalid_list"],
            Self::Hidden => &["required", "max_length"],
        }
    }

    /// Stable snake_case name.
    pub fn as_str(&self) -> &'static str {
        self.capability_tags()[0]
    }

    fn is_textual(&self) -> bool {
        matches!(
            self,
            Self::Text | Self::Slug | Self::Email | Self::Url | Self::Hidden
        )
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A cleaned, typed field value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    /// Boolean.
    Bool(bool),
    /// Whole number.
    Int(i64),
    /// Decimal number.
    Float(f64),
    /// Text.
    Text(String),
    /// Calendar date.
    Date(NaiveDate),
    /// Date and time.
    DateTime(NaiveDateTime),
    /// Time of day.
    Time(NaiveTime),
    /// Several selected values.
    List(Vec<String>),
}

impl FieldValue {
    /// Empty text and empty lists count as "no value".
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Text(s) => s.is_empty(),
            Self::List(items) => items.is_empty(),
            _ => false,
        }
    }

    /// Short name of the value's kind, for diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Text(_) => "text",
            Self::Date(_) => "date",
            Self::DateTime(_) => "date_time",
            Self::Time(_) => "time",
            Self::List(_) => "list",
        }
    }

    /// Order two values of the same kind. Integers and floats compare
    /// numerically; a date compares with a date-time at midnight. Any other
    /// mix is incomparable and yields `None`.
    pub fn compare(&self, other: &FieldValue) -> Option<Ordering> {
        use FieldValue::*;
        match (self, other) {
            (Bool(a), Bool(b)) => Some(a.cmp(b)),
            (Int(a), Int(b)) => Some(a.cmp(b)),
            (Float(a), Float(b)) => a.partial_cmp(b),
            (Int(a), Float(b)) => (*a as f64).partial_cmp(b),
            (Float(a), Int(b)) => a.partial_cmp(&(*b as f64)),
            (Text(a), Text(b)) => Some(a.cmp(b)),
            (Date(a), Date(b)) => Some(a.cmp(b)),
            (DateTime(a), DateTime(b)) => Some(a.cmp(b)),
            (Date(a), DateTime(b)) => Some(a.and_time(NaiveTime::MIN).cmp(b)),
            (DateTime(a), Date(b)) => Some(a.cmp(&b.and_time(NaiveTime::MIN))),
            (Time(a), Time(b)) => Some(a.cmp(b)),
            (List(a), List(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Text(v) => f.write_str(v),
            Self::Date(v) => write!(f, "{}", v.format("%Y-%m-%d")),
            Self::DateTime(v) => write!(f, "{}", v.format("%Y-%m-%d %H:%M:%S")),
            Self::Time(v) => write!(f, "{}", v.format("%H:%M:%S")),
            Self::List(v) => f.write_str(&v.join(", ")),
        }
    }
}

/// Raw submitted data: each key maps to every value submitted under it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubmittedData {
    values: HashMap<String, Vec<String>>,
}

impl SubmittedData {
    /// Empty submission.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from `(key, value)` pairs; repeated keys accumulate.
    pub fn from_pairs<K, V, I>(pairs: I) -> Self
    where
        K: Into<String>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        let mut data = Self::new();
        for (k, v) in pairs {
            data.push(k, v);
        }
        data
    }

    /// Append one value under `key`.
    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.entry(key.into()).or_default().push(value.into());
    }

    /// All values under `key`, empty if absent.
    pub fn get_all(&self, key: &str) -> &[String] {
        self.values.get(key).map(Vec::as_slice).unwrap_or_default()
    }

    /// The first value under `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.get_all(key).first().map(String::as_str)
    }

    /// Whether anything was submitted under `key`.
    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Whether nothing was submitted.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// A single-field validation failure: an error code plus template params.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldFailure {
    /// The error code, resolved through the catalog.
    pub code: &'static str,
    /// Template parameters for the resolved message.
    pub params: Params,
}

impl FieldFailure {
    fn new(code: &'static str) -> Self {
        Self {
            code,
            params: Params::new(),
        }
    }

    fn with(code: &'static str, name: &str, value: impl ToString) -> Self {
        let mut params = Params::new();
        params.insert(name.to_string(), value.to_string());
        Self { code, params }
    }
}

/// One declared field.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    name: String,
    label: String,
    kind: FieldKind,
    required: bool,
    max_length: Option<usize>,
    min_length: Option<usize>,
    max_value: Option<f64>,
    min_value: Option<f64>,
    choices: Vec<(String, String)>,
}

impl FieldSpec {
    /// Declare an optional field. An empty label is accepted here and
    /// rejected when the form is bound.
    pub fn new(name: impl Into<String>, label: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            label: label.into(),
            kind,
            required: false,
            max_length: None,
            min_length: None,
            max_value: None,
            min_value: None,
            choices: Vec::new(),
        }
    }

    /// Mark the field required.
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Maximum length in characters (textual kinds).
    pub fn max_length(mut self, n: usize) -> Self {
        self.max_length = Some(n);
        self
    }

    /// Minimum length in characters (textual kinds).
    pub fn min_length(mut self, n: usize) -> Self {
        self.min_length = Some(n);
        self
    }

    /// Maximum numeric value.
    pub fn max_value(mut self, v: f64) -> Self {
        self.max_value = Some(v);
        self
    }

    /// Minimum numeric value.
    pub fn min_value(mut self, v: f64) -> Self {
        self.min_value = Some(v);
        self
    }

    /// Allowed `(value, display)` pairs for choice kinds.
    pub fn choices<V, D, I>(mut self, choices: I) -> Self
    where
        V: Into<String>,
        D: Into<String>,
        I: IntoIterator<Item = (V, D)>,
    {
        self.choices = choices
            .into_iter()
            .map(|(v, d)| (v.into(), d.into()))
            .collect();
        self
    }

    /// Field name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Display label.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Field kind.
    pub fn kind(&self) -> FieldKind {
        self.kind
    }

    /// Whether the field is required.
    pub fn is_required(&self) -> bool {
        self.required
    }

    /// Clean raw submitted values.
    ///
    /// `Ok(None)` means the field is absent and not required.
    pub fn clean(&self, raw: &[String]) -> Result<Option<FieldValue>, FieldFailure> {
        match self.kind {
            FieldKind::Boolean => self.clean_boolean(raw),
            FieldKind::NullBoolean => Ok(clean_null_boolean(raw)),
            FieldKind::MultipleChoice => self.clean_multiple_choice(raw),
            _ => {
                let text = raw.first().map(|s| s.trim()).unwrap_or_default();
                if text.is_empty() {
                    return if self.required {
                        Err(FieldFailure::new("required"))
                    } else {
                        Ok(None)
                    };
                }
                self.clean_present(text).map(Some)
            }
        }
    }

    fn clean_boolean(&self, raw: &[String]) -> Result<Option<FieldValue>, FieldFailure> {
        let checked = raw.first().is_some_and(|v| {
            !matches!(v.trim().to_ascii_lowercase().as_str(), "" | "false" | "0" | "off")
        });
        if self.required && !checked {
            return Err(FieldFailure::new("required"));
        }
        Ok(Some(FieldValue::Bool(checked)))
    }

    fn clean_multiple_choice(&self, raw: &[String]) -> Result<Option<FieldValue>, FieldFailure> {
        let selected: Vec<String> = raw
            .iter()
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .collect();
        if selected.is_empty() {
            return if self.required {
                Err(FieldFailure::new("required"))
            } else {
                Ok(None)
            };
        }
        if let Some(bad) = selected.iter().find(|v| !self.has_choice(v)) {
            return Err(FieldFailure::with("invalid_choice", "value", bad));
        }
        Ok(Some(FieldValue::List(selected)))
    }

    fn clean_present(&self, text: &str) -> Result<FieldValue, FieldFailure> {
        if self.kind.is_textual() {
            self.check_length(text)?;
        }
        match self.kind {
            FieldKind::Text | FieldKind::Hidden => Ok(FieldValue::Text(text.to_string())),
            FieldKind::Slug => matching(&SLUG, text),
            FieldKind::Email => matching(&EMAIL, text),
            FieldKind::Url => clean_url(text),
            FieldKind::Integer => {
                let n: i64 = text.parse().map_err(|_| FieldFailure::new("invalid"))?;
                self.check_range(n as f64)?;
                Ok(FieldValue::Int(n))
            }
            FieldKind::Float => {
                let n: f64 = text.parse().map_err(|_| FieldFailure::new("invalid"))?;
                if !n.is_finite() {
                    return Err(FieldFailure::new("invalid"));
                }
                self.check_range(n)?;
                Ok(FieldValue::Float(n))
            }
            FieldKind::Date => parse_with(DATE_FORMATS, text, NaiveDate::parse_from_str)
                .map(FieldValue::Date),
            FieldKind::DateTime => {
                parse_with(DATE_TIME_FORMATS, text, NaiveDateTime::parse_from_str)
                    .map(FieldValue::DateTime)
            }
            FieldKind::Time => parse_with(TIME_FORMATS, text, NaiveTime::parse_from_str)
                .map(FieldValue::Time),
            FieldKind::Choice => {
                if self.has_choice(text) {
                    Ok(FieldValue::Text(text.to_string()))
                } else {
                    Err(FieldFailure::with("invalid_choice", "value", text))
                }
            }
            FieldKind::Boolean | FieldKind::NullBoolean | FieldKind::MultipleChoice => {
                Err(FieldFailure::new("invalid"))
            }
        }
    }

    fn check_length(&self, text: &str) -> Result<(), FieldFailure> {
        let len = text.chars().count();
        if let Some(max) = self.max_length {
            if len > max {
                return Err(FieldFailure::with("max_length", "max_length", max));
            }
        }
        if let Some(min) = self.min_length {
            if len < min {
                return Err(FieldFailure::with("min_length", "min_length", min));
            }
        }
        Ok(())
    }

    fn check_range(&self, n: f64) -> Result<(), FieldFailure> {
        if let Some(max) = self.max_value {
            if n > max {
                return Err(FieldFailure::with("max_value", "max_value", max));
            }
        }
        if let Some(min) = self.min_value {
            if n < min {
                return Err(FieldFailure::with("min_value", "min_value", min));
            }
        }
        Ok(())
    }

    fn has_choice(&self, value: &str) -> bool {
        self.choices.iter().any(|(v, _)| v == value)
    }
}

fn clean_null_boolean(raw: &[String]) -> Option<FieldValue> {
    let value = raw.first()?.trim().to_ascii_lowercase();
    match value.as_str() {
        "true" | "1" | "on" | "yes" => Some(FieldValue::Bool(true)),
        "false" | "0" | "off" | "no" => Some(FieldValue::Bool(false)),
        _ => None,
    }
}

fn matching(pattern: &Regex, text: &str) -> Result<FieldValue, FieldFailure> {
    if pattern.is_match(text) {
        Ok(FieldValue::Text(text.to_string()))
    } else {
        Err(FieldFailure::new("invalid"))
    }
}

fn clean_url(text: &str) -> Result<FieldValue, FieldFailure> {
    let parsed = url::Url::parse(text).map_err(|_| FieldFailure::new("invalid"))?;
    if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
        return Err(FieldFailure::new("invalid"));
    }
    Ok(FieldValue::Text(text.to_string()))
}

fn parse_with<T, E>(
    formats: &[&str],
    text: &str,
    parse: impl Fn(&str, &str) -> Result<T, E>,
) -> Result<T, FieldFailure> {
    formats
        .iter()
        .filter(|fmt| four_digit_year(fmt, text))
        .find_map(|fmt| parse(text, fmt).ok())
        .ok_or_else(|| FieldFailure::new("invalid"))
}

/// `%Y` takes exactly four digits. chrono also accepts shorter years,
/// which would read "1/1/01" as year 1 instead of falling through to `%y`.
fn four_digit_year(fmt: &str, text: &str) -> bool {
    let Some(idx) = fmt.split('%').skip(1).position(|spec| spec.starts_with('Y')) else {
        return true;
    };
    text.split(|c: char| !c.is_ascii_digit())
        .filter(|run| !run.is_empty())
        .nth(idx)
        .is_some_and(|run| run.len() == 4)
}
