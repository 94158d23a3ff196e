//! # Message Catalog — Hierarchical Error-Message Resolution
//!
//! Merges the built-in global message table with any number of override
//! tables and resolves a `(form, capability tags, field, code)` lookup to a
//! [`MessageEntry`].
//!
//! ## Resolution Order
//!
//! First match wins:
//!
//! 1. `forms[form]["<field>__<code>"]`
//! 2. `forms[form]["<code>"]`
//! 3. for each capability tag, most-derived first: `global["<tag>__<code>"]`
//! 4. `global["<code>"]`
//!
//! A lookup that falls through every level is a
//! [`ConfigError::UnknownErrorCode`]. There is no default message.
//!
//! ## Sources
//!
//! Override tables are YAML documents with a `global:` map and a `forms:`
//! map of maps. Entries are either a plain string or a plural form:
//!
//! ```yaml
//! global:
//!   text__max_length:
//!     one: "{field} must be no more than {max_length} character."
//!     other: "{field} must be no more than {max_length} characters."
//!     count: max_length
//! forms:
//!   signup:
//!     email__required: "We need an email address to reach you."
//! ```
//!
//! Tables merge key-wise in the order they are added; later tables win.
//! The built catalog is immutable and shared read-only across requests.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, FormgateError};

/// Named template parameters, e.g. `min_required -> "1"`.
pub type Params = BTreeMap<String, String>;

/// Placeholder syntax inside message templates: `{name}`.
static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("placeholder pattern is valid"));

/// The placeholder replaced with the field (or composite) label.
pub const LABEL_PLACEHOLDER: &str = "field";

/// A single message template, possibly with a singular/plural pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageEntry {
    /// A plain template.
    Text(String),
    /// A plural pair selected by the numeric parameter named in `count`.
    Plural {
        /// Used when the count parameter equals 1.
        one: String,
        /// Used for every other count.
        other: String,
        /// Name of the parameter that drives selection.
        count: String,
    },
}

impl MessageEntry {
    /// Render the entry with `label` substituted for `{field}` and `params`
    /// substituted for every other placeholder.
    pub fn render(&self, label: &str, params: &Params) -> Result<String, ConfigError> {
        let template = match self {
            Self::Text(text) => text,
            Self::Plural { one, other, count } => {
                let value = params.get(count).ok_or_else(|| ConfigError::MissingParameter {
                    param: count.clone(),
                    template: other.clone(),
                })?;
                if value.trim() == "1" {
                    one
                } else {
                    other
                }
            }
        };
        render_template(template, label, params)
    }
}

impl From<&str> for MessageEntry {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

/// Substitute placeholders in a single template.
///
/// Braces that do not enclose an identifier are left as they are.
pub fn render_template(template: &str, label: &str, params: &Params) -> Result<String, ConfigError> {
    if let Some(missing) = PLACEHOLDER
        .captures_iter(template)
        .map(|c| c[1].to_string())
        .find(|name| name != LABEL_PLACEHOLDER && !params.contains_key(name))
    {
        return Err(ConfigError::MissingParameter {
            param: missing,
            template: template.to_string(),
        });
    }

    let rendered = PLACEHOLDER.replace_all(template, |caps: &regex::Captures<'_>| {
        let name = &caps[1];
        if name == LABEL_PLACEHOLDER {
            label.to_string()
        } else {
            params.get(name).cloned().unwrap_or_default()
        }
    });
    Ok(rendered.into_owned())
}

/// A raw message table as loaded from one source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageTable {
    /// Global entries keyed by `<code>` or `<tag>__<code>`.
    #[serde(default)]
    pub global: BTreeMap<String, MessageEntry>,
    /// Form-specific entries keyed by form name, then `<code>` or
    /// `<field>__<code>`.
    #[serde(default)]
    pub forms: BTreeMap<String, BTreeMap<String, MessageEntry>>,
}

impl MessageTable {
    /// Parse a YAML table. `source_name` is used in error reports.
    pub fn from_yaml_str(source_name: &str, yaml: &str) -> Result<Self, FormgateError> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        let table: Self = serde_yaml::from_str(yaml)?;
        table.check(source_name)?;
        Ok(table)
    }

    /// Read and parse a YAML table from disk.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, FormgateError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&path.display().to_string(), &text)
    }

    /// Merge `other` into `self`; entries in `other` win.
    pub fn merge(&mut self, other: MessageTable) {
        self.global.extend(other.global);
        for (form, entries) in other.forms {
            self.forms.entry(form).or_default().extend(entries);
        }
    }

    fn check(&self, source_name: &str) -> Result<(), ConfigError> {
        let all = self
            .global
            .iter()
            .chain(self.forms.values().flat_map(|entries| entries.iter()));
        for (key, entry) in all {
            if key.is_empty() {
                return Err(ConfigError::CatalogSource {
                    source_name: source_name.to_string(),
                    reason: "empty message key".to_string(),
                });
            }
            if let MessageEntry::Plural { count, .. } = entry {
                if count.is_empty() {
                    return Err(ConfigError::CatalogSource {
                        source_name: source_name.to_string(),
                        reason: format!("plural entry '{key}' has an empty count parameter"),
                    });
                }
            }
        }
        Ok(())
    }
}

fn plural(one: &str, other: &str, count: &str) -> MessageEntry {
    MessageEntry::Plural {
        one: one.to_string(),
        other: other.to_string(),
        count: count.to_string(),
    }
}

/// The built-in global table. Every code raised by a built-in field kind or
/// multi-field rule resolves against it.
pub fn default_table() -> MessageTable {
    let mut global = BTreeMap::new();
    let mut put = |key: &str, entry: MessageEntry| {
        global.insert(key.to_string(), entry);
    };

    put("required", "{field} is required.".into());
    put("invalid", "{field} is not valid.".into());
    put(
        "max_length",
        plural(
            "{field} must be no more than {max_length} character.",
            "{field} must be no more than {max_length} characters.",
            "max_length",
        ),
    );
    put(
        "min_length",
        plural(
            "{field} must be at least {min_length} character.",
            "{field} must be at least {min_length} characters.",
            "min_length",
        ),
    );
    put("max_value", "{field} must be no greater than {max_value}.".into());
    put("min_value", "{field} must be at least {min_value}.".into());
    put("invalid_choice", "{field} must be one of the available choices.".into());
    put("invalid_list", "{field} must be a list of choices.".into());

    put("boolean__required", "{field} must be checked.".into());
    put("email__invalid", "{field} must be a valid email address.".into());
    put("url__invalid", "{field} must be a valid URL.".into());
    put(
        "slug__invalid",
        "{field} may contain only letters, numbers, underscores and hyphens.".into(),
    );
    put("integer__invalid", "{field} must be a whole number.".into());
    put("float__invalid", "{field} must be a number.".into());
    put("date__invalid", "{field} must be a valid date.".into());
    put("date_time__invalid", "{field} must be a valid date and time.".into());
    put("time__invalid", "{field} must be a valid time.".into());

    put(
        "min_required",
        plural(
            "At least {min_required} of {field} is required.",
            "At least {min_required} of {field} are required.",
            "min_required",
        ),
    );
    put(
        "max_allowed",
        plural(
            "No more than {max_allowed} of {field} may be given.",
            "No more than {max_allowed} of {field} may be given.",
            "max_allowed",
        ),
    );
    put("nomatch", "{field} must match.".into());
    put("not_unique", "{field} must all be different.".into());
    put("wrong_order", "{fieldname1} must be before {fieldname2}.".into());
    put("wrong_order_equal", "{fieldname1} must not be after {fieldname2}.".into());

    MessageTable {
        global,
        forms: BTreeMap::new(),
    }
}

/// Process-wide, read-only message catalog.
#[derive(Debug, Clone, Default)]
pub struct MessageCatalog {
    global: HashMap<String, MessageEntry>,
    forms: HashMap<String, HashMap<String, MessageEntry>>,
}

impl MessageCatalog {
    /// Start building a catalog with no entries.
    pub fn builder() -> CatalogBuilder {
        CatalogBuilder::default()
    }

    /// A catalog holding only the built-in defaults.
    pub fn with_defaults() -> Self {
        Self::builder().defaults().build()
    }

    /// Resolve a message entry.
    ///
    /// `tags` is the field kind's capability chain, most-derived first.
    /// Multi-field rules pass an empty chain and their rule name as `field`.
    pub fn resolve(
        &self,
        form: &str,
        tags: &[&str],
        field: &str,
        code: &str,
    ) -> Result<&MessageEntry, ConfigError> {
        if let Some(entries) = self.forms.get(form) {
            if let Some(entry) = entries.get(&format!("{field}__{code}")) {
                return Ok(entry);
            }
            if let Some(entry) = entries.get(code) {
                return Ok(entry);
            }
        }

        for tag in tags {
            if let Some(entry) = self.global.get(&format!("{tag}__{code}")) {
                return Ok(entry);
            }
        }

        self.global
            .get(code)
            .ok_or_else(|| ConfigError::UnknownErrorCode {
                form: form.to_string(),
                field: field.to_string(),
                code: code.to_string(),
                tags: tags.join(", "),
            })
    }

    /// Resolve and render in one step.
    pub fn render(
        &self,
        form: &str,
        tags: &[&str],
        field: &str,
        code: &str,
        label: &str,
        params: &Params,
    ) -> Result<String, ConfigError> {
        self.resolve(form, tags, field, code)?.render(label, params)
    }

    /// Number of global entries.
    pub fn global_len(&self) -> usize {
        self.global.len()
    }
}

/// Accumulates message tables in precedence order.
#[derive(Debug, Default)]
pub struct CatalogBuilder {
    table: MessageTable,
}

impl CatalogBuilder {
    /// Layer the built-in defaults.
    pub fn defaults(mut self) -> Self {
        self.table.merge(default_table());
        self
    }

    /// Layer an already-parsed table.
    pub fn table(mut self, table: MessageTable) -> Self {
        self.table.merge(table);
        self
    }

    /// Layer a YAML table held in memory.
    pub fn yaml(self, source_name: &str, yaml: &str) -> Result<Self, FormgateError> {
        Ok(self.table(MessageTable::from_yaml_str(source_name, yaml)?))
    }

    /// Layer a YAML table read from disk.
    pub fn file(self, path: impl AsRef<Path>) -> Result<Self, FormgateError> {
        Ok(self.table(MessageTable::from_path(path)?))
    }

    /// Freeze the merged tables.
    pub fn build(self) -> MessageCatalog {
        MessageCatalog {
            global: self.table.global.into_iter().collect(),
            forms: self
                .table
                .forms
                .into_iter()
                .map(|(form, entries)| (form, entries.into_iter().collect()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn params(pairs: &[(&str, &str)]) -> Params {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn catalog_with(yaml: &str) -> MessageCatalog {
        MessageCatalog::builder()
            .defaults()
            .yaml("test", yaml)
            .unwrap()
            .build()
    }

    #[test]
    fn form_field_specific_entry_wins() {
        let catalog = catalog_with(
            "forms:\n  signup:\n    email__required: 'field-specific'\n    required: 'form-wide'\n",
        );
        let entry = catalog
            .resolve("signup", &["email", "text", "field"], "email", "required")
            .unwrap();
        assert_eq!(entry, &MessageEntry::from("field-specific"));
    }

    #[test]
    fn form_wide_entry_beats_global_tags() {
        let catalog = catalog_with("forms:\n  signup:\n    invalid: 'form-wide'\n");
        let entry = catalog
            .resolve("signup", &["email", "text", "field"], "email", "invalid")
            .unwrap();
        assert_eq!(entry, &MessageEntry::from("form-wide"));
    }

    #[test]
    fn other_forms_do_not_leak_overrides() {
        let catalog = catalog_with("forms:\n  other:\n    required: 'nope'\n");
        let entry = catalog
            .resolve("signup", &["text", "field"], "name", "required")
            .unwrap();
        assert_eq!(entry, &MessageEntry::from("{field} is required."));
    }

    #[test]
    fn most_derived_tag_wins() {
        let catalog = MessageCatalog::with_defaults();
        let entry = catalog
            .resolve("f", &["float", "integer", "field"], "amount", "invalid")
            .unwrap();
        assert_eq!(entry, &MessageEntry::from("{field} must be a number."));

        let entry = catalog
            .resolve("f", &["integer", "field"], "count", "invalid")
            .unwrap();
        assert_eq!(entry, &MessageEntry::from("{field} must be a whole number."));
    }

    #[test]
    fn classless_fallback_is_last() {
        let catalog = MessageCatalog::with_defaults();
        let entry = catalog
            .resolve("f", &["choice", "field"], "color", "required")
            .unwrap();
        assert_eq!(entry, &MessageEntry::from("{field} is required."));
    }

    #[test]
    fn unknown_code_is_an_error() {
        let catalog = MessageCatalog::with_defaults();
        let err = catalog
            .resolve("f", &["text", "field"], "name", "frobnicated")
            .unwrap_err();
        assert_eq!(
            err,
            ConfigError::UnknownErrorCode {
                form: "f".into(),
                field: "name".into(),
                code: "frobnicated".into(),
                tags: "text, field".into(),
            }
        );
    }

    #[test]
    fn empty_catalog_resolves_nothing() {
        let catalog = MessageCatalog::builder().build();
        assert!(catalog.resolve("f", &[], "x", "required").is_err());
    }

    #[test]
    fn later_tables_override_earlier() {
        let catalog = MessageCatalog::builder()
            .defaults()
            .yaml("a", "global:\n  required: 'first'\n")
            .unwrap()
            .yaml("b", "global:\n  required: 'second'\n")
            .unwrap()
            .build();
        let entry = catalog.resolve("f", &[], "x", "required").unwrap();
        assert_eq!(entry, &MessageEntry::from("second"));
    }

    #[test]
    fn form_tables_merge_per_key() {
        let catalog = MessageCatalog::builder()
            .yaml("a", "forms:\n  f:\n    required: 'req'\n")
            .unwrap()
            .yaml("b", "forms:\n  f:\n    invalid: 'inv'\n")
            .unwrap()
            .build();
        assert!(catalog.resolve("f", &[], "x", "required").is_ok());
        assert!(catalog.resolve("f", &[], "x", "invalid").is_ok());
    }

    #[test]
    fn plural_entry_parses_from_yaml() {
        let table = MessageTable::from_yaml_str(
            "t",
            "global:\n  max_allowed:\n    one: 'one {max_allowed}'\n    other: 'many {max_allowed}'\n    count: max_allowed\n",
        )
        .unwrap();
        let entry = &table.global["max_allowed"];
        assert_eq!(entry.render("x", &params(&[("max_allowed", "1")])).unwrap(), "one 1");
        assert_eq!(entry.render("x", &params(&[("max_allowed", "3")])).unwrap(), "many 3");
    }

    #[test]
    fn plural_with_empty_count_is_rejected() {
        let err = MessageTable::from_yaml_str(
            "bad.yaml",
            "global:\n  x:\n    one: a\n    other: b\n    count: ''\n",
        )
        .unwrap_err();
        assert!(matches!(
            err,
            FormgateError::Config(ConfigError::CatalogSource { .. })
        ));
    }

    #[test]
    fn malformed_yaml_is_reported() {
        let err = MessageTable::from_yaml_str("bad.yaml", "global: [1, 2").unwrap_err();
        assert!(matches!(err, FormgateError::Yaml(_)));
    }

    #[test]
    fn empty_source_is_an_empty_table() {
        assert_eq!(MessageTable::from_yaml_str("e", "  \n").unwrap(), MessageTable::default());
    }

    #[test]
    fn file_source_loads() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "global:\n  required: 'from disk'").unwrap();
        let catalog = MessageCatalog::builder()
            .defaults()
            .file(file.path())
            .unwrap()
            .build();
        let entry = catalog.resolve("f", &[], "x", "required").unwrap();
        assert_eq!(entry, &MessageEntry::from("from disk"));
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = MessageCatalog::builder()
            .file("/nonexistent/formgate/messages.yaml")
            .unwrap_err();
        assert!(matches!(err, FormgateError::Io(_)));
    }

    #[test]
    fn template_substitutes_label_and_params() {
        let out = render_template(
            "At least {min_required} of {field} is required.",
            "A and B",
            &params(&[("min_required", "1")]),
        )
        .unwrap();
        assert_eq!(out, "At least 1 of A and B is required.");
    }

    #[test]
    fn template_missing_param_is_error() {
        let err = render_template("{fieldname1} before {fieldname2}", "x", &params(&[("fieldname1", "a")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::MissingParameter { ref param, .. } if param == "fieldname2"));
    }

    #[test]
    fn template_leaves_non_identifier_braces() {
        let out = render_template("{ not a placeholder } {field}", "Name", &Params::new()).unwrap();
        assert_eq!(out, "{ not a placeholder } Name");
    }

    #[test]
    fn plural_missing_count_param_is_error() {
        let entry = plural("one", "other", "n");
        assert!(matches!(
            entry.render("x", &Params::new()),
            Err(ConfigError::MissingParameter { .. })
        ));
    }

    #[test]
    fn every_default_entry_renders_with_its_params() {
        let all = params(&[
            ("max_length", "2"),
            ("min_length", "2"),
            ("max_value", "9"),
            ("min_value", "1"),
            ("min_required", "1"),
            ("max_allowed", "3"),
            ("fieldname1", "Start"),
            ("fieldname2", "End"),
        ]);
        for (key, entry) in default_table().global {
            let rendered = entry.render("Label", &all);
            assert!(rendered.is_ok(), "default entry '{key}' failed: {rendered:?}");
        }
    }
}
