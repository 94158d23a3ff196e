//! # Application State
//!
//! Shared state for the Axum application, passed to all route handlers
//! via the `State` extractor.
//!
//! Everything here is built once at startup and is read-only afterwards:
//! the configuration, the message catalog, and the message-page renderer
//! are shared across requests behind `Arc` without locking. Only the
//! metrics counters change, and they are atomic.

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use formgate_core::envelope::DEFAULT_TOAST_DURATION_MS;
use formgate_core::{MessageCatalog, Toast};

use crate::error::StartupError;
use crate::messaging::{MessageRenderer, StaticMessagePages};
use crate::middleware::metrics::ApiMetrics;

/// Application configuration, read from the environment at startup.
#[derive(Clone)]
pub struct AppConfig {
    /// Port to bind the HTTP server to.
    pub port: u16,
    /// Log request paths, submissions, and envelopes at `info`.
    pub dump_requests: bool,
    /// Expose fault details in exception envelopes.
    pub diagnostic: bool,
    /// Toast display time when a handler does not set one.
    pub default_toast_ms: u64,
    /// YAML message tables, merged in order over the built-in defaults.
    pub message_tables: Vec<PathBuf>,
    /// YAML message pages, overlaid on the built-in pages.
    pub message_pages: Option<PathBuf>,
    /// Gate non-public routes behind the bearer token.
    pub login_required: bool,
    /// Expected bearer token when `login_required` is set.
    pub auth_token: Option<String>,
    /// Where unauthenticated requests are sent.
    pub login_url: String,
    /// Answer managed requests with the contention page on transient
    /// storage faults.
    pub report_managed_storage_errors: bool,
    /// Answer unmanaged requests with the contention page on transient
    /// storage faults.
    pub report_unmanaged_storage_errors: bool,
    /// Emit logs as JSON lines.
    pub log_json: bool,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("port", &self.port)
            .field("dump_requests", &self.dump_requests)
            .field("diagnostic", &self.diagnostic)
            .field("default_toast_ms", &self.default_toast_ms)
            .field("message_tables", &self.message_tables)
            .field("message_pages", &self.message_pages)
            .field("login_required", &self.login_required)
            .field(
                "auth_token",
                &self.auth_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("login_url", &self.login_url)
            .field(
                "report_managed_storage_errors",
                &self.report_managed_storage_errors,
            )
            .field(
                "report_unmanaged_storage_errors",
                &self.report_unmanaged_storage_errors,
            )
            .field("log_json", &self.log_json)
            .finish()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            dump_requests: false,
            diagnostic: false,
            default_toast_ms: DEFAULT_TOAST_DURATION_MS,
            message_tables: Vec::new(),
            message_pages: None,
            login_required: false,
            auth_token: None,
            login_url: "/login/".to_string(),
            report_managed_storage_errors: true,
            report_unmanaged_storage_errors: false,
            log_json: false,
        }
    }
}

impl AppConfig {
    /// Read the configuration from process environment variables.
    pub fn from_env() -> Result<Self, StartupError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read the configuration through `lookup`, which returns the value of
    /// a variable if it is set.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, StartupError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let flag = |name: &str, default: bool| match lookup(name) {
            Some(value) => parse_flag(name, &value),
            None => Ok(default),
        };

        let port = match lookup("PORT") {
            Some(value) => parse_number(&value, "PORT")?,
            None => defaults.port,
        };
        let default_toast_ms = match lookup("FORMGATE_DEFAULT_TOAST_MS") {
            Some(value) => parse_number(&value, "FORMGATE_DEFAULT_TOAST_MS")?,
            None => defaults.default_toast_ms,
        };
        let message_tables = lookup("FORMGATE_MESSAGE_TABLES")
            .map(|value| {
                value
                    .split(',')
                    .map(str::trim)
                    .filter(|path| !path.is_empty())
                    .map(PathBuf::from)
                    .collect()
            })
            .unwrap_or_default();
        let message_pages = lookup("FORMGATE_MESSAGE_PAGES")
            .filter(|path| !path.trim().is_empty())
            .map(PathBuf::from);
        let auth_token = lookup("FORMGATE_AUTH_TOKEN").filter(|token| !token.is_empty());
        let login_url = lookup("FORMGATE_LOGIN_URL")
            .filter(|url| !url.is_empty())
            .unwrap_or(defaults.login_url);

        let config = Self {
            port,
            dump_requests: flag("FORMGATE_DUMP_REQUESTS", defaults.dump_requests)?,
            diagnostic: flag("FORMGATE_DIAGNOSTIC", defaults.diagnostic)?,
            default_toast_ms,
            message_tables,
            message_pages,
            login_required: flag("FORMGATE_LOGIN_REQUIRED", defaults.login_required)?,
            auth_token,
            login_url,
            report_managed_storage_errors: flag(
                "FORMGATE_REPORT_AJAX_STORAGE_ERRORS",
                defaults.report_managed_storage_errors,
            )?,
            report_unmanaged_storage_errors: flag(
                "FORMGATE_REPORT_HTML_STORAGE_ERRORS",
                defaults.report_unmanaged_storage_errors,
            )?,
            log_json: flag("FORMGATE_LOG_JSON", defaults.log_json)?,
        };

        if config.login_required && config.auth_token.is_none() {
            return Err(StartupError::Inconsistent(
                "FORMGATE_LOGIN_REQUIRED is set but FORMGATE_AUTH_TOKEN is empty".to_string(),
            ));
        }
        Ok(config)
    }
}

fn parse_flag(name: &str, value: &str) -> Result<bool, StartupError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "" | "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(StartupError::InvalidSetting {
            name: name.to_string(),
            value: value.to_string(),
            reason: "expected a boolean (1/0, true/false, yes/no, on/off)".to_string(),
        }),
    }
}

fn parse_number<T>(value: &str, name: &str) -> Result<T, StartupError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|err: T::Err| StartupError::InvalidSetting {
            name: name.to_string(),
            value: value.to_string(),
            reason: err.to_string(),
        })
}

/// Shared application state, cloned into every handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub catalog: Arc<MessageCatalog>,
    pub pages: Arc<dyn MessageRenderer>,
    pub metrics: ApiMetrics,
}

impl AppState {
    /// Default configuration, built-in messages, built-in pages.
    pub fn new() -> Self {
        Self::with_parts(
            AppConfig::default(),
            MessageCatalog::with_defaults(),
            StaticMessagePages::builtin(),
        )
    }

    /// Load message tables and pages named by `config`.
    pub fn with_config(config: AppConfig) -> Result<Self, StartupError> {
        let mut builder = MessageCatalog::builder().defaults();
        for path in &config.message_tables {
            builder = builder.file(path)?;
            tracing::info!(path = %path.display(), "loaded message table");
        }
        let pages = match &config.message_pages {
            Some(path) => {
                let pages = StaticMessagePages::from_path(path)?;
                tracing::info!(path = %path.display(), pages = pages.len(), "loaded message pages");
                pages
            }
            None => StaticMessagePages::builtin(),
        };
        Ok(Self::with_parts(config, builder.build(), pages))
    }

    /// Assemble state from already-built parts.
    pub fn with_parts(
        config: AppConfig,
        catalog: MessageCatalog,
        pages: impl MessageRenderer + 'static,
    ) -> Self {
        Self {
            config: Arc::new(config),
            catalog: Arc::new(catalog),
            pages: Arc::new(pages),
            metrics: ApiMetrics::new(),
        }
    }

    /// A toast using the configured default duration.
    pub fn toast(&self, html: impl Into<String>) -> Toast {
        Toast::new(html).duration(self.config.default_toast_ms)
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn empty_environment_gives_defaults() {
        let config = AppConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.default_toast_ms, 5000);
        assert!(!config.diagnostic);
        assert!(config.report_managed_storage_errors);
        assert!(!config.report_unmanaged_storage_errors);
        assert_eq!(config.login_url, "/login/");
        assert!(config.message_tables.is_empty());
    }

    #[test]
    fn settings_are_parsed() {
        let config = AppConfig::from_lookup(lookup(&[
            ("PORT", "9000"),
            ("FORMGATE_DIAGNOSTIC", "yes"),
            ("FORMGATE_DUMP_REQUESTS", "1"),
            ("FORMGATE_DEFAULT_TOAST_MS", "1500"),
            ("FORMGATE_MESSAGE_TABLES", "a.yaml, b.yaml,,"),
            ("FORMGATE_REPORT_AJAX_STORAGE_ERRORS", "off"),
        ]))
        .unwrap();
        assert_eq!(config.port, 9000);
        assert!(config.diagnostic);
        assert!(config.dump_requests);
        assert_eq!(config.default_toast_ms, 1500);
        assert_eq!(
            config.message_tables,
            vec![PathBuf::from("a.yaml"), PathBuf::from("b.yaml")]
        );
        assert!(!config.report_managed_storage_errors);
    }

    #[test]
    fn bad_flag_is_rejected() {
        let err = AppConfig::from_lookup(lookup(&[("FORMGATE_DIAGNOSTIC", "maybe")])).unwrap_err();
        assert!(err.to_string().contains("FORMGATE_DIAGNOSTIC"));
    }

    #[test]
    fn bad_port_is_rejected() {
        let err = AppConfig::from_lookup(lookup(&[("PORT", "eighty")])).unwrap_err();
        assert!(matches!(err, StartupError::InvalidSetting { ref name, .. } if name == "PORT"));
    }

    #[test]
    fn login_without_token_is_inconsistent() {
        let err =
            AppConfig::from_lookup(lookup(&[("FORMGATE_LOGIN_REQUIRED", "true")])).unwrap_err();
        assert!(matches!(err, StartupError::Inconsistent(_)));
    }

    #[test]
    fn debug_redacts_token() {
        let config = AppConfig {
            auth_token: Some("s3cret".into()),
            ..AppConfig::default()
        };
        let debug = format!("{config:?}");
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("s3cret"));
    }

    #[test]
    fn with_config_loads_tables_in_order() {
        let mut first = tempfile::NamedTempFile::new().unwrap();
        write!(first, "global:\n  required: 'first {{field}}'\n").unwrap();
        let mut second = tempfile::NamedTempFile::new().unwrap();
        write!(second, "global:\n  required: 'second {{field}}'\n").unwrap();
        let config = AppConfig {
            message_tables: vec![first.path().into(), second.path().into()],
            ..AppConfig::default()
        };
        let state = AppState::with_config(config).unwrap();
        let rendered = state
            .catalog
            .render("any", &["text", "field"], "name", "required", "Name", &Default::default())
            .unwrap();
        assert_eq!(rendered, "second Name");
    }

    #[test]
    fn with_config_reports_missing_table() {
        let config = AppConfig {
            message_tables: vec![PathBuf::from("/nonexistent/messages.yaml")],
            ..AppConfig::default()
        };
        assert!(matches!(
            AppState::with_config(config),
            Err(StartupError::Catalog(_))
        ));
    }

    #[test]
    fn toast_uses_configured_duration() {
        let state = AppState::with_parts(
            AppConfig {
                default_toast_ms: 1234,
                ..AppConfig::default()
            },
            MessageCatalog::with_defaults(),
            StaticMessagePages::builtin(),
        );
        assert_eq!(state.toast("hi").duration, 1234);
    }
}
