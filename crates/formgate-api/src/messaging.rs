//! # Message Pages
//!
//! Symbolic pages (`category/part1[/part2]`) rendered either as a full
//! HTML document or as an embedded fragment. The dispatcher uses the
//! `error/database-contention` page for its transient-storage fallback;
//! the `/message/...` routes expose every page directly.
//!
//! [`MessageRenderer`] is the seam: [`StaticMessagePages`] serves built-in
//! pages plus any loaded from a YAML file, and deployments with a template
//! engine can plug in their own renderer.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

/// Page shown for routes that do not exist.
pub const NOT_FOUND_PAGE: (&str, &str) = ("error", "404");

/// Page used when storage reports transient contention.
pub const STORAGE_CONTENTION_PAGE: (&str, &str) = ("error", "database-contention");

/// Errors raised while loading or rendering message pages.
#[derive(Error, Debug)]
pub enum RenderError {
    /// No page is registered under this identifier.
    #[error("no message page '{0}'")]
    NotFound(String),

    /// A page file could not be parsed.
    #[error("message page parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// A page file could not be read.
    #[error("message page io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Identifies a message page.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessagePageId {
    pub category: String,
    pub part1: String,
    pub part2: Option<String>,
}

impl MessagePageId {
    /// A two-segment identifier.
    pub fn new(category: impl Into<String>, part1: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            part1: part1.into(),
            part2: None,
        }
    }

    /// Add the optional third segment.
    pub fn with_part2(mut self, part2: impl Into<String>) -> Self {
        self.part2 = Some(part2.into());
        self
    }

    /// The page for unknown routes.
    pub fn not_found() -> Self {
        Self::new(NOT_FOUND_PAGE.0, NOT_FOUND_PAGE.1)
    }

    /// The storage-contention page.
    pub fn storage_contention() -> Self {
        Self::new(STORAGE_CONTENTION_PAGE.0, STORAGE_CONTENTION_PAGE.1)
    }

    /// Lookup key, `category/part1[/part2]`.
    pub fn key(&self) -> String {
        match &self.part2 {
            Some(part2) => format!("{}/{}/{}", self.category, self.part1, part2),
            None => format!("{}/{}", self.category, self.part1),
        }
    }
}

impl fmt::Display for MessagePageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

/// How a page is presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presentation {
    /// A standalone HTML document.
    FullPage,
    /// A fragment for a modal or error banner.
    Embedded,
}

/// A rendered page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedMessage {
    /// Plain-text title.
    pub title: String,
    /// HTML in the requested presentation.
    pub html: String,
}

/// Renders message pages by identifier.
pub trait MessageRenderer: Send + Sync {
    /// Render `id`, or [`RenderError::NotFound`] if it is unknown.
    fn render(
        &self,
        id: &MessagePageId,
        presentation: Presentation,
    ) -> Result<RenderedMessage, RenderError>;
}

/// One page definition. `body` is trusted HTML; `title` is escaped.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MessagePage {
    pub title: String,
    pub body: String,
}

impl MessagePage {
    fn new(title: &str, body: &str) -> Self {
        Self {
            title: title.to_string(),
            body: body.to_string(),
        }
    }
}

/// Pages held in memory, keyed by `category/part1[/part2]`.
#[derive(Debug, Clone)]
pub struct StaticMessagePages {
    pages: HashMap<String, MessagePage>,
}

impl StaticMessagePages {
    /// The built-in error pages.
    pub fn builtin() -> Self {
        let pages = [
            (
                "error/database-contention",
                MessagePage::new(
                    "Please Try Again",
                    "<p>The server is busy right now and could not complete your request. \
                     Please wait a moment and try again.</p>",
                ),
            ),
            (
                "error/400",
                MessagePage::new(
                    "Bad Request",
                    "<p>The server could not understand this request.</p>",
                ),
            ),
            (
                "error/403",
                MessagePage::new(
                    "Access Denied",
                    "<p>You do not have permission to view this page.</p>",
                ),
            ),
            (
                "error/404",
                MessagePage::new("Page Not Found", "<p>The requested page does not exist.</p>"),
            ),
            (
                "error/500",
                MessagePage::new(
                    "Server Error",
                    "<p>Something went wrong on our end. The problem has been logged.</p>",
                ),
            ),
        ];
        Self {
            pages: pages
                .into_iter()
                .map(|(key, page)| (key.to_string(), page))
                .collect(),
        }
    }

    /// Built-in pages overlaid with pages from a YAML map of
    /// `key: {title, body}`.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, RenderError> {
        let mut pages = Self::builtin();
        if yaml.trim().is_empty() {
            return Ok(pages);
        }
        let loaded: HashMap<String, MessagePage> = serde_yaml::from_str(yaml)?;
        pages.pages.extend(loaded);
        Ok(pages)
    }

    /// [`from_yaml_str`](Self::from_yaml_str) on a file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, RenderError> {
        let yaml = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&yaml)
    }

    /// Add or replace one page.
    pub fn insert(&mut self, id: &MessagePageId, page: MessagePage) {
        self.pages.insert(id.key(), page);
    }

    /// Number of pages.
    pub fn len(&self) -> usize {
        self.pages.len()
    }

    /// Whether no pages are registered.
    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }
}

impl Default for StaticMessagePages {
    fn default() -> Self {
        Self::builtin()
    }
}

impl MessageRenderer for StaticMessagePages {
    fn render(
        &self,
        id: &MessagePageId,
        presentation: Presentation,
    ) -> Result<RenderedMessage, RenderError> {
        let key = id.key();
        let page = self
            .pages
            .get(&key)
            .ok_or_else(|| RenderError::NotFound(key.clone()))?;
        let title = escape_html(&page.title);
        let html = match presentation {
            Presentation::FullPage => format!(
                "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\"><title>{title}</title></head>\
                 <body><main class=\"message-page\"><h1>{title}</h1>{body}</main></body></html>",
                body = page.body
            ),
            Presentation::Embedded => {
                format!("<div class=\"message-page\">{}</div>", page.body)
            }
        };
        Ok(RenderedMessage {
            title: page.title.clone(),
            html,
        })
    }
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn key_has_two_or_three_segments() {
        assert_eq!(MessagePageId::new("error", "404").key(), "error/404");
        assert_eq!(
            MessagePageId::new("help", "forms").with_part2("partial").key(),
            "help/forms/partial"
        );
    }

    #[test]
    fn builtin_contention_page_renders_both_presentations() {
        let pages = StaticMessagePages::builtin();
        let id = MessagePageId::storage_contention();
        let full = pages.render(&id, Presentation::FullPage).unwrap();
        let embedded = pages.render(&id, Presentation::Embedded).unwrap();
        assert_eq!(full.title, "Please Try Again");
        assert!(full.html.starts_with("<!DOCTYPE html>"));
        assert!(full.html.contains("<h1>Please Try Again</h1>"));
        assert!(embedded.html.starts_with("<div class=\"message-page\">"));
        assert!(!embedded.html.contains("<h1>"));
    }

    #[test]
    fn builtin_covers_standard_error_pages() {
        let pages = StaticMessagePages::builtin();
        for part1 in ["400", "403", "404", "500"] {
            let id = MessagePageId::new("error", part1);
            assert!(pages.render(&id, Presentation::Embedded).is_ok(), "{id}");
        }
        let bad = pages
            .render(&MessagePageId::new("error", "400"), Presentation::FullPage)
            .unwrap();
        assert_eq!(bad.title, "Bad Request");
    }

    #[test]
    fn unknown_page_is_not_found() {
        let err = StaticMessagePages::builtin()
            .render(&MessagePageId::new("nope", "nothing"), Presentation::Embedded)
            .unwrap_err();
        assert!(matches!(err, RenderError::NotFound(ref key) if key == "nope/nothing"));
    }

    #[test]
    fn title_is_escaped_in_full_page() {
        let mut pages = StaticMessagePages::builtin();
        let id = MessagePageId::new("info", "tags");
        pages.insert(&id, MessagePage::new("<b>&</b>", "<p>ok</p>"));
        let html = pages.render(&id, Presentation::FullPage).unwrap().html;
        assert!(html.contains("<title>&lt;b&gt;&amp;&lt;/b&gt;</title>"));
        assert!(html.contains("<p>ok</p>"));
    }

    #[test]
    fn yaml_pages_overlay_builtin() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            "error/404:\n  title: Lost\n  body: '<p>Nothing here.</p>'\nhelp/partial/focus:\n  title: Focus\n  body: '<p>Focus help.</p>'\n"
        )
        .unwrap();
        let pages = StaticMessagePages::from_path(file.path()).unwrap();
        let lost = pages
            .render(&MessagePageId::new("error", "404"), Presentation::Embedded)
            .unwrap();
        assert_eq!(lost.title, "Lost");
        assert!(pages
            .render(
                &MessagePageId::new("help", "partial").with_part2("focus"),
                Presentation::Embedded
            )
            .is_ok());
        assert_eq!(pages.len(), 6);
    }

    #[test]
    fn malformed_yaml_is_rejected() {
        let err = StaticMessagePages::from_yaml_str("error/404: [not, a, page]").unwrap_err();
        assert!(matches!(err, RenderError::Yaml(_)));
    }
}
