//! Label composition for messages that name several fields at once.

use crate::error::ConfigError;

/// Default locale for forms that do not set one.
pub const DEFAULT_LOCALE: &str = "en";

/// Join labels into a single phrase: `"A"`, `"A and B"`, `"A, B and C"`.
///
/// The joiner is locale-specific. Only English is implemented; any other
/// locale is refused rather than guessed.
pub fn join_labels<S: AsRef<str>>(labels: &[S], locale: &str) -> Result<String, ConfigError> {
    if !is_english(locale) {
        return Err(ConfigError::UnsupportedLocale(locale.to_string()));
    }

    Ok(match labels {
        [] => String::new(),
        [only] => only.as_ref().to_string(),
        [init @ .., last] => {
            let head: Vec<&str> = init.iter().map(AsRef::as_ref).collect();
            format!("{} and {}", head.join(", "), last.as_ref())
        }
    })
}

fn is_english(locale: &str) -> bool {
    let primary = locale.split(['-', '_']).next().unwrap_or_default();
    primary.eq_ignore_ascii_case("en")
}
