//! Locale selection for error messages
//!
//! The locale middleware runs the rest of the request inside a task-local scope holding the
//! negotiated locale; `ApiError` reads it back when rendering.

use std::future::Future;

tokio::task_local! {
    static CURRENT_LOCALE: String;
}

/// Supported locales
pub const SUPPORTED_LOCALES: &[&str] = &["en", "zh"];
pub const DEFAULT_LOCALE: &str = "en";

/// Run `fut` with `locale` as the current locale
pub async fn with_locale<F: Future>(locale: &str, fut: F) -> F::Output {
    let locale = supported_language(locale).unwrap_or(DEFAULT_LOCALE).to_string();
    CURRENT_LOCALE.scope(locale, fut).await
}

/// Current locale, or the default outside a request scope
pub fn get_locale() -> String {
    CURRENT_LOCALE
        .try_with(|l| l.clone())
        .unwrap_or_else(|_| DEFAULT_LOCALE.to_string())
}

/// Map a single language tag ("zh-CN", "en_US", "EN") onto a supported locale
fn supported_language(tag: &str) -> Option<&'static str> {
    let primary = tag
        .trim()
        .split(['-', '_'])
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase();

    SUPPORTED_LOCALES.iter().copied().find(|l| *l == primary)
}

/// Pick the best supported locale from an Accept-Language header value
///
/// Entries are ranked by their `q` weight (default 1.0); ties keep header order.
pub fn extract_locale_from_header(header_value: Option<&str>) -> String {
    let Some(value) = header_value else {
        return DEFAULT_LOCALE.to_string();
    };

    let mut candidates: Vec<(f32, &str)> = value
        .split(',')
        .filter_map(|entry| {
            let mut parts = entry.split(';');
            let tag = parts.next()?.trim();
            let weight = parts
                .find_map(|p| p.trim().strip_prefix("q="))
                .and_then(|q| q.trim().parse::<f32>().ok())
                .unwrap_or(1.0);
            (weight > 0.0).then_some((weight, tag))
        })
        .collect();
    // stable sort keeps header order for equal weights
    candidates.sort_by(|a, b| b.0.total_cmp(&a.0));

    candidates
        .into_iter()
        .find_map(|(_, tag)| supported_language(tag))
        .unwrap_or(DEFAULT_LOCALE)
        .to_string()
}
