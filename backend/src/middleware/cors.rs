//! CORS layer built from `[cors]` configuration
//!
//! Origins are exact matches, except entries like `https://*.azurestaticapps.net`, which
//! accept any subdomain of the given domain over the given scheme.

use axum::http::{HeaderValue, request::Parts};
use std::time::Duration;
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};

use super::request_log::{API_VERSION_HEADER, REQUEST_ID_HEADER};
use crate::config::CorsConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
enum OriginRule {
    Exact(String),
    Subdomain { scheme: String, domain: String },
}

impl OriginRule {
    fn parse(pattern: &str) -> Self {
        let pattern = pattern.trim().trim_end_matches('/').to_ascii_lowercase();
        if let Some((scheme, rest)) = pattern.split_once("://")
            && let Some(domain) = rest.strip_prefix("*.")
        {
            return Self::Subdomain { scheme: scheme.to_string(), domain: domain.to_string() };
        }
        Self::Exact(pattern)
    }

    fn matches(&self, origin: &str) -> bool {
        let origin = origin.to_ascii_lowercase();
        match self {
            Self::Exact(allowed) => *allowed == origin,
            Self::Subdomain { scheme, domain } => origin
                .strip_prefix(scheme.as_str())
                .and_then(|rest| rest.strip_prefix("://"))
                .and_then(|host| host.strip_suffix(domain.as_str()))
                .and_then(|sub| sub.strip_suffix('.'))
                .is_some_and(|sub| !sub.is_empty()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OriginMatcher {
    rules: Vec<OriginRule>,
}

impl OriginMatcher {
    pub fn new(patterns: &[String]) -> Self {
        Self { rules: patterns.iter().map(|p| OriginRule::parse(p)).collect() }
    }

    pub fn is_allowed(&self, origin: &str) -> bool {
        self.rules.iter().any(|rule| rule.matches(origin))
    }
}

pub fn cors_layer(config: &CorsConfig) -> CorsLayer {
    let matcher = OriginMatcher::new(&config.allowed_origins);

    CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(move |origin: &HeaderValue, _parts: &Parts| {
            origin.to_str().is_ok_and(|o| matcher.is_allowed(o))
        }))
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
        .expose_headers([API_VERSION_HEADER, REQUEST_ID_HEADER])
        .max_age(Duration::from_secs(config.max_age_secs))
}
