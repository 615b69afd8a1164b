//! Locale negotiation middleware
//!
//! Reads `Accept-Language` and runs the rest of the request with the chosen locale, so error
//! responses come back in English or Chinese.

use axum::{extract::Request, http::header::ACCEPT_LANGUAGE, middleware::Next, response::Response};

use crate::utils::{extract_locale_from_header, with_locale};

pub async fn locale_middleware(req: Request, next: Next) -> Response {
    let header = req.headers().get(ACCEPT_LANGUAGE).and_then(|v| v.to_str().ok());
    let locale = extract_locale_from_header(header);

    with_locale(&locale, next.run(req)).await
}
