//! Request logging middleware
//!
//! Logs who called what, then stamps every response with the API version and a fresh
//! request id.

use axum::{
    extract::{ConnectInfo, Request},
    http::{HeaderName, HeaderValue, header::ORIGIN},
    middleware::Next,
    response::Response,
};
use std::net::SocketAddr;
use std::time::Instant;

pub const API_VERSION_HEADER: HeaderName = HeaderName::from_static("x-api-version");
pub const REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");
pub const API_VERSION: &str = env!("CARGO_PKG_VERSION");

pub async fn request_log_middleware(req: Request, next: Next) -> Response {
    let request_id = uuid::Uuid::new_v4().to_string();
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let remote = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.to_string())
        .unwrap_or_else(|| "unknown".to_string());
    let origin = req
        .headers()
        .get(ORIGIN)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-")
        .to_string();

    tracing::info!(
        "[{}] {} {} from {} (origin: {})",
        request_id,
        method,
        path,
        remote,
        origin
    );
    let started = Instant::now();

    let mut response = next.run(req).await;

    tracing::info!(
        "[{}] {} {} -> {} in {}ms",
        request_id,
        method,
        path,
        response.status(),
        started.elapsed().as_millis()
    );

    let headers = response.headers_mut();
    headers.insert(API_VERSION_HEADER, HeaderValue::from_static(API_VERSION));
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        headers.insert(REQUEST_ID_HEADER, value);
    }
    response
}
