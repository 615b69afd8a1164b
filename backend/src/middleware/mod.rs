pub mod cors;
pub mod locale;
pub mod request_log;

pub use cors::cors_layer;
pub use locale::locale_middleware;
pub use request_log::{API_VERSION_HEADER, REQUEST_ID_HEADER, request_log_middleware};
