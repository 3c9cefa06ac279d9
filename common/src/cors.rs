use http::{HeaderValue, Method, header::CONTENT_TYPE};
use std::time::Duration;
use tower_http::cors::{AllowOrigin, CorsLayer};

/// CORS layer for the UI: POST-only endpoints with JSON bodies.
pub fn layer(origins: &[String]) -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins.iter().map(|o| {
            HeaderValue::from_str(o)
                .unwrap_or_else(|_| panic!("Invalid header value for CORS origin: {}", o))
        })))
        .allow_methods([Method::POST])
        .allow_headers([CONTENT_TYPE]) // list explicitly
        .max_age(Duration::from_secs(60 * 60))
}
