use crate::config::BODY_LIMIT;
use crate::state::AppState;
use crate::{api, logging, middleware as ingress};
use axum::extract::DefaultBodyLimit;
use axum::http::{header, Extensions, HeaderMap, StatusCode, Version};
use axum::middleware;
use axum::Router;
use tower_http::compression::CompressionLayer;

/// Response bodies worth compressing: JSON and the HTML dashboard.
fn compressible(_: StatusCode, _: Version, headers: &HeaderMap, _: &Extensions) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("application/json") || ct.starts_with("text/html"))
}

/// Assembles the router with the ingress stack.
///
/// The last layer added runs first, so a request passes logging, then the
/// trusted-subnet guard, decryption, signature check and decompression.
/// Responses are signed before they are gzipped.
pub fn build_http_app(state: AppState) -> Router {
    api::routes()
        .layer(DefaultBodyLimit::max(BODY_LIMIT))
        .layer(middleware::from_fn(ingress::decompress_body))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            ingress::verify_signature,
        ))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            ingress::decrypt_body,
        ))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            ingress::trusted_subnet,
        ))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            ingress::sign_response,
        ))
        .with_state(state)
        .layer(CompressionLayer::new().gzip(true).compress_when(compressible))
        .layer(middleware::from_fn(logging::request_logging))
}
