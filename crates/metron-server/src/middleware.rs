//! Ingress guards and body transforms.
//!
//! Each function is an axum `from_fn_with_state` middleware; [`crate::app`]
//! stacks them so a request is checked against the trusted subnet, then
//! decrypted, verified and finally inflated before it reaches a handler.

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{header, HeaderValue, Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use metron_common::{compress, signature, HASH_HEADER, REAL_IP_HEADER};
use std::net::IpAddr;

use crate::config::BODY_LIMIT;
use crate::logging::TraceId;
use crate::state::AppState;

fn trace_id<B>(req: &Request<B>) -> String {
    req.extensions()
        .get::<TraceId>()
        .map(|t| t.0.clone())
        .unwrap_or_default()
}

/// Buffers the request body, or answers 413 when it exceeds [`BODY_LIMIT`].
async fn buffer(req: Request<Body>) -> Result<(axum::http::request::Parts, Bytes), Response> {
    let (parts, body) = req.into_parts();
    match axum::body::to_bytes(body, BODY_LIMIT).await {
        Ok(bytes) => Ok((parts, bytes)),
        Err(e) => {
            tracing::warn!(error = %e, "Request body rejected");
            Err((StatusCode::PAYLOAD_TOO_LARGE, "Request body too large").into_response())
        }
    }
}

fn rebuild(mut parts: axum::http::request::Parts, body: Vec<u8>) -> Request<Body> {
    parts.headers.remove(header::CONTENT_LENGTH);
    Request::from_parts(parts, Body::from(body))
}

/// Rejects requests whose `X-Real-IP` is missing, malformed or outside the
/// configured CIDR.
pub async fn trusted_subnet(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let Some(net) = state.ingress.trusted_subnet else {
        return next.run(req).await;
    };

    let real_ip = req
        .headers()
        .get(REAL_IP_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<IpAddr>().ok());

    match real_ip {
        Some(ip) if net.contains(&ip) => next.run(req).await,
        Some(ip) => {
            tracing::warn!(trace_id = %trace_id(&req), ip = %ip, subnet = %net, "Request rejected: untrusted source");
            (StatusCode::FORBIDDEN, "Forbidden").into_response()
        }
        None => {
            tracing::warn!(trace_id = %trace_id(&req), "Request rejected: missing or invalid X-Real-IP");
            (StatusCode::FORBIDDEN, "Forbidden").into_response()
        }
    }
}

/// RSA-OAEP decrypts the body when a private key is configured. A body that
/// does not decrypt is passed on untouched.
pub async fn decrypt_body(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let Some(decryptor) = state.ingress.decryptor.as_ref() else {
        return next.run(req).await;
    };

    let trace_id = trace_id(&req);
    let (parts, bytes) = match buffer(req).await {
        Ok(buffered) => buffered,
        Err(resp) => return resp,
    };
    if bytes.is_empty() {
        return next.run(Request::from_parts(parts, Body::from(bytes))).await;
    }

    let body = match decryptor.decrypt(&bytes) {
        Ok(plain) => plain,
        Err(e) => {
            tracing::warn!(trace_id = %trace_id, error = %e, "Body did not decrypt, passing it through");
            bytes.to_vec()
        }
    };
    next.run(rebuild(parts, body)).await
}

/// Verifies `HashSHA256` over the body as received after decryption.
/// Requests without the header pass.
pub async fn verify_signature(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let Some(key) = state.ingress.key.as_deref() else {
        return next.run(req).await;
    };
    let Some(claimed) = req
        .headers()
        .get(HASH_HEADER)
        .map(|v| v.to_str().unwrap_or_default().to_string())
    else {
        return next.run(req).await;
    };

    let trace_id = trace_id(&req);
    let (parts, bytes) = match buffer(req).await {
        Ok(buffered) => buffered,
        Err(resp) => return resp,
    };
    if !signature::verify(&bytes, key, &claimed) {
        tracing::warn!(trace_id = %trace_id, "Request rejected: signature mismatch");
        return (StatusCode::BAD_REQUEST, "Bad HashKey").into_response();
    }
    next.run(Request::from_parts(parts, Body::from(bytes))).await
}

/// Inflates `Content-Encoding: gzip` bodies. A malformed stream is logged
/// and handed on raw.
pub async fn decompress_body(req: Request<Body>, next: Next) -> Response {
    let gzipped = req
        .headers()
        .get(header::CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.trim().eq_ignore_ascii_case("gzip"));
    if !gzipped {
        return next.run(req).await;
    }

    let trace_id = trace_id(&req);
    let (mut parts, bytes) = match buffer(req).await {
        Ok(buffered) => buffered,
        Err(resp) => return resp,
    };
    let body = match compress::gunzip(&bytes) {
        Ok(inflated) => {
            parts.headers.remove(header::CONTENT_ENCODING);
            inflated
        }
        Err(e) => {
            tracing::warn!(trace_id = %trace_id, error = %e, "Malformed gzip body, using it raw");
            bytes.to_vec()
        }
    };
    next.run(rebuild(parts, body)).await
}

/// Signs the uncompressed response body with the shared key.
pub async fn sign_response(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let response = next.run(req).await;
    let Some(key) = state.ingress.key.as_deref() else {
        return response;
    };

    let (mut parts, body) = response.into_parts();
    let bytes = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::error!(error = %e, "Failed to buffer response for signing");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };
    if let Ok(value) = HeaderValue::from_str(&signature::sign(&bytes, key)) {
        parts.headers.insert(HASH_HEADER, value);
    }
    Response::from_parts(parts, Body::from(bytes))
}
