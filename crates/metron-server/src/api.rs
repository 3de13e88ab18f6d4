pub mod dashboard;
pub mod system;
pub mod update;
pub mod value;

use crate::state::AppState;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Router;
use metron_common::JSON_CONTENT_TYPE;
use serde::Serialize;

/// Every route the server exposes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .merge(update::update_routes())
        .merge(value::value_routes())
        .merge(dashboard::dashboard_routes())
        .merge(system::system_routes())
}

/// Serialises `data` with the JSON content type used on the wire.
pub fn json_response<T>(status: StatusCode, data: &T) -> Response
where
    T: Serialize,
{
    match serde_json::to_vec(data) {
        Ok(body) => (
            status,
            [(header::CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE))],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to serialise response");
            (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response()
        }
    }
}

/// Parses a JSON request body, answering 400 with the decoder's message.
pub fn parse_json<T>(body: &[u8]) -> Result<T, Response>
where
    T: serde::de::DeserializeOwned,
{
    serde_json::from_slice(body).map_err(|e| {
        (StatusCode::BAD_REQUEST, format!("Bad request body: {e}")).into_response()
    })
}
