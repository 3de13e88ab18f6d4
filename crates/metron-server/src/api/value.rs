use crate::api::{json_response, parse_json};
use crate::service::ServiceError;
use crate::state::AppState;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use metron_common::error::WireError;
use serde::Deserialize;

/// Lookup body of `POST /value`. Payload fields, if sent, are ignored.
#[derive(Debug, Deserialize)]
struct ValueQuery {
    #[serde(default)]
    id: String,
    #[serde(rename = "type", default)]
    mtype: String,
}

async fn value_by_path(
    State(state): State<AppState>,
    Path((mtype, name)): Path<(String, String)>,
) -> Response {
    match state.service.get_metric(&mtype, &name).await {
        Ok(metric) => match metric.value_string() {
            Some(text) => (StatusCode::OK, text).into_response(),
            None => ServiceError::NotFound.into_response(),
        },
        Err(e) => e.into_response(),
    }
}

async fn value_json(State(state): State<AppState>, body: Bytes) -> Response {
    let query: ValueQuery = match parse_json(&body) {
        Ok(query) => query,
        Err(resp) => return resp,
    };
    if query.id.is_empty() {
        return ServiceError::Invalid(WireError::MissingId).into_response();
    }
    if query.mtype.is_empty() {
        return ServiceError::Invalid(WireError::MissingType).into_response();
    }
    match state.service.get_metric(&query.mtype, &query.id).await {
        Ok(metric) => json_response(StatusCode::OK, &metric),
        Err(e) => e.into_response(),
    }
}

pub fn value_routes() -> Router<AppState> {
    Router::new()
        .route("/value/{mtype}/{name}", get(value_by_path))
        .route("/value", post(value_json))
        .route("/value/", post(value_json))
}
