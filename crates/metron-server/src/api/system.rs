use crate::state::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;

/// Health of the backing store.
async fn ping(State(state): State<AppState>) -> Response {
    match state.service.check_db().await {
        Ok(()) => (StatusCode::OK, "Status: ok").into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Storage ping failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "Status: unavailable").into_response()
        }
    }
}

pub fn system_routes() -> Router<AppState> {
    Router::new().route("/ping", get(ping))
}
