use crate::api::{json_response, parse_json};
use crate::service::ServiceError;
use crate::state::AppState;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::Router;
use metron_common::error::WireError;
use metron_common::types::{Metric, MetricType};

/// Parses the URL form `/update/{type}/{name}/{value}` into a record.
fn metric_from_path(mtype: &str, name: &str, raw: &str) -> Result<Metric, WireError> {
    if name.is_empty() {
        return Err(WireError::MissingId);
    }
    match mtype.parse::<MetricType>()? {
        MetricType::Gauge => {
            let value = raw
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .ok_or_else(|| WireError::BadGaugeValue(raw.to_string()))?;
            Ok(Metric::gauge(name, value))
        }
        MetricType::Counter => {
            let delta = raw
                .parse::<i64>()
                .map_err(|_| WireError::BadCounterValue(raw.to_string()))?;
            Ok(Metric::counter(name, delta))
        }
    }
}

async fn update_by_path(
    State(state): State<AppState>,
    Path((mtype, name, raw)): Path<(String, String, String)>,
) -> Response {
    let metric = match metric_from_path(&mtype, &name, &raw) {
        Ok(metric) => metric,
        Err(e) => return ServiceError::from(e).into_response(),
    };
    match state.service.set_metric(&metric).await {
        Ok(_) => (StatusCode::OK, "Saved: Ok").into_response(),
        Err(e) => e.into_response(),
    }
}

async fn update_json(State(state): State<AppState>, body: Bytes) -> Response {
    let metric: Metric = match parse_json(&body) {
        Ok(metric) => metric,
        Err(resp) => return resp,
    };
    match state.service.set_metric(&metric).await {
        Ok(stored) => json_response(StatusCode::OK, &stored),
        Err(e) => e.into_response(),
    }
}

async fn update_batch(State(state): State<AppState>, body: Bytes) -> Response {
    let metrics: Vec<Metric> = match parse_json(&body) {
        Ok(metrics) => metrics,
        Err(resp) => return resp,
    };
    match state.service.set_metrics(&metrics).await {
        Ok(stored) => {
            tracing::debug!(count = stored.len(), "Batch stored");
            json_response(StatusCode::OK, &stored)
        }
        Err(e) => e.into_response(),
    }
}

pub fn update_routes() -> Router<AppState> {
    Router::new()
        .route("/update/{mtype}/{name}/{value}", post(update_by_path))
        .route("/update", post(update_json))
        .route("/update/", post(update_json))
        .route("/updates", post(update_batch))
        .route("/updates/", post(update_batch))
}
