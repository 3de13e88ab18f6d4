use crate::state::AppState;
use axum::extract::State;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use chrono::Utc;
use metron_common::types::Metric;
use std::fmt::Write;

fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

/// Renders the metric table, one row per metric in listing order.
fn render(metrics: &[Metric]) -> String {
    let mut page = String::from(
        "<!DOCTYPE html>\n<html>\n<head><meta charset=\"utf-8\"><title>Metrics</title></head>\n<body>\n<h1>Metrics</h1>\n",
    );
    let _ = writeln!(
        page,
        "<p>{} metrics, rendered {}</p>",
        metrics.len(),
        Utc::now().format("%Y-%m-%d %H:%M:%S UTC")
    );
    page.push_str("<table>\n<tr><th>Name</th><th>Type</th><th>Value</th></tr>\n");
    for m in metrics {
        let _ = writeln!(
            page,
            "<tr><td>{}</td><td>{}</td><td>{}</td></tr>",
            escape(&m.id),
            escape(&m.mtype),
            m.value_string().unwrap_or_default()
        );
    }
    page.push_str("</table>\n</body>\n</html>\n");
    page
}

async fn dashboard(State(state): State<AppState>) -> Response {
    match state.service.list_all().await {
        Ok(metrics) => Html(render(&metrics)).into_response(),
        Err(e) => e.into_response(),
    }
}

pub fn dashboard_routes() -> Router<AppState> {
    Router::new().route("/", get(dashboard))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_escaped() {
        let page = render(&[Metric::gauge("<script>", 1.5), Metric::counter("PollCount", 4)]);
        assert!(page.contains("&lt;script&gt;"));
        assert!(!page.contains("<script>"));
        assert!(page.contains("<td>PollCount</td><td>counter</td><td>4</td>"));
        assert!(page.contains("2 metrics"));
    }
}
