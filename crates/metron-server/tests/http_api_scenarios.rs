mod common;

use axum::http::StatusCode;
use common::{
    build_test_context, build_test_context_with, request_json, request_no_body, request_raw,
};
use metron_common::crypto::{Decryptor, Encryptor};
use metron_common::{compress, signature, HASH_HEADER, REAL_IP_HEADER};
use metron_server::state::Ingress;
use serde_json::json;

const BATCH: &str = r#"[{"id":"testCounter","type":"counter","delta":1},{"id":"testGauge","type":"gauge","value":100.0015}]"#;

async fn bump_counter_four_times(app: &axum::Router) {
    for _ in 0..4 {
        let resp = request_no_body(app, "POST", "/update/counter/testCounter/1").await;
        assert_eq!(resp.status, StatusCode::OK);
        assert_eq!(resp.text(), "Saved: Ok");
    }
}

#[tokio::test]
async fn counter_updates_accumulate() {
    let ctx = build_test_context().expect("test context should build");
    bump_counter_four_times(&ctx.app).await;

    let resp = request_no_body(&ctx.app, "GET", "/value/counter/testCounter").await;
    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(resp.text(), "4");
    assert!(resp.header("x-trace-id").is_some());
}

#[tokio::test]
async fn gauge_keeps_the_last_value() {
    let ctx = build_test_context().expect("test context should build");
    for value in ["1.1", "0.0001"] {
        let uri = format!("/update/gauge/testGauge/{value}");
        assert_eq!(request_no_body(&ctx.app, "POST", &uri).await.status, StatusCode::OK);
    }

    let resp = request_no_body(&ctx.app, "GET", "/value/gauge/testGauge").await;
    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(resp.text(), "0.0001");
}

#[tokio::test]
async fn malformed_path_updates_are_rejected() {
    let ctx = build_test_context().expect("test context should build");
    for uri in [
        "/update/counter/testCounter/ccc",
        "/update/unknown/x/1",
        "/update/gauge/testGauge/abc",
    ] {
        let resp = request_no_body(&ctx.app, "POST", uri).await;
        assert_eq!(resp.status, StatusCode::BAD_REQUEST, "{uri}");
    }
}

#[tokio::test]
async fn unknown_metrics_are_not_found() {
    let ctx = build_test_context().expect("test context should build");
    let resp = request_no_body(&ctx.app, "GET", "/value/counter/unknownName").await;
    assert_eq!(resp.status, StatusCode::NOT_FOUND);

    let resp = request_no_body(&ctx.app, "GET", "/value/histogram/unknownName").await;
    assert_eq!(resp.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn batch_returns_running_totals() {
    let ctx = build_test_context().expect("test context should build");
    bump_counter_four_times(&ctx.app).await;

    let resp = request_raw(&ctx.app, "/updates", &[], BATCH.as_bytes().to_vec()).await;
    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(
        resp.header("content-type"),
        Some("application/json; charset=utf-8")
    );
    assert_eq!(
        resp.json(),
        json!([
            {"id": "testCounter", "type": "counter", "delta": 5},
            {"id": "testGauge", "type": "gauge", "value": 100.0015}
        ])
    );
}

#[tokio::test]
async fn json_update_returns_the_stored_record() {
    let ctx = build_test_context().expect("test context should build");
    let body = json!({"id": "PollCount", "type": "counter", "delta": 3});
    request_json(&ctx.app, "POST", "/update", &body).await;
    let resp = request_json(&ctx.app, "POST", "/update", &body).await;
    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(resp.json(), json!({"id": "PollCount", "type": "counter", "delta": 6}));

    let resp = request_json(
        &ctx.app,
        "POST",
        "/update",
        &json!({"id": "Alloc", "type": "gauge", "delta": 1}),
    )
    .await;
    assert_eq!(resp.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn value_lookup_by_json() {
    let ctx = build_test_context().expect("test context should build");
    bump_counter_four_times(&ctx.app).await;

    let resp = request_json(
        &ctx.app,
        "POST",
        "/value",
        &json!({"id": "testCounter", "type": "counter"}),
    )
    .await;
    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(resp.json(), json!({"id": "testCounter", "type": "counter", "delta": 4}));

    let resp = request_json(&ctx.app, "POST", "/value", &json!({"id": "", "type": "counter"})).await;
    assert_eq!(resp.status, StatusCode::BAD_REQUEST);

    let resp = request_json(&ctx.app, "POST", "/value", &json!({"id": "x", "type": "histogram"})).await;
    assert_eq!(resp.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn dashboard_lists_every_metric() {
    let ctx = build_test_context().expect("test context should build");
    bump_counter_four_times(&ctx.app).await;

    let resp = request_no_body(&ctx.app, "GET", "/").await;
    assert_eq!(resp.status, StatusCode::OK);
    assert!(resp.header("content-type").unwrap_or_default().starts_with("text/html"));
    let page = resp.text();
    assert!(page.contains("testCounter"));
    assert!(page.contains("<td>4</td>"));
}

#[tokio::test]
async fn mutated_signature_is_rejected() {
    let ctx = build_test_context_with(Ingress {
        key: Some(b"secret".to_vec()),
        ..Ingress::default()
    })
    .expect("test context should build");

    let good = signature::sign(BATCH.as_bytes(), b"secret");
    let mut chars: Vec<char> = good.chars().collect();
    chars[0] = if chars[0] == '0' { '1' } else { '0' };
    let mutated: String = chars.into_iter().collect();

    let resp = request_raw(&ctx.app, "/updates", &[(HASH_HEADER, mutated.as_str())], BATCH.as_bytes().to_vec()).await;
    assert_eq!(resp.status, StatusCode::BAD_REQUEST);
    assert_eq!(resp.text(), "Bad HashKey");

    let resp = request_raw(&ctx.app, "/updates", &[(HASH_HEADER, good.as_str())], BATCH.as_bytes().to_vec()).await;
    assert_eq!(resp.status, StatusCode::OK);
    let sig = resp.header(HASH_HEADER).expect("response should be signed");
    assert!(signature::verify(&resp.body, b"secret", sig));

    let resp = request_raw(&ctx.app, "/updates", &[], BATCH.as_bytes().to_vec()).await;
    assert_eq!(resp.status, StatusCode::OK);
}

#[tokio::test]
async fn trusted_subnet_gates_requests() {
    let ctx = build_test_context_with(Ingress {
        trusted_subnet: Some("10.17.0.0/16".parse().expect("cidr should parse")),
        ..Ingress::default()
    })
    .expect("test context should build");
    let uri = "/update/counter/testCounter/1";

    let resp = request_raw(&ctx.app, uri, &[(REAL_IP_HEADER, "10.17.0.10")], Vec::new()).await;
    assert_eq!(resp.status, StatusCode::OK);

    let resp = request_raw(&ctx.app, uri, &[(REAL_IP_HEADER, "223.17.11.10")], Vec::new()).await;
    assert_eq!(resp.status, StatusCode::FORBIDDEN);

    let resp = request_raw(&ctx.app, uri, &[], Vec::new()).await;
    assert_eq!(resp.status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn gzip_request_matches_plain_request() {
    let plain = build_test_context().expect("test context should build");
    let zipped = build_test_context().expect("test context should build");

    let a = request_raw(&plain.app, "/updates", &[], BATCH.as_bytes().to_vec()).await;
    let b = request_raw(
        &zipped.app,
        "/updates",
        &[("Content-Encoding", "gzip")],
        compress::gzip(BATCH.as_bytes()).expect("gzip should succeed"),
    )
    .await;
    assert_eq!(a.status, b.status);
    assert_eq!(a.json(), b.json());
}

#[tokio::test]
async fn agent_wire_format_is_accepted() {
    let private = rsa::RsaPrivateKey::new(&mut rand::thread_rng(), 1024).expect("key should generate");
    let encryptor = Encryptor::new(private.to_public_key());
    let ctx = build_test_context_with(Ingress {
        key: Some(b"secret".to_vec()),
        decryptor: Some(Decryptor::new(private)),
        trusted_subnet: Some("127.0.0.0/8".parse().expect("cidr should parse")),
    })
    .expect("test context should build");

    let zipped = compress::gzip(BATCH.as_bytes()).expect("gzip should succeed");
    let sig = signature::sign(&zipped, b"secret");
    let sealed = encryptor.encrypt(&zipped).expect("encrypt should succeed");

    let resp = request_raw(
        &ctx.app,
        "/updates",
        &[
            ("Content-Encoding", "gzip"),
            (HASH_HEADER, sig.as_str()),
            (REAL_IP_HEADER, "127.0.0.1"),
        ],
        sealed,
    )
    .await;
    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(resp.json()[1]["value"], json!(100.0015));
}

#[tokio::test]
async fn responses_are_gzipped_on_request() {
    let ctx = build_test_context().expect("test context should build");
    bump_counter_four_times(&ctx.app).await;

    let req = axum::http::Request::builder()
        .method("GET")
        .uri("/")
        .header("Accept-Encoding", "gzip")
        .body(axum::body::Body::empty())
        .expect("request should build");
    let resp = common::send(&ctx.app, req).await;
    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(resp.header("content-encoding"), Some("gzip"));
    let page = compress::gunzip(&resp.body).expect("body should be gzip");
    assert!(String::from_utf8_lossy(&page).contains("testCounter"));
}

#[tokio::test]
async fn routing_errors_use_standard_statuses() {
    let ctx = build_test_context().expect("test context should build");
    assert_eq!(
        request_no_body(&ctx.app, "GET", "/updates").await.status,
        StatusCode::METHOD_NOT_ALLOWED
    );
    assert_eq!(
        request_no_body(&ctx.app, "GET", "/nowhere").await.status,
        StatusCode::NOT_FOUND
    );

    let resp = request_raw(&ctx.app, "/updates", &[], b"{not json".to_vec()).await;
    assert_eq!(resp.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn type_conflicts_are_bad_requests() {
    let ctx = build_test_context().expect("test context should build");
    bump_counter_four_times(&ctx.app).await;
    let resp = request_no_body(&ctx.app, "POST", "/update/gauge/testCounter/1.5").await;
    assert_eq!(resp.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn ping_and_synchronous_snapshot() {
    let ctx = build_test_context().expect("test context should build");
    let resp = request_no_body(&ctx.app, "GET", "/ping").await;
    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(resp.text(), "Status: ok");

    bump_counter_four_times(&ctx.app).await;
    let raw = std::fs::read(ctx.snapshot_path()).expect("snapshot should exist");
    let saved: serde_json::Value = serde_json::from_slice(&raw).expect("snapshot should be JSON");
    assert_eq!(saved["counter"]["testCounter"], 4);
}
