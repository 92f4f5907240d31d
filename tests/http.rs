// nicehash_exporter - Prometheus metrics exporter for NiceHash mining rigs
//
// Copyright 2022 Nick Pillitteri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
//

use axum::body::Body;
use axum::http::header::CONTENT_TYPE;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use nicehash_exporter::client::{ExchangeRates, MiningRigs, Wallet};
use nicehash_exporter::http::{router, RequestState, OPENMETRICS_CONTENT_TYPE};
use nicehash_exporter::metrics::FleetMetrics;
use prometheus_client::registry::Registry;
use serde_json::json;
use std::sync::Arc;
use tower::ServiceExt;

fn new_app() -> (Router, FleetMetrics) {
    let mut registry = Registry::default();
    let metrics = FleetMetrics::new(&mut registry, "nh_", &["BTCUSDC".to_owned(), "BTCEURS".to_owned()]);
    let app = router(Arc::new(RequestState::new(registry)));
    (app, metrics)
}

async fn get(app: Router, uri: &str) -> (StatusCode, Option<String>, String) {
    let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
    let res = app.oneshot(req).await.unwrap();
    let status = res.status();
    let content_type = res
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_owned());
    let body = hyper::body::to_bytes(res.into_body()).await.unwrap();
    (status, content_type, String::from_utf8(body.to_vec()).unwrap())
}

#[tokio::test]
async fn test_index() {
    let (app, _metrics) = new_app();
    let (status, content_type, body) = get(app, "/").await;

    assert_eq!(StatusCode::OK, status);
    assert!(content_type.unwrap().starts_with("text/html"));
    assert!(body.contains(r#"<a href="/metrics">"#));
}

#[tokio::test]
async fn test_metrics_reflect_latest_snapshot() {
    let (app, metrics) = new_app();
    let rigs: MiningRigs = serde_json::from_value(json!({
        "totalRigs": 2,
        "totalDevices": 3,
        "miningRigs": [{
            "rigId": "r1",
            "devices": [{
                "id": "d1",
                "temperature": 55,
                "deviceType": {"enumName": "GPU"},
                "status": {"enumName": "MINING"},
                "speeds": [{"algorithm": "DAGGERHASHIMOTO", "speed": "100.5", "displaySuffix": "MH/s"}],
            }],
        }],
    }))
    .unwrap();
    let wallet: Wallet = serde_json::from_value(json!({"total": {"totalBalance": "0.01234567"}})).unwrap();
    let rates: ExchangeRates = serde_json::from_value(json!({"BTCUSDC": 65000.12})).unwrap();

    metrics.mining_rigs(&rigs);
    metrics.wallet(&wallet);
    metrics.exchange_rates(&rates);

    let (status, content_type, body) = get(app, "/metrics").await;
    assert_eq!(StatusCode::OK, status);
    assert_eq!(Some(OPENMETRICS_CONTENT_TYPE.to_owned()), content_type);
    assert!(body.contains(r#"nh_device_temp{rig_name="",device_name="",device_id="d1",device_type="GPU"} 55"#));
    assert!(body.contains(
        r#"nh_device_speed{rig_name="",device_name="",device_id="d1",device_type="GPU",algo="DAGGERHASHIMOTO",suffix="MH/s"} 100.5"#
    ));
    assert!(body.contains("nh_total_btc 0.01234567"));
    assert!(body.contains("nh_btcusdc_rate 65000.12"));
    assert!(body.trim_end().ends_with("# EOF"));
}

#[tokio::test]
async fn test_metrics_wrong_method() {
    let (app, _metrics) = new_app();
    let req = Request::builder()
        .method(Method::POST)
        .uri("/metrics")
        .body(Body::empty())
        .unwrap();
    let res = app.oneshot(req).await.unwrap();

    assert_eq!(StatusCode::METHOD_NOT_ALLOWED, res.status());
}

#[tokio::test]
async fn test_unknown_path() {
    let (app, _metrics) = new_app();
    let (status, _, _) = get(app, "/nope").await;

    assert_eq!(StatusCode::NOT_FOUND, status);
}
