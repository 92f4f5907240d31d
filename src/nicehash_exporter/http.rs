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

use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use prometheus_client::encoding::text::encode;
use prometheus_client::registry::Registry;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub const OPENMETRICS_CONTENT_TYPE: &str = "application/openmetrics-text; version=1.0.0; charset=utf-8";

const INDEX_PAGE: &str = r#"<html>
<head><title>NiceHash Exporter</title></head>
<body>
This is an empty index, you want to go to the <a href="/metrics">metrics</a> endpoint for data!
</body>
</html>"#;

/// State shared by all HTTP requests: the registry all metrics were registered with.
///
/// Scrapes only ever read the registry. Metric values are updated by the refresh
/// task through the metric handles it was given before the registry was moved here.
#[derive(Debug)]
pub struct RequestState {
    registry: Registry,
}

impl RequestState {
    pub fn new(registry: Registry) -> Self {
        RequestState { registry }
    }
}

/// Build the router for `/` and `/metrics`.
pub fn router(state: Arc<RequestState>) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/metrics", get(text_metrics_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn index_handler() -> Html<&'static str> {
    Html(INDEX_PAGE)
}

pub async fn text_metrics_handler(State(state): State<Arc<RequestState>>) -> Response {
    let mut buf = String::new();

    match encode(&mut buf, &state.registry) {
        Ok(_) => {
            tracing::debug!(message = "encoded prometheus metrics to text format", num_bytes = buf.len());
            (StatusCode::OK, [(CONTENT_TYPE, OPENMETRICS_CONTENT_TYPE)], buf).into_response()
        }
        Err(e) => {
            tracing::error!(message = "error encoding metrics", error = %e);
            (StatusCode::INTERNAL_SERVER_ERROR, format!("error encoding metrics: {}", e)).into_response()
        }
    }
}
