// meteotrentino_exporter - Prometheus and InfluxDB exporter for Meteotrentino weather stations
//
// Copyright 2025 meteotrentino_exporter contributors
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

use crate::pipeline::Pipeline;
use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use prometheus_client::encoding::text::encode;
use prometheus_client::registry::Registry;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{Instrument, Level};

const OPENMETRICS_TEXT: &str = "application/openmetrics-text; version=1.0.0; charset=utf-8";

/// State shared by every request handler.
#[derive(Debug)]
pub struct RequestContext {
    registry: Registry,
    scrape: Option<Pipeline>,
}

impl RequestContext {
    pub fn new(registry: Registry) -> Self {
        RequestContext { registry, scrape: None }
    }

    /// Run `pipeline` before encoding metrics on every scrape.
    pub fn with_scrape_fetch(mut self, pipeline: Pipeline) -> Self {
        self.scrape = Some(pipeline);
        self
    }
}

/// Routes for `/metrics` and `/up`, with request tracing.
pub fn router(context: Arc<RequestContext>) -> Router {
    Router::new()
        .route("/metrics", get(text_metrics))
        .route("/up", get(up))
        .layer(TraceLayer::new_for_http())
        .with_state(context)
}

async fn text_metrics(State(context): State<Arc<RequestContext>>) -> Response {
    if let Some(pipeline) = &context.scrape {
        // A dropped request drops this future, which cancels the fetch
        match pipeline
            .run_once(&CancellationToken::new())
            .instrument(tracing::span!(Level::DEBUG, "scrape_fetch"))
            .await
        {
            Ok(report) => {
                tracing::debug!(message = "refreshed station data for scrape", samples = report.samples);
            }
            Err(e) => {
                tracing::error!(message = "failed to refresh station data for scrape", error = %e.display_chain());
            }
        }
    }

    let mut buf = String::new();
    match encode(&mut buf, &context.registry) {
        Ok(_) => {
            tracing::debug!(message = "encoded prometheus metrics to text format", num_bytes = buf.len());
            ([(CONTENT_TYPE, OPENMETRICS_TEXT)], buf).into_response()
        }
        Err(e) => {
            tracing::error!(message = "error encoding metrics", error = %e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn up() -> StatusCode {
    StatusCode::NO_CONTENT
}

#[cfg(test)]
mod tests {
    use super::{router, RequestContext, OPENMETRICS_TEXT};
    use crate::client::MeteoClient;
    use crate::metrics::WeatherMetrics;
    use crate::pipeline::Pipeline;
    use crate::testing::serve;
    use axum::routing::get;
    use axum::Router;
    use prometheus_client::registry::Registry;
    use reqwest::{Client, StatusCode, Url};
    use std::net::SocketAddr;
    use std::sync::Arc;
    use std::time::Duration;

    const LAST_DATA: &str = include_str!("testdata/last_data.xml");

    async fn exporter(context: RequestContext) -> SocketAddr {
        serve(router(Arc::new(context))).await
    }

    #[tokio::test]
    async fn test_up() {
        let addr = exporter(RequestContext::new(Registry::default())).await;
        let res = reqwest::get(format!("http://{}/up", addr)).await.unwrap();

        assert_eq!(StatusCode::NO_CONTENT, res.status());
        assert!(res.text().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_metrics() {
        let mut registry = Registry::default();
        let _metrics = WeatherMetrics::new(&mut registry);
        let addr = exporter(RequestContext::new(registry)).await;

        let res = reqwest::get(format!("http://{}/metrics", addr)).await.unwrap();
        assert_eq!(StatusCode::OK, res.status());
        assert_eq!(
            Some(OPENMETRICS_TEXT),
            res.headers().get("content-type").and_then(|v| v.to_str().ok())
        );

        let body = res.text().await.unwrap();
        assert!(body.contains("# TYPE temperature_celsius gauge"), "{}", body);
        assert!(body.ends_with("# EOF\n"), "{}", body);
    }

    #[tokio::test]
    async fn test_wrong_method_and_path() {
        let addr = exporter(RequestContext::new(Registry::default())).await;
        let client = Client::new();

        let res = client.post(format!("http://{}/metrics", addr)).send().await.unwrap();
        assert_eq!(StatusCode::METHOD_NOT_ALLOWED, res.status());

        let res = client.get(format!("http://{}/nope", addr)).send().await.unwrap();
        assert_eq!(StatusCode::NOT_FOUND, res.status());
    }

    #[tokio::test]
    async fn test_scrape_fetch() {
        let station = serve(Router::new().route("/data", get(|| async { LAST_DATA }))).await;
        let base = Url::parse(&format!("http://{}/data", station)).unwrap();
        let client = Arc::new(MeteoClient::new(Client::new(), &base, "T0129", Duration::from_secs(5)));

        let mut registry = Registry::default();
        let metrics = Arc::new(WeatherMetrics::new(&mut registry));
        let pipeline = Pipeline::new(client, "T0129").with_sink(metrics);
        let addr = exporter(RequestContext::new(registry).with_scrape_fetch(pipeline)).await;

        let body = reqwest::get(format!("http://{}/metrics", addr))
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert!(body.contains("temperature_celsius 4.9"), "{}", body);
        assert!(body.contains("humidity_percent 82"), "{}", body);
    }

    #[tokio::test]
    async fn test_scrape_fetch_failure_still_serves() {
        let station = serve(Router::new().route("/data", get(|| async { StatusCode::SERVICE_UNAVAILABLE }))).await;
        let base = Url::parse(&format!("http://{}/data", station)).unwrap();
        let client = Arc::new(MeteoClient::new(Client::new(), &base, "T0129", Duration::from_secs(5)));

        let mut registry = Registry::default();
        let metrics = Arc::new(WeatherMetrics::new(&mut registry));
        let pipeline = Pipeline::new(client, "T0129").with_sink(metrics);
        let addr = exporter(RequestContext::new(registry).with_scrape_fetch(pipeline)).await;

        let res = reqwest::get(format!("http://{}/metrics", addr)).await.unwrap();
        assert_eq!(StatusCode::OK, res.status());
        let body = res.text().await.unwrap();
        assert!(body.contains("temperature_celsius 0"), "{}", body);
    }
}
