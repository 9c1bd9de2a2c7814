//! Prometheus-text metrics and the discovery/circuit-breaker status endpoint.
//!
//! Prometheus text is rendered over [`RoutingMetrics`] (the real per-request
//! counters, not a standalone collector), extended with a `/status` endpoint
//! that exposes §5's discovery mode and §3.2's circuit breaker states to
//! operators.

use crate::models::metrics::RoutingMetrics;
use crate::services::discovery::ServiceDiscovery;
use crate::services::metrics_store::MetricsStore;
use crate::services::pipeline::ForwardEngine;
use actix_web::{web, HttpResponse, Result};
use serde::Deserialize;
use serde_json::json;
use std::fmt::Write as _;
use std::sync::Arc;

/// `GET /api/gateway/metrics` — Prometheus exposition format over the live
/// [`RoutingMetrics`] snapshot.
pub async fn prometheus_metrics(metrics: web::Data<Arc<RoutingMetrics>>) -> Result<HttpResponse> {
    let snapshot = metrics.snapshot();

    let mut body = String::new();
    let _ = writeln!(body, "# HELP gateway_requests_total Total number of proxied requests");
    let _ = writeln!(body, "# TYPE gateway_requests_total counter");
    let _ = writeln!(body, "gateway_requests_total {}", snapshot.total_requests);

    let _ = writeln!(body, "# HELP gateway_requests_success_total Successful proxied requests");
    let _ = writeln!(body, "# TYPE gateway_requests_success_total counter");
    let _ = writeln!(body, "gateway_requests_success_total {}", snapshot.successful_requests);

    let _ = writeln!(body, "# HELP gateway_requests_failed_total Failed proxied requests");
    let _ = writeln!(body, "# TYPE gateway_requests_failed_total counter");
    let _ = writeln!(body, "gateway_requests_failed_total {}", snapshot.failed_requests);

    let _ = writeln!(body, "# HELP gateway_response_time_avg_ms Rolling average response time in milliseconds");
    let _ = writeln!(body, "# TYPE gateway_response_time_avg_ms gauge");
    let _ = writeln!(body, "gateway_response_time_avg_ms {:.3}", snapshot.average_response_time_ms);

    let _ = writeln!(body, "# HELP gateway_service_requests_total Requests per backend service");
    let _ = writeln!(body, "# TYPE gateway_service_requests_total counter");
    for (service, counters) in &snapshot.per_service {
        let _ = writeln!(body, "gateway_service_requests_total{{service=\"{service}\"}} {}", counters.requests);
    }

    let _ = writeln!(body, "# HELP gateway_service_errors_total Errors per backend service");
    let _ = writeln!(body, "# TYPE gateway_service_errors_total counter");
    for (service, counters) in &snapshot.per_service {
        let _ = writeln!(body, "gateway_service_errors_total{{service=\"{service}\"}} {}", counters.errors);
    }

    Ok(HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4; charset=utf-8")
        .body(body))
}

/// `GET /api/gateway/metrics/json` — the same counters as structured JSON,
/// for callers that don't want to parse Prometheus exposition format.
pub async fn metrics_json(metrics: web::Data<Arc<RoutingMetrics>>) -> Result<HttpResponse> {
    Ok(HttpResponse::Ok().json(metrics.snapshot()))
}

/// `GET /api/gateway/status` — discovery mode plus every circuit breaker's
/// current state and rolling window counts.
pub async fn gateway_status(
    discovery: web::Data<Arc<ServiceDiscovery>>,
    engine: web::Data<Arc<ForwardEngine>>,
) -> Result<HttpResponse> {
    let discovery_status = discovery.status().await;
    let breakers = engine.circuit_snapshot().await;

    let breaker_json: serde_json::Map<String, serde_json::Value> = breakers
        .into_iter()
        .map(|(service, (state, total, failures))| {
            let state_name = match state {
                crate::services::circuit_breaker::CircuitState::Closed => "closed",
                crate::services::circuit_breaker::CircuitState::Open => "open",
                crate::services::circuit_breaker::CircuitState::HalfOpen => "half_open",
            };
            (
                service,
                json!({ "state": state_name, "window_requests": total, "window_failures": failures }),
            )
        })
        .collect();

    Ok(HttpResponse::Ok().json(json!({
        "discovery": discovery_status,
        "circuit_breakers": breaker_json,
        "timestamp": chrono::Utc::now().to_rfc3339(),
    })))
}

#[derive(Deserialize)]
pub struct HistoryQuery {
    name: String,
    #[serde(default = "default_history_minutes")]
    minutes: i64,
}

fn default_history_minutes() -> i64 {
    60
}

/// `GET /api/gateway/metrics/history?name=...&minutes=...` — raw points from
/// the bounded historical time-series store for a single named metric, most
/// recent `minutes` (default 60).
pub async fn metrics_history(
    history: web::Data<Arc<MetricsStore>>,
    query: web::Query<HistoryQuery>,
) -> Result<HttpResponse> {
    let end = chrono::Utc::now();
    let start = end - chrono::Duration::minutes(query.minutes.max(1));
    let points = history.query(&query.name, start, end);
    Ok(HttpResponse::Ok().json(json!({ "name": query.name, "points": points })))
}

pub fn configure_metrics(cfg: &mut web::ServiceConfig) {
    cfg.route("/api/gateway/metrics", web::get().to(prometheus_metrics))
        .route("/api/gateway/metrics/json", web::get().to(metrics_json))
        .route("/api/gateway/metrics/history", web::get().to(metrics_history))
        .route("/api/gateway/status", web::get().to(gateway_status));
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{test, App};

    #[actix_web::test]
    async fn prometheus_body_contains_expected_metric_names() {
        let metrics = Arc::new(RoutingMetrics::new());
        metrics.record_success("svc", std::time::Duration::from_millis(5));

        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(metrics))
                .configure(configure_metrics),
        )
        .await;

        let req = test::TestRequest::get().uri("/api/gateway/metrics").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 200);
        let body = test::read_body(resp).await;
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("gateway_requests_total 1"));
        assert!(text.contains("gateway_service_requests_total{service=\"svc\"} 1"));
    }

    #[actix_web::test]
    async fn history_returns_recorded_points_for_the_requested_metric() {
        let history = Arc::new(MetricsStore::new(1000, chrono::Duration::hours(1)));
        history.record("gateway_requests_total", crate::services::metrics_store::MetricValue::Counter(1));

        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(history))
                .configure(configure_metrics),
        )
        .await;

        let req = test::TestRequest::get()
            .uri("/api/gateway/metrics/history?name=gateway_requests_total")
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["name"], "gateway_requests_total");
        assert_eq!(body["points"].as_array().unwrap().len(), 1);
    }

    #[actix_web::test]
    async fn json_metrics_round_trip() {
        let metrics = Arc::new(RoutingMetrics::new());
        metrics.record_failure("svc", std::time::Duration::from_millis(1));

        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(metrics))
                .configure(configure_metrics),
        )
        .await;

        let req = test::TestRequest::get().uri("/api/gateway/metrics/json").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["failed_requests"], 1);
    }
}
