//! The forward engine: the single per-request pipeline that resolves a
//! route, applies the materialized policy chain (auth → rate-limit → cache
//! → forward), dispatches to a backend instance under circuit-breaker
//! protection, and translates the response.
//!
//! The header-filtering and method-dispatch idiom is generalized from a
//! single static route table to the dynamic router, policy layer, and
//! discovery subsystem this gateway adds.

use crate::middleware::cache::{CacheLookup, CachedResponse, ResponseCache};
use crate::middleware::identity::{is_spoofable, AuthContext, IdentitySigner};
use crate::middleware::rate_limiter::{build_key, RateLimitDecision, RateLimiter};
use crate::models::error::GatewayError;
use crate::models::instance::ServiceInstance;
use crate::models::metrics::RoutingMetrics;
use crate::models::policy::resolve_policies;
use crate::models::route::RouteConfig;
use crate::models::settings::{CircuitBreakerSettings, GatewaySettings, PortRegistry};
use crate::services::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError};
use crate::services::discovery::ServiceDiscovery;
use crate::services::metrics_store::{MetricValue, MetricsStore};
use crate::services::router::DynamicRouter;
use actix_web::http::header::HeaderMap as ActixHeaderMap;
use actix_web::{web, HttpRequest, HttpResponse};
use log::{debug, warn};
use reqwest::header::{HeaderMap as ReqwestHeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method as ReqwestMethod};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

const DEFAULT_TIMEOUT_MS: u64 = 30_000;
const HOP_BY_HOP_PREFIXES: &[&str] = &["host", "connection", "upgrade", "proxy-connection", "content-length"];

/// The forward engine. One instance per process, shared behind an `Arc` by
/// every request handler.
pub struct ForwardEngine {
    router: Arc<DynamicRouter>,
    discovery: Arc<ServiceDiscovery>,
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
    settings: RwLock<Arc<GatewaySettings>>,
    metrics: Arc<RoutingMetrics>,
    history: Arc<MetricsStore>,
    client: Client,
    identity_signer: Arc<IdentitySigner>,
    rate_limiter: RateLimiter,
    cache: ResponseCache,
    /// Handle to itself, used to spawn the stale-while-revalidate background
    /// refetch without needing an owning `Arc` threaded through every call
    /// site of `forward`.
    self_ref: Weak<Self>,
}

impl ForwardEngine {
    pub fn new(
        settings: Arc<GatewaySettings>,
        router: Arc<DynamicRouter>,
        discovery: Arc<ServiceDiscovery>,
        metrics: Arc<RoutingMetrics>,
        identity_signer: Arc<IdentitySigner>,
    ) -> Arc<Self> {
        Self::with_history(
            settings,
            router,
            discovery,
            metrics,
            identity_signer,
            Arc::new(MetricsStore::new(10_000, chrono::Duration::hours(24))),
        )
    }

    /// Same as [`Self::new`] but with an explicit historical-metrics store,
    /// so the process can share one instance across the admin surface.
    pub fn with_history(
        settings: Arc<GatewaySettings>,
        router: Arc<DynamicRouter>,
        discovery: Arc<ServiceDiscovery>,
        metrics: Arc<RoutingMetrics>,
        identity_signer: Arc<IdentitySigner>,
        history: Arc<MetricsStore>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            router,
            discovery,
            breakers: RwLock::new(HashMap::new()),
            settings: RwLock::new(settings),
            metrics,
            history,
            client: Client::builder().build().expect("failed to build forward-engine HTTP client"),
            identity_signer,
            rate_limiter: RateLimiter::new(),
            cache: ResponseCache::new(),
            self_ref: self_ref.clone(),
        })
    }

    /// Swaps in a freshly validated settings snapshot, used by config hot-reload.
    pub async fn replace_settings(&self, settings: Arc<GatewaySettings>) {
        *self.settings.write().await = settings;
    }

    /// Snapshot of every circuit breaker that has handled at least one
    /// request so far: `(state, window requests, window failures)`. Read by
    /// the admin status endpoint; breakers for services with no traffic yet
    /// simply don't appear.
    pub async fn circuit_snapshot(&self) -> HashMap<String, (crate::services::circuit_breaker::CircuitState, u32, u32)> {
        let breakers = self.breakers.read().await;
        let mut snapshot = HashMap::with_capacity(breakers.len());
        for (service, breaker) in breakers.iter() {
            let (total, failures) = breaker.window_counts().await;
            snapshot.insert(service.clone(), (breaker.get_state(), total, failures));
        }
        snapshot
    }

    /// Updates both the live [`RoutingMetrics`] counters and the bounded
    /// historical time-series store from a single completed-request outcome.
    fn record_outcome(&self, service: &str, success: bool, duration: Duration) {
        if success {
            self.metrics.record_success(service, duration);
        } else {
            self.metrics.record_failure(service, duration);
            self.history.record("gateway_requests_failed_total", MetricValue::Counter(1));
        }
        self.history.record("gateway_requests_total", MetricValue::Counter(1));
        self.history.record(
            &format!("gateway_response_time_ms:{service}"),
            MetricValue::Gauge(duration.as_secs_f64() * 1000.0),
        );
    }

    /// Historical metrics store backing `/api/gateway/metrics/history`.
    pub fn history(&self) -> Arc<MetricsStore> {
        self.history.clone()
    }

    async fn circuit_breaker_for(&self, service: &str, config: &CircuitBreakerSettings) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.read().await.get(service) {
            return existing.clone();
        }
        let mut guard = self.breakers.write().await;
        guard
            .entry(service.to_string())
            .or_insert_with(|| {
                CircuitBreaker::new(
                    service.to_string(),
                    CircuitBreakerConfig {
                        failure_threshold: config.failure_threshold,
                        volume_threshold: config.volume_threshold,
                        success_threshold: config.success_threshold,
                        monitoring_window: Duration::from_millis(config.monitoring_window_ms),
                        reset_timeout: Duration::from_millis(config.open_timeout_ms),
                    },
                )
            })
            .clone()
    }

    /// Entry point for every proxied request. Steps are numbered per the
    /// forward engine's procedure.
    pub async fn handle(&self, req: HttpRequest, body: web::Bytes) -> Result<HttpResponse, GatewayError> {
        let started = Instant::now();
        let path = req.path().to_string();
        let query = req.query_string().to_string();
        let method = req.method().clone();

        // 1. Route resolution.
        let route_match = self
            .router
            .lookup(&path)
            .await
            .ok_or_else(|| GatewayError::NotFound { path: path.clone() })?;
        let route = route_match.route.clone();

        if !route
            .methods
            .iter()
            .any(|m| m.eq_ignore_ascii_case(method.as_str()))
        {
            return Err(GatewayError::Validation(format!(
                "method {} not allowed for route {}",
                method.as_str(),
                route.path
            )));
        }

        let settings = self.settings.read().await.clone();
        let service_config = settings.services.get(&route.service);
        let policies = resolve_policies(
            &settings.default_policies,
            service_config.and_then(|s| s.policies.as_ref()),
            route.policies.as_ref(),
        );

        let auth_ctx = extract_auth_context(&req);

        // Auth projection runs first in the materialized chain.
        if route.auth_required && !auth_ctx.authenticated {
            self.record_outcome(&route.service, false, started.elapsed());
            return Err(GatewayError::Authentication(
                "this route requires an authenticated identity".to_string(),
            ));
        }

        // Rate limit runs second.
        if policies.rate_limit.enabled {
            let client_ip = req
                .connection_info()
                .realip_remote_addr()
                .unwrap_or("unknown")
                .to_string();
            let key = build_key(&policies.rate_limit, auth_ctx.user_id.as_deref(), &client_ip);
            if let RateLimitDecision::Reject { retry_after_secs } =
                self.rate_limiter.check(&key, &policies.rate_limit)
            {
                self.record_outcome(&route.service, false, started.elapsed());
                return Err(GatewayError::RateLimited { retry_after_secs });
            }
        }

        // Cache runs third, GET only.
        let cache_key = if policies.cache.enabled && method == actix_web::http::Method::GET {
            Some(ResponseCache::build_key(method.as_str(), &path, &query, &policies.cache.vary_headers, |name| {
                req.headers().get(name).and_then(|v| v.to_str().ok()).map(str::to_string)
            }))
        } else {
            None
        };

        if let Some(key) = &cache_key {
            let ttl = Duration::from_secs(policies.cache.ttl_secs);
            let grace = Duration::from_secs(policies.cache.stale_while_revalidate_secs);
            match self.cache.lookup(key, ttl, grace) {
                CacheLookup::Fresh(cached) => {
                    self.record_outcome(&route.service, true, started.elapsed());
                    return Ok(render_cached(cached, &route.service, started.elapsed()));
                }
                CacheLookup::Stale(cached) => {
                    self.spawn_background_refresh(
                        route.clone(),
                        route_match.wildcard_tail.clone(),
                        path.clone(),
                        query.clone(),
                        method.clone(),
                        req.headers().clone(),
                        auth_ctx.clone(),
                        key.clone(),
                    );
                    self.record_outcome(&route.service, true, started.elapsed());
                    return Ok(render_cached(cached, &route.service, started.elapsed()));
                }
                CacheLookup::Miss => {}
            }
        }

        let result = self
            .forward(
                &route,
                route_match.wildcard_tail.as_deref(),
                &path,
                &query,
                &method,
                req.headers(),
                body,
                &auth_ctx,
                started,
            )
            .await;

        match &result {
            Ok(_) => self.record_outcome(&route.service, true, started.elapsed()),
            Err(_) => self.record_outcome(&route.service, false, started.elapsed()),
        }

        match result {
            Ok((response, cacheable)) => {
                if let (Some(key), Some(cacheable)) = (&cache_key, cacheable) {
                    self.cache.store(key.clone(), cacheable);
                }
                Ok(response)
            }
            Err(error) => Err(error),
        }
    }

    /// Stale-while-revalidate's asynchronous half: re-issues the same
    /// request against the backend on a detached task and, on a cacheable
    /// result, overwrites the stale entry — the caller has already gotten
    /// its (stale) response back by the time this runs. Dropped silently if
    /// the engine itself is being torn down (`self_ref` no longer upgrades).
    fn spawn_background_refresh(
        &self,
        route: RouteConfig,
        wildcard_tail: Option<String>,
        path: String,
        query: String,
        method: actix_web::http::Method,
        headers: ActixHeaderMap,
        auth_ctx: AuthContext,
        cache_key: String,
    ) {
        let Some(engine) = self.self_ref.upgrade() else {
            return;
        };
        tokio::spawn(async move {
            let started = Instant::now();
            let result = engine
                .forward(
                    &route,
                    wildcard_tail.as_deref(),
                    &path,
                    &query,
                    &method,
                    &headers,
                    web::Bytes::new(),
                    &auth_ctx,
                    started,
                )
                .await;
            match result {
                Ok((_, Some(cacheable))) => engine.cache.store(cache_key, cacheable),
                Ok((_, None)) => {
                    debug!("background refresh for {} returned a non-cacheable status, leaving stale entry", route.service);
                }
                Err(error) => {
                    warn!("background refresh for {} failed: {error}", route.service);
                }
            }
        });
    }

    /// Steps 2-8: target path, instance selection, identity, headers,
    /// dispatch, translation. Takes the method/headers it needs directly
    /// (rather than a live `HttpRequest`) so it can also be driven from the
    /// background stale-while-revalidate refetch, which has no request of
    /// its own by the time it runs.
    async fn forward(
        &self,
        route: &RouteConfig,
        wildcard_tail: Option<&str>,
        path: &str,
        query: &str,
        method: &actix_web::http::Method,
        headers: &ActixHeaderMap,
        body: web::Bytes,
        auth_ctx: &AuthContext,
        started: Instant,
    ) -> Result<(HttpResponse, Option<CachedResponse>), GatewayError> {
        // 2. Target path construction.
        let target_path = build_target_path(path, route, wildcard_tail);

        // 3. Instance selection, falling back to the port-name registry
        // (`{host: localhost, port: X, healthy: true}`) before giving up.
        let instances = self.discovery.discover(&route.service).await;
        let fallback;
        let instance = match select_instance(&instances) {
            Some(instance) => instance,
            None => {
                fallback = synthesize_fallback_instance(&route.service, self.discovery.port_registry())
                    .ok_or_else(|| GatewayError::ServiceUnavailable {
                        service: route.service.clone(),
                    })?;
                &fallback
            }
        };

        let settings = self.settings.read().await.clone();
        let timeout_ms = route.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS);
        let timeout_remaining = timeout_ms.saturating_sub(started.elapsed().as_millis() as u64);

        // 4 & 5. Identity projection and header composition.
        let request_id = correlation_id(headers);
        let outbound_headers = compose_headers(
            headers,
            route,
            &request_id,
            path,
            timeout_remaining,
            auth_ctx,
            &self.identity_signer,
        );

        let url = format!("{}{}", instance.base_url(), target_path);
        let url = if query.is_empty() { url } else { format!("{url}?{query}") };

        let cb_config = settings
            .services
            .get(&route.service)
            .map(|s| s.circuit_breaker.clone())
            .unwrap_or_default();
        let breaker = self.circuit_breaker_for(&route.service, &cb_config).await;

        // 6. Dispatch, gated by the circuit breaker.
        let retry = route.retry.clone().unwrap_or_default();
        let dispatch_result = breaker
            .call(dispatch_with_retries(
                &self.client,
                method.clone(),
                url,
                outbound_headers,
                body,
                Duration::from_millis(timeout_ms),
                &retry,
            ))
            .await;

        let response = match dispatch_result {
            Ok(response) => response,
            Err(CircuitBreakerError::CircuitOpen) => {
                return Err(GatewayError::CircuitOpen {
                    service: route.service.clone(),
                })
            }
            Err(CircuitBreakerError::OperationFailed(DispatchError::Timeout)) => {
                return Err(GatewayError::Timeout)
            }
            Err(CircuitBreakerError::OperationFailed(DispatchError::Network(message))) => {
                return Err(GatewayError::ExternalService {
                    service: route.service.clone(),
                    message,
                })
            }
            // The breaker already counted this as a failure; the backend's
            // own response still passes through to the client untouched.
            Err(CircuitBreakerError::OperationFailed(DispatchError::Status { response, .. })) => response,
        };

        // 7. Response translation.
        translate_response(response, &route.service, &request_id, started).await
    }
}

fn extract_auth_context(req: &HttpRequest) -> AuthContext {
    req.extensions()
        .get::<AuthContext>()
        .cloned()
        .unwrap_or_default()
}

fn correlation_id(headers: &ActixHeaderMap) -> String {
    for name in ["x-correlation-id", "x-request-id", "x-trace-id"] {
        if let Some(value) = headers.get(name).and_then(|v| v.to_str().ok()) {
            if !value.is_empty() {
                return value.to_string();
            }
        }
    }
    uuid::Uuid::new_v4().to_string()
}

/// Strip the `/api/vN` version segment from a client-facing path.
fn strip_api_version(path: &str) -> String {
    let mut segments: Vec<&str> = path.split('/').collect();
    if segments.len() >= 3 && segments[1] == "api" {
        let version = segments[2];
        if version.len() > 1 && version.starts_with('v') && version[1..].chars().all(|c| c.is_ascii_digit()) {
            segments.remove(2);
        }
    }
    let joined = segments.join("/");
    if joined.is_empty() {
        "/".to_string()
    } else {
        joined
    }
}

/// Implements §4.3 step 2: version-strip, then rewrite or strip-prefix using
/// the router's captured wildcard tail (the literal suffix past a route's
/// trailing `*`, already resolved by [`crate::utils::route_matcher`]).
fn build_target_path(path: &str, route: &RouteConfig, wildcard_tail: Option<&str>) -> String {
    let versionless = strip_api_version(path);

    if let Some(rewrite) = &route.rewrite_path {
        let prefix = rewrite.trim_end_matches('/');
        return match wildcard_tail {
            Some(tail) if !tail.is_empty() => format!("{prefix}/{tail}"),
            _ => prefix.to_string(),
        };
    }

    if route.strip_prefix {
        return match wildcard_tail {
            Some(tail) => format!("/{tail}"),
            None => versionless,
        };
    }

    versionless
}

/// First healthy instance wins; no load-balancing strategy is specified by
/// this gateway (that concern was dropped — see the design ledger).
fn select_instance(instances: &[ServiceInstance]) -> Option<&ServiceInstance> {
    instances.first()
}

/// §4.3 step 3's last resort when discovery has nothing registered for this
/// service: synthesize a single instance from the static port-name registry
/// (`{host: localhost, port: X, healthy: true}`) rather than failing the
/// request outright.
fn synthesize_fallback_instance(service: &str, ports: &PortRegistry) -> Option<ServiceInstance> {
    let port = ports.resolve(service)?;
    Some(ServiceInstance {
        id: format!("{service}-fallback"),
        service: service.to_string(),
        host: "localhost".to_string(),
        port,
        protocol: "http".to_string(),
        health_endpoint: None,
        version: None,
        metadata: HashMap::new(),
        weight: 1,
        registered_at: chrono::Utc::now(),
        last_health_check: None,
        healthy: true,
        discovered: false,
    })
}

fn compose_headers(
    incoming: &ActixHeaderMap,
    route: &RouteConfig,
    request_id: &str,
    original_path: &str,
    timeout_remaining_ms: u64,
    auth_ctx: &AuthContext,
    signer: &IdentitySigner,
) -> ReqwestHeaderMap {
    let mut headers = ReqwestHeaderMap::with_capacity(incoming.len() + 8);

    for (name, value) in incoming {
        let name_str = name.as_str().to_ascii_lowercase();
        if is_spoofable(&name_str) || HOP_BY_HOP_PREFIXES.iter().any(|p| name_str.starts_with(p)) {
            continue;
        }
        if let (Ok(header_name), Ok(header_value)) =
            (HeaderName::from_bytes(name.as_ref()), HeaderValue::from_bytes(value.as_bytes()))
        {
            headers.insert(header_name, header_value);
        }
    }

    headers.insert("x-request-id", HeaderValue::from_str(request_id).unwrap());
    headers.insert("x-gateway-service", HeaderValue::from_static("api-gateway"));
    if let Ok(value) = HeaderValue::from_str(original_path) {
        headers.insert("x-original-path", value);
    }
    headers.insert("x-api-version", HeaderValue::from_static("v1"));
    headers.insert(
        "x-timeout-remaining",
        HeaderValue::from_str(&timeout_remaining_ms.to_string()).unwrap(),
    );

    if let Some(identity) = signer.project(auth_ctx) {
        if let Ok(v) = HeaderValue::from_str(&identity.user_id) {
            headers.insert("x-user-id", v);
        }
        if let Ok(v) = HeaderValue::from_str(&identity.user_role) {
            headers.insert("x-user-role", v);
        }
        if let Ok(v) = HeaderValue::from_str(&identity.signature) {
            headers.insert("x-user-id-signature", v);
        }
        if let Ok(v) = HeaderValue::from_str(&identity.timestamp) {
            headers.insert("x-user-id-timestamp", v);
        }
    }

    for (name, value) in &route.static_headers {
        if let (Ok(header_name), Ok(header_value)) =
            (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(value))
        {
            headers.insert(header_name, header_value);
        }
    }

    headers
}

fn parse_method(method: &actix_web::http::Method) -> ReqwestMethod {
    ReqwestMethod::from_bytes(method.as_str().as_bytes()).unwrap_or(ReqwestMethod::GET)
}

#[derive(Debug, thiserror::Error)]
enum DispatchError {
    #[error("request timed out")]
    Timeout,
    #[error("network error: {0}")]
    Network(String),
    /// A response the backend actually returned, but whose status counts as
    /// a circuit-breaker failure (see [`counts_as_breaker_failure`]). Carried
    /// through so the caller can still translate it for the client instead
    /// of swallowing the response.
    #[error("backend returned server error status {status}")]
    Status { status: u16, response: reqwest::Response },
}

/// A 5xx is treated as a circuit-breaker failure regardless of whether it
/// was retried or came back on the first attempt: client errors (4xx) are
/// the caller's fault and should never trip the breaker, but a server
/// error means the backend itself is unhealthy.
fn counts_as_breaker_failure(status: u16) -> bool {
    status >= 500
}

/// Issues the outbound request, retrying on the configured status codes or
/// connection errors with exponential backoff. The circuit breaker sees this
/// whole sequence as a single operation.
async fn dispatch_with_retries(
    client: &Client,
    method: actix_web::http::Method,
    url: String,
    headers: ReqwestHeaderMap,
    body: web::Bytes,
    timeout: Duration,
    retry: &crate::models::route::RetryConfig,
) -> Result<reqwest::Response, DispatchError> {
    let reqwest_method = parse_method(&method);
    let mut attempt = 0u32;

    loop {
        let response = client
            .request(reqwest_method.clone(), &url)
            .headers(headers.clone())
            .body(body.to_vec())
            .timeout(timeout)
            .send()
            .await;

        match response {
            Ok(resp) => {
                let status = resp.status().as_u16();
                let should_retry = attempt < retry.max_retries && retry.retry_on_status_codes.contains(&status);
                if !should_retry {
                    if counts_as_breaker_failure(status) {
                        return Err(DispatchError::Status { status, response: resp });
                    }
                    return Ok(resp);
                }
                debug!("retrying dispatch to {url} after status {status}, attempt {attempt}");
            }
            Err(error) => {
                if error.is_timeout() && attempt >= retry.max_retries {
                    return Err(DispatchError::Timeout);
                }
                if error.is_timeout() {
                    debug!("retrying dispatch to {url} after timeout, attempt {attempt}");
                } else if retry.retry_on_connection_error && attempt < retry.max_retries {
                    warn!("retrying dispatch to {url} after network error: {error}");
                } else if error.is_timeout() {
                    return Err(DispatchError::Timeout);
                } else {
                    return Err(DispatchError::Network(error.to_string()));
                }
            }
        }

        let backoff = retry.calculate_backoff(attempt);
        tokio::time::sleep(Duration::from_millis(backoff)).await;
        attempt += 1;
    }
}

/// Translates a backend response into the gateway's outbound response.
/// 2xx/3xx get the gateway's tracing headers added; 4xx/5xx pass through
/// status and body untouched (never re-wrapped in the error envelope). On a
/// 2xx, also returns the bytes as a cacheable entry for the caller to store.
async fn translate_response(
    response: reqwest::Response,
    service: &str,
    request_id: &str,
    started: Instant,
) -> Result<(HttpResponse, Option<CachedResponse>), GatewayError> {
    let status_code = response.status().as_u16();
    let status = actix_web::http::StatusCode::from_u16(status_code)
        .unwrap_or(actix_web::http::StatusCode::BAD_GATEWAY);
    let response_headers = response.headers().clone();
    let body = response
        .bytes()
        .await
        .map_err(|e| GatewayError::ExternalService {
            service: service.to_string(),
            message: e.to_string(),
        })?;

    let mut builder = HttpResponse::build(status);
    if let Some(content_type) = response_headers.get("content-type") {
        if let Ok(value) = content_type.to_str() {
            builder.content_type(value);
        }
    }
    builder.insert_header(("x-gateway-service", "api-gateway"));
    builder.insert_header(("x-target-service", service));
    builder.insert_header(("x-request-id", request_id));
    builder.insert_header(("x-response-time", format!("{}ms", started.elapsed().as_millis())));
    builder.insert_header(("x-served-by", service));

    let cacheable = if status.is_success() {
        Some(CachedResponse {
            status: status_code,
            headers: response_headers
                .get("content-type")
                .and_then(|v| v.to_str().ok())
                .map(|v| vec![("content-type".to_string(), v.to_string())])
                .unwrap_or_default(),
            body: body.to_vec(),
        })
    } else {
        None
    };

    Ok((builder.body(body), cacheable))
}

fn render_cached(cached: CachedResponse, service: &str, elapsed: Duration) -> HttpResponse {
    let status = actix_web::http::StatusCode::from_u16(cached.status).unwrap_or(actix_web::http::StatusCode::OK);
    let mut builder = HttpResponse::build(status);
    for (name, value) in &cached.headers {
        builder.insert_header((name.as_str(), value.as_str()));
    }
    builder.insert_header(("x-gateway-service", "api-gateway"));
    builder.insert_header(("x-served-by", service));
    builder.insert_header(("x-cache", "HIT"));
    builder.insert_header(("x-response-time", format!("{}ms", elapsed.as_millis())));
    builder.body(cached.body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn route(path: &str, service: &str) -> RouteConfig {
        RouteConfig {
            path: path.to_string(),
            service: service.to_string(),
            methods: vec!["GET".to_string()],
            rewrite_path: None,
            strip_prefix: false,
            timeout_ms: None,
            retry: None,
            auth_required: false,
            static_headers: HashMap::new(),
            policies: None,
        }
    }

    #[test]
    fn strips_api_version_segment() {
        assert_eq!(strip_api_version("/api/v1/users/42"), "/api/users/42");
        assert_eq!(strip_api_version("/api/v2/orders"), "/api/orders");
        assert_eq!(strip_api_version("/health"), "/health");
    }

    #[test]
    fn target_path_rewrites_wildcard_tail() {
        let mut route = route("/api/v1/uploads/*", "storage");
        route.rewrite_path = Some("/internal/files".to_string());
        let target = build_target_path("/api/v1/uploads/2024/report.pdf", &route, Some("2024/report.pdf"));
        assert_eq!(target, "/internal/files/2024/report.pdf");
    }

    #[test]
    fn target_path_strips_prefix_when_configured() {
        let mut route = route("/api/v1/legacy/*", "legacy");
        route.strip_prefix = true;
        let target = build_target_path("/api/v1/legacy/orders/9", &route, Some("orders/9"));
        assert_eq!(target, "/orders/9");
    }

    #[test]
    fn exact_route_target_path_is_just_version_stripped() {
        let route = route("/api/v1/templates", "ai-config");
        let target = build_target_path("/api/v1/templates", &route, None);
        assert_eq!(target, "/api/templates");
    }

    #[test]
    fn select_instance_picks_first_healthy() {
        let now = chrono::Utc::now();
        let instance = ServiceInstance {
            id: "a".to_string(),
            service: "svc".to_string(),
            host: "localhost".to_string(),
            port: 1,
            protocol: "http".to_string(),
            health_endpoint: None,
            version: None,
            metadata: HashMap::new(),
            weight: 1,
            registered_at: now,
            last_health_check: None,
            healthy: true,
            discovered: false,
        };
        assert_eq!(select_instance(&[instance]).unwrap().id, "a");
        assert!(select_instance(&[]).is_none());
    }

    #[test]
    fn fallback_instance_synthesized_from_port_registry() {
        let mut ports = PortRegistry::new();
        ports.insert("orders", 9001);
        let instance = synthesize_fallback_instance("orders", &ports).unwrap();
        assert_eq!(instance.host, "localhost");
        assert_eq!(instance.port, 9001);
        assert!(instance.healthy);
        assert!(synthesize_fallback_instance("unknown", &ports).is_none());
    }

    #[test]
    fn breaker_failure_threshold_excludes_client_errors() {
        for status in [500, 502, 503, 504] {
            assert!(counts_as_breaker_failure(status), "{status} should count as a failure");
        }
        for status in [200, 301, 400, 404, 429] {
            assert!(!counts_as_breaker_failure(status), "{status} should not count as a failure");
        }
    }
}
