//! Service discovery subsystem: registry, health loop, and the dynamic ↔
//! static mode state machine that probes the control plane in the
//! background.
//!
//! Modeled as an explicit three-state machine (`DiscoveryMode::{Dynamic,
//! Static, Transitioning}`) rather than ambient booleans, per the redesign
//! note in §9: every transition purges the opposite kind of instance before
//! populating the new one.

use crate::models::instance::{DiscoveryMode, DiscoveryStatus, HealthCheckResult, ServiceInstance};
use crate::models::registry::ServiceRegistry;
use crate::models::settings::{DiscoverySettings, PortRegistry, ServiceConfig};
use chrono::Utc;
use log::{debug, info, warn};
use rand::Rng;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tokio::time::sleep;

/// One entry in the control plane's `/api/discovery/services` response.
#[derive(Debug, Deserialize)]
struct ServiceDescriptor {
    id: Option<String>,
    name: String,
    #[serde(default)]
    host: Option<String>,
    #[serde(default)]
    port: Option<u16>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default, rename = "healthEndpoint")]
    health_endpoint: Option<String>,
    #[serde(default)]
    metadata: HashMap<String, Value>,
}

/// Accepts the three response shapes the control plane may answer with: a
/// raw array, `{services: [...]}`, or `{data: {services: [...]}}`.
fn parse_descriptors(body: &Value) -> Vec<ServiceDescriptor> {
    let array = if body.is_array() {
        Some(body)
    } else {
        body.get("services")
            .or_else(|| body.get("data").and_then(|d| d.get("services")))
    };

    match array {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| serde_json::from_value(v.clone()).ok())
            .collect(),
        _ => Vec::new(),
    }
}

/// Resolves a descriptor's port from, in order: `port`, `metadata.port`, a
/// parse of `healthEndpoint`, or the port-name registry. Returns `None` when
/// no source resolves, which causes the whole descriptor to be rejected.
fn resolve_descriptor_port(descriptor: &ServiceDescriptor, ports: &PortRegistry) -> Option<u16> {
    if let Some(port) = descriptor.port {
        return Some(port);
    }
    if let Some(port) = descriptor
        .metadata
        .get("port")
        .and_then(|v| v.as_u64())
        .and_then(|p| u16::try_from(p).ok())
    {
        return Some(port);
    }
    if let Some(endpoint) = &descriptor.health_endpoint {
        if let Some(port) = parse_port_from_url(endpoint) {
            return Some(port);
        }
    }
    ports.resolve(&descriptor.name)
}

fn parse_port_from_url(url: &str) -> Option<u16> {
    let after_scheme = url.split("://").nth(1).unwrap_or(url);
    let host_port = after_scheme.split('/').next()?;
    host_port.rsplit_once(':').and_then(|(_, p)| p.parse().ok())
}

fn is_healthy_body(body: &Value) -> bool {
    body.get("status").and_then(Value::as_str) == Some("healthy")
        || body.get("success").and_then(Value::as_bool) == Some(true)
}

/// Registry + discovery mode state machine. Cheap to clone via `Arc`; the
/// two background loops (`run_health_loop`, `run_discovery_probe_loop`) hold
/// their own `Arc<Self>` and run for the lifetime of the process.
pub struct ServiceDiscovery {
    registry: RwLock<ServiceRegistry>,
    status: RwLock<DiscoveryStatus>,
    last_eviction: RwLock<Instant>,
    client: Client,
    settings: DiscoverySettings,
    services: HashMap<String, ServiceConfig>,
    ports: PortRegistry,
}

impl ServiceDiscovery {
    pub fn new(
        settings: DiscoverySettings,
        services: HashMap<String, ServiceConfig>,
        ports: PortRegistry,
    ) -> Arc<Self> {
        let mut status = DiscoveryStatus::default();
        status.probe_interval_ms = settings.probe_interval_ms;

        Arc::new(Self {
            registry: RwLock::new(ServiceRegistry::new()),
            status: RwLock::new(status),
            last_eviction: RwLock::new(Instant::now()),
            client: Client::builder()
                .build()
                .expect("failed to build discovery HTTP client"),
            settings,
            services,
            ports,
        })
    }

    pub async fn register(&self, instance: ServiceInstance) {
        self.registry.write().await.upsert(instance);
    }

    pub async fn deregister(&self, service: &str, id: &str) -> Option<ServiceInstance> {
        self.registry.write().await.remove(service, id)
    }

    /// Only `healthy = true` instances, per the registry invariant.
    pub async fn discover(&self, service: &str) -> Vec<ServiceInstance> {
        self.registry
            .read()
            .await
            .discoverable(service)
            .into_iter()
            .cloned()
            .collect()
    }

    pub async fn all_services(&self) -> ServiceRegistry {
        self.registry.read().await.clone()
    }

    pub async fn stats(&self, service: &str) -> (usize, usize) {
        let registry = self.registry.read().await;
        let all = registry.instances(service);
        let healthy = all.iter().filter(|i| i.healthy).count();
        (all.len(), healthy)
    }

    pub async fn status(&self) -> DiscoveryStatus {
        self.status.read().await.clone()
    }

    pub fn port_registry(&self) -> &PortRegistry {
        &self.ports
    }

    /// GET `protocol://host:port + healthEndpoint`. A 5s timeout, a network
    /// error, or a non-matching body are all unhealthy; never removes the
    /// instance (only TTL eviction does that).
    pub async fn check_health(&self, instance: &ServiceInstance) -> HealthCheckResult {
        let endpoint = instance
            .health_endpoint
            .clone()
            .unwrap_or_else(|| "/health".to_string());
        let url = format!("{}{}", instance.base_url(), endpoint);
        let started = Instant::now();

        let result = tokio::time::timeout(Duration::from_secs(5), self.client.get(&url).send()).await;

        match result {
            Ok(Ok(response)) => match response.json::<Value>().await {
                Ok(body) if is_healthy_body(&body) => HealthCheckResult {
                    healthy: true,
                    response_time_ms: started.elapsed().as_millis() as u64,
                    error: None,
                    checked_at: Utc::now(),
                },
                Ok(_) => HealthCheckResult {
                    healthy: false,
                    response_time_ms: started.elapsed().as_millis() as u64,
                    error: Some("health body did not indicate healthy".to_string()),
                    checked_at: Utc::now(),
                },
                Err(e) => HealthCheckResult {
                    healthy: false,
                    response_time_ms: started.elapsed().as_millis() as u64,
                    error: Some(format!("unparseable health body: {e}")),
                    checked_at: Utc::now(),
                },
            },
            Ok(Err(e)) => HealthCheckResult {
                healthy: false,
                response_time_ms: started.elapsed().as_millis() as u64,
                error: Some(e.to_string()),
                checked_at: Utc::now(),
            },
            Err(_) => HealthCheckResult {
                healthy: false,
                response_time_ms: 5000,
                error: Some("health check timed out".to_string()),
                checked_at: Utc::now(),
            },
        }
    }

    /// Admin override: force dynamic mode, attempting one discovery pass
    /// immediately. Returns whether the attempt succeeded.
    pub async fn force_dynamic(self: &Arc<Self>) -> bool {
        match self.dynamic_discovery_step().await {
            Ok(instances) => {
                self.transition_to_dynamic(instances).await;
                true
            }
            Err(e) => {
                warn!("forced dynamic discovery failed: {e}");
                false
            }
        }
    }

    pub async fn force_static(self: &Arc<Self>) {
        let instances = self.static_fallback_instances();
        self.transition_to_static(instances).await;
    }

    async fn transition_to_dynamic(&self, instances: Vec<ServiceInstance>) {
        {
            let mut registry = self.registry.write().await;
            // Purge every static instance across the whole registry, not just
            // services present in the new discovery response, else a service
            // the control plane stopped reporting would keep its stale static
            // instances around after the mode switched to dynamic.
            for name in registry.service_names() {
                let kept: Vec<_> = registry
                    .instances(&name)
                    .iter()
                    .filter(|i| i.discovered)
                    .cloned()
                    .collect();
                registry.replace_service(&name, kept);
            }
            for instance in instances {
                registry.upsert(instance);
            }
        }
        let mut status = self.status.write().await;
        status.mode = DiscoveryMode::Dynamic;
        status.system_service_available = true;
        status.last_mode_switch = Some(Utc::now());
        status.success_count += 1;
    }

    async fn transition_to_static(&self, instances: Vec<ServiceInstance>) {
        {
            let mut registry = self.registry.write().await;
            // Purge every dynamic instance across the whole registry; static
            // fallback instances for this tick are appended below.
            for name in registry.service_names() {
                let kept: Vec<_> = registry
                    .instances(&name)
                    .iter()
                    .filter(|i| !i.discovered)
                    .cloned()
                    .collect();
                registry.replace_service(&name, kept);
            }
            for instance in instances {
                registry.upsert(instance);
            }
        }
        let mut status = self.status.write().await;
        status.mode = DiscoveryMode::Static;
        status.system_service_available = false;
        status.last_static_fallback = Some(Utc::now());
        status.last_mode_switch = Some(Utc::now());
        status.failure_count += 1;
    }

    /// GET `control_plane_url + /api/discovery/services`, 10s timeout.
    /// Descriptors whose port cannot be resolved are skipped; the rest still
    /// register.
    async fn dynamic_discovery_step(&self) -> Result<Vec<ServiceInstance>, String> {
        let base = self
            .settings
            .control_plane_url
            .clone()
            .ok_or_else(|| "no control plane URL configured".to_string())?;
        let url = format!("{}/api/discovery/services", base.trim_end_matches('/'));

        let response = tokio::time::timeout(Duration::from_secs(10), self.client.get(&url).send())
            .await
            .map_err(|_| "discovery probe timed out".to_string())?
            .map_err(|e| e.to_string())?;

        let body: Value = response.json().await.map_err(|e| e.to_string())?;
        let descriptors = parse_descriptors(&body);
        let now = Utc::now();

        let mut instances = Vec::with_capacity(descriptors.len());
        for descriptor in descriptors {
            let Some(port) = resolve_descriptor_port(&descriptor, &self.ports) else {
                warn!(
                    "discovery descriptor for '{}' has no resolvable port, rejecting",
                    descriptor.name
                );
                continue;
            };
            let healthy = descriptor
                .status
                .as_deref()
                .map(|s| s != "unhealthy")
                .unwrap_or(true);
            instances.push(ServiceInstance {
                id: descriptor.id.unwrap_or_else(|| format!("{}-{}", descriptor.name, port)),
                service: descriptor.name,
                host: descriptor.host.unwrap_or_else(|| "localhost".to_string()),
                port,
                protocol: "http".to_string(),
                health_endpoint: descriptor.health_endpoint,
                version: None,
                metadata: HashMap::new(),
                weight: 1,
                registered_at: now,
                last_health_check: None,
                healthy,
                discovered: true,
            });
        }
        Ok(instances)
    }

    fn static_fallback_instances(&self) -> Vec<ServiceInstance> {
        let now = Utc::now();
        let mut instances = Vec::new();
        for (name, config) in &self.services {
            if config.static_instances.is_empty() {
                if let Some(port) = self.ports.resolve(name) {
                    let host = std::env::var(format!("{}_HOST", name.to_uppercase().replace('-', "_")))
                        .unwrap_or_else(|_| "localhost".to_string());
                    instances.push(ServiceInstance {
                        id: format!("{name}-static"),
                        service: name.clone(),
                        host,
                        port,
                        protocol: "http".to_string(),
                        health_endpoint: Some("/health".to_string()),
                        version: None,
                        metadata: HashMap::new(),
                        weight: 1,
                        registered_at: now,
                        last_health_check: None,
                        healthy: true,
                        discovered: false,
                    });
                }
                continue;
            }
            for (idx, static_instance) in config.static_instances.iter().enumerate() {
                instances.push(ServiceInstance {
                    id: format!("{name}-static-{idx}"),
                    service: name.clone(),
                    host: static_instance.host.clone(),
                    port: static_instance.port,
                    protocol: static_instance.protocol.clone(),
                    health_endpoint: static_instance.health_endpoint.clone(),
                    version: None,
                    metadata: HashMap::new(),
                    weight: static_instance.weight,
                    registered_at: now,
                    last_health_check: None,
                    healthy: true,
                    discovered: false,
                });
            }
        }
        instances
    }

    /// Health loop: checks every known instance in parallel on each tick,
    /// with ±10% jitter applied once at startup to desynchronize replicas.
    /// Evicts instances past TTL at most once per `eviction_interval_ms`.
    pub async fn run_health_loop(self: Arc<Self>) {
        let base_interval = Duration::from_millis(self.settings.health_check_interval_ms);
        let jitter_frac = rand::thread_rng().gen_range(-0.1..=0.1);
        let jittered = base_interval.mul_f64(1.0 + jitter_frac);
        sleep(jittered).await;

        let mut interval = tokio::time::interval(base_interval);
        loop {
            interval.tick().await;
            self.run_health_pass().await;
            self.run_eviction_pass().await;
        }
    }

    async fn run_health_pass(&self) {
        let all: Vec<ServiceInstance> = {
            let registry = self.registry.read().await;
            registry.all_instances().cloned().collect()
        };

        let checks = all.iter().map(|instance| async move {
            let result = self.check_health(instance).await;
            (instance.service.clone(), instance.id.clone(), result)
        });
        let results = futures::future::join_all(checks).await;

        let mut registry = self.registry.write().await;
        for (service, id, result) in results {
            registry.mark_health(&service, &id, result.healthy, result.checked_at);
        }
    }

    async fn run_eviction_pass(&self) {
        let eviction_interval = Duration::from_millis(self.settings.eviction_interval_ms);
        let mut last_eviction = self.last_eviction.write().await;
        if last_eviction.elapsed() < eviction_interval {
            return;
        }
        *last_eviction = Instant::now();
        drop(last_eviction);

        let ttl = chrono::Duration::milliseconds(self.settings.service_ttl_ms as i64);
        let now = Utc::now();
        let mut registry = self.registry.write().await;
        for name in registry.service_names() {
            let kept: Vec<_> = registry
                .instances(&name)
                .iter()
                .filter(|i| i.age(now) <= ttl)
                .cloned()
                .collect();
            registry.replace_service(&name, kept);
        }
    }

    /// Discovery probe loop: attempts dynamic discovery unless already
    /// dynamic-and-available; falls back to static on failure.
    pub async fn run_discovery_probe_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(Duration::from_millis(self.settings.probe_interval_ms));
        loop {
            interval.tick().await;
            self.run_probe_pass().await;
        }
    }

    async fn run_probe_pass(&self) {
        let current = self.status.read().await.clone();
        if current.mode == DiscoveryMode::Dynamic && current.system_service_available {
            debug!("discovery already dynamic and control plane available, skipping probe");
            return;
        }

        {
            let mut status = self.status.write().await;
            status.mode = DiscoveryMode::Transitioning;
            status.last_dynamic_attempt = Some(Utc::now());
        }

        match self.dynamic_discovery_step().await {
            Ok(instances) => {
                info!("discovery probe succeeded, switching to dynamic mode");
                self.transition_to_dynamic(instances).await;
            }
            Err(e) => {
                if current.mode == DiscoveryMode::Static {
                    debug!("discovery probe failed while static: {e}");
                } else {
                    warn!("discovery probe failed while transitioning: {e}");
                }
                let instances = self.static_fallback_instances();
                self.transition_to_static(instances).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_raw_array_shape() {
        let body = json!([{"id": "a1", "name": "svc", "port": 8080}]);
        let descriptors = parse_descriptors(&body);
        assert_eq!(descriptors.len(), 1);
        assert_eq!(descriptors[0].name, "svc");
    }

    #[test]
    fn parses_services_wrapper_shape() {
        let body = json!({"services": [{"name": "svc", "port": 1}]});
        assert_eq!(parse_descriptors(&body).len(), 1);
    }

    #[test]
    fn parses_nested_data_services_shape() {
        let body = json!({"data": {"services": [{"name": "svc", "port": 1}]}});
        assert_eq!(parse_descriptors(&body).len(), 1);
    }

    #[test]
    fn port_resolution_falls_through_to_registry() {
        let mut ports = PortRegistry::new();
        ports.insert("svc", 9090);
        let descriptor: ServiceDescriptor =
            serde_json::from_value(json!({"name": "svc"})).unwrap();
        assert_eq!(resolve_descriptor_port(&descriptor, &ports), Some(9090));
    }

    #[test]
    fn port_resolution_prefers_explicit_port() {
        let ports = PortRegistry::new();
        let descriptor: ServiceDescriptor =
            serde_json::from_value(json!({"name": "svc", "port": 7070})).unwrap();
        assert_eq!(resolve_descriptor_port(&descriptor, &ports), Some(7070));
    }

    #[test]
    fn unresolvable_port_rejects_descriptor() {
        let ports = PortRegistry::new();
        let descriptor: ServiceDescriptor =
            serde_json::from_value(json!({"name": "svc"})).unwrap();
        assert_eq!(resolve_descriptor_port(&descriptor, &ports), None);
    }

    #[test]
    fn health_body_accepts_status_or_success() {
        assert!(is_healthy_body(&json!({"status": "healthy"})));
        assert!(is_healthy_body(&json!({"success": true})));
        assert!(!is_healthy_body(&json!({"status": "degraded"})));
    }

    #[tokio::test]
    async fn mode_transition_purges_opposite_discovered_flag() {
        let discovery = ServiceDiscovery::new(
            DiscoverySettings::default(),
            HashMap::new(),
            PortRegistry::new(),
        );
        let now = Utc::now();
        discovery
            .register(ServiceInstance {
                id: "static-1".to_string(),
                service: "orders".to_string(),
                host: "localhost".to_string(),
                port: 8080,
                protocol: "http".to_string(),
                health_endpoint: None,
                version: None,
                metadata: HashMap::new(),
                weight: 1,
                registered_at: now,
                last_health_check: None,
                healthy: true,
                discovered: false,
            })
            .await;

        discovery
            .transition_to_dynamic(vec![ServiceInstance {
                id: "dyn-1".to_string(),
                service: "orders".to_string(),
                host: "localhost".to_string(),
                port: 9090,
                protocol: "http".to_string(),
                health_endpoint: None,
                version: None,
                metadata: HashMap::new(),
                weight: 1,
                registered_at: now,
                last_health_check: None,
                healthy: true,
                discovered: true,
            }])
            .await;

        let instances = discovery.discover("orders").await;
        assert_eq!(instances.len(), 1);
        assert!(instances[0].discovered);
    }
}
