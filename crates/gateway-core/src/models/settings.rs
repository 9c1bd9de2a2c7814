//! Top-level gateway configuration: the shape `load_settings` deserializes
//! from `config.json` and validates before the server binds a socket.

use super::policy::Policies;
use super::route::RouteConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Static fallback entry for a single backend instance, used when dynamic
/// discovery is unavailable or a service has no control-plane presence.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct StaticInstanceConfig {
    pub host: String,
    pub port: u16,
    #[serde(default = "default_protocol")]
    pub protocol: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_endpoint: Option<String>,
    #[serde(default = "default_weight")]
    pub weight: u32,
}

fn default_protocol() -> String {
    "http".to_string()
}

fn default_weight() -> u32 {
    1
}

/// Circuit breaker tuning for a single service, materialized from defaults
/// when a service declares none of its own.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CircuitBreakerSettings {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,
    #[serde(default = "default_open_timeout_ms")]
    pub open_timeout_ms: u64,
    #[serde(default = "default_monitoring_window_ms")]
    pub monitoring_window_ms: u64,
    #[serde(default = "default_volume_threshold")]
    pub volume_threshold: u32,
}

fn default_failure_threshold() -> u32 {
    5
}
fn default_success_threshold() -> u32 {
    2
}
fn default_open_timeout_ms() -> u64 {
    30_000
}
fn default_monitoring_window_ms() -> u64 {
    60_000
}
fn default_volume_threshold() -> u32 {
    10
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            success_threshold: default_success_threshold(),
            open_timeout_ms: default_open_timeout_ms(),
            monitoring_window_ms: default_monitoring_window_ms(),
            volume_threshold: default_volume_threshold(),
        }
    }
}

/// Per-service configuration: discovery fallback, circuit breaker tuning,
/// and policy overrides that apply to every route targeting this service
/// unless a route overrides them again.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct ServiceConfig {
    #[serde(default)]
    pub static_instances: Vec<StaticInstanceConfig>,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerSettings,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policies: Option<super::policy::PolicyOverrides>,
}

/// Discovery subsystem configuration: where the control plane lives and how
/// often to probe it.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct DiscoverySettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub control_plane_url: Option<String>,
    #[serde(default = "default_probe_interval_ms")]
    pub probe_interval_ms: u64,
    #[serde(default = "default_health_check_interval_ms")]
    pub health_check_interval_ms: u64,
    /// Age after which an instance is evicted regardless of health, default 1h.
    #[serde(default = "default_service_ttl_ms")]
    pub service_ttl_ms: u64,
    /// Minimum spacing between eviction sweeps, default 5min.
    #[serde(default = "default_eviction_interval_ms")]
    pub eviction_interval_ms: u64,
}

fn default_probe_interval_ms() -> u64 {
    45_000
}
fn default_health_check_interval_ms() -> u64 {
    60_000
}
fn default_service_ttl_ms() -> u64 {
    3_600_000
}
fn default_eviction_interval_ms() -> u64 {
    300_000
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self {
            control_plane_url: None,
            probe_interval_ms: default_probe_interval_ms(),
            health_check_interval_ms: default_health_check_interval_ms(),
            service_ttl_ms: default_service_ttl_ms(),
            eviction_interval_ms: default_eviction_interval_ms(),
        }
    }
}

/// Root configuration document for the gateway, loaded by
/// [`crate::config::settings::load_settings`] and re-read on hot reload.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct GatewaySettings {
    /// Configuration schema version for compatibility checking.
    pub version: u8,

    #[serde(default)]
    pub discovery: DiscoverySettings,

    /// System-wide default policies, the outermost layer `resolve_policies`
    /// falls back to when neither a service nor a route overrides a field.
    #[serde(default)]
    pub default_policies: Policies,

    /// Per-service configuration keyed by service name.
    #[serde(default)]
    pub services: HashMap<String, ServiceConfig>,

    /// Route table, processed in declaration order; specificity-based
    /// ordering is computed at load time, not stored here.
    pub routes: Vec<RouteConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jwt: Option<JwtSettings>,
}

/// JWT validation parameters for the auth-projection middleware. The gateway
/// validates a token that was already issued elsewhere; it never issues one.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct JwtSettings {
    pub secret: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audience: Option<String>,
    #[serde(default)]
    pub required_claims: Vec<String>,
}

impl Default for JwtSettings {
    fn default() -> Self {
        Self {
            secret: std::env::var("GATEWAY_JWT_SECRET")
                .unwrap_or_else(|_| "please-change-this-secret".to_string()),
            issuer: None,
            audience: None,
            required_claims: vec!["sub".to_string(), "exp".to_string()],
        }
    }
}

impl GatewaySettings {
    /// Validates every route and service entry, returning the first error
    /// encountered. Routes are checked in declaration order.
    pub fn validate(&self) -> Result<(), String> {
        for route in &self.routes {
            route.validate()?;
        }
        for (name, service) in &self.services {
            if name.trim().is_empty() {
                return Err("service name must not be empty".to_string());
            }
            for instance in &service.static_instances {
                if instance.host.trim().is_empty() {
                    return Err(format!("service '{}' has a static instance with an empty host", name));
                }
            }
        }
        Ok(())
    }
}

/// HTTP listen address and runtime environment, sourced from the process
/// environment rather than the JSON manifest (§6 configuration surface).
#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub node_env: String,
    pub log_level: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            node_env: "development".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// CORS policy, sourced entirely from environment (§6). `CORS_DEV_WILDCARDS`
/// allows a `*` origin only when `node_env != "production"`.
#[derive(Debug, Clone)]
pub struct CorsSettings {
    pub origins: Vec<String>,
    pub allow_credentials: bool,
    pub methods: Vec<String>,
    pub allowed_headers: Vec<String>,
    pub max_age_secs: u64,
    pub dev_wildcards: bool,
}

impl Default for CorsSettings {
    fn default() -> Self {
        Self {
            origins: Vec::new(),
            allow_credentials: false,
            methods: vec![
                "GET".to_string(),
                "POST".to_string(),
                "PUT".to_string(),
                "PATCH".to_string(),
                "DELETE".to_string(),
                "OPTIONS".to_string(),
            ],
            allowed_headers: vec!["content-type".to_string(), "authorization".to_string()],
            max_age_secs: 3600,
            dev_wildcards: false,
        }
    }
}

/// The rate-limit/cache key-value store the policy layer targets. The store
/// itself is out of scope (§1); this is only the connection shape the
/// gateway would hand to whichever client implements it.
#[derive(Debug, Clone)]
pub enum RateLimitStoreSettings {
    InProcess,
    Url(String),
    HostPort {
        host: String,
        port: u16,
        password: Option<String>,
    },
    Sentinel {
        hosts: Vec<String>,
        master: String,
    },
}

impl Default for RateLimitStoreSettings {
    fn default() -> Self {
        RateLimitStoreSettings::InProcess
    }
}

/// First-class service-name → port lookup used by static discovery fallback
/// when a descriptor or static entry carries no explicit port. Never a
/// hidden global: constructed once at startup from the service manifest and
/// threaded into `ServiceDiscovery::new`.
#[derive(Debug, Clone, Default)]
pub struct PortRegistry {
    ports: HashMap<String, u16>,
}

impl PortRegistry {
    pub fn new() -> Self {
        Self {
            ports: HashMap::new(),
        }
    }

    pub fn insert(&mut self, service: impl Into<String>, port: u16) {
        self.ports.insert(service.into(), port);
    }

    pub fn resolve(&self, service: &str) -> Option<u16> {
        self.ports.get(service).copied()
    }

    /// Builds a registry from each service's first static instance port,
    /// overlaid with explicit entries from `GATEWAY_PORT_REGISTRY` (a JSON
    /// object of `{"service-name": port}`).
    pub fn from_services(services: &HashMap<String, ServiceConfig>) -> Self {
        let mut registry = Self::new();
        for (name, config) in services {
            if let Some(first) = config.static_instances.first() {
                registry.insert(name.clone(), first.port);
            }
        }
        if let Ok(raw) = std::env::var("GATEWAY_PORT_REGISTRY") {
            if let Ok(map) = serde_json::from_str::<HashMap<String, u16>>(&raw) {
                for (name, port) in map {
                    registry.insert(name, port);
                }
            }
        }
        registry
    }
}
