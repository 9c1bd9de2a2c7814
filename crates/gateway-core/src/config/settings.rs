//! Loads [`GatewaySettings`] from a JSON manifest on disk, then overlays the
//! environment-variable surface (§6) on top of it to produce the runtime
//! [`ServerSettings`], [`CorsSettings`], and [`RateLimitStoreSettings`].
//!
//! The path-traversal guard and size ceiling protect the on-disk manifest;
//! the environment overlay covers the rest of §6's configuration surface.

use crate::models::settings::{
    CorsSettings, GatewaySettings, RateLimitStoreSettings, ServerSettings,
};
use log::{debug, warn};
use std::fs;
use std::path::Path;

const MAX_CONFIG_SIZE: u64 = 10 * 1024 * 1024;

/// Reads, path-guards, and parses the JSON manifest named by
/// `KAIROS_CONFIG_PATH` (default `./config.json`).
pub fn load_settings() -> Result<GatewaySettings, Box<dyn std::error::Error>> {
    let config_path =
        std::env::var("KAIROS_CONFIG_PATH").unwrap_or_else(|_| "./config.json".to_string());

    debug!("loading gateway configuration from {config_path}");

    let path = Path::new(&config_path);
    if !path.exists() {
        return Err(format!("cannot resolve config path '{config_path}'").into());
    }

    let canonical_path = path
        .canonicalize()
        .map_err(|e| format!("cannot resolve config path '{config_path}': {e}"))?;
    let current_dir =
        std::env::current_dir().map_err(|e| format!("cannot get current directory: {e}"))?;

    if !canonical_path.starts_with(&current_dir) {
        warn!("config path '{config_path}' is outside the working directory");
        return Err("config path outside working directory".into());
    }

    let metadata = fs::metadata(&canonical_path)
        .map_err(|e| format!("cannot read config file metadata: {e}"))?;
    if metadata.len() > MAX_CONFIG_SIZE {
        return Err(format!(
            "config file too large: {} bytes (max {MAX_CONFIG_SIZE} bytes)",
            metadata.len()
        )
        .into());
    }

    let config_data =
        fs::read_to_string(&canonical_path).map_err(|e| format!("cannot read config file: {e}"))?;
    let mut settings: GatewaySettings =
        serde_json::from_str(&config_data).map_err(|e| format!("invalid JSON: {e}"))?;

    apply_circuit_breaker_overrides(&mut settings);

    debug!(
        "loaded gateway configuration: {} routes, {} services",
        settings.routes.len(),
        settings.services.len()
    );
    Ok(settings)
}

/// Overlays `<NAME_UPPER>_CIRCUIT_BREAKER_*` environment variables onto each
/// service's circuit breaker settings, per §6. `_TIMEOUT` and `_RESET_TIMEOUT`
/// both target `open_timeout_ms`; when both are set, `_RESET_TIMEOUT` wins.
fn apply_circuit_breaker_overrides(settings: &mut GatewaySettings) {
    for (name, service) in settings.services.iter_mut() {
        let prefix = format!("{}_CIRCUIT_BREAKER", name.to_uppercase().replace(['-', ' '], "_"));
        if let Some(v) = env_u64(&format!("{prefix}_TIMEOUT")) {
            service.circuit_breaker.open_timeout_ms = v;
        }
        if let Some(v) = env_u32(&format!("{prefix}_FAILURE_THRESHOLD")) {
            service.circuit_breaker.failure_threshold = v;
        }
        if let Some(v) = env_u32(&format!("{prefix}_SUCCESS_THRESHOLD")) {
            service.circuit_breaker.success_threshold = v;
        }
        if let Some(v) = env_u64(&format!("{prefix}_RESET_TIMEOUT")) {
            service.circuit_breaker.open_timeout_ms = v;
        }
        if let Some(v) = env_u64(&format!("{prefix}_MONITORING_WINDOW")) {
            service.circuit_breaker.monitoring_window_ms = v;
        }
        if let Some(v) = env_u32(&format!("{prefix}_VOLUME_THRESHOLD")) {
            service.circuit_breaker.volume_threshold = v;
        }
    }
}

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

fn env_u32(name: &str) -> Option<u32> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

/// Builds [`ServerSettings`] entirely from the environment: `PORT`/
/// `API_GATEWAY_PORT` (first wins), `HOST`, `NODE_ENV`, `LOG_LEVEL`.
pub fn load_server_settings() -> ServerSettings {
    let defaults = ServerSettings::default();
    let port = std::env::var("PORT")
        .ok()
        .or_else(|| std::env::var("API_GATEWAY_PORT").ok())
        .and_then(|v| v.parse().ok())
        .unwrap_or(defaults.port);
    ServerSettings {
        host: std::env::var("HOST").unwrap_or(defaults.host),
        port,
        node_env: std::env::var("NODE_ENV").unwrap_or(defaults.node_env),
        log_level: std::env::var("LOG_LEVEL").unwrap_or(defaults.log_level),
    }
}

/// Builds [`CorsSettings`] from the `CORS_*` environment surface (§6).
/// `CORS_DEV_WILDCARDS` only takes effect outside `NODE_ENV=production`.
pub fn load_cors_settings(node_env: &str) -> CorsSettings {
    let defaults = CorsSettings::default();

    let origins = std::env::var("CORS_ORIGINS")
        .ok()
        .map(|v| v.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect())
        .unwrap_or(defaults.origins);

    let allow_credentials = std::env::var("CORS_ALLOW_CREDENTIALS")
        .ok()
        .map(|v| v.eq_ignore_ascii_case("true"))
        .unwrap_or(defaults.allow_credentials);

    let methods = std::env::var("CORS_METHODS")
        .ok()
        .map(|v| v.split(',').map(|s| s.trim().to_uppercase()).filter(|s| !s.is_empty()).collect())
        .unwrap_or(defaults.methods);

    let allowed_headers = std::env::var("CORS_ALLOWED_HEADERS")
        .ok()
        .map(|v| v.split(',').map(|s| s.trim().to_lowercase()).filter(|s| !s.is_empty()).collect())
        .unwrap_or(defaults.allowed_headers);

    let max_age_secs = std::env::var("CORS_MAX_AGE")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(defaults.max_age_secs);

    let dev_wildcards = node_env != "production"
        && std::env::var("CORS_DEV_WILDCARDS")
            .ok()
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(defaults.dev_wildcards);

    CorsSettings {
        origins,
        allow_credentials,
        methods,
        allowed_headers,
        max_age_secs,
        dev_wildcards,
    }
}

/// Resolves the rate-limit/cache store from `REDIS_URL`, the
/// `REDIS_HOST`/`REDIS_PORT`/`REDIS_PASSWORD` triple, or a
/// `REDIS_SENTINEL_HOSTS`/`REDIS_SENTINEL_MASTER` pair, falling back to the
/// in-process store when none are set.
pub fn load_rate_limit_store_settings() -> RateLimitStoreSettings {
    if let Ok(url) = std::env::var("REDIS_URL") {
        return RateLimitStoreSettings::Url(url);
    }
    if let (Ok(hosts), Ok(master)) = (
        std::env::var("REDIS_SENTINEL_HOSTS"),
        std::env::var("REDIS_SENTINEL_MASTER"),
    ) {
        return RateLimitStoreSettings::Sentinel {
            hosts: hosts.split(',').map(str::trim).map(str::to_string).collect(),
            master,
        };
    }
    if let Ok(host) = std::env::var("REDIS_HOST") {
        let port = std::env::var("REDIS_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(6379);
        return RateLimitStoreSettings::HostPort {
            host,
            port,
            password: std::env::var("REDIS_PASSWORD").ok(),
        };
    }
    RateLimitStoreSettings::InProcess
}
