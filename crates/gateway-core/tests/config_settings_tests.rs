//! Integration tests for configuration loading: the on-disk JSON manifest
//! (`load_settings`) plus the environment-variable overlays that produce
//! `ServerSettings`/`CorsSettings`/`RateLimitStoreSettings`.

use gateway_core::config::settings::{load_cors_settings, load_rate_limit_store_settings, load_server_settings, load_settings};
use gateway_core::models::settings::RateLimitStoreSettings;
use once_cell::sync::Lazy;
use std::fs;
use std::sync::Mutex;
use uuid::Uuid;

// `load_settings` reads `KAIROS_CONFIG_PATH` from the process environment,
// which is global state shared across the test binary's threads.
static ENV_MUTEX: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

const MINIMAL_CONFIG: &str = r#"{
    "version": 1,
    "discovery": {},
    "services": {
        "widgets": { "static_instances": [{ "host": "localhost", "port": 9000 }] }
    },
    "routes": [
        { "path": "/widgets/*", "service": "widgets", "methods": ["GET"] }
    ]
}"#;

/// Writes `contents` to a uniquely-named file under the crate's own working
/// directory, since `load_settings` rejects any path outside of it.
fn write_config_in_cwd(contents: &str) -> std::path::PathBuf {
    let path = std::env::current_dir()
        .unwrap()
        .join(format!("test-config-{}.json", Uuid::new_v4()));
    fs::write(&path, contents).unwrap();
    path
}

#[test]
fn loads_a_well_formed_manifest_from_the_env_var_path() {
    let _lock = ENV_MUTEX.lock().unwrap();
    let path = write_config_in_cwd(MINIMAL_CONFIG);
    std::env::set_var("KAIROS_CONFIG_PATH", &path);

    let result = load_settings();

    std::env::remove_var("KAIROS_CONFIG_PATH");
    fs::remove_file(&path).ok();

    let settings = result.expect("well-formed manifest should load");
    assert_eq!(settings.version, 1);
    assert_eq!(settings.routes.len(), 1);
    assert!(settings.services.contains_key("widgets"));
}

#[test]
fn rejects_a_missing_config_path() {
    let _lock = ENV_MUTEX.lock().unwrap();
    std::env::set_var("KAIROS_CONFIG_PATH", "./this-file-does-not-exist.json");

    let result = load_settings();

    std::env::remove_var("KAIROS_CONFIG_PATH");
    assert!(result.is_err());
}

#[test]
fn rejects_malformed_json() {
    let _lock = ENV_MUTEX.lock().unwrap();
    let path = write_config_in_cwd("{ not valid json");
    std::env::set_var("KAIROS_CONFIG_PATH", &path);

    let result = load_settings();

    std::env::remove_var("KAIROS_CONFIG_PATH");
    fs::remove_file(&path).ok();

    let err = result.unwrap_err();
    assert!(err.to_string().contains("invalid JSON"));
}

#[test]
fn rejects_paths_outside_the_working_directory() {
    let _lock = ENV_MUTEX.lock().unwrap();
    let mut outside = std::env::temp_dir();
    outside.push(format!("gateway-escape-{}.json", Uuid::new_v4()));
    fs::write(&outside, MINIMAL_CONFIG).unwrap();

    std::env::set_var("KAIROS_CONFIG_PATH", &outside);
    let result = load_settings();
    std::env::remove_var("KAIROS_CONFIG_PATH");
    fs::remove_file(&outside).ok();

    assert!(result.is_err(), "a path escaping the working directory must be rejected");
}

#[test]
fn rejects_an_oversized_config_file() {
    let _lock = ENV_MUTEX.lock().unwrap();
    // 10MB ceiling; pad the minimal manifest well past it with whitespace.
    let oversized = format!("{}{}", " ".repeat(11 * 1024 * 1024), MINIMAL_CONFIG);
    let path = write_config_in_cwd(&oversized);
    std::env::set_var("KAIROS_CONFIG_PATH", &path);

    let result = load_settings();

    std::env::remove_var("KAIROS_CONFIG_PATH");
    fs::remove_file(&path).ok();

    let err = result.unwrap_err();
    assert!(err.to_string().contains("too large"));
}

#[test]
fn server_settings_prefer_port_over_api_gateway_port() {
    let _lock = ENV_MUTEX.lock().unwrap();
    std::env::set_var("PORT", "4100");
    std::env::set_var("API_GATEWAY_PORT", "4200");

    let server = load_server_settings();

    std::env::remove_var("PORT");
    std::env::remove_var("API_GATEWAY_PORT");

    assert_eq!(server.port, 4100);
}

#[test]
fn cors_origins_split_and_trim_on_commas() {
    let _lock = ENV_MUTEX.lock().unwrap();
    std::env::set_var("CORS_ORIGINS", "https://a.example, https://b.example");

    let cors = load_cors_settings("production");

    std::env::remove_var("CORS_ORIGINS");

    assert_eq!(cors.origins, vec!["https://a.example", "https://b.example"]);
}

#[test]
fn rate_limit_store_prefers_redis_url_over_host_port() {
    let _lock = ENV_MUTEX.lock().unwrap();
    std::env::set_var("REDIS_URL", "redis://cache.internal:6379");
    std::env::set_var("REDIS_HOST", "ignored-host");

    let store = load_rate_limit_store_settings();

    std::env::remove_var("REDIS_URL");
    std::env::remove_var("REDIS_HOST");

    assert!(matches!(store, RateLimitStoreSettings::Url(url) if url == "redis://cache.internal:6379"));
}
