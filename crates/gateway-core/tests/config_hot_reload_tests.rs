//! Integration tests for configuration hot-reload: `ConfigWatcher::manual_reload`
//! swapping the live route table and forward-engine settings in place.

use gateway_core::config::hot_reload::ConfigWatcher;
use gateway_core::middleware::identity::IdentitySigner;
use gateway_core::models::metrics::RoutingMetrics;
use gateway_core::models::settings::{GatewaySettings, PortRegistry};
use gateway_core::services::discovery::ServiceDiscovery;
use gateway_core::services::pipeline::ForwardEngine;
use gateway_core::services::router::DynamicRouter;
use once_cell::sync::Lazy;
use std::fs;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

static ENV_MUTEX: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

fn manifest(route_path: &str) -> String {
    format!(
        r#"{{
            "version": 1,
            "discovery": {{}},
            "services": {{
                "widgets": {{ "static_instances": [{{ "host": "localhost", "port": 9000 }}] }}
            }},
            "routes": [
                {{ "path": "{route_path}", "service": "widgets", "methods": ["GET"] }}
            ]
        }}"#
    )
}

fn settings_from(json: &str) -> GatewaySettings {
    serde_json::from_str(json).unwrap()
}

/// Builds a watcher wired exactly as the server's bootstrap does: a fresh
/// router/discovery/engine trio over the given initial settings.
fn build_watcher(config_path: &std::path::Path, initial: GatewaySettings) -> Arc<ConfigWatcher> {
    let router = Arc::new(DynamicRouter::new(initial.routes.clone()).unwrap());
    let ports = PortRegistry::from_services(&initial.services);
    let discovery = ServiceDiscovery::new(initial.discovery.clone(), initial.services.clone(), ports);
    let metrics = Arc::new(RoutingMetrics::new());
    let identity_signer = Arc::new(IdentitySigner::new(b"test-secret".to_vec()));
    let engine = ForwardEngine::new(Arc::new(initial.clone()), router.clone(), discovery, metrics, identity_signer);

    Arc::new(ConfigWatcher::new(
        initial,
        config_path.to_string_lossy().into_owned(),
        router,
        engine,
    ))
}

#[tokio::test]
async fn manual_reload_picks_up_a_changed_route_table() {
    let _lock = ENV_MUTEX.lock().unwrap();
    let path = std::env::current_dir()
        .unwrap()
        .join(format!("test-hot-reload-{}.json", Uuid::new_v4()));
    fs::write(&path, manifest("/widgets/*")).unwrap();

    let initial = settings_from(&manifest("/widgets/*"));
    let watcher = build_watcher(&path, initial);

    fs::write(&path, manifest("/gizmos/*")).unwrap();

    let update = watcher.manual_reload().await.unwrap();

    fs::remove_file(&path).ok();

    assert_eq!(update.version, 2);
    assert_eq!(update.settings.routes[0].path, "/gizmos/*");
}

#[tokio::test]
async fn manual_reload_rejects_an_invalid_route_table_and_keeps_the_prior_snapshot() {
    let _lock = ENV_MUTEX.lock().unwrap();
    let path = std::env::current_dir()
        .unwrap()
        .join(format!("test-hot-reload-{}.json", Uuid::new_v4()));
    fs::write(&path, manifest("/widgets/*")).unwrap();

    let initial = settings_from(&manifest("/widgets/*"));
    let watcher = build_watcher(&path, initial);

    // An empty route table fails `ConfigValidator::validate_comprehensive`.
    let invalid = r#"{
        "version": 1,
        "discovery": {},
        "services": {},
        "routes": []
    }"#;
    fs::write(&path, invalid).unwrap();

    let result = watcher.manual_reload().await;

    fs::remove_file(&path).ok();

    assert!(result.is_err());
    let current = watcher.get_current_config().await;
    assert_eq!(current.version, 1);
    assert_eq!(current.settings.routes[0].path, "/widgets/*");
}

#[tokio::test]
async fn subscribers_receive_the_broadcast_update() {
    let _lock = ENV_MUTEX.lock().unwrap();
    let path = std::env::current_dir()
        .unwrap()
        .join(format!("test-hot-reload-{}.json", Uuid::new_v4()));
    fs::write(&path, manifest("/widgets/*")).unwrap();

    let initial = settings_from(&manifest("/widgets/*"));
    let watcher = build_watcher(&path, initial);
    let mut receiver = watcher.subscribe();

    fs::write(&path, manifest("/gizmos/*")).unwrap();
    watcher.manual_reload().await.unwrap();

    fs::remove_file(&path).ok();

    let update = receiver.recv().await.unwrap();
    assert_eq!(update.settings.routes[0].path, "/gizmos/*");
}
