//! API Gateway Server
//!
//! Process bootstrap for the gateway: load and validate configuration,
//! construct the router/discovery/forward-engine trio, spawn the two
//! background loops (health checks, discovery probing), and bind the HTTP
//! server behind the hardening and logging middleware stack.

use actix_cors::Cors;
use actix_web::middleware::{Compress, Logger};
use actix_web::{web, App, HttpServer};
use gateway_core::config::hot_reload::ConfigManager;
use gateway_core::config::settings::{
    load_cors_settings, load_rate_limit_store_settings, load_server_settings, load_settings,
};
use gateway_core::config::validation::ConfigValidator;
use gateway_core::logs::logger::configure_logger;
use gateway_core::middleware::auth::AuthTransform;
use gateway_core::middleware::identity::IdentitySigner;
use gateway_core::middleware::security::security_headers;
use gateway_core::models::metrics::RoutingMetrics;
use gateway_core::models::settings::{CorsSettings, GatewaySettings, PortRegistry, RateLimitStoreSettings};
use gateway_core::routes::{config_reload, health, http, management, metrics as gw_metrics};
use gateway_core::services::discovery::ServiceDiscovery;
use gateway_core::services::metrics_store::MetricsStore;
use gateway_core::services::pipeline::ForwardEngine;
use gateway_core::services::router::DynamicRouter;
use log::{error, info, warn};
use std::sync::Arc;
use tokio::signal;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    configure_logger();

    let settings: GatewaySettings = match load_settings() {
        Ok(settings) => settings,
        Err(e) => {
            error!("failed to load gateway configuration: {e}");
            std::process::exit(1);
        }
    };

    let validation = ConfigValidator::validate_comprehensive(&settings);
    for warning in &validation.warnings {
        warn!("config validation warning: {warning}");
    }
    if !validation.is_valid {
        for err in &validation.errors {
            error!("config validation error: {err}");
        }
        std::process::exit(1);
    }
    info!(
        "gateway configuration validated: {} routes, {} services, {} warnings",
        settings.routes.len(),
        settings.services.len(),
        validation.warnings.len()
    );

    let server_settings = load_server_settings();
    let cors_settings = load_cors_settings(&server_settings.node_env);
    log_rate_limit_store(&load_rate_limit_store_settings());

    let identity_secret = resolve_identity_secret(&settings);
    let jwt_settings = settings.jwt.clone().map(Arc::new);
    let ports = PortRegistry::from_services(&settings.services);

    let config_path_for_reload = std::env::var("KAIROS_CONFIG_PATH").unwrap_or_else(|_| "./config.json".to_string());
    let settings_for_reload = settings.clone();
    let settings = Arc::new(settings);

    let router = match DynamicRouter::new(settings.routes.clone()) {
        Ok(router) => Arc::new(router),
        Err(e) => {
            error!("route table failed to compile: {e}");
            std::process::exit(1);
        }
    };

    let discovery = ServiceDiscovery::new(settings.discovery.clone(), settings.services.clone(), ports);
    let metrics = Arc::new(RoutingMetrics::new());
    let history = Arc::new(MetricsStore::new(10_000, chrono::Duration::hours(24)));
    let identity_signer = Arc::new(IdentitySigner::new(identity_secret.into_bytes()));

    let engine = ForwardEngine::with_history(
        settings.clone(),
        router.clone(),
        discovery.clone(),
        metrics.clone(),
        identity_signer,
        history.clone(),
    );

    tokio::spawn(discovery.clone().run_health_loop());
    tokio::spawn(discovery.clone().run_discovery_probe_loop());
    info!(
        "discovery loops started: health every {}ms, probe every {}ms",
        settings.discovery.health_check_interval_ms, settings.discovery.probe_interval_ms
    );

    let config_manager = Arc::new(ConfigManager::new(
        settings_for_reload,
        config_path_for_reload,
        router.clone(),
        engine.clone(),
    ));
    config_manager.start();

    let host = server_settings.host.clone();
    let port = server_settings.port;
    let node_env = server_settings.node_env.clone();

    info!("starting api-gateway on {host}:{port} (node_env={node_env})");

    let server = HttpServer::new(move || {
        let node_env = node_env.clone();
        App::new()
            .app_data(web::Data::new(router.clone()))
            .app_data(web::Data::new(discovery.clone()))
            .app_data(web::Data::new(metrics.clone()))
            .app_data(web::Data::new(history.clone()))
            .app_data(web::Data::new(engine.clone()))
            .app_data(web::Data::new(config_manager.clone()))
            .wrap(build_cors(&cors_settings, &node_env))
            .wrap(AuthTransform::new(jwt_settings.clone()))
            .wrap(Logger::new(r#"%a "%r" %s %b "%{Referer}i" "%{User-Agent}i" %T"#))
            .wrap(Compress::default())
            .wrap(security_headers())
            .configure(health::configure_health)
            .configure(gw_metrics::configure_metrics)
            .configure(move |cfg| management::configure_management(cfg, &node_env))
            .configure({
                let node_env = node_env.clone();
                move |cfg| config_reload::configure_config_reload(cfg, &node_env)
            })
            .configure(move |cfg| http::configure_route(cfg, engine.clone()))
    })
    .bind((host.as_str(), port))?
    .run();

    info!("api-gateway started");

    tokio::select! {
        result = server => {
            match result {
                Ok(_) => info!("server stopped gracefully"),
                Err(e) => error!("server error: {e}"),
            }
        }
        _ = signal::ctrl_c() => {
            info!("received shutdown signal, draining in-flight requests...");
        }
    }

    Ok(())
}

/// Identity-signing secret: reuses the JWT secret when configured (the
/// gateway already trusts it to have come from a secure source), otherwise
/// `GATEWAY_IDENTITY_SECRET`, otherwise a loud placeholder that should never
/// reach production.
fn resolve_identity_secret(settings: &GatewaySettings) -> String {
    settings
        .jwt
        .as_ref()
        .map(|jwt| jwt.secret.clone())
        .or_else(|| std::env::var("GATEWAY_IDENTITY_SECRET").ok())
        .unwrap_or_else(|| {
            warn!("no identity-signing secret configured, using an insecure placeholder");
            "please-change-this-secret".to_string()
        })
}

fn log_rate_limit_store(store: &RateLimitStoreSettings) {
    match store {
        RateLimitStoreSettings::InProcess => {
            info!("rate-limit/cache store: in-process (no REDIS_* variables set)")
        }
        RateLimitStoreSettings::Url(_) => {
            info!("rate-limit/cache store: REDIS_URL configured (fail-open to in-process on unavailability)")
        }
        RateLimitStoreSettings::HostPort { host, port, .. } => {
            info!("rate-limit/cache store: redis at {host}:{port} (fail-open to in-process on unavailability)")
        }
        RateLimitStoreSettings::Sentinel { master, .. } => {
            info!("rate-limit/cache store: redis sentinel for master '{master}' (fail-open to in-process on unavailability)")
        }
    }
}

/// Builds the CORS layer from `CORS_*` environment settings (§6). Wildcard
/// origins only ever apply outside production, and only when explicitly
/// requested via `CORS_DEV_WILDCARDS`.
fn build_cors(settings: &CorsSettings, node_env: &str) -> Cors {
    let mut cors = Cors::default();

    if settings.origins.is_empty() {
        if node_env != "production" && settings.dev_wildcards {
            cors = cors.allow_any_origin();
        }
    } else {
        for origin in &settings.origins {
            cors = cors.allowed_origin(origin);
        }
    }

    cors = cors.allowed_methods(settings.methods.iter().map(String::as_str));
    cors = cors.allowed_headers(settings.allowed_headers.iter().map(String::as_str));
    cors = cors.max_age(settings.max_age_secs as usize);

    if settings.allow_credentials {
        cors = cors.supports_credentials();
    }

    cors
}
