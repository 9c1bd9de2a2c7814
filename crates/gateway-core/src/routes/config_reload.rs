//! Manual configuration reload, gated to non-production (§6).
//!
//! `/api/gateway/debug/*` is only registered outside `NODE_ENV=production`;
//! the production surface has no way to trigger a reload other than editing
//! the watched file, per the hardening rationale in SPEC_FULL.md §10.

use actix_web::{post, web, HttpResponse, Responder};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::hot_reload::ConfigManager;

/// Response structure for reload operation
#[derive(Serialize, Deserialize)]
pub struct ReloadResponse {
    pub success: bool,
    pub message: String,
    pub version: Option<u64>,
    pub timestamp: Option<String>,
}

/// Trigger manual configuration reload
///
/// # Endpoint
///
/// `POST /api/gateway/debug/reload-config`
///
/// # Response
///
/// Returns success status, version number, and timestamp of the reload.
///
/// # Errors
///
/// Returns error response if:
/// - Configuration file cannot be read
/// - Configuration validation fails
/// - File system errors occur
#[post("/api/gateway/debug/reload-config")]
pub async fn reload_config(manager: web::Data<Arc<ConfigManager>>) -> impl Responder {
    match manager.reload_now().await {
        Ok(update) => HttpResponse::Ok().json(ReloadResponse {
            success: true,
            message: "Configuration reloaded successfully".to_string(),
            version: Some(update.version),
            timestamp: Some(update.timestamp.to_rfc3339()),
        }),
        Err(e) => HttpResponse::InternalServerError().json(ReloadResponse {
            success: false,
            message: format!("Failed to reload configuration: {}", e),
            version: None,
            timestamp: None,
        }),
    }
}

/// Get current configuration version and status
///
/// # Endpoint
///
/// `GET /api/gateway/debug/config-status`
///
/// # Response
///
/// Returns current configuration version and last update timestamp.
#[actix_web::get("/api/gateway/debug/config-status")]
pub async fn config_status(manager: web::Data<Arc<ConfigManager>>) -> impl Responder {
    let current_config = manager.get_current_config().await;
    
    HttpResponse::Ok().json(ReloadResponse {
        success: true,
        message: "Current configuration status".to_string(),
        version: Some(current_config.version),
        timestamp: Some(current_config.timestamp.to_rfc3339()),
    })
}

/// Registers the debug reload endpoints, but only outside production — the
/// caller passes `ServerSettings::node_env` so this stays a single gate
/// shared with the rest of the `/api/gateway/debug/*` surface.
pub fn configure_config_reload(cfg: &mut web::ServiceConfig, node_env: &str) {
    if node_env == "production" {
        return;
    }
    cfg.service(reload_config).service(config_status);
}
