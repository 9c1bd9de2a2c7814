//! HTTP route handlers for the gateway's own northbound surface: the
//! catch-all proxy entrypoint plus the admin/introspection endpoints under
//! `/api/gateway/*`.
//!
//! - [`http`] - catch-all `/{tail:.*}` proxy route wired to the forward engine
//! - [`health`] - `/health`, `/api/gateway/health`, `/ready`/`/api/gateway/ready`
//!   (discovery-aware), `/live` probes
//! - [`management`] - `/api/gateway/routes`, `/api/gateway/services`
//! - [`metrics`] - `/api/gateway/metrics`, `/api/gateway/status`
//! - [`config_reload`] - `/api/gateway/debug/reload-config` (non-production only)
//!
//! JWT-derived identity projection is wired as App-level middleware
//! ([`crate::middleware::auth::AuthTransform`]), not a route module — it has
//! no endpoints of its own.

pub mod config_reload;
pub mod health;
pub mod http;
pub mod management;
pub mod metrics;
