//! Admin introspection and CRUD for the route table and service registry.
//!
//! A JWT-gated admin surface built against the real [`DynamicRouter`]/
//! [`ServiceDiscovery`] this gateway carries. Mutating endpoints
//! (`POST`/`DELETE`) go through the same copy-on-write swap the config
//! hot-reload path uses, so there is never a torn read.

use crate::models::route::RouteConfig;
use crate::services::discovery::ServiceDiscovery;
use crate::services::router::DynamicRouter;
use actix_web::{web, HttpResponse, Result};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

/// `GET /api/gateway/routes` — the live, ordered route table.
pub async fn list_routes(router: web::Data<Arc<DynamicRouter>>) -> Result<HttpResponse> {
    let routes = router.routes().await;
    Ok(HttpResponse::Ok().json(json!({ "routes": routes, "count": routes.len() })))
}

/// `POST /api/gateway/routes` — register or replace a route by path.
pub async fn add_route(
    router: web::Data<Arc<DynamicRouter>>,
    route: web::Json<RouteConfig>,
) -> Result<HttpResponse> {
    let route = route.into_inner();
    if let Err(e) = route.validate() {
        return Ok(HttpResponse::BadRequest().json(json!({ "success": false, "error": e })));
    }
    match router.add_route(route.clone()).await {
        Ok(()) => Ok(HttpResponse::Ok().json(json!({ "success": true, "route": route }))),
        Err(e) => Ok(HttpResponse::BadRequest().json(json!({ "success": false, "error": e.to_string() }))),
    }
}

#[derive(Deserialize, Serialize)]
pub struct RemoveRouteRequest {
    path: String,
}

/// `DELETE /api/gateway/routes` — remove a route by exact path, given in the
/// JSON body (an actix path segment can't safely carry an arbitrary route
/// path with its own slashes).
pub async fn remove_route(
    router: web::Data<Arc<DynamicRouter>>,
    body: web::Json<RemoveRouteRequest>,
) -> Result<HttpResponse> {
    match router.remove_route(&body.path).await {
        Ok(true) => Ok(HttpResponse::Ok().json(json!({ "success": true, "removed": body.path }))),
        Ok(false) => Ok(HttpResponse::NotFound().json(json!({ "success": false, "error": "no such route" }))),
        Err(e) => Ok(HttpResponse::BadRequest().json(json!({ "success": false, "error": e.to_string() }))),
    }
}

/// `GET /api/gateway/services` — every known service and its instances.
pub async fn list_services(discovery: web::Data<Arc<ServiceDiscovery>>) -> Result<HttpResponse> {
    let registry = discovery.all_services().await;
    Ok(HttpResponse::Ok().json(json!({ "services": registry, "count": registry.len() })))
}

/// `GET /api/gateway/services/{name}` — instance count and health split for
/// one service.
pub async fn service_stats(
    discovery: web::Data<Arc<ServiceDiscovery>>,
    name: web::Path<String>,
) -> Result<HttpResponse> {
    let (total, healthy) = discovery.stats(&name).await;
    let instances = discovery.discover(&name).await;
    Ok(HttpResponse::Ok().json(json!({
        "service": name.as_str(),
        "total_instances": total,
        "healthy_instances": healthy,
        "discoverable": instances,
    })))
}

/// `POST /api/gateway/debug/force-dynamic` — attempt one immediate discovery
/// probe and switch to dynamic mode on success. Gated to non-production by
/// the caller (§6), since it bypasses the probe loop's own pacing.
pub async fn force_dynamic(discovery: web::Data<Arc<ServiceDiscovery>>) -> Result<HttpResponse> {
    let succeeded = discovery.force_dynamic().await;
    Ok(HttpResponse::Ok().json(json!({ "success": succeeded })))
}

/// `POST /api/gateway/debug/force-static` — force the static fallback
/// manifest regardless of control-plane availability.
pub async fn force_static(discovery: web::Data<Arc<ServiceDiscovery>>) -> Result<HttpResponse> {
    discovery.force_static().await;
    Ok(HttpResponse::Ok().json(json!({ "success": true })))
}

/// Registers the always-on route/service introspection endpoints plus,
/// outside production, the discovery-mode debug overrides (§6).
pub fn configure_management(cfg: &mut web::ServiceConfig, node_env: &str) {
    cfg.route("/api/gateway/routes", web::get().to(list_routes))
        .route("/api/gateway/routes", web::post().to(add_route))
        .route("/api/gateway/routes", web::delete().to(remove_route))
        .route("/api/gateway/services", web::get().to(list_services))
        .route("/api/gateway/services/{name}", web::get().to(service_stats));

    if node_env != "production" {
        cfg.route("/api/gateway/debug/force-dynamic", web::post().to(force_dynamic))
            .route("/api/gateway/debug/force-static", web::post().to(force_static));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{test, App};
    use std::collections::HashMap;

    fn router() -> Arc<DynamicRouter> {
        Arc::new(DynamicRouter::new(vec![]).unwrap())
    }

    fn route(path: &str) -> RouteConfig {
        RouteConfig {
            path: path.to_string(),
            service: "svc".to_string(),
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

    #[actix_web::test]
    async fn add_then_list_then_remove_round_trips() {
        let router = router();
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(router.clone()))
                .configure(|cfg| configure_management(cfg, "development")),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/api/gateway/routes")
            .set_json(route("/api/v1/orders"))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 200);

        let req = test::TestRequest::get().uri("/api/gateway/routes").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["count"], 1);

        let req = test::TestRequest::delete()
            .uri("/api/gateway/routes")
            .set_json(RemoveRouteRequest { path: "/api/v1/orders".to_string() })
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 200);
    }

    #[actix_web::test]
    async fn invalid_route_is_rejected() {
        let router = router();
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(router))
                .configure(|cfg| configure_management(cfg, "development")),
        )
        .await;

        let mut bad = route("/api/v1/orders");
        bad.methods = vec![];
        let req = test::TestRequest::post()
            .uri("/api/gateway/routes")
            .set_json(bad)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 400);
    }
}
