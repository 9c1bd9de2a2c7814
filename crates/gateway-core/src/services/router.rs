//! The dynamic router's concurrency-safe façade over [`RouteMatcher`].
//!
//! Route table mutations (admin add/remove) are rare; lookups are on every
//! request's hot path. Per §5, writers build a whole new ordered list and
//! swap it in atomically; readers take the snapshot they see at the start of
//! a request and are never blocked behind a writer mid-update.

use crate::models::route::RouteConfig;
use crate::utils::route_matcher::{RouteMatchError, RouteMatcher, RouteMatch};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Wraps a [`RouteMatcher`] so it can be rebuilt under `add_route`/
/// `remove_route` without blocking concurrent `lookup` calls for longer than
/// it takes to clone an `Arc`.
pub struct DynamicRouter {
    inner: RwLock<Arc<(Vec<RouteConfig>, RouteMatcher)>>,
}

impl DynamicRouter {
    pub fn new(routes: Vec<RouteConfig>) -> Result<Self, RouteMatchError> {
        let matcher = RouteMatcher::new(routes.clone())?;
        Ok(Self {
            inner: RwLock::new(Arc::new((routes, matcher))),
        })
    }

    /// Inserts or replaces a route by path, recompiles the matcher, and
    /// swaps it in. Idempotent: re-registering the same path overwrites it.
    pub async fn add_route(&self, route: RouteConfig) -> Result<(), RouteMatchError> {
        let mut guard = self.inner.write().await;
        let mut routes = guard.0.clone();
        if let Some(existing) = routes.iter_mut().find(|r| r.path == route.path) {
            *existing = route;
        } else {
            routes.push(route);
        }
        let matcher = RouteMatcher::new(routes.clone())?;
        *guard = Arc::new((routes, matcher));
        Ok(())
    }

    /// Removes a route by exact path, returning whether anything was
    /// removed. Purges both the map and the ordered list in one swap.
    pub async fn remove_route(&self, path: &str) -> Result<bool, RouteMatchError> {
        let mut guard = self.inner.write().await;
        let mut routes = guard.0.clone();
        let before = routes.len();
        routes.retain(|r| r.path != path);
        let removed = routes.len() != before;
        if removed {
            let matcher = RouteMatcher::new(routes.clone())?;
            *guard = Arc::new((routes, matcher));
        }
        Ok(removed)
    }

    pub async fn lookup(&self, path: &str) -> Option<RouteMatch> {
        if path.is_empty() || path == "/" {
            return None;
        }
        let snapshot = self.inner.read().await.clone();
        snapshot.1.find_match(path).ok()
    }

    pub async fn routes(&self) -> Vec<RouteConfig> {
        self.inner.read().await.0.clone()
    }

    /// Atomically replaces the whole route table, used by config hot-reload.
    pub async fn replace_all(&self, routes: Vec<RouteConfig>) -> Result<(), RouteMatchError> {
        let matcher = RouteMatcher::new(routes.clone())?;
        *self.inner.write().await = Arc::new((routes, matcher));
        Ok(())
    }
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

    #[tokio::test]
    async fn add_then_lookup_finds_route() {
        let router = DynamicRouter::new(vec![]).unwrap();
        router.add_route(route("/api/templates", "ai-config")).await.unwrap();
        let m = router.lookup("/api/templates").await.unwrap();
        assert_eq!(m.route.service, "ai-config");
    }

    #[tokio::test]
    async fn exact_beats_wildcard_after_both_registered() {
        let router = DynamicRouter::new(vec![]).unwrap();
        router.add_route(route("/api/templates/*", "wild")).await.unwrap();
        router.add_route(route("/api/templates", "exact")).await.unwrap();
        assert_eq!(router.lookup("/api/templates").await.unwrap().route.service, "exact");
        assert_eq!(router.lookup("/api/templates/x").await.unwrap().route.service, "wild");
    }

    #[tokio::test]
    async fn remove_purges_route() {
        let router = DynamicRouter::new(vec![route("/health", "health")]).unwrap();
        assert!(router.remove_route("/health").await.unwrap());
        assert!(router.lookup("/health").await.is_none());
        assert!(!router.remove_route("/health").await.unwrap());
    }

    #[tokio::test]
    async fn empty_and_root_path_never_match() {
        let router = DynamicRouter::new(vec![route("/*", "catch-all")]).unwrap();
        assert!(router.lookup("").await.is_none());
        assert!(router.lookup("/").await.is_none());
    }
}
