//! Comprehensive configuration validation with detailed error reporting.
//!
//! The `ValidationResult` accumulator and `ConfigValidator::validate_comprehensive`
//! orchestration stay fixed while individual checks run against
//! `GatewaySettings`/`RouteConfig`/`ServiceConfig`; WebSocket/FTP/DNS
//! protocol-specific checks are dropped (no protocol upgrade path in scope).

use crate::models::settings::GatewaySettings;
use log::{info, warn};
use std::collections::HashSet;

/// Result of configuration validation containing errors, warnings, and recommendations.
#[derive(Debug, Clone)]
pub struct ValidationResult {
    /// Whether the configuration is valid (no errors)
    pub is_valid: bool,
    /// Critical errors that prevent configuration use
    pub errors: Vec<String>,
    /// Non-critical issues that should be addressed
    pub warnings: Vec<String>,
    /// Suggestions for improving configuration
    pub recommendations: Vec<String>,
}

impl Default for ValidationResult {
    fn default() -> Self {
        Self::new()
    }
}

impl ValidationResult {
    pub fn new() -> Self {
        Self {
            is_valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
            recommendations: Vec::new(),
        }
    }

    pub fn add_error(&mut self, error: String) {
        self.is_valid = false;
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, warning: String) {
        self.warnings.push(warning);
    }

    pub fn add_recommendation(&mut self, recommendation: String) {
        self.recommendations.push(recommendation);
    }
}

/// Enhanced configuration validator with security and performance checks.
pub struct ConfigValidator;

impl ConfigValidator {
    /// Performs comprehensive validation of gateway settings. The process
    /// should refuse to bind when `result.is_valid` is `false`.
    pub fn validate_comprehensive(settings: &GatewaySettings) -> ValidationResult {
        let mut result = ValidationResult::new();

        Self::validate_basic_structure(settings, &mut result);
        Self::validate_security(settings, &mut result);
        Self::validate_performance(settings, &mut result);
        Self::validate_route_conflicts(settings, &mut result);
        Self::validate_service_references(settings, &mut result);

        Self::log_validation_results(&result);

        result
    }

    fn validate_basic_structure(settings: &GatewaySettings, result: &mut ValidationResult) {
        if settings.routes.is_empty() {
            result.add_error(
                "no routes configured - gateway will not handle any requests".to_string(),
            );
        }

        for (index, route) in settings.routes.iter().enumerate() {
            if let Err(error) = route.validate() {
                result.add_error(format!("route {index} validation failed: {error}"));
            }
        }
    }

    fn validate_security(settings: &GatewaySettings, result: &mut ValidationResult) {
        let mut http_instances = 0;
        let mut https_instances = 0;

        for service in settings.services.values() {
            for instance in &service.static_instances {
                if instance.protocol == "http" {
                    http_instances += 1;
                    if instance.host == "localhost" || instance.host == "127.0.0.1" {
                        result.add_warning(format!(
                            "HTTP static instance at localhost detected: {} - consider HTTPS for production",
                            instance.host
                        ));
                    } else {
                        result.add_warning(format!(
                            "insecure HTTP static instance detected: {} - consider HTTPS",
                            instance.host
                        ));
                    }
                } else if instance.protocol == "https" {
                    https_instances += 1;
                }
            }
        }

        if http_instances > 0 && https_instances == 0 {
            result.add_warning(
                "all static instances use HTTP - consider HTTPS for production security".to_string(),
            );
        }

        for route in &settings.routes {
            if route.methods.len() > 4 {
                result.add_warning(format!(
                    "route {} allows many HTTP methods ({}) - consider restricting for security",
                    route.path,
                    route.methods.len()
                ));
            }

            if route.path.contains("..") {
                result.add_error(format!("path traversal detected in route: {}", route.path));
            }
            if let Some(rewrite) = &route.rewrite_path {
                if rewrite.contains("..") {
                    result.add_error(format!(
                        "path traversal detected in rewrite_path for route: {}",
                        route.path
                    ));
                }
            }
        }
    }

    fn validate_performance(settings: &GatewaySettings, result: &mut ValidationResult) {
        let dynamic_routes = settings.routes.iter().filter(|r| !r.is_exact()).count();
        let static_routes = settings.routes.len() - dynamic_routes;

        if dynamic_routes > 50 {
            result.add_warning(format!(
                "high number of dynamic routes ({dynamic_routes}) may impact performance - consider route optimization"
            ));
        }

        if static_routes == 0 && dynamic_routes > 0 {
            result.add_recommendation(
                "consider adding static routes for frequently accessed endpoints to improve performance".to_string(),
            );
        }

        for route in &settings.routes {
            let param_count = route.path.split('/').filter(|seg| seg.starts_with(':')).count();
            if param_count > 3 {
                result.add_warning(format!(
                    "route {} has many parameters ({param_count}) - may impact matching performance",
                    route.path
                ));
            }
        }
    }

    fn validate_route_conflicts(settings: &GatewaySettings, result: &mut ValidationResult) {
        let mut seen_paths = HashSet::new();
        let mut potential_conflicts = Vec::new();

        for route in &settings.routes {
            if seen_paths.contains(&route.path) {
                result.add_error(format!("duplicate route path detected: {}", route.path));
            }
            seen_paths.insert(&route.path);

            for other in &settings.routes {
                if route.path != other.path && Self::routes_may_conflict(&route.path, &other.path) {
                    potential_conflicts.push((route.path.clone(), other.path.clone()));
                }
            }
        }

        for (route1, route2) in potential_conflicts {
            result.add_warning(format!(
                "potential route conflict between '{route1}' and '{route2}' - specificity order matters"
            ));
        }
    }

    /// Heuristic: two paths with equal segment count where every differing
    /// segment is a parameter on at least one side could overlap at runtime.
    fn routes_may_conflict(path1: &str, path2: &str) -> bool {
        let segments1: Vec<&str> = path1.split('/').collect();
        let segments2: Vec<&str> = path2.split('/').collect();

        if segments1.len() != segments2.len() {
            return false;
        }

        for (seg1, seg2) in segments1.iter().zip(segments2.iter()) {
            if seg1.starts_with(':') || seg2.starts_with(':') || *seg1 == "*" || *seg2 == "*" {
                continue;
            }
            if seg1 != seg2 {
                return false;
            }
        }

        true
    }

    /// Every route must target a declared service (or rely on discovery
    /// alone, which `ServiceDiscovery` still needs a name for).
    fn validate_service_references(settings: &GatewaySettings, result: &mut ValidationResult) {
        for route in &settings.routes {
            if !settings.services.contains_key(&route.service)
                && settings.discovery.control_plane_url.is_none()
            {
                result.add_warning(format!(
                    "route {} targets service '{}' which has neither a static fallback nor a discovery control plane configured",
                    route.path, route.service
                ));
            }
        }
    }

    fn log_validation_results(result: &ValidationResult) {
        if result.is_valid {
            info!("configuration validation passed");
        } else {
            for error in &result.errors {
                log::error!("validation error: {error}");
            }
        }

        for warning in &result.warnings {
            warn!("validation warning: {warning}");
        }

        for recommendation in &result.recommendations {
            info!("recommendation: {recommendation}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::route::RouteConfig;
    use crate::models::settings::DiscoverySettings;
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
            static_headers: Default::default(),
            policies: None,
        }
    }

    fn base_settings(routes: Vec<RouteConfig>) -> GatewaySettings {
        GatewaySettings {
            version: 1,
            discovery: DiscoverySettings::default(),
            default_policies: Default::default(),
            services: HashMap::new(),
            routes,
            jwt: None,
        }
    }

    #[test]
    fn empty_route_table_is_an_error() {
        let settings = base_settings(vec![]);
        let result = ConfigValidator::validate_comprehensive(&settings);
        assert!(!result.is_valid);
    }

    #[test]
    fn duplicate_paths_are_rejected() {
        let settings = base_settings(vec![route("/api/v1/users", "users"), route("/api/v1/users", "users")]);
        let result = ConfigValidator::validate_comprehensive(&settings);
        assert!(!result.is_valid);
        assert!(result.errors.iter().any(|e| e.contains("duplicate")));
    }

    #[test]
    fn path_traversal_in_route_path_is_rejected() {
        let settings = base_settings(vec![route("/api/v1/../etc", "users")]);
        let result = ConfigValidator::validate_comprehensive(&settings);
        assert!(!result.is_valid);
    }

    #[test]
    fn conflicting_static_and_dynamic_routes_warn() {
        let settings = base_settings(vec![route("/api/v1/users/:id", "users"), route("/api/v1/users/me", "users")]);
        let result = ConfigValidator::validate_comprehensive(&settings);
        assert!(result.warnings.iter().any(|w| w.contains("conflict")));
    }

    #[test]
    fn service_without_static_or_discovery_warns() {
        let settings = base_settings(vec![route("/api/v1/users", "users")]);
        let result = ConfigValidator::validate_comprehensive(&settings);
        assert!(result.warnings.iter().any(|w| w.contains("neither a static fallback")));
    }
}
