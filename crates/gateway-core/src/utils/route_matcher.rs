//! Compiles [`RouteConfig`] path patterns into matchers and resolves an
//! incoming request path against the route table.
//!
//! Patterns support `:name` segment parameters and a single trailing `*`
//! wildcard that captures the remainder of the path. Exact (parameter-free)
//! patterns are stored in a hash map for O(1) lookup; everything else is
//! compiled to a regex and tried in specificity order.

use crate::models::route::RouteConfig;
use ahash::HashMap as AHashMap;
use regex::Regex;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum RouteMatchError {
    #[error("invalid route pattern: {pattern}")]
    InvalidPattern { pattern: String },

    #[error("regex compilation failed: {0}")]
    RegexError(String),

    #[error("no matching route found for path: {path}")]
    NoMatch { path: String },
}

/// A route pattern compiled to a regex, retaining the parameter names in
/// capture-group order and whether the pattern ends in a wildcard tail.
#[derive(Debug, Clone)]
struct CompiledRoute {
    route: Arc<RouteConfig>,
    regex: Arc<Regex>,
    param_names: Vec<String>,
    has_wildcard: bool,
    registration_index: usize,
}

/// The result of a successful match: the route plus any values extracted
/// from `:name` segments and the captured tail of a trailing `*`.
#[derive(Debug, Clone)]
pub struct RouteMatch {
    pub route: Arc<RouteConfig>,
    pub params: HashMap<String, String>,
    pub wildcard_tail: Option<String>,
}

#[derive(Debug)]
pub struct RouteMatcher {
    static_routes: AHashMap<String, Arc<RouteConfig>>,
    dynamic_routes: Vec<CompiledRoute>,
}

impl RouteMatcher {
    /// Builds a matcher from routes in registration order. Exact routes go
    /// into the static map; everything with a `:name` hole or a trailing
    /// `*` is compiled and sorted by descending specificity, with
    /// registration order as the tiebreak (the sort is stable).
    pub fn new(routes: Vec<RouteConfig>) -> Result<Self, RouteMatchError> {
        let mut static_routes = AHashMap::default();
        let mut dynamic_routes = Vec::new();

        for (index, route) in routes.into_iter().enumerate() {
            if route.is_exact() {
                static_routes.insert(route.path.clone(), Arc::new(route));
            } else {
                dynamic_routes.push(Self::compile_route(route, index)?);
            }
        }

        dynamic_routes.sort_by(|a, b| {
            b.route
                .specificity()
                .cmp(&a.route.specificity())
                .then(a.registration_index.cmp(&b.registration_index))
        });

        Ok(Self {
            static_routes,
            dynamic_routes,
        })
    }

    pub fn find_match(&self, request_path: &str) -> Result<RouteMatch, RouteMatchError> {
        if let Some(route) = self.static_routes.get(request_path) {
            return Ok(RouteMatch {
                route: route.clone(),
                params: HashMap::new(),
                wildcard_tail: None,
            });
        }

        for compiled in &self.dynamic_routes {
            if let Some(captures) = compiled.regex.captures(request_path) {
                let mut params = HashMap::new();
                let mut wildcard_tail = None;

                for (i, name) in compiled.param_names.iter().enumerate() {
                    if let Some(capture) = captures.get(i + 1) {
                        params.insert(name.clone(), capture.as_str().to_string());
                    }
                }
                if compiled.has_wildcard {
                    if let Some(capture) = captures.get(compiled.param_names.len() + 1) {
                        wildcard_tail = Some(capture.as_str().to_string());
                    }
                }

                return Ok(RouteMatch {
                    route: compiled.route.clone(),
                    params,
                    wildcard_tail,
                });
            }
        }

        Err(RouteMatchError::NoMatch {
            path: request_path.to_string(),
        })
    }

    fn compile_route(route: RouteConfig, registration_index: usize) -> Result<CompiledRoute, RouteMatchError> {
        let (regex_pattern, param_names, has_wildcard) = Self::convert_pattern_to_regex(&route.path)?;
        let regex = Regex::new(&regex_pattern).map_err(|e| RouteMatchError::RegexError(e.to_string()))?;

        Ok(CompiledRoute {
            route: Arc::new(route),
            regex: Arc::new(regex),
            param_names,
            has_wildcard,
            registration_index,
        })
    }

    /// Converts a `:name` / trailing `*` pattern into an anchored regex,
    /// returning the regex source, the ordered parameter names, and whether
    /// the pattern ends in a wildcard capture.
    fn convert_pattern_to_regex(pattern: &str) -> Result<(String, Vec<String>, bool), RouteMatchError> {
        let mut regex_pattern = String::with_capacity(pattern.len() * 2);
        regex_pattern.push('^');

        let mut param_names = Vec::new();
        let mut has_wildcard = false;
        let mut chars = pattern.chars().peekable();

        while let Some(ch) = chars.next() {
            match ch {
                ':' => {
                    let mut name = String::new();
                    while let Some(&next) = chars.peek() {
                        if next.is_alphanumeric() || next == '_' {
                            name.push(next);
                            chars.next();
                        } else {
                            break;
                        }
                    }
                    if name.is_empty() {
                        return Err(RouteMatchError::InvalidPattern {
                            pattern: pattern.to_string(),
                        });
                    }
                    param_names.push(name);
                    regex_pattern.push_str("([^/]+)");
                }
                '*' => {
                    has_wildcard = true;
                    regex_pattern.push_str("(.*)");
                }
                '.' | '?' | '+' | '^' | '$' | '[' | ']' | '(' | ')' | '|' | '\\' => {
                    regex_pattern.push('\\');
                    regex_pattern.push(ch);
                }
                _ => regex_pattern.push(ch),
            }
        }

        regex_pattern.push('$');
        Ok((regex_pattern, param_names, has_wildcard))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

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

    #[test]
    fn static_route_matches_exactly() {
        let matcher = RouteMatcher::new(vec![route("/health", "health-svc")]).unwrap();
        let m = matcher.find_match("/health").unwrap();
        assert_eq!(m.route.service, "health-svc");
    }

    #[test]
    fn parameterized_route_extracts_named_segments() {
        let matcher = RouteMatcher::new(vec![route("/users/:id/posts/:post_id", "posts-svc")]).unwrap();
        let m = matcher.find_match("/users/42/posts/99").unwrap();
        assert_eq!(m.params.get("id").map(String::as_str), Some("42"));
        assert_eq!(m.params.get("post_id").map(String::as_str), Some("99"));
    }

    #[test]
    fn trailing_wildcard_captures_remainder() {
        let matcher = RouteMatcher::new(vec![route("/uploads/*", "uploads-svc")]).unwrap();
        let m = matcher.find_match("/uploads/2024/photo.png").unwrap();
        assert_eq!(m.wildcard_tail.as_deref(), Some("2024/photo.png"));
    }

    #[test]
    fn more_specific_route_wins_over_wildcard() {
        let matcher = RouteMatcher::new(vec![
            route("/api/*", "catch-all"),
            route("/api/users/:id", "users-svc"),
        ])
        .unwrap();
        let m = matcher.find_match("/api/users/7").unwrap();
        assert_eq!(m.route.service, "users-svc");
    }

    #[test]
    fn ties_break_on_registration_order() {
        let matcher = RouteMatcher::new(vec![
            route("/things/:a", "first"),
            route("/other/:b", "second"),
        ])
        .unwrap();
        // Equal specificity (both one-param, same length class); first
        // registered should be tried first when a path could satisfy both
        // shapes is not possible here, but ordering must still be stable.
        assert_eq!(matcher.dynamic_routes[0].route.service, "first");
    }

    #[test]
    fn no_match_returns_not_found_error() {
        let matcher = RouteMatcher::new(vec![route("/health", "health-svc")]).unwrap();
        let err = matcher.find_match("/missing").unwrap_err();
        assert_eq!(
            err,
            RouteMatchError::NoMatch {
                path: "/missing".to_string()
            }
        );
    }
}
