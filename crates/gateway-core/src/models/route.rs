//! Route configuration: the immutable-after-registration unit the dynamic
//! router indexes and the forward engine consults.

use crate::models::policy::PolicyOverrides;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Retry configuration for handling transient backend failures.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    #[serde(default = "default_retry_status_codes")]
    pub retry_on_status_codes: Vec<u16>,
    #[serde(default = "default_retry_on_connection_error")]
    pub retry_on_connection_error: bool,
}

fn default_max_retries() -> u32 {
    3
}
fn default_initial_backoff() -> u64 {
    100
}
fn default_max_backoff() -> u64 {
    5000
}
fn default_backoff_multiplier() -> f64 {
    2.0
}
fn default_retry_status_codes() -> Vec<u16> {
    vec![502, 503, 504]
}
fn default_retry_on_connection_error() -> bool {
    true
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
            backoff_multiplier: default_backoff_multiplier(),
            retry_on_status_codes: default_retry_status_codes(),
            retry_on_connection_error: default_retry_on_connection_error(),
        }
    }
}

impl RetryConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.max_retries > 10 {
            return Err("max_retries should not exceed 10 to prevent excessive delays".to_string());
        }
        if self.initial_backoff_ms > self.max_backoff_ms {
            return Err("initial_backoff_ms cannot be greater than max_backoff_ms".to_string());
        }
        if self.backoff_multiplier < 1.0 {
            return Err("backoff_multiplier must be >= 1.0".to_string());
        }
        Ok(())
    }

    /// Exponential backoff for the given zero-indexed attempt, capped at `max_backoff_ms`.
    pub fn calculate_backoff(&self, attempt: u32) -> u64 {
        let backoff = (self.initial_backoff_ms as f64) * self.backoff_multiplier.powi(attempt as i32);
        backoff.min(self.max_backoff_ms as f64) as u64
    }
}

/// A route as registered with the dynamic router.
///
/// `path` may contain `:name` segment holes and end in a single trailing `*`
/// wildcard. Everything else in a segment is a literal, regex-escaped at
/// compile time.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RouteConfig {
    /// External path pattern, e.g. `/api/v1/users/:id` or `/api/v1/uploads/*`.
    pub path: String,

    /// Name of the target backend service, resolved against the service
    /// registry at dispatch time.
    pub service: String,

    /// HTTP methods this route accepts. The router itself never filters on
    /// method (per the dynamic router's contract); the forward engine does.
    pub methods: Vec<String>,

    /// Replace the un-versioned, post-prefix path entirely with this prefix
    /// before forwarding (mutually exclusive in effect with `strip_prefix`;
    /// if both are set `rewrite_path` wins).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rewrite_path: Option<String>,

    /// Strip the literal prefix up to the first `*` before forwarding.
    #[serde(default)]
    pub strip_prefix: bool,

    /// Per-route request timeout in milliseconds; falls back to the
    /// gateway-wide default when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,

    /// Retry policy for transient backend failures.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryConfig>,

    /// Whether this route requires a previously-authenticated identity to be
    /// present (the gateway never terminates auth itself; see Policy Layer).
    #[serde(default)]
    pub auth_required: bool,

    /// Headers injected verbatim on every forwarded request for this route.
    #[serde(default)]
    pub static_headers: HashMap<String, String>,

    /// Per-route policy overrides, field-wise merged over the service
    /// default and system default by
    /// [`crate::models::policy::resolve_policies`]. A facet absent from
    /// `PolicyOverrides` means "inherit the service's policy entirely"; a
    /// facet present and explicitly `false` in the JSON surface deserializes
    /// to [`crate::models::policy::Facet::Disabled`] and turns that facet
    /// off regardless of what the service enabled, per §4.4's "explicitly
    /// `false` disables this facet" rule.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policies: Option<PolicyOverrides>,
}

const VALID_METHODS: &[&str] = &[
    "GET", "POST", "PUT", "DELETE", "HEAD", "OPTIONS", "PATCH", "TRACE",
];

impl RouteConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !self.path.starts_with('/') {
            return Err("route path must start with '/'".to_string());
        }
        if self.service.trim().is_empty() {
            return Err("route service name must not be empty".to_string());
        }
        if self.methods.is_empty() {
            return Err("at least one HTTP method must be specified".to_string());
        }
        for method in &self.methods {
            if !VALID_METHODS.contains(&method.to_uppercase().as_str()) {
                return Err(format!("invalid HTTP method: {}", method));
            }
        }
        if let Some(retry) = &self.retry {
            retry.validate()?;
        }
        // A lone `*` may only trail the pattern: reject interior wildcards.
        if let Some(pos) = self.path.find('*') {
            if pos != self.path.len() - 1 {
                return Err("wildcard '*' is only supported as the final character of a path".to_string());
            }
        }
        Ok(())
    }

    /// Specificity scalar used to order wildcard routes deterministically:
    /// `non-wildcard-char-count - 10*wildcard-count + slash-count`.
    pub fn specificity(&self) -> i64 {
        let mut non_wildcard_chars = 0i64;
        let mut wildcard_count = 0i64;
        let mut slash_count = 0i64;
        for ch in self.path.chars() {
            match ch {
                '*' => wildcard_count += 1,
                '/' => {
                    slash_count += 1;
                    non_wildcard_chars += 1;
                }
                _ => non_wildcard_chars += 1,
            }
        }
        non_wildcard_chars - 10 * wildcard_count + slash_count
    }

    pub fn is_exact(&self) -> bool {
        !self.path.contains(':') && !self.path.contains('*')
    }
}
