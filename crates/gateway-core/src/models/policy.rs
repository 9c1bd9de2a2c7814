//! Policy types and the pure resolution function that merges them.
//!
//! Policies exist at three layers — system default, service default, route
//! override — and are merged field-by-field, route winning over service
//! winning over system. `resolve_policies` is deliberately free of any I/O
//! or shared state so it can be exhaustively table-tested.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitAlgorithm {
    FixedWindow,
    SlidingWindow,
    TokenBucket,
}

/// The dimension a rate-limit key is drawn from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitKeyType {
    PerUser,
    PerIp,
    Global,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitPolicy {
    pub enabled: bool,
    pub algorithm: RateLimitAlgorithm,
    pub limit: u32,
    pub window_secs: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub burst: Option<u32>,
    /// Which dimension the key is drawn from: authenticated user, client IP,
    /// or a single shared bucket.
    #[serde(default = "default_key_type")]
    pub key_type: RateLimitKeyType,
    /// Extra key segment (e.g. a route group name) mixed into the bucket key
    /// alongside `key_type`'s identity, so two routes can share a quota.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segment: Option<String>,
}

fn default_key_type() -> RateLimitKeyType {
    RateLimitKeyType::PerIp
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            algorithm: RateLimitAlgorithm::FixedWindow,
            limit: 100,
            window_secs: 60,
            burst: None,
            key_type: default_key_type(),
            segment: None,
        }
    }
}

/// Identity-projection policy. The gateway never terminates end-user
/// authentication; it only requires and forwards an already-established
/// identity as a signed header.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthPolicy {
    pub required: bool,
    #[serde(default = "default_identity_header")]
    pub identity_header: String,
    #[serde(default)]
    pub forward_claims: Vec<String>,
    #[serde(default)]
    pub sign_identity: bool,
}

fn default_identity_header() -> String {
    "x-gateway-identity".to_string()
}

impl Default for AuthPolicy {
    fn default() -> Self {
        Self {
            required: false,
            identity_header: default_identity_header(),
            forward_claims: Vec::new(),
            sign_identity: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachePolicy {
    pub enabled: bool,
    pub ttl_secs: u64,
    #[serde(default = "default_cacheable_methods")]
    pub cacheable_methods: Vec<String>,
    #[serde(default)]
    pub vary_headers: Vec<String>,
    /// After `ttl_secs` but within this extra window, serve the stale entry
    /// immediately and refresh it in the background. Zero disables the
    /// behavior entirely (expired means expired).
    #[serde(default)]
    pub stale_while_revalidate_secs: u64,
}

fn default_cacheable_methods() -> Vec<String> {
    vec!["GET".to_string(), "HEAD".to_string()]
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            ttl_secs: 30,
            cacheable_methods: default_cacheable_methods(),
            vary_headers: Vec::new(),
            stale_while_revalidate_secs: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingPolicy {
    pub level: LogLevel,
    #[serde(default = "default_redacted_fields")]
    pub redact_fields: Vec<String>,
    #[serde(default = "default_sample_rate")]
    pub sample_rate: f64,
}

fn default_redacted_fields() -> Vec<String> {
    vec!["authorization".to_string(), "cookie".to_string()]
}

fn default_sample_rate() -> f64 {
    1.0
}

impl Default for LoggingPolicy {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            redact_fields: default_redacted_fields(),
            sample_rate: default_sample_rate(),
        }
    }
}

/// The full resolved policy set a route or service carries, fully merged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Policies {
    #[serde(default)]
    pub rate_limit: RateLimitPolicy,
    #[serde(default)]
    pub auth: AuthPolicy,
    #[serde(default)]
    pub cache: CachePolicy,
    #[serde(default)]
    pub logging: LoggingPolicy,
}

/// Field-wise partial override of [`RateLimitPolicy`]: only the fields set
/// here replace the layer below; everything else (e.g. a service's tuned
/// `limit`) falls through untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RateLimitOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub algorithm: Option<RateLimitAlgorithm>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub burst: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_type: Option<RateLimitKeyType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segment: Option<String>,
}

impl RateLimitOverride {
    fn merge_onto(&self, base: &mut RateLimitPolicy) {
        if let Some(v) = self.enabled {
            base.enabled = v;
        }
        if let Some(v) = self.algorithm {
            base.algorithm = v;
        }
        if let Some(v) = self.limit {
            base.limit = v;
        }
        if let Some(v) = self.window_secs {
            base.window_secs = v;
        }
        if self.burst.is_some() {
            base.burst = self.burst;
        }
        if let Some(v) = self.key_type {
            base.key_type = v;
        }
        if self.segment.is_some() {
            base.segment = self.segment.clone();
        }
    }
}

/// Field-wise partial override of [`AuthPolicy`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity_header: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forward_claims: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sign_identity: Option<bool>,
}

impl AuthOverride {
    fn merge_onto(&self, base: &mut AuthPolicy) {
        if let Some(v) = self.required {
            base.required = v;
        }
        if let Some(v) = &self.identity_header {
            base.identity_header = v.clone();
        }
        if let Some(v) = &self.forward_claims {
            base.forward_claims = v.clone();
        }
        if let Some(v) = self.sign_identity {
            base.sign_identity = v;
        }
    }
}

/// Field-wise partial override of [`CachePolicy`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cacheable_methods: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vary_headers: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stale_while_revalidate_secs: Option<u64>,
}

impl CacheOverride {
    fn merge_onto(&self, base: &mut CachePolicy) {
        if let Some(v) = self.enabled {
            base.enabled = v;
        }
        if let Some(v) = self.ttl_secs {
            base.ttl_secs = v;
        }
        if let Some(v) = &self.cacheable_methods {
            base.cacheable_methods = v.clone();
        }
        if let Some(v) = &self.vary_headers {
            base.vary_headers = v.clone();
        }
        if let Some(v) = self.stale_while_revalidate_secs {
            base.stale_while_revalidate_secs = v;
        }
    }
}

/// Field-wise partial override of [`LoggingPolicy`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<LogLevel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redact_fields: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_rate: Option<f64>,
}

impl LoggingOverride {
    fn merge_onto(&self, base: &mut LoggingPolicy) {
        if let Some(v) = self.level {
            base.level = v;
        }
        if let Some(v) = &self.redact_fields {
            base.redact_fields = v.clone();
        }
        if let Some(v) = self.sample_rate {
            base.sample_rate = v;
        }
    }
}

/// What a service or route declares for one policy category: absent entirely
/// (the field is left out of `PolicyOverrides`, handled by `Option` there),
/// explicitly `false` (disable the facet outright, regardless of what any
/// lower layer set), or a partial object merged field-by-field onto the
/// layer below. `#[serde(untagged)]` picks the boolean arm for a literal
/// `false`/`true` and the object arm otherwise, so the on-disk shape stays
/// exactly `"rateLimit": false` or `"rateLimit": {"limit": 10}` — no wrapper
/// tag.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Facet<T> {
    Disabled(bool),
    Override(T),
}

/// Per-facet overrides a service or route may declare; any field left `None`
/// falls through to the next layer down.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<Facet<RateLimitOverride>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<Facet<AuthOverride>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache: Option<Facet<CacheOverride>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logging: Option<Facet<LoggingOverride>>,
}

/// Merge system defaults, service defaults, and route overrides into the
/// effective policy set for a single request. Each category is resolved
/// independently: a route that overrides only one field of `auth` leaves
/// every other `auth` field exactly as the service (or system) default left
/// it, and a category explicitly set to `false` at any layer is disabled
/// outright rather than falling back to what the layer below enabled.
pub fn resolve_policies(
    system_defaults: &Policies,
    service_overrides: Option<&PolicyOverrides>,
    route_overrides: Option<&PolicyOverrides>,
) -> Policies {
    let mut resolved = system_defaults.clone();

    if let Some(service) = service_overrides {
        apply(&mut resolved, service);
    }
    if let Some(route) = route_overrides {
        apply(&mut resolved, route);
    }

    resolved
}

fn apply(resolved: &mut Policies, overrides: &PolicyOverrides) {
    match &overrides.rate_limit {
        None => {}
        Some(Facet::Disabled(_)) => resolved.rate_limit.enabled = false,
        Some(Facet::Override(partial)) => partial.merge_onto(&mut resolved.rate_limit),
    }
    match &overrides.auth {
        None => {}
        Some(Facet::Disabled(_)) => {
            resolved.auth.required = false;
            resolved.auth.sign_identity = false;
        }
        Some(Facet::Override(partial)) => partial.merge_onto(&mut resolved.auth),
    }
    match &overrides.cache {
        None => {}
        Some(Facet::Disabled(_)) => resolved.cache.enabled = false,
        Some(Facet::Override(partial)) => partial.merge_onto(&mut resolved.cache),
    }
    match &overrides.logging {
        None => {}
        // `LoggingPolicy` has no standalone on/off switch; disabling the
        // facet means nothing is sampled, not that logging stops entirely.
        Some(Facet::Disabled(_)) => resolved.logging.sample_rate = 0.0,
        Some(Facet::Override(partial)) => partial.merge_onto(&mut resolved.logging),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn route_override_wins_over_service_and_system() {
        let system = Policies::default();
        let service = PolicyOverrides {
            rate_limit: Some(Facet::Override(RateLimitOverride {
                limit: Some(50),
                ..Default::default()
            })),
            ..Default::default()
        };
        let route = PolicyOverrides {
            rate_limit: Some(Facet::Override(RateLimitOverride {
                limit: Some(10),
                ..Default::default()
            })),
            ..Default::default()
        };

        let resolved = resolve_policies(&system, Some(&service), Some(&route));
        assert_eq!(resolved.rate_limit.limit, 10);
    }

    #[test]
    fn absent_route_field_falls_back_to_service() {
        let system = Policies::default();
        let service = PolicyOverrides {
            auth: Some(Facet::Override(AuthOverride {
                required: Some(true),
                ..Default::default()
            })),
            ..Default::default()
        };

        let resolved = resolve_policies(&system, Some(&service), None);
        assert!(resolved.auth.required);
    }

    #[test]
    fn absent_everything_falls_back_to_system_default() {
        let system = Policies::default();
        let resolved = resolve_policies(&system, None, None);
        assert_eq!(resolved.cache.ttl_secs, CachePolicy::default().ttl_secs);
    }

    #[test]
    fn route_override_merges_fields_within_a_category() {
        let system = Policies::default();
        let service = PolicyOverrides {
            auth: Some(Facet::Override(AuthOverride {
                required: Some(true),
                identity_header: Some("x-service-identity".to_string()),
                ..Default::default()
            })),
            ..Default::default()
        };
        let route = PolicyOverrides {
            // The route only sets forward_claims; it must not reset
            // required/identity_header back to their type defaults.
            auth: Some(Facet::Override(AuthOverride {
                forward_claims: Some(vec!["sub".to_string()]),
                ..Default::default()
            })),
            ..Default::default()
        };

        let resolved = resolve_policies(&system, Some(&service), Some(&route));
        assert!(resolved.auth.required);
        assert_eq!(resolved.auth.identity_header, "x-service-identity");
        assert_eq!(resolved.auth.forward_claims, vec!["sub".to_string()]);
    }

    #[test]
    fn explicit_false_disables_facet_regardless_of_service_default() {
        let system = Policies::default();
        let service = PolicyOverrides {
            rate_limit: Some(Facet::Override(RateLimitOverride {
                enabled: Some(true),
                limit: Some(5),
                ..Default::default()
            })),
            ..Default::default()
        };
        let route = PolicyOverrides {
            rate_limit: Some(Facet::Disabled(false)),
            ..Default::default()
        };

        let resolved = resolve_policies(&system, Some(&service), Some(&route));
        assert!(!resolved.rate_limit.enabled);
        // Disabling only turns the facet off; a re-enable at a still lower
        // layer wouldn't need to rediscover the tuned limit.
        assert_eq!(resolved.rate_limit.limit, 5);
    }

    #[test]
    fn facet_deserializes_from_bare_false_or_partial_object() {
        let disabled: Facet<CacheOverride> = serde_json::from_str("false").unwrap();
        assert!(matches!(disabled, Facet::Disabled(false)));

        let partial: Facet<CacheOverride> = serde_json::from_str(r#"{"ttl_secs": 5}"#).unwrap();
        match partial {
            Facet::Override(o) => assert_eq!(o.ttl_secs, Some(5)),
            Facet::Disabled(_) => panic!("expected an override object"),
        }
    }
}
