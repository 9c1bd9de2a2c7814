//! Service instance and discovery-status data types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A concrete backend process, addressable by host/port and tagged with
/// health and origin (`discovered` from the control plane vs. materialized
/// from static configuration).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceInstance {
    pub id: String,
    pub service: String,
    pub host: String,
    pub port: u16,
    #[serde(default = "default_protocol")]
    pub protocol: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default = "default_weight")]
    pub weight: u32,
    pub registered_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_health_check: Option<DateTime<Utc>>,
    pub healthy: bool,
    /// `true` when this instance came from the control plane; `false` when
    /// it was materialized from the static fallback manifest.
    pub discovered: bool,
}

fn default_protocol() -> String {
    "http".to_string()
}

fn default_weight() -> u32 {
    1
}

impl ServiceInstance {
    pub fn base_url(&self) -> String {
        format!("{}://{}:{}", self.protocol, self.host, self.port)
    }

    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.registered_at
    }
}

/// Discovery mode. `Transitioning` is only ever observed mid-attempt; it is
/// never a resting final state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryMode {
    Dynamic,
    Static,
    Transitioning,
}

impl Default for DiscoveryMode {
    fn default() -> Self {
        DiscoveryMode::Transitioning
    }
}

/// Point-in-time snapshot of the discovery subsystem's operating mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryStatus {
    pub mode: DiscoveryMode,
    pub system_service_available: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_dynamic_attempt: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_static_fallback: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_mode_switch: Option<DateTime<Utc>>,
    pub success_count: u64,
    pub failure_count: u64,
    pub probe_interval_ms: u64,
}

impl Default for DiscoveryStatus {
    fn default() -> Self {
        Self {
            mode: DiscoveryMode::Transitioning,
            system_service_available: false,
            last_dynamic_attempt: None,
            last_static_fallback: None,
            last_mode_switch: None,
            success_count: 0,
            failure_count: 0,
            probe_interval_ms: 45_000,
        }
    }
}

/// Outcome of a single health probe against an instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub healthy: bool,
    pub response_time_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub checked_at: DateTime<Utc>,
}
