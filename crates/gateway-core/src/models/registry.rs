//! In-memory service registry: service name to ordered instance list.

use super::instance::ServiceInstance;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Snapshot of every known service and its instances, keyed by service name.
///
/// Instance order within a service is insertion order; callers that need a
/// stable dispatch order should sort explicitly rather than relying on it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceRegistry {
    services: HashMap<String, Vec<ServiceInstance>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self {
            services: HashMap::new(),
        }
    }

    /// Insert or replace an instance, keyed by `(service, id)`. Replacing
    /// preserves position so a heartbeat refresh does not reorder the list.
    pub fn upsert(&mut self, instance: ServiceInstance) {
        let list = self.services.entry(instance.service.clone()).or_default();
        if let Some(existing) = list.iter_mut().find(|i| i.id == instance.id) {
            *existing = instance;
        } else {
            list.push(instance);
        }
    }

    pub fn remove(&mut self, service: &str, id: &str) -> Option<ServiceInstance> {
        let list = self.services.get_mut(service)?;
        let idx = list.iter().position(|i| i.id == id)?;
        let removed = list.remove(idx);
        if list.is_empty() {
            self.services.remove(service);
        }
        Some(removed)
    }

    /// Replace an entire service's instance list atomically, used by the
    /// static-fallback purge-before-populate swap.
    pub fn replace_service(&mut self, service: &str, instances: Vec<ServiceInstance>) {
        if instances.is_empty() {
            self.services.remove(service);
        } else {
            self.services.insert(service.to_string(), instances);
        }
    }

    pub fn clear_service(&mut self, service: &str) {
        self.services.remove(service);
    }

    pub fn clear(&mut self) {
        self.services.clear();
    }

    /// All instances for a service, healthy and unhealthy alike.
    pub fn instances(&self, service: &str) -> &[ServiceInstance] {
        self.services
            .get(service)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Only the instances eligible for dispatch: registered and healthy.
    pub fn discoverable(&self, service: &str) -> Vec<&ServiceInstance> {
        self.instances(service).iter().filter(|i| i.healthy).collect()
    }

    pub fn mark_health(&mut self, service: &str, id: &str, healthy: bool, checked_at: chrono::DateTime<chrono::Utc>) {
        if let Some(list) = self.services.get_mut(service) {
            if let Some(instance) = list.iter_mut().find(|i| i.id == id) {
                instance.healthy = healthy;
                instance.last_health_check = Some(checked_at);
            }
        }
    }

    pub fn service_names(&self) -> Vec<String> {
        self.services.keys().cloned().collect()
    }

    pub fn all_instances(&self) -> impl Iterator<Item = &ServiceInstance> {
        self.services.values().flatten()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    pub fn len(&self) -> usize {
        self.services.values().map(Vec::len).sum()
    }
}
