//! Service layer: the gateway's runtime machinery, sitting between the route
//! handlers and the backend services they forward to.
//!
//! - [`circuit_breaker`] - per-service failure-gating state machine
//! - [`router`] - concurrency-safe façade over the compiled route table
//! - [`discovery`] - service registry, health checks, control-plane polling
//! - [`pipeline`] - the forward engine tying the above into one request flow
//! - [`metrics_store`] - bounded historical time-series storage for admin introspection

pub mod circuit_breaker;
pub mod discovery;
pub mod metrics_store;
pub mod pipeline;
pub mod router;
