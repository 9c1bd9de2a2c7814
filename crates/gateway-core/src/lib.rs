//! Core routing, discovery, policy and forwarding engine for the API gateway.
//!
//! This crate implements everything described as "the core" of the gateway:
//! the dynamic router, the service discovery subsystem, the forward engine,
//! the policy layer, and the circuit breaker. Process bootstrap and the HTTP
//! server binding live in the `gateway-server` binary crate; this crate is
//! transport-agnostic except where Actix Web types are the natural vocabulary
//! for request/response plumbing (header maps, `ResponseError`).

pub mod config;
pub mod logs;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod utils;
