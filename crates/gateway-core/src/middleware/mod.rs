//! Cross-cutting request concerns materialized by the policy layer (§4.4):
//! identity projection, rate limiting, and response caching. These are
//! plain async building blocks invoked in order from
//! [`crate::services::pipeline`] rather than a static Actix middleware
//! stack, since the policy that governs each one is only known once routing
//! has resolved the target service and route.
//!
//! - [`auth`] - JWT validation that projects an [`identity::AuthContext`]
//!   into request extensions ahead of the forward engine
//! - [`identity`] - header-stripping and HMAC identity signing
//! - [`rate_limiter`] - fixed-window/sliding-window/token-bucket limiting
//! - [`cache`] - GET-only response cache with stale-while-revalidate
//! - [`security`] - static security response headers
//! - [`validation`] - payload-size and header sanity checks ahead of routing

pub mod auth;
pub mod cache;
pub mod identity;
pub mod rate_limiter;
pub mod security;
pub mod validation;
