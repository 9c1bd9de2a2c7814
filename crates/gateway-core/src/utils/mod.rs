//! Utility functions and helper modules for the gateway.
//!
//! - [`path`] - URL construction for upstream requests
//! - [`route_matcher`] - Route pattern compilation and matching

pub mod path;
pub mod route_matcher;
