//! Configuration loading, validation, and hot-reload for the gateway.
//!
//! - [`settings`] - `GatewaySettings` loading from a JSON manifest plus the
//!   environment-variable overlay described in the external interfaces spec
//! - [`validation`] - comprehensive, non-fatal-by-default configuration checks
//! - [`hot_reload`] - file-watch based reload that rebuilds the route table
//!   and broadcasts the new settings to subscribers without a restart

pub mod hot_reload;
pub mod settings;
pub mod validation;
