//! Structured logging setup.
//!
//! - [`logger`] - `env_logger` configuration with the gateway's ANSI-colored
//!   format and the `LOG_FORMAT=json` switch

pub mod logger;
