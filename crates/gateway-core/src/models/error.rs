//! Gateway error taxonomy.
//!
//! A single error type carries every failure mode the gateway itself can
//! produce (as opposed to a passed-through backend error, which is relayed
//! verbatim by the forward engine rather than wrapped here). Each variant
//! maps to exactly one HTTP status and one machine-readable error code, so
//! handlers can simply `?`-propagate and let `ResponseError` render the
//! standard envelope.

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde_json::json;

/// Gateway-generated error, rendered as the standard envelope:
/// `{ success, error: { type, code, message }, timestamp, requestId }`.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("malformed request: {0}")]
    Validation(String),

    #[error("authentication required: {0}")]
    Authentication(String),

    #[error("insufficient privileges: {0}")]
    Authorization(String),

    #[error("no route matched {path}")]
    NotFound { path: String },

    #[error("rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("request exceeded its time budget")]
    Timeout,

    #[error("circuit open for service {service}")]
    CircuitOpen { service: String },

    #[error("no healthy instance for service {service}")]
    ServiceUnavailable { service: String },

    #[error("upstream call to {service} failed: {message}")]
    ExternalService { service: String, message: String },

    #[error("internal gateway error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// The stable machine-readable error code for this variant.
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::Validation(_) => "VALIDATION",
            GatewayError::Authentication(_) => "AUTHENTICATION",
            GatewayError::Authorization(_) => "AUTHORIZATION",
            GatewayError::NotFound { .. } => "NOT_FOUND",
            GatewayError::RateLimited { .. } => "RATE_LIMITED",
            GatewayError::Timeout => "TIMEOUT",
            GatewayError::CircuitOpen { .. } => "CIRCUIT_OPEN",
            GatewayError::ServiceUnavailable { .. } => "SERVICE_UNAVAILABLE",
            GatewayError::ExternalService { .. } => "EXTERNAL_SERVICE_ERROR",
            GatewayError::Internal(_) => "INTERNAL",
        }
    }
}

impl ResponseError for GatewayError {
    fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::Validation(_) => StatusCode::BAD_REQUEST,
            GatewayError::Authentication(_) => StatusCode::UNAUTHORIZED,
            GatewayError::Authorization(_) => StatusCode::FORBIDDEN,
            GatewayError::NotFound { .. } => StatusCode::NOT_FOUND,
            GatewayError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::Timeout => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::CircuitOpen { .. } => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::ExternalService { .. } => StatusCode::BAD_GATEWAY,
            GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let request_id = uuid::Uuid::new_v4().to_string();
        let mut builder = HttpResponse::build(self.status_code());
        if let GatewayError::RateLimited { retry_after_secs } = self {
            builder.insert_header(("retry-after", retry_after_secs.to_string()));
        }
        builder.json(json!({
            "success": false,
            "error": {
                "type": self.code(),
                "code": self.code(),
                "message": self.to_string(),
            },
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "requestId": request_id,
        }))
    }
}
