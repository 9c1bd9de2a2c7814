//! Request-level security validation applied ahead of routing: payload size
//! ceiling and header sanity (suspicious User-Agent, Content-Type
//! whitelist).

use actix_web::{dev::ServiceRequest, Error, Result};
use log::warn;

const SUSPICIOUS_USER_AGENTS: &[&str] = &["sqlmap", "nikto", "nmap", "masscan", "burp"];
const ALLOWED_CONTENT_TYPES: &[&str] = &[
    "application/json",
    "application/x-www-form-urlencoded",
    "text/plain",
    "multipart/form-data",
];

/// Rejects a request whose declared `Content-Length` exceeds `max_size`
/// before its body is ever read.
pub fn validate_request_size(max_size: usize) -> impl Fn(&ServiceRequest) -> Result<(), Error> {
    move |req: &ServiceRequest| {
        if let Some(content_length) = req.headers().get("content-length") {
            if let Ok(length) = content_length.to_str().unwrap_or_default().parse::<usize>() {
                if length > max_size {
                    warn!(
                        "request payload too large: {length} bytes (max {max_size}) from {}",
                        req.connection_info().peer_addr().unwrap_or("unknown")
                    );
                    return Err(actix_web::error::ErrorPayloadTooLarge("request payload too large"));
                }
            }
        }
        Ok(())
    }
}

/// Blocks known scanner User-Agents and, for POST/PUT, enforces a
/// Content-Type whitelist.
pub fn validate_headers() -> impl Fn(&ServiceRequest) -> Result<(), Error> {
    |req: &ServiceRequest| {
        if let Some(user_agent) = req.headers().get("user-agent") {
            if let Ok(ua) = user_agent.to_str() {
                let lowered = ua.to_lowercase();
                if SUSPICIOUS_USER_AGENTS.iter().any(|p| lowered.contains(p)) {
                    warn!(
                        "suspicious user-agent {ua} from {}",
                        req.connection_info().peer_addr().unwrap_or("unknown")
                    );
                    return Err(actix_web::error::ErrorForbidden("forbidden"));
                }
            }
        }

        let method = req.method();
        if method == actix_web::http::Method::POST || method == actix_web::http::Method::PUT {
            if let Some(content_type) = req.headers().get("content-type") {
                if let Ok(ct) = content_type.to_str() {
                    if !ALLOWED_CONTENT_TYPES.iter().any(|allowed| ct.starts_with(allowed)) {
                        warn!(
                            "unsupported content-type {ct} from {}",
                            req.connection_info().peer_addr().unwrap_or("unknown")
                        );
                        return Err(actix_web::error::ErrorUnsupportedMediaType("unsupported content-type"));
                    }
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test::TestRequest;

    #[test]
    fn rejects_oversized_declared_length() {
        let validator = validate_request_size(10);
        let req = TestRequest::default()
            .insert_header(("content-length", "20"))
            .to_srv_request();
        assert!(validator(&req).is_err());
    }

    #[test]
    fn allows_within_limit() {
        let validator = validate_request_size(10);
        let req = TestRequest::default()
            .insert_header(("content-length", "5"))
            .to_srv_request();
        assert!(validator(&req).is_ok());
    }

    #[test]
    fn blocks_known_scanner_user_agent() {
        let validator = validate_headers();
        let req = TestRequest::default()
            .insert_header(("user-agent", "sqlmap/1.0"))
            .to_srv_request();
        assert!(validator(&req).is_err());
    }

    #[test]
    fn rejects_unsupported_content_type_on_post() {
        let validator = validate_headers();
        let req = TestRequest::post()
            .insert_header(("content-type", "application/xml"))
            .to_srv_request();
        assert!(validator(&req).is_err());
    }
}
