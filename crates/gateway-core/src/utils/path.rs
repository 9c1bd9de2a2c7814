//! URL construction for upstream requests.

/// Builds the full upstream URL from an instance base URL and a forward
/// path. `base` is expected to already include the scheme, host, and port
/// (e.g. `http://backend:8080`); `path` should start with `/`.
///
/// # Examples
///
/// ```
/// use gateway_core::utils::path::format_route;
///
/// let url = format_route("http://backend", &8080, "/v1/users/123");
/// assert_eq!(url, "http://backend:8080/v1/users/123");
/// ```
pub fn format_route(host: &str, port: &u16, internal_path: &str) -> String {
    format!("{}:{}{}", host, port, internal_path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_host_port_and_path() {
        assert_eq!(
            format_route("https://secure-api", &443, "/auth/token"),
            "https://secure-api:443/auth/token"
        );
    }
}
