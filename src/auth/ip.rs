//! Client IP extraction utilities.

use std::net::SocketAddr;

use axum::{extract::ConnectInfo, http::HeaderMap};

/// Header set by reverse proxies with the original client address.
pub const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";

/// Extract the client IP address.
///
/// With `trust_forwarded_for` the first address of `X-Forwarded-For` is used
/// and its absence is an error (there is no fallback to the socket address,
/// which would be the proxy). Otherwise the socket address from `ConnectInfo`.
pub fn extract_client_ip(
    headers: &HeaderMap,
    extensions: &axum::http::Extensions,
    trust_forwarded_for: bool,
) -> Result<String, &'static str> {
    if trust_forwarded_for {
        let value = headers
            .get(FORWARDED_FOR_HEADER)
            .ok_or("IP header not present")?
            .to_str()
            .map_err(|_| "IP header contains invalid characters")?;
        let first = value
            .split(',')
            .next()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or("IP header is empty")?;
        return first
            .parse::<std::net::IpAddr>()
            .map(|ip| ip.to_string())
            .map_err(|_| "IP header is not an address");
    }

    extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip().to_string())
        .ok_or("No client IP available")
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{Extensions, HeaderValue};

    #[test]
    fn test_forwarded_for_first_hop() {
        let mut headers = HeaderMap::new();
        headers.insert(
            FORWARDED_FOR_HEADER,
            HeaderValue::from_static("203.0.113.7, 10.0.0.1"),
        );
        assert_eq!(
            extract_client_ip(&headers, &Extensions::new(), true),
            Ok("203.0.113.7".to_string())
        );
    }

    #[test]
    fn test_forwarded_for_required_when_trusted() {
        assert!(extract_client_ip(&HeaderMap::new(), &Extensions::new(), true).is_err());

        let mut headers = HeaderMap::new();
        headers.insert(FORWARDED_FOR_HEADER, HeaderValue::from_static("not-an-ip"));
        assert!(extract_client_ip(&headers, &Extensions::new(), true).is_err());
    }

    #[test]
    fn test_connect_info() {
        let mut extensions = Extensions::new();
        extensions.insert(ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 4000))));
        let mut headers = HeaderMap::new();
        headers.insert(FORWARDED_FOR_HEADER, HeaderValue::from_static("203.0.113.7"));

        // Untrusted headers are ignored
        assert_eq!(
            extract_client_ip(&headers, &extensions, false),
            Ok("127.0.0.1".to_string())
        );
    }
}
