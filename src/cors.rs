//! Origin checks for the API (CORS).
//!
//! A request without `Origin` is same-origin or not from a browser and
//! passes. With `Origin`, the request passes when the origin is listed or is
//! the request's own origin. Preflights are answered here and never reach a
//! handler. Credentials are never allowed cross-origin: the API is bearer
//! token based.

use std::collections::HashSet;
use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{HeaderMap, HeaderValue, Method, StatusCode, Uri, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::debug;

use crate::api::{ApiError, ErrorCode};

pub const ALLOW_METHODS: &str = "GET,POST,PATCH,DELETE,OPTIONS";
pub const ALLOW_HEADERS: &str = "Authorization, Content-Type";

const FORWARDED_PROTO_HEADER: &str = "x-forwarded-proto";

/// Origins allowed to call the API cross-origin. Built once at startup.
#[derive(Debug, Clone, Default)]
pub struct AllowedOrigins {
    origins: HashSet<String>,
}

impl AllowedOrigins {
    pub fn new<I, S>(origins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            origins: origins
                .into_iter()
                .map(|o| normalize_origin(o.as_ref()))
                .filter(|o| !o.is_empty())
                .collect(),
        }
    }

    pub fn contains(&self, origin: &str) -> bool {
        self.origins.contains(&normalize_origin(origin))
    }
}

/// Outcome of checking one request's origin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorsDecision {
    /// The request's origin, set only when allowed
    pub origin: Option<String>,
    pub is_allowed: bool,
    pub has_origin_header: bool,
}

fn normalize_origin(origin: &str) -> String {
    origin.trim().trim_end_matches('/').to_ascii_lowercase()
}

/// Whether `origin` is the origin the request itself was sent to.
fn is_same_origin(origin: &str, headers: &HeaderMap, uri: &Uri) -> bool {
    if let (Some(scheme), Some(authority)) = (uri.scheme_str(), uri.authority()) {
        if origin == normalize_origin(&format!("{}://{}", scheme, authority)) {
            return true;
        }
    }

    let Some(host) = headers.get(header::HOST).and_then(|h| h.to_str().ok()) else {
        return false;
    };
    let host = host.trim().to_ascii_lowercase();

    match headers
        .get(FORWARDED_PROTO_HEADER)
        .and_then(|h| h.to_str().ok())
        .and_then(|p| p.split(',').next())
        .map(|p| p.trim().to_ascii_lowercase())
    {
        Some(proto) => origin == format!("{}://{}", proto, host),
        None => origin == format!("http://{}", host) || origin == format!("https://{}", host),
    }
}

/// Decide whether a request's origin may use the API.
pub fn evaluate(allowed: &AllowedOrigins, headers: &HeaderMap, uri: &Uri) -> CorsDecision {
    let Some(raw) = headers.get(header::ORIGIN) else {
        return CorsDecision {
            origin: None,
            is_allowed: true,
            has_origin_header: false,
        };
    };

    let raw = raw.to_str().ok().map(str::trim).filter(|o| !o.is_empty());
    let is_allowed = raw.is_some_and(|raw| {
        let origin = normalize_origin(raw);
        allowed.contains(&origin) || is_same_origin(&origin, headers, uri)
    });

    CorsDecision {
        origin: if is_allowed { raw.map(str::to_string) } else { None },
        is_allowed,
        has_origin_header: true,
    }
}

/// Add the CORS headers every response carries.
pub fn apply_headers(response: &mut Response, decision: &CorsDecision) {
    let headers = response.headers_mut();
    headers.append(header::VARY, HeaderValue::from_static("Origin"));
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static(ALLOW_METHODS),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static(ALLOW_HEADERS),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
        HeaderValue::from_static("false"),
    );
    if let Some(value) = decision
        .origin
        .as_deref()
        .and_then(|o| HeaderValue::from_str(o).ok())
    {
        headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, value);
    }
}

/// Middleware enforcing the origin policy. Layer it outermost so error
/// responses from inner layers get CORS headers too.
pub async fn cors_middleware(
    State(allowed): State<Arc<AllowedOrigins>>,
    request: Request,
    next: Next,
) -> Response {
    let decision = evaluate(&allowed, request.headers(), request.uri());

    let mut response = if request.method() == Method::OPTIONS {
        if decision.is_allowed {
            StatusCode::NO_CONTENT.into_response()
        } else {
            ApiError::from(ErrorCode::OriginNotAllowed).into_response()
        }
    } else if !decision.is_allowed {
        debug!(
            origin = ?request.headers().get(header::ORIGIN),
            path = %request.uri().path(),
            "Rejected cross-origin request"
        );
        ApiError::from(ErrorCode::OriginNotAllowed).into_response()
    } else {
        next.run(request).await
    };

    apply_headers(&mut response, &decision);
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (name, value) in pairs {
            headers.insert(*name, HeaderValue::from_static(value));
        }
        headers
    }

    fn allowed() -> AllowedOrigins {
        AllowedOrigins::new(["https://app.example.com", "http://localhost:3000/"])
    }

    fn path() -> Uri {
        Uri::from_static("/api/session")
    }

    #[test]
    fn test_no_origin_is_allowed() {
        let decision = evaluate(&allowed(), &HeaderMap::new(), &path());
        assert!(decision.is_allowed);
        assert!(!decision.has_origin_header);
        assert_eq!(decision.origin, None);
    }

    #[test]
    fn test_listed_origin_is_echoed() {
        let decision = evaluate(
            &allowed(),
            &headers(&[("origin", "http://localhost:3000")]),
            &path(),
        );
        assert!(decision.is_allowed);
        assert_eq!(decision.origin.as_deref(), Some("http://localhost:3000"));
    }

    #[test]
    fn test_unknown_origin_is_rejected() {
        let decision = evaluate(
            &allowed(),
            &headers(&[("origin", "https://evil.example"), ("host", "api.example.com")]),
            &path(),
        );
        assert!(!decision.is_allowed);
        assert!(decision.has_origin_header);
        assert_eq!(decision.origin, None);
    }

    #[test]
    fn test_same_origin_via_host() {
        let empty = AllowedOrigins::default();
        let h = headers(&[("origin", "https://api.example.com"), ("host", "api.example.com")]);
        assert!(evaluate(&empty, &h, &path()).is_allowed);

        // Forwarded scheme must match when present
        let h = headers(&[
            ("origin", "http://api.example.com"),
            ("host", "api.example.com"),
            ("x-forwarded-proto", "https"),
        ]);
        assert!(!evaluate(&empty, &h, &path()).is_allowed);
    }

    #[test]
    fn test_same_origin_via_absolute_uri() {
        let empty = AllowedOrigins::default();
        let h = headers(&[("origin", "https://api.example.com:8443")]);
        let uri = Uri::from_static("https://api.example.com:8443/api/session");
        assert!(evaluate(&empty, &h, &uri).is_allowed);
    }

    #[test]
    fn test_origin_matching_is_case_insensitive() {
        let decision = evaluate(
            &allowed(),
            &headers(&[("origin", "HTTPS://App.Example.com")]),
            &path(),
        );
        assert!(decision.is_allowed);
        assert_eq!(decision.origin.as_deref(), Some("HTTPS://App.Example.com"));
    }
}
