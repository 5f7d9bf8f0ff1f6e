pub mod health;
pub use self::health::health;

pub mod root;
pub use self::root::root;

pub mod auth;
pub mod forms;
pub mod maintenance;

use axum::http::{header::AUTHORIZATION, HeaderMap};
use std::net::SocketAddr;

/// Narrow view of the request metadata the portal cares about.
///
/// Handlers never poke at raw headers for client identity; they build one of
/// these and use it for rate limiting and audit records.
#[derive(Clone, Debug, Default)]
pub struct RequestMeta {
    forwarded_for: Option<String>,
    real_ip: Option<String>,
    remote_addr: Option<SocketAddr>,
    user_agent: Option<String>,
    authorization: Option<String>,
}

impl RequestMeta {
    #[must_use]
    pub fn from_parts(headers: &HeaderMap, remote_addr: Option<SocketAddr>) -> Self {
        let forwarded_for = headers
            .get("x-forwarded-for")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(',').next())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string);
        let real_ip = headers
            .get("x-real-ip")
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string);
        let user_agent = headers
            .get(axum::http::header::USER_AGENT)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let authorization = headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);

        Self {
            forwarded_for,
            real_ip,
            remote_addr,
            user_agent,
            authorization,
        }
    }

    /// Client identity for rate limiting: forwarded-for, then real-ip, then
    /// the socket address. Anonymous clients without any of these share the
    /// `"unknown"` bucket.
    #[must_use]
    pub fn client_ip(&self) -> String {
        if let Some(ip) = &self.forwarded_for {
            return ip.clone();
        }
        if let Some(ip) = &self.real_ip {
            return ip.clone();
        }
        self.remote_addr
            .map_or_else(|| "unknown".to_string(), |addr| addr.ip().to_string())
    }

    #[must_use]
    pub fn user_agent(&self) -> Option<&str> {
        self.user_agent.as_deref()
    }

    /// Bearer value from the Authorization header, if present.
    #[must_use]
    pub fn bearer_token(&self) -> Option<&str> {
        let value = self.authorization.as_deref()?.trim();
        let token = value
            .strip_prefix("Bearer ")
            .or_else(|| value.strip_prefix("bearer "))?
            .trim();
        if token.is_empty() {
            None
        } else {
            Some(token)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use std::net::{IpAddr, Ipv4Addr};

    #[test]
    fn client_ip_prefers_forwarded() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("1.2.3.4, 5.6.7.8"),
        );
        headers.insert("x-real-ip", HeaderValue::from_static("9.9.9.9"));
        let meta = RequestMeta::from_parts(&headers, None);
        assert_eq!(meta.client_ip(), "1.2.3.4");
    }

    #[test]
    fn client_ip_falls_back_to_real_ip() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static("9.9.9.9"));
        let meta = RequestMeta::from_parts(&headers, None);
        assert_eq!(meta.client_ip(), "9.9.9.9");
    }

    #[test]
    fn client_ip_falls_back_to_socket_address() {
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 7)), 40000);
        let meta = RequestMeta::from_parts(&HeaderMap::new(), Some(addr));
        assert_eq!(meta.client_ip(), "10.0.0.7");
    }

    #[test]
    fn client_ip_unknown_when_nothing_available() {
        let meta = RequestMeta::from_parts(&HeaderMap::new(), None);
        assert_eq!(meta.client_ip(), "unknown");
    }

    #[test]
    fn bearer_token_parses_and_trims() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer  abc "));
        let meta = RequestMeta::from_parts(&headers, None);
        assert_eq!(meta.bearer_token(), Some("abc"));
    }

    #[test]
    fn bearer_token_none_for_empty_or_missing() {
        let meta = RequestMeta::from_parts(&HeaderMap::new(), None);
        assert_eq!(meta.bearer_token(), None);

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer "));
        let meta = RequestMeta::from_parts(&headers, None);
        assert_eq!(meta.bearer_token(), None);
    }

    #[test]
    fn user_agent_exposed_verbatim() {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::USER_AGENT,
            HeaderValue::from_static("Mozilla/5.0"),
        );
        let meta = RequestMeta::from_parts(&headers, None);
        assert_eq!(meta.user_agent(), Some("Mozilla/5.0"));
    }
}
