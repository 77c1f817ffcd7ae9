//! Request host filtering.
//!
//! # Design Decisions
//! - Host matching is exact equality, ASCII case-insensitive (RFC 9110)
//! - A port is part of the host: `api.example.com` does not match
//!   `api.example.com:8080`
//! - Empty hostname = always matches (wildcard)

use crate::config::HostFilterConfig;
use crate::http::ReconstructedRequest;

/// Matches requests addressed to one host.
#[derive(Debug, Clone, Default)]
pub struct HostFilter {
    /// Normalized to lowercase.
    hostname: String,
}

impl HostFilter {
    pub fn new(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into().trim().to_ascii_lowercase(),
        }
    }

    pub fn from_config(config: Option<&HostFilterConfig>) -> Self {
        config.map(|c| Self::new(c.hostname.as_str())).unwrap_or_default()
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// True when every request matches.
    pub fn is_wildcard(&self) -> bool {
        self.hostname.is_empty()
    }

    pub fn matches(&self, request: &ReconstructedRequest) -> bool {
        if self.is_wildcard() {
            return true;
        }
        let Some(host) = request.host() else {
            return false;
        };
        host.eq_ignore_ascii_case(&self.hostname)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::{Endpoint, FlowKey};
    use crate::http::Headers;
    use bytes::Bytes;
    use http::header::{HeaderValue, HOST};
    use http::{Method, Version};
    use std::time::SystemTime;

    fn with_host(host: &'static str) -> ReconstructedRequest {
        let mut headers = Headers::new();
        headers.append(HOST, HeaderValue::from_static(host));
        let flow = FlowKey::new(
            Endpoint::from("10.0.0.5:1".parse::<std::net::SocketAddr>().unwrap()),
            Endpoint::from("10.0.0.1:80".parse::<std::net::SocketAddr>().unwrap()),
        );
        ReconstructedRequest::new(Method::GET, "/", Version::HTTP_11, headers, Bytes::new(), flow, SystemTime::now())
    }

    #[test]
    fn matches_case_insensitively() {
        let filter = HostFilter::new("API.example.com");
        assert!(filter.matches(&with_host("api.EXAMPLE.com")));
        assert!(!filter.matches(&with_host("other.example.com")));
    }

    #[test]
    fn port_is_part_of_the_host() {
        let filter = HostFilter::new("api.example.com");
        assert!(!filter.matches(&with_host("api.example.com:8080")));
        assert!(HostFilter::new("api.example.com:8080").matches(&with_host("API.example.com:8080")));
        assert!(!HostFilter::new("::1").matches(&with_host("[::1]:80")));
    }

    #[test]
    fn empty_hostname_matches_everything() {
        let filter = HostFilter::from_config(None);
        assert!(filter.is_wildcard());
        assert!(filter.matches(&with_host("anything")));
    }
}
