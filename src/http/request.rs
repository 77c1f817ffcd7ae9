//! Reconstructed HTTP request.
//!
//! # Responsibilities
//! - Hold one request recovered from a TCP stream, body fully buffered
//! - Keep header order exactly as captured
//! - Carry origin metadata (remote address, capture time, flow) and a
//!   request ID for log correlation
//!
//! # Design Decisions
//! - Headers are a `Vec` of pairs instead of `http::HeaderMap`, whose
//!   iteration order is not the wire order
//! - The body is `Bytes`; every read is a cheap clone of the same buffer

use std::fmt;
use std::time::SystemTime;

use bytes::Bytes;
use http::header::{HeaderName, HeaderValue, HOST};
use http::{Method, Uri, Version};
use uuid::Uuid;

use crate::flow::FlowKey;

/// Header list in wire order. Lookups are case-insensitive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers(Vec<(HeaderName, HeaderValue)>);

impl Headers {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self(Vec::with_capacity(capacity))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// First value for `name`.
    pub fn get(&self, name: impl AsRef<str>) -> Option<&HeaderValue> {
        let name = name.as_ref();
        self.0
            .iter()
            .find(|(n, _)| n.as_str().eq_ignore_ascii_case(name))
            .map(|(_, v)| v)
    }

    /// All values for `name`, in order.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a HeaderValue> + 'a {
        self.0
            .iter()
            .filter(move |(n, _)| n.as_str().eq_ignore_ascii_case(name))
            .map(|(_, v)| v)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Add a value after any existing ones.
    pub fn append(&mut self, name: HeaderName, value: HeaderValue) {
        self.0.push((name, value));
    }

    /// Replace every value of `name` with `value`, keeping the position of
    /// the first occurrence.
    pub fn insert(&mut self, name: HeaderName, value: HeaderValue) {
        match self.0.iter().position(|(n, _)| *n == name) {
            Some(first) => {
                self.0[first].1 = value;
                let mut index = 0;
                self.0.retain(|(n, _)| {
                    let keep = index <= first || *n != name;
                    index += 1;
                    keep
                });
            }
            None => self.0.push((name, value)),
        }
    }

    /// Remove every value of `name`. Returns whether anything was removed.
    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.0.len();
        self.0.retain(|(n, _)| !n.as_str().eq_ignore_ascii_case(name));
        self.0.len() != before
    }

    pub fn iter(&self) -> impl Iterator<Item = (&HeaderName, &HeaderValue)> {
        self.0.iter().map(|(n, v)| (n, v))
    }
}

impl<'a> IntoIterator for &'a Headers {
    type Item = &'a (HeaderName, HeaderValue);
    type IntoIter = std::slice::Iter<'a, (HeaderName, HeaderValue)>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl FromIterator<(HeaderName, HeaderValue)> for Headers {
    fn from_iter<I: IntoIterator<Item = (HeaderName, HeaderValue)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// One HTTP/1.x request recovered from the wire.
#[derive(Debug, Clone)]
pub struct ReconstructedRequest {
    id: Uuid,
    method: Method,
    target: String,
    version: Version,
    headers: Headers,
    body: Bytes,
    remote: String,
    timestamp: SystemTime,
    flow: FlowKey,
}

impl ReconstructedRequest {
    /// Build a request seen on `flow`. `remote` is the flow's source.
    pub fn new(
        method: Method,
        target: impl Into<String>,
        version: Version,
        headers: Headers,
        body: Bytes,
        flow: FlowKey,
        timestamp: SystemTime,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            method,
            target: target.into(),
            version,
            headers,
            body,
            remote: flow.source().to_string(),
            timestamp,
            flow,
        }
    }

    /// Override the recorded remote address.
    pub fn with_remote(mut self, remote: impl Into<String>) -> Self {
        self.remote = remote.into();
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Request target exactly as it appeared on the request line.
    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// The full body. May be called any number of times.
    pub fn body(&self) -> Bytes {
        self.body.clone()
    }

    pub fn body_len(&self) -> usize {
        self.body.len()
    }

    /// `ip:port` of the client that sent the request.
    pub fn remote(&self) -> &str {
        &self.remote
    }

    pub fn timestamp(&self) -> SystemTime {
        self.timestamp
    }

    pub fn flow(&self) -> FlowKey {
        self.flow
    }

    /// Host the request was addressed to: the `Host` header, or the
    /// authority of an absolute-form target.
    pub fn host(&self) -> Option<&str> {
        if let Some(host) = self.headers.get(HOST.as_str()).and_then(|v| v.to_str().ok()) {
            let host = host.trim();
            if !host.is_empty() {
                return Some(host);
            }
        }
        let rest = self
            .target
            .strip_prefix("http://")
            .or_else(|| self.target.strip_prefix("https://"))?;
        let authority = rest.split(['/', '?']).next()?;
        (!authority.is_empty()).then_some(authority)
    }

    /// Path and query of the target, `/` when the target has none.
    pub fn path_and_query(&self) -> String {
        if self.target.starts_with('/') {
            return self.target.clone();
        }
        match self.target.parse::<Uri>() {
            Ok(uri) => uri
                .path_and_query()
                .map(|pq| pq.as_str().to_string())
                .filter(|pq| !pq.is_empty())
                .unwrap_or_else(|| "/".to_string()),
            Err(_) => "/".to_string(),
        }
    }
}

impl fmt::Display for ReconstructedRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} -> {}{}",
            self.remote,
            self.host().unwrap_or_default(),
            self.target
        )
    }
}
