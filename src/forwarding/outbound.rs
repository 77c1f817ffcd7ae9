//! Rewriting captured requests for the upstream target.
//!
//! # Responsibilities
//! - Retarget scheme, host and port; keep path, query and `Host`
//! - Drop connection-scoped headers and ask for `Connection: close`
//! - Add forwarded-for and origin headers when enabled

use std::net::{IpAddr, SocketAddr};

use bytes::Bytes;
use http::header::{self, HeaderName, HeaderValue};
use http::Method;
use uuid::Uuid;

use crate::config::{SniffwireConfig, TargetProtocol};
use crate::forwarding::ForwardError;
use crate::http::{Headers, ReconstructedRequest};

pub const X_FORWARDED_FOR: &str = "x-forwarded-for";
pub const X_FORWARDED_PORT: &str = "x-forwarded-port";
pub const CONNECTING_IP: &str = "sniffwire-connecting-ip";
pub const CONNECTING_PORT: &str = "sniffwire-connecting-port";

/// Headers that describe the captured connection rather than the request.
/// `Content-Length` is recomputed from the buffered body.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-connection",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "expect",
    "content-length",
];

/// Where forwarded requests go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub protocol: TargetProtocol,
    pub host: String,
    pub port: u16,
}

impl Target {
    pub fn from_config(config: &SniffwireConfig) -> Self {
        Self {
            protocol: config.target_protocol,
            host: config.target_host.clone(),
            port: config.target_port,
        }
    }

    /// `scheme://host:port`, with IPv6 literals bracketed.
    pub fn base_url(&self) -> String {
        let host = match self.host.parse::<IpAddr>() {
            Ok(IpAddr::V6(v6)) => format!("[{v6}]"),
            _ => self.host.clone(),
        };
        format!("{}://{}:{}", self.protocol.scheme(), host, self.port)
    }
}

/// Which optional headers to add.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeaderOptions {
    pub forwarded: bool,
    pub origin: bool,
}

/// A request ready for the forwarding pool.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub request_id: Uuid,
    pub method: Method,
    pub url: String,
    pub headers: Headers,
    pub body: Bytes,
}

impl OutboundRequest {
    /// Clone `request` and retarget it.
    pub fn rewrite(
        request: &ReconstructedRequest,
        target: &Target,
        options: HeaderOptions,
    ) -> Result<Self, ForwardError> {
        let mut headers = request.headers().clone();
        strip_hop_by_hop(&mut headers);
        headers.insert(header::CONNECTION, HeaderValue::from_static("close"));

        if options.forwarded || options.origin {
            match request.remote().parse::<SocketAddr>() {
                Ok(remote) => add_origin_headers(&mut headers, remote, options)?,
                Err(_) if options.forwarded => {
                    return Err(ForwardError::InvalidRemote(request.remote().to_string()));
                }
                Err(_) => {
                    tracing::warn!(
                        request_id = %request.id(),
                        remote = request.remote(),
                        "Remote address unparseable, skipping origin headers"
                    );
                }
            }
        }

        Ok(Self {
            request_id: request.id(),
            method: request.method().clone(),
            url: format!("{}{}", target.base_url(), request.path_and_query()),
            headers,
            body: request.body(),
        })
    }
}

fn strip_hop_by_hop(headers: &mut Headers) {
    // Headers listed in Connection are connection-scoped too.
    let listed: Vec<String> = headers
        .get_all("connection")
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|name| name.trim().to_ascii_lowercase())
        .filter(|name| !name.is_empty())
        .collect();
    for name in listed.iter().map(String::as_str).chain(HOP_BY_HOP.iter().copied()) {
        if name != "host" {
            headers.remove(name);
        }
    }
}

fn add_origin_headers(headers: &mut Headers, remote: SocketAddr, options: HeaderOptions) -> Result<(), ForwardError> {
    let ip = value(&remote.ip().to_string(), X_FORWARDED_FOR)?;
    let port = value(&remote.port().to_string(), X_FORWARDED_PORT)?;

    if options.forwarded {
        headers.append(HeaderName::from_static(X_FORWARDED_FOR), ip.clone());
        headers.insert(HeaderName::from_static(X_FORWARDED_PORT), port.clone());
    }
    if options.origin {
        headers.insert(HeaderName::from_static(CONNECTING_IP), ip);
        headers.insert(HeaderName::from_static(CONNECTING_PORT), port);
    }
    Ok(())
}

fn value(raw: &str, name: &'static str) -> Result<HeaderValue, ForwardError> {
    HeaderValue::from_str(raw).map_err(|e| ForwardError::InvalidHeader {
        name,
        reason: e.to_string(),
    })
}
