//! Forwarding handler.
//!
//! # Responsibilities
//! - Apply the host filter
//! - Rewrite the request for the target
//! - Submit it to the forwarding pool, waiting for a free slot
//!
//! # Design Decisions
//! - Submission is awaited, so a saturated pool slows the pipeline down
//!   instead of queueing without bound
//! - CONNECT requests are skipped; there is nothing to replay

use std::sync::Arc;

use async_trait::async_trait;
use http::Method;
use tokio_util::sync::CancellationToken;

use crate::config::SniffwireConfig;
use crate::dispatch::{Handler, HandlerError};
use crate::forwarding::{ForwardingPool, HeaderOptions, OutboundRequest, Target};
use crate::handlers::HostFilter;
use crate::http::ReconstructedRequest;

pub struct ProxyHandler {
    pool: Arc<ForwardingPool>,
    target: Target,
    options: HeaderOptions,
    filter: HostFilter,
}

impl ProxyHandler {
    pub fn new(pool: Arc<ForwardingPool>, target: Target, options: HeaderOptions, filter: HostFilter) -> Self {
        Self {
            pool,
            target,
            options,
            filter,
        }
    }

    pub fn from_config(pool: Arc<ForwardingPool>, config: &SniffwireConfig) -> Self {
        Self::new(
            pool,
            Target::from_config(config),
            HeaderOptions {
                forwarded: config.append_forwarded_headers,
                origin: config.append_origin_headers,
            },
            HostFilter::from_config(config.host_filter.as_ref()),
        )
    }

    pub fn target(&self) -> &Target {
        &self.target
    }
}

#[async_trait]
impl Handler for ProxyHandler {
    async fn handle(&self, token: &CancellationToken, request: Arc<ReconstructedRequest>) -> Result<(), HandlerError> {
        if !self.filter.matches(&request) {
            tracing::trace!(
                request_id = %request.id(),
                host = request.host().unwrap_or_default(),
                filter = self.filter.hostname(),
                "Host filtered out"
            );
            return Ok(());
        }
        if request.method() == Method::CONNECT {
            tracing::debug!(request_id = %request.id(), "Skipping CONNECT request");
            return Ok(());
        }

        let outbound = OutboundRequest::rewrite(&request, &self.target, self.options)?;
        tokio::select! {
            result = self.pool.submit(outbound) => result?,
            _ = token.cancelled() => return Err(HandlerError::Cancelled),
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "proxy"
    }
}
