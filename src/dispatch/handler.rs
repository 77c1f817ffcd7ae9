//! Request handler contract.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::http::ReconstructedRequest;

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("Invalid remote address {0:?}")]
    InvalidRemote(String),

    #[error("Invalid value for header {name}: {reason}")]
    InvalidHeader { name: &'static str, reason: String },

    #[error("Forwarding pool is shut down")]
    PoolClosed,

    #[error("Cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}

/// Consumer of reconstructed requests.
///
/// Handlers run inline in the flow task that framed the request, one at a
/// time in registration order. Returning an error stops the pipeline.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, token: &CancellationToken, request: Arc<ReconstructedRequest>) -> Result<(), HandlerError>;

    /// Name used in logs and errors.
    fn name(&self) -> &str {
        "handler"
    }
}

/// Handler built from a closure.
pub struct FnHandler<F> {
    name: String,
    f: F,
}

/// Wrap an async closure as a [`Handler`].
pub fn handler_fn<F, Fut>(name: impl Into<String>, f: F) -> FnHandler<F>
where
    F: Fn(CancellationToken, Arc<ReconstructedRequest>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send,
{
    FnHandler { name: name.into(), f }
}

#[async_trait]
impl<F, Fut> Handler for FnHandler<F>
where
    F: Fn(CancellationToken, Arc<ReconstructedRequest>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send,
{
    async fn handle(&self, token: &CancellationToken, request: Arc<ReconstructedRequest>) -> Result<(), HandlerError> {
        (self.f)(token.clone(), request).await
    }

    fn name(&self) -> &str {
        &self.name
    }
}
