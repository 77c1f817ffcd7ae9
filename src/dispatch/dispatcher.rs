//! Ordered, fail-fast delivery of requests to handlers.

use std::sync::Arc;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::dispatch::handler::{Handler, HandlerError};
use crate::http::ReconstructedRequest;

#[derive(Debug, Error)]
#[error("Handler {handler} failed on request {request_id}: {source}")]
pub struct DispatchError {
    pub handler: String,
    pub request_id: Uuid,
    #[source]
    pub source: HandlerError,
}

#[derive(Default, Clone)]
pub struct Dispatcher {
    handlers: Vec<Arc<dyn Handler>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a handler. Handlers run in the order they are registered.
    pub fn register(&mut self, handler: Arc<dyn Handler>) {
        tracing::debug!(handler = handler.name(), position = self.handlers.len(), "Handler registered");
        self.handlers.push(handler);
    }

    pub fn with_handler(mut self, handler: impl Handler + 'static) -> Self {
        self.register(Arc::new(handler));
        self
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Run every handler on `request`. The first failure stops the chain.
    pub async fn dispatch(
        &self,
        token: &CancellationToken,
        request: Arc<ReconstructedRequest>,
    ) -> Result<(), DispatchError> {
        metrics::counter!("sniffwire_requests_total").increment(1);

        for handler in &self.handlers {
            if let Err(source) = handler.handle(token, Arc::clone(&request)).await {
                tracing::error!(
                    handler = handler.name(),
                    request_id = %request.id(),
                    error = %source,
                    "Handler failed"
                );
                return Err(DispatchError {
                    handler: handler.name().to_string(),
                    request_id: request.id(),
                    source,
                });
            }
        }
        Ok(())
    }
}
