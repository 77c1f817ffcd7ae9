//! Request logging handler.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::dispatch::{Handler, HandlerError};
use crate::http::ReconstructedRequest;

/// Logs every request as `remote -> host + target`.
#[derive(Debug, Default, Clone)]
pub struct LogHandler;

impl LogHandler {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Handler for LogHandler {
    async fn handle(&self, _token: &CancellationToken, request: Arc<ReconstructedRequest>) -> Result<(), HandlerError> {
        tracing::info!(
            request_id = %request.id(),
            method = %request.method(),
            body_bytes = request.body_len(),
            "{}",
            request
        );
        Ok(())
    }

    fn name(&self) -> &str {
        "log"
    }
}
