//! The completion capability every backend implements.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use docharvest_shared::Result;

use crate::types::{CompletionRequest, CompletionResponse};

/// A chat-completion backend, either a vendor adapter or a wrapper around one.
///
/// Implementations are shared across tasks and must not mutate the request.
/// A call observed to be cancelled returns
/// [`DocHarvestError::Cancelled`](docharvest_shared::DocHarvestError::Cancelled).
#[async_trait]
pub trait Provider: Send + Sync {
    /// Send one completion request.
    async fn complete(
        &self,
        cancel: &CancellationToken,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse>;

    /// Short, stable provider name used in logs and errors.
    fn name(&self) -> &str;

    /// Release provider resources. HTTP adapters hold nothing to release.
    fn close(&self) -> Result<()> {
        Ok(())
    }
}
