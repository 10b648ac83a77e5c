use std::sync::Arc;

use crate::error::TransportError;
use crate::wire::{SyncRequest, SyncResponse};

/// Delivers one batch to the remote and returns its answer.
///
/// Implementations must be safe to call again with the same request: a
/// timed-out batch is re-sent as a whole.
#[async_trait::async_trait]
pub trait SyncTransport: Send + Sync {
    async fn push(&self, request: SyncRequest) -> Result<SyncResponse, TransportError>;
}

#[async_trait::async_trait]
impl<T> SyncTransport for Arc<T>
where
    T: SyncTransport + ?Sized,
{
    async fn push(&self, request: SyncRequest) -> Result<SyncResponse, TransportError> {
        (**self).push(request).await
    }
}
