use anyhow::{anyhow, Result};
use legendo_core::ipc::{IpcHandler, IpcRequest, IpcResponse};
use legendo_core::{CacheError, SecureCache};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Answers IPC requests from a shared [`SecureCache`].
pub struct CacheHandler {
    cache: Arc<SecureCache>,
    max_age: Duration,
}

impl CacheHandler {
    /// `max_age` is the cutoff applied to on-demand `Sweep` requests.
    pub fn new(cache: Arc<SecureCache>, max_age: Duration) -> Self {
        Self { cache, max_age }
    }
}

#[async_trait::async_trait]
impl IpcHandler for CacheHandler {
    async fn handle(&self, req: IpcRequest) -> Result<IpcResponse> {
        match req {
            IpcRequest::Ping => Ok(IpcResponse::Pong),
            IpcRequest::Store { payload } => {
                let id = self
                    .cache
                    .store(&payload)
                    .map_err(|e| anyhow!("store failed: {e}"))?;
                debug!(%id, "ipc store");
                Ok(IpcResponse::Stored { id: id.to_string() })
            }
            IpcRequest::Retrieve { id } => match self.cache.retrieve::<Value>(&id) {
                Ok(payload) => Ok(IpcResponse::Payload { id, payload }),
                Err(CacheError::NotFound) => Ok(IpcResponse::NotFound { id }),
                Err(err) => Err(anyhow!("retrieve {id}: {err}")),
            },
            IpcRequest::Status => Ok(IpcResponse::Status {
                status: self.cache.status(),
            }),
            IpcRequest::Sweep => Ok(IpcResponse::Swept {
                report: self.cache.sweep_now(self.max_age),
            }),
        }
    }
}
