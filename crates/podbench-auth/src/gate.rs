//! Bound on in-flight outbound requests.
//!
//! Every HTTP exchange the client performs (resource fetches, discovery,
//! token exchanges, enrollment calls, stream handshakes) takes a permit
//! first. Waiters are admitted in arrival order.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::{AuthError, AuthResult};

/// Fair FIFO gate with a fixed number of slots.
#[derive(Debug, Clone)]
pub struct ConcurrencyGate {
    semaphore: Arc<Semaphore>,
    max: usize,
}

/// Slot held for the duration of one request. Released on drop.
#[derive(Debug)]
pub struct GatePermit {
    _permit: OwnedSemaphorePermit,
}

impl ConcurrencyGate {
    /// Create a gate admitting at most `max` requests at once (minimum 1).
    pub fn new(max: usize) -> Self {
        let max = max.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(max)),
            max,
        }
    }

    /// Wait for a free slot.
    pub async fn acquire(&self) -> AuthResult<GatePermit> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| AuthError::Network {
                message: "request gate closed".to_string(),
            })?;
        Ok(GatePermit { _permit: permit })
    }

    /// Number of requests currently holding a slot.
    pub fn active(&self) -> usize {
        self.max - self.semaphore.available_permits()
    }

    pub fn max(&self) -> usize {
        self.max
    }
}

impl Default for ConcurrencyGate {
    fn default() -> Self {
        Self::new(30)
    }
}
