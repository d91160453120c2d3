//! Outstanding message/byte accounting for a receive loop.
//!
//! Every pulled message holds a [`FlowPermit`] until it is settled (acked or
//! nacked). The pull loop acquires a message slot before asking the broker
//! for more work, so once either cap is reached pulling suspends until a
//! permit is dropped.

use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Largest byte cap representable by a single `acquire_many` call.
const MAX_BYTE_PERMITS: usize = u32::MAX as usize;

/// Counting semaphores bounding outstanding messages and bytes.
#[derive(Debug)]
pub struct FlowController {
    messages: Arc<Semaphore>,
    max_messages: usize,
    bytes: Option<Arc<Semaphore>>,
    max_bytes: usize,
}

/// Held by one in-flight message. Dropping it frees the slot and its bytes.
#[derive(Debug)]
pub struct FlowPermit {
    _message: OwnedSemaphorePermit,
    _bytes: Option<OwnedSemaphorePermit>,
}

impl FlowController {
    /// `max_bytes == None` disables the byte cap.
    pub fn new(max_messages: usize, max_bytes: Option<usize>) -> Self {
        let max_messages = max_messages.clamp(1, Semaphore::MAX_PERMITS);
        let max_bytes = max_bytes
            .map(|b| b.clamp(1, MAX_BYTE_PERMITS.min(Semaphore::MAX_PERMITS)))
            .unwrap_or(0);
        Self {
            messages: Arc::new(Semaphore::new(max_messages)),
            max_messages,
            bytes: (max_bytes > 0).then(|| Arc::new(Semaphore::new(max_bytes))),
            max_bytes,
        }
    }

    /// Wait for one free message slot.
    ///
    /// Returns the slot plus the number of further slots currently free, which
    /// bounds the size of the next pull. `None` only if the semaphore was closed.
    pub async fn reserve(&self) -> Option<(OwnedSemaphorePermit, usize)> {
        let permit = Arc::clone(&self.messages).acquire_owned().await.ok()?;
        let spare = self.messages.available_permits();
        Some((permit, spare))
    }

    /// Take a message slot without waiting, if one is free.
    pub fn try_reserve(&self) -> Option<OwnedSemaphorePermit> {
        Arc::clone(&self.messages).try_acquire_owned().ok()
    }

    /// Attach byte accounting to a reserved slot, waiting while the byte cap
    /// is exhausted. A message larger than the cap takes the whole cap.
    pub async fn admit(&self, slot: OwnedSemaphorePermit, size: usize) -> FlowPermit {
        let bytes = match &self.bytes {
            Some(bytes) => {
                let wanted = size.clamp(1, self.max_bytes) as u32;
                Arc::clone(bytes).acquire_many_owned(wanted).await.ok()
            }
            None => None,
        };
        FlowPermit {
            _message: slot,
            _bytes: bytes,
        }
    }

    /// Messages currently holding a slot.
    pub fn outstanding_messages(&self) -> usize {
        self.max_messages - self.messages.available_permits()
    }

    /// Bytes currently accounted, zero when uncapped.
    #[cfg(test)]
    pub fn outstanding_bytes(&self) -> usize {
        self.bytes
            .as_ref()
            .map(|b| self.max_bytes - b.available_permits())
            .unwrap_or(0)
    }

    #[cfg(test)]
    pub fn byte_cap(&self) -> Option<usize> {
        self.bytes.as_ref().map(|_| self.max_bytes)
    }
}
