//! Byte-credit flow control for the duplex channel
//!
//! The producer reserves credit for a frame before queuing it; the writer
//! returns the credit once the channel flushed the frame. At most `window`
//! bytes are ever queued but unsent. A frame larger than the window reserves
//! the whole window, so it waits until everything before it drained.

use std::sync::Arc;

use sealdrop_core::{SealError, SealResult};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Default credit window (1 MiB)
pub const DEFAULT_WATERMARK: usize = 1024 * 1024;

#[derive(Debug, Clone)]
pub struct FlowControl {
    credits: Arc<Semaphore>,
    window: u32,
}

impl FlowControl {
    /// A window of `watermark` bytes, clamped to what the semaphore can hold.
    pub fn new(watermark: usize) -> Self {
        let limit = Semaphore::MAX_PERMITS.min(u32::MAX as usize);
        let window = watermark.clamp(1, limit) as u32;
        Self {
            credits: Arc::new(Semaphore::new(window as usize)),
            window,
        }
    }

    pub fn window(&self) -> usize {
        self.window as usize
    }

    /// Credit currently free
    pub fn available(&self) -> usize {
        self.credits.available_permits()
    }

    /// Wait for credit covering a frame of `len` bytes.
    ///
    /// Empty frames still take one unit so the end marker is ordered behind
    /// everything already queued. Dropping the permit returns the credit.
    pub async fn reserve(&self, len: usize) -> SealResult<OwnedSemaphorePermit> {
        let want = u32::try_from(len).unwrap_or(u32::MAX).clamp(1, self.window);
        Arc::clone(&self.credits)
            .acquire_many_owned(want)
            .await
            .map_err(|_| SealError::Transport("flow control window closed".into()))
    }
}

impl Default for FlowControl {
    fn default() -> Self {
        Self::new(DEFAULT_WATERMARK)
    }
}
