//! Pixel-buffer pool
//!
//! Fixed-format buffer reuse for the per-tick composition path. Buffers are
//! keyed by (width, height, format) and handed out as refcount-friendly
//! handles; storage returns to the pool only when the handle drops, so a
//! buffer still referenced by a consumer is never recycled. An external
//! memory-pressure signal may clear the free lists between ticks.

use crate::capture::types::PixelFormat;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Weak};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct PoolKey {
    width: u32,
    height: u32,
    format: PixelFormat,
}

#[derive(Default)]
struct Bucket {
    free: Vec<Vec<u8>>,
    /// Buffers currently handed out for this key
    live: usize,
}

#[derive(Default)]
struct PoolState {
    buckets: HashMap<PoolKey, Bucket>,
}

/// Shared pool of fixed-size pixel buffers
pub struct BufferPool {
    state: Arc<Mutex<PoolState>>,
    /// Max buffers in flight per key before acquire starts failing
    limit: usize,
}

impl BufferPool {
    pub fn new(limit: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(PoolState::default())),
            limit: limit.max(1),
        }
    }

    /// Acquire a zero-filled buffer for the given dimensions.
    ///
    /// Returns `None` when the per-key in-flight limit is reached; the caller
    /// is expected to drop that tick's output rather than block.
    pub fn acquire(&self, width: u32, height: u32, format: PixelFormat) -> Option<PooledPixels> {
        let key = PoolKey {
            width,
            height,
            format,
        };
        let len = width as usize * height as usize * format.bytes_per_pixel();

        let mut state = self.state.lock();
        let bucket = state.buckets.entry(key).or_default();

        let data = if let Some(mut data) = bucket.free.pop() {
            data.clear();
            data.resize(len, 0);
            data
        } else if bucket.live < self.limit {
            vec![0u8; len]
        } else {
            return None;
        };
        bucket.live += 1;

        Some(PooledPixels {
            data: Some(data),
            key: Some(key),
            pool: Arc::downgrade(&self.state),
        })
    }

    /// Drop all idle buffers. Safe to call between ticks: buffers still
    /// referenced stay alive and rejoin the pool when released.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        for bucket in state.buckets.values_mut() {
            bucket.free.clear();
        }
        tracing::debug!("buffer pool cleared on pressure signal");
    }

    /// Idle buffers currently held for the given dimensions
    pub fn free_count(&self, width: u32, height: u32, format: PixelFormat) -> usize {
        let key = PoolKey {
            width,
            height,
            format,
        };
        self.state
            .lock()
            .buckets
            .get(&key)
            .map(|b| b.free.len())
            .unwrap_or(0)
    }

    /// Buffers currently handed out for the given dimensions
    pub fn live_count(&self, width: u32, height: u32, format: PixelFormat) -> usize {
        let key = PoolKey {
            width,
            height,
            format,
        };
        self.state
            .lock()
            .buckets
            .get(&key)
            .map(|b| b.live)
            .unwrap_or(0)
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        // Enough headroom for a 60 Hz tick with a handful of slow consumers
        Self::new(32)
    }
}

/// A pixel buffer on loan from a [`BufferPool`] (or detached, for storage
/// that never came from a pool). Returns to the pool on drop.
pub struct PooledPixels {
    data: Option<Vec<u8>>,
    key: Option<PoolKey>,
    pool: Weak<Mutex<PoolState>>,
}

impl PooledPixels {
    /// Wrap storage that is not pool-managed (e.g. decoded file frames).
    pub fn detached(data: Vec<u8>) -> Self {
        Self {
            data: Some(data),
            key: None,
            pool: Weak::new(),
        }
    }
}

impl Deref for PooledPixels {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.data.as_deref().unwrap_or(&[])
    }
}

impl DerefMut for PooledPixels {
    fn deref_mut(&mut self) -> &mut [u8] {
        self.data.as_deref_mut().unwrap_or(&mut [])
    }
}

impl Drop for PooledPixels {
    fn drop(&mut self) {
        let (Some(data), Some(key)) = (self.data.take(), self.key) else {
            return;
        };
        if let Some(state) = self.pool.upgrade() {
            let mut state = state.lock();
            if let Some(bucket) = state.buckets.get_mut(&key) {
                bucket.live = bucket.live.saturating_sub(1);
                bucket.free.push(data);
            }
        }
    }
}
