use std::{
    fmt,
    ops::{Deref, DerefMut},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use serde::Deserialize;
use tracing::trace;

use crate::{Error, Result};

/// Sizing for a [MemPool].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct MemPoolOptions {
    /// Maximum number of buffers that may be checked out at once.
    pub buffers: usize,
    /// Size in bytes of every buffer in the pool.
    pub buffer_size: usize,
}

impl Default for MemPoolOptions {
    fn default() -> Self {
        MemPoolOptions {
            buffers: 8192,
            buffer_size: 2048,
        }
    }
}

struct PoolInner {
    buffer_size: usize,
    capacity: usize,
    in_use: AtomicUsize,
    free: Mutex<Vec<Vec<u8>>>,
}

impl PoolInner {
    fn give_back(&self, mut data: Vec<u8>) {
        data.clear();
        data.resize(self.buffer_size, 0);
        self.free
            .lock()
            .expect("failed to lock mempool free list: poisoned")
            .push(data);
        self.in_use.fetch_sub(1, Ordering::AcqRel);
    }
}

/// The process wide buffer pool shared by every [crate::NetContext]. Received scatter-gather
/// arrays are carved out of this pool, and their buffers find their way back here when the
/// caller releases them.
///
/// Cloning a [MemPool] is cheap and yields a handle to the same pool.
#[derive(Clone)]
pub struct MemPool {
    inner: Arc<PoolInner>,
}

impl MemPool {
    /// Create a new pool, buffers are allocated lazily and then recycled.
    pub fn new(options: &MemPoolOptions) -> Result<MemPool> {
        if options.buffers == 0 || options.buffer_size == 0 {
            return Err(Error::InvalidArgument(format!(
                "mempool requires a non-zero buffer count and size, got {options:?}"
            )));
        }

        Ok(MemPool {
            inner: Arc::new(PoolInner {
                buffer_size: options.buffer_size,
                capacity: options.buffers,
                in_use: AtomicUsize::new(0),
                free: Mutex::new(Vec::new()),
            }),
        })
    }

    /// Check out a zero filled buffer of [MemPool::buffer_size] bytes.
    pub fn alloc(&self) -> Result<PoolBuf> {
        let capacity = self.inner.capacity;
        self.inner
            .in_use
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < capacity).then_some(n + 1)
            })
            .map_err(|_| {
                Error::ResourceExhausted(format!(
                    "mempool exhausted, all {capacity} buffers in use"
                ))
            })?;

        let recycled = self
            .inner
            .free
            .lock()
            .expect("failed to lock mempool free list: poisoned")
            .pop();
        let data = recycled.unwrap_or_else(|| vec![0u8; self.inner.buffer_size]);
        trace!(in_use = self.in_use(), "mempool buffer allocated");

        Ok(PoolBuf {
            data,
            pool: self.inner.clone(),
        })
    }

    pub fn buffer_size(&self) -> usize {
        self.inner.buffer_size
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Number of buffers currently owned by callers or in flight in a backend.
    pub fn in_use(&self) -> usize {
        self.inner.in_use.load(Ordering::Acquire)
    }

    pub fn available(&self) -> usize {
        self.capacity() - self.in_use()
    }

    pub fn ptr_eq(&self, other: &MemPool) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for MemPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemPool")
            .field("buffer_size", &self.buffer_size())
            .field("capacity", &self.capacity())
            .field("in_use", &self.in_use())
            .finish()
    }
}

/// A buffer checked out of a [MemPool]. The buffer returns to its pool on drop.
pub struct PoolBuf {
    data: Vec<u8>,
    pool: Arc<PoolInner>,
}

impl PoolBuf {
    /// Shorten the visible part of the buffer to `len` bytes, this is used once a receive tells
    /// us how much of the buffer was actually filled in.
    pub fn truncate(&mut self, len: usize) {
        self.data.truncate(len);
    }

    /// Copy `bytes` into the front of the buffer and shrink it to fit. Fails if the bytes do not
    /// fit in a single pool buffer.
    pub fn fill(&mut self, bytes: &[u8]) -> Result<()> {
        if bytes.len() > self.data.len() {
            return Err(Error::InvalidArgument(format!(
                "{} bytes do not fit a {} byte pool buffer",
                bytes.len(),
                self.data.len()
            )));
        }
        self.data[..bytes.len()].copy_from_slice(bytes);
        self.data.truncate(bytes.len());
        Ok(())
    }
}

impl Deref for PoolBuf {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.data
    }
}

impl DerefMut for PoolBuf {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

impl Drop for PoolBuf {
    fn drop(&mut self) {
        self.pool.give_back(std::mem::take(&mut self.data));
    }
}

impl fmt::Debug for PoolBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolBuf").field("len", &self.data.len()).finish()
    }
}
