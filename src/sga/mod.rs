//! The scatter-gather buffer model. A [SgArray] describes one logical message as an ordered list
//! of [Segment]s, and optionally the peer address the message is addressed to or was received
//! from on connectionless transports.
//!
//! Ownership is explicit, pushing an array hands its buffers to the backend until the operation
//! completes, and a resolved pop hands a freshly carved array, backed by the shared [MemPool], to
//! the caller. Dropping or [SgArray::release]ing the array returns those buffers to the pool.

mod pool;
mod segment;

use std::net::SocketAddr;

pub use pool::{MemPool, MemPoolOptions, PoolBuf};
pub use segment::Segment;

use crate::{Error, Result};

/// Upper bound on the segment count of a single array, matching the kernel's `UIO_MAXIOV`.
pub const MAX_SEGMENTS: usize = 1024;

/// An ordered, non-empty list of non-empty [Segment]s plus an optional peer address.
#[derive(Debug)]
pub struct SgArray {
    segments: Vec<Segment>,
    addr: Option<SocketAddr>,
}

impl SgArray {
    /// Build a new array out of the supplied segments. At least one segment is required and no
    /// segment may be empty.
    pub fn new(segments: Vec<Segment>) -> Result<SgArray> {
        if segments.is_empty() {
            return Err(Error::InvalidArgument(
                "scatter-gather array requires at least one segment".into(),
            ));
        }

        if segments.len() > MAX_SEGMENTS {
            return Err(Error::InvalidArgument(format!(
                "scatter-gather array has {} segments, at most {MAX_SEGMENTS} are supported",
                segments.len()
            )));
        }

        if let Some(idx) = segments.iter().position(Segment::is_empty) {
            return Err(Error::InvalidArgument(format!(
                "scatter-gather segment {idx} has zero length"
            )));
        }

        Ok(SgArray {
            segments,
            addr: None,
        })
    }

    /// Build a single segment array owning a copy of `bytes`.
    pub fn from_slice(bytes: &[u8]) -> Result<SgArray> {
        SgArray::new(vec![Segment::from(bytes)])
    }

    /// Copy `bytes` into buffers checked out of `pool`, splitting them into as many segments as
    /// needed to fit the pool's buffer size.
    pub fn from_pool(pool: &MemPool, bytes: &[u8]) -> Result<SgArray> {
        let mut segments = Vec::with_capacity(bytes.len().div_ceil(pool.buffer_size()).max(1));
        for chunk in bytes.chunks(pool.buffer_size()) {
            let mut buf = pool.alloc()?;
            buf.fill(chunk)?;
            segments.push(Segment::from(buf));
        }
        SgArray::new(segments)
    }

    /// Annotate this array with a peer address, used as the destination for pushes on
    /// connectionless queues.
    pub fn with_addr(mut self, addr: SocketAddr) -> SgArray {
        self.addr = Some(addr);
        self
    }

    pub(crate) fn set_addr(&mut self, addr: Option<SocketAddr>) {
        self.addr = addr;
    }

    pub fn addr(&self) -> Option<SocketAddr> {
        self.addr
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn segments_mut(&mut self) -> &mut [Segment] {
        &mut self.segments
    }

    /// Number of segments, always at least one.
    pub fn num_segments(&self) -> usize {
        self.segments.len()
    }

    /// The logical length of the message, the sum of all segment lengths.
    pub fn total_len(&self) -> usize {
        self.segments.iter().map(Segment::len).sum()
    }

    /// Flatten the message into a single contiguous copy.
    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.total_len());
        for seg in &self.segments {
            out.extend_from_slice(seg.as_bytes());
        }
        out
    }

    pub fn into_segments(self) -> Vec<Segment> {
        self.segments
    }

    /// Release the array and hand any pooled buffers back to their pool.
    pub fn release(self) {
        drop(self);
    }
}
