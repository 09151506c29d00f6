use std::fmt;

use super::PoolBuf;

enum SegmentBuf {
    Heap(Vec<u8>),
    Pool(PoolBuf),
}

/// A single (length, buffer) pair of a [super::SgArray]. A segment always owns its storage,
/// either plain heap memory supplied by the application or a buffer out of the shared
/// [super::MemPool].
pub struct Segment {
    buf: SegmentBuf,
}

impl Segment {
    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_bytes(&self) -> &[u8] {
        match &self.buf {
            SegmentBuf::Heap(v) => v,
            SegmentBuf::Pool(p) => p,
        }
    }

    pub fn as_mut_bytes(&mut self) -> &mut [u8] {
        match &mut self.buf {
            SegmentBuf::Heap(v) => v,
            SegmentBuf::Pool(p) => p,
        }
    }

    /// Whether the storage of this segment is owned by the shared mempool.
    pub fn is_pooled(&self) -> bool {
        matches!(self.buf, SegmentBuf::Pool(_))
    }
}

impl From<Vec<u8>> for Segment {
    fn from(value: Vec<u8>) -> Self {
        Segment {
            buf: SegmentBuf::Heap(value),
        }
    }
}

impl From<&[u8]> for Segment {
    fn from(value: &[u8]) -> Self {
        Segment::from(value.to_vec())
    }
}

impl From<&str> for Segment {
    fn from(value: &str) -> Self {
        Segment::from(value.as_bytes())
    }
}

impl From<PoolBuf> for Segment {
    fn from(value: PoolBuf) -> Self {
        Segment {
            buf: SegmentBuf::Pool(value),
        }
    }
}

impl fmt::Debug for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Segment")
            .field("len", &self.len())
            .field("pooled", &self.is_pooled())
            .finish()
    }
}
