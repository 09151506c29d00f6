//! Queue descriptors, tokens and results. A [QDesc] names one socket-like queue, a [QToken] names
//! one outstanding push or pop against a queue, and a [QResult] is what a token resolves into.
//!
//! Both handle types are opaque integers indexing into a table owned by the backend that issued
//! them, rather than pointers, so a closed descriptor or released token is detected with a simple
//! liveness check and reported as [crate::Error::InvalidHandle].

pub(crate) mod table;

use std::fmt;

use crate::sga::SgArray;

/// Opaque handle to one open I/O queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QDesc(pub(crate) u64);

/// Opaque handle to one outstanding asynchronous operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QToken(pub(crate) u64);

impl From<QDesc> for u64 {
    fn from(value: QDesc) -> Self {
        value.0
    }
}

impl From<QToken> for u64 {
    fn from(value: QToken) -> Self {
        value.0
    }
}

impl fmt::Display for QDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "qd:{:#x}", self.0)
    }
}

impl fmt::Display for QToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "qt:{:#x}", self.0)
    }
}

/// The kind of operation a token was issued for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    Push,
    Pop,
}

/// The payload of a resolved operation.
#[derive(Debug)]
pub enum QValue {
    None,
    Sga(SgArray),
    Raw(u64),
}

/// The outcome of a resolved token. Produced exactly once per token.
#[derive(Debug)]
pub struct QResult {
    pub qd: QDesc,
    pub qt: QToken,
    pub op: OpKind,
    pub value: QValue,
}

impl QResult {
    /// Take the received scatter-gather array out of a pop result. The caller owns the array from
    /// here on, see [SgArray::release].
    pub fn into_sga(self) -> Option<SgArray> {
        match self.value {
            QValue::Sga(sga) => Some(sga),
            _ => None,
        }
    }

    pub fn sga(&self) -> Option<&SgArray> {
        match &self.value {
            QValue::Sga(sga) => Some(sga),
            _ => None,
        }
    }
}
