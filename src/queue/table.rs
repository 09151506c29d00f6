use std::net::SocketAddr;

use slab::Slab;

use crate::{context::NetContext, Error, Result};

use super::{OpKind, QDesc, QToken};

struct Slot<T> {
    generation: u32,
    value: T,
}

/// A [Slab] whose keys carry a generation tag in their upper 32 bits. A removed slot may be
/// reused by the slab, but handles to its previous occupant no longer match and are reported as
/// missing.
pub(crate) struct Arena<T> {
    slots: Slab<Slot<T>>,
    generation: u32,
}

impl<T> Arena<T> {
    pub(crate) fn with_capacity(capacity: usize) -> Arena<T> {
        Arena {
            slots: Slab::with_capacity(capacity),
            generation: 0,
        }
    }

    fn split(handle: u64) -> (usize, u32) {
        ((handle & u32::MAX as u64) as usize, (handle >> 32) as u32)
    }

    pub(crate) fn insert(&mut self, value: T) -> u64 {
        self.generation = self.generation.wrapping_add(1).max(1);
        let generation = self.generation;
        let index = self.slots.insert(Slot { generation, value });
        ((generation as u64) << 32) | index as u64
    }

    pub(crate) fn get(&self, handle: u64) -> Option<&T> {
        let (index, generation) = Self::split(handle);
        self.slots
            .get(index)
            .filter(|slot| slot.generation == generation)
            .map(|slot| &slot.value)
    }

    pub(crate) fn get_mut(&mut self, handle: u64) -> Option<&mut T> {
        let (index, generation) = Self::split(handle);
        self.slots
            .get_mut(index)
            .filter(|slot| slot.generation == generation)
            .map(|slot| &mut slot.value)
    }

    pub(crate) fn remove(&mut self, handle: u64) -> Option<T> {
        self.get(handle)?;
        let (index, _) = Self::split(handle);
        Some(self.slots.remove(index).value)
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn values(&self) -> impl Iterator<Item = &T> {
        self.slots.iter().map(|(_, slot)| &slot.value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum QState {
    Open,
    Connected(SocketAddr),
}

/// Per descriptor bookkeeping, `inner` is the backend specific socket state.
pub(crate) struct Queue<Q> {
    pub(crate) state: QState,
    pub(crate) ctx: Option<NetContext>,
    pub(crate) inner: Q,
}

impl<Q> Queue<Q> {
    pub(crate) fn peer(&self) -> Option<SocketAddr> {
        match self.state {
            QState::Connected(addr) => Some(addr),
            QState::Open => None,
        }
    }
}

pub(crate) enum TokenState<P> {
    Pending(P),
    Resolved,
}

pub(crate) struct TokenEntry<P> {
    pub(crate) qd: QDesc,
    pub(crate) op: OpKind,
    pub(crate) state: TokenState<P>,
}

/// The runtime owned table of open descriptors and outstanding tokens shared by the backends.
/// `P` is the backend specific pending operation state.
pub(crate) struct QTable<Q, P> {
    queues: Arena<Queue<Q>>,
    tokens: Arena<TokenEntry<P>>,
}

impl<Q, P> QTable<Q, P> {
    pub(crate) fn new() -> QTable<Q, P> {
        QTable {
            queues: Arena::with_capacity(64),
            tokens: Arena::with_capacity(1024),
        }
    }

    pub(crate) fn open(&mut self, inner: Q) -> QDesc {
        QDesc(self.queues.insert(Queue {
            state: QState::Open,
            ctx: None,
            inner,
        }))
    }

    pub(crate) fn queue(&self, qd: QDesc) -> Result<&Queue<Q>> {
        self.queues.get(qd.0).ok_or(Error::InvalidHandle)
    }

    pub(crate) fn queue_mut(&mut self, qd: QDesc) -> Result<&mut Queue<Q>> {
        self.queues.get_mut(qd.0).ok_or(Error::InvalidHandle)
    }

    pub(crate) fn close(&mut self, qd: QDesc) -> Result<Queue<Q>> {
        self.queues.remove(qd.0).ok_or(Error::InvalidHandle)
    }

    /// Number of still pending tokens issued against `qd`.
    pub(crate) fn pending_on(&self, qd: QDesc) -> usize {
        self.tokens
            .values()
            .filter(|t| t.qd == qd && matches!(t.state, TokenState::Pending(_)))
            .count()
    }

    pub(crate) fn issue(&mut self, qd: QDesc, op: OpKind, pending: P) -> Result<QToken> {
        self.queue(qd)?;
        Ok(QToken(self.tokens.insert(TokenEntry {
            qd,
            op,
            state: TokenState::Pending(pending),
        })))
    }

    /// Look up a token that has not resolved yet. Released, unknown and already resolved tokens
    /// are all reported as [Error::InvalidHandle].
    pub(crate) fn pending(&self, qt: QToken) -> Result<(QDesc, OpKind, &P)> {
        match self.tokens.get(qt.0) {
            Some(TokenEntry {
                qd,
                op,
                state: TokenState::Pending(p),
            }) => Ok((*qd, *op, p)),
            _ => Err(Error::InvalidHandle),
        }
    }

    /// Transition a token from pending to resolved, handing back its pending state.
    pub(crate) fn resolve(&mut self, qt: QToken) -> Result<P> {
        let entry = self.tokens.get_mut(qt.0).ok_or(Error::InvalidHandle)?;
        match std::mem::replace(&mut entry.state, TokenState::Resolved) {
            TokenState::Pending(p) => Ok(p),
            TokenState::Resolved => Err(Error::InvalidHandle),
        }
    }

    /// Release a token, pending or resolved. Returns the pending state if the operation never
    /// resolved so the backend can cancel it.
    pub(crate) fn release(&mut self, qt: QToken) -> Result<Option<P>> {
        let entry = self.tokens.remove(qt.0).ok_or(Error::InvalidHandle)?;
        Ok(match entry.state {
            TokenState::Pending(p) => Some(p),
            TokenState::Resolved => None,
        })
    }

    pub(crate) fn num_queues(&self) -> usize {
        self.queues.len()
    }

    pub(crate) fn num_tokens(&self) -> usize {
        self.tokens.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_handles_miss_after_reuse() {
        let mut arena = Arena::with_capacity(1);
        let a = arena.insert("a");
        assert_eq!(arena.remove(a), Some("a"));

        let b = arena.insert("b");
        // Same slab slot, different generation.
        assert_eq!(a & u32::MAX as u64, b & u32::MAX as u64);
        assert_ne!(a, b);
        assert!(arena.get(a).is_none());
        assert!(arena.remove(a).is_none());
        assert_eq!(arena.get(b), Some(&"b"));
    }

    #[test]
    fn token_lifecycle() {
        let mut table: QTable<(), u8> = QTable::new();
        let qd = table.open(());
        let qt = table.issue(qd, OpKind::Pop, 7).unwrap();

        assert_eq!(table.pending_on(qd), 1);
        assert_eq!(table.pending(qt).unwrap().2, &7);
        assert_eq!(table.resolve(qt).unwrap(), 7);

        // Exactly one resolution per token.
        assert!(matches!(table.resolve(qt), Err(Error::InvalidHandle)));
        assert!(matches!(table.pending(qt), Err(Error::InvalidHandle)));
        assert_eq!(table.pending_on(qd), 0);

        assert_eq!(table.release(qt).unwrap(), None);
        assert!(matches!(table.release(qt), Err(Error::InvalidHandle)));
        assert_eq!(table.num_tokens(), 0);
    }

    #[test]
    fn closed_descriptor_rejects_operations() {
        let mut table: QTable<(), ()> = QTable::new();
        let qd = table.open(());
        table.close(qd).unwrap();
        assert!(matches!(table.queue(qd), Err(Error::InvalidHandle)));
        assert!(matches!(
            table.issue(qd, OpKind::Push, ()),
            Err(Error::InvalidHandle)
        ));
        assert!(matches!(table.close(qd), Err(Error::InvalidHandle)));
        assert_eq!(table.num_queues(), 0);
    }
}
