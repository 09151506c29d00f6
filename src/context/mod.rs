//! The context module holds the resources shared between service units. A [NetContext] bundles
//! the process wide [MemPool] with the device queue(s) a service unit was provisioned with, and is
//! handed to a backend when a queue is bound via [crate::IoQueueApi::set_io_ctx].
//!
//! The module also owns the process wide network environment. That environment must be brought up
//! exactly once before any device or mempool operation, see [init_once] and [teardown].

mod statics;

use std::{fmt, sync::Arc};

pub use statics::{init_once, is_initialized, teardown};

use crate::sga::MemPool;

/// One receive/transmit queue pair on a physical device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueueBinding {
    pub device_id: u16,
    pub queue_id: u16,
}

struct NetContextInner {
    pool: MemPool,
    bindings: Vec<QueueBinding>,
}

/// A shared handle to a network context. Cloning yields another handle to the same context, every
/// service unit referencing the context shares its pool and bindings. Contexts are immutable once
/// the control plane has built them.
#[derive(Clone)]
pub struct NetContext {
    inner: Arc<NetContextInner>,
}

impl NetContext {
    pub fn new(pool: MemPool, bindings: Vec<QueueBinding>) -> NetContext {
        NetContext {
            inner: Arc::new(NetContextInner { pool, bindings }),
        }
    }

    pub fn pool(&self) -> &MemPool {
        &self.inner.pool
    }

    /// All device queues provisioned for this context, in declaration order.
    pub fn bindings(&self) -> &[QueueBinding] {
        &self.inner.bindings
    }

    /// The primary device queue, the first network queue the owning service unit declared.
    pub fn binding(&self) -> Option<&QueueBinding> {
        self.inner.bindings.first()
    }

    /// Whether the context is backed by at least one device queue. Queues can only be bound to
    /// contexts that are.
    pub fn is_bound(&self) -> bool {
        !self.inner.bindings.is_empty()
    }

    pub fn ptr_eq(&self, other: &NetContext) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for NetContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetContext")
            .field("pool", &self.inner.pool)
            .field("bindings", &self.inner.bindings)
            .finish()
    }
}
