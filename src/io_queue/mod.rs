//! The queue I/O interface. [IoQueueApi] is the capability set every backend provides, opening and
//! binding queues, issuing pushes and pops, and resolving the resulting tokens through a
//! non-blocking [IoQueueApi::poll]. The blocking-style [crate::wait] primitives and
//! [crate::ServiceUnit] are written purely against this trait, so backends are swapped by
//! choosing a different implementation:
//!
//! - [UringQueue] drives kernel sockets through an `io_uring` instance owned by the queue.
//! - [LoopbackQueue] exchanges messages in process over a [LoopbackFabric] shared between
//!   service units.

mod loopback;
mod uring;

use std::{net::SocketAddr, task::Poll};

pub use nix::sys::socket::{AddressFamily, SockProtocol, SockType};

pub use loopback::{LoopbackFabric, LoopbackQueue};
pub use uring::UringQueue;

use crate::{
    context::NetContext,
    queue::{QDesc, QResult, QToken},
    sga::SgArray,
    Result,
};

/// The non-blocking primitives a queue backend exposes.
///
/// All calls return immediately. Issuing an operation yields a [QToken] that must be polled until
/// it resolves and must be released with [IoQueueApi::drop_token] afterwards, or beforehand to
/// abandon the operation.
pub trait IoQueueApi {
    /// Open a new socket-like queue.
    fn socket(
        &mut self,
        domain: AddressFamily,
        ty: SockType,
        protocol: Option<SockProtocol>,
    ) -> Result<QDesc>;

    /// Bind a queue to a network context, this gives the queue access to the context's buffer
    /// pool for received data.
    fn set_io_ctx(&mut self, qd: QDesc, ctx: &NetContext) -> Result<()>;

    /// Assign a local address to a queue.
    fn bind(&mut self, qd: QDesc, addr: SocketAddr) -> Result<()>;

    /// Set the default peer of a queue, and for connection oriented queues establish the
    /// connection.
    fn connect(&mut self, qd: QDesc, addr: SocketAddr) -> Result<()>;

    /// The local address of a queue.
    fn local_addr(&self, qd: QDesc) -> Result<SocketAddr>;

    /// Start sending `sga`. The array is owned by the backend until the push resolves.
    fn push(&mut self, qd: QDesc, sga: SgArray) -> Result<QToken>;

    /// Start receiving one message.
    fn pop(&mut self, qd: QDesc) -> Result<QToken>;

    /// Inspect a token without blocking. [Poll::Pending] means not ready yet, anything else is
    /// definitive. Each token resolves exactly once, polling a released, unknown or already
    /// resolved token yields [crate::Error::InvalidHandle].
    fn poll(&mut self, qt: QToken) -> Poll<Result<QResult>>;

    /// Release a token. Releasing a still pending token abandons its operation.
    fn drop_token(&mut self, qt: QToken) -> Result<()>;

    /// Close a queue. Callers must drain outstanding tokens first, tokens left pending on a
    /// closed queue resolve with [crate::Error::InvalidHandle] or an error from the kernel.
    fn close(&mut self, qd: QDesc) -> Result<()>;
}

impl<T> IoQueueApi for Box<T>
where
    T: IoQueueApi + ?Sized,
{
    fn socket(
        &mut self,
        domain: AddressFamily,
        ty: SockType,
        protocol: Option<SockProtocol>,
    ) -> Result<QDesc> {
        (**self).socket(domain, ty, protocol)
    }

    fn set_io_ctx(&mut self, qd: QDesc, ctx: &NetContext) -> Result<()> {
        (**self).set_io_ctx(qd, ctx)
    }

    fn bind(&mut self, qd: QDesc, addr: SocketAddr) -> Result<()> {
        (**self).bind(qd, addr)
    }

    fn connect(&mut self, qd: QDesc, addr: SocketAddr) -> Result<()> {
        (**self).connect(qd, addr)
    }

    fn local_addr(&self, qd: QDesc) -> Result<SocketAddr> {
        (**self).local_addr(qd)
    }

    fn push(&mut self, qd: QDesc, sga: SgArray) -> Result<QToken> {
        (**self).push(qd, sga)
    }

    fn pop(&mut self, qd: QDesc) -> Result<QToken> {
        (**self).pop(qd)
    }

    fn poll(&mut self, qt: QToken) -> Poll<Result<QResult>> {
        (**self).poll(qt)
    }

    fn drop_token(&mut self, qt: QToken) -> Result<()> {
        (**self).drop_token(qt)
    }

    fn close(&mut self, qd: QDesc) -> Result<()> {
        (**self).close(qd)
    }
}
