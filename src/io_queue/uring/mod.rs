mod pop;
mod push;

use std::{
    net::SocketAddr,
    os::fd::{AsRawFd, OwnedFd},
    task::Poll,
};

use nix::sys::socket::{
    bind, connect, getsockname, socket, AddressFamily, SockFlag, SockProtocol, SockType,
    SockaddrLike, SockaddrStorage,
};
use tracing::{debug, trace, warn};

use crate::{
    context::NetContext,
    io_uring::UringDriver,
    queue::{
        table::{QState, QTable},
        OpKind, QDesc, QResult, QToken, QValue,
    },
    sga::SgArray,
    sync::OneShot,
    Error, Result,
};

use self::{pop::PopCompletion, push::PushCompletion};

use super::IoQueueApi;

/// Default submission queue depth of a [UringQueue].
pub const DEFAULT_ENTRIES: u32 = 4096;

struct Socket {
    fd: OwnedFd,
    ty: SockType,
}

struct UringOp {
    handle: u64,
    result: OneShot<Result<QValue>>,
}

/// A queue backend over kernel sockets, driven by an `io_uring` instance owned by this queue.
/// Pushes become `sendmsg` and pops become `recvmsg` submissions, and every [IoQueueApi::poll]
/// submits pending entries and reaps whatever completions are ready without ever waiting in the
/// kernel.
///
/// Received data lands in a single buffer of the queue's [NetContext] pool. A datagram larger
/// than the pool's buffer size resolves its pop with [Error::ResourceExhausted].
pub struct UringQueue {
    driver: UringDriver,
    table: QTable<Socket, UringOp>,
}

impl UringQueue {
    pub fn new() -> Result<UringQueue> {
        UringQueue::with_entries(DEFAULT_ENTRIES)
    }

    pub fn with_entries(entries: u32) -> Result<UringQueue> {
        Ok(UringQueue {
            driver: UringDriver::new(entries)?,
            table: QTable::new(),
        })
    }

    /// Number of submissions the kernel has not finalized yet.
    pub fn in_flight(&self) -> usize {
        self.driver.in_flight()
    }
}

fn to_std(storage: &SockaddrStorage) -> Result<SocketAddr> {
    if let Some(v4) = storage.as_sockaddr_in() {
        return Ok(SocketAddr::V4((*v4).into()));
    }
    if let Some(v6) = storage.as_sockaddr_in6() {
        return Ok(SocketAddr::V6((*v6).into()));
    }
    Err(Error::InvalidArgument(format!(
        "unsupported local address family {:?}",
        storage.family()
    )))
}

impl IoQueueApi for UringQueue {
    fn socket(
        &mut self,
        domain: AddressFamily,
        ty: SockType,
        protocol: Option<SockProtocol>,
    ) -> Result<QDesc> {
        let fd = socket(domain, ty, SockFlag::SOCK_CLOEXEC, protocol)?;
        let qd = self.table.open(Socket { fd, ty });
        debug!(%qd, ?domain, ?ty, ?protocol, "kernel queue opened");
        Ok(qd)
    }

    fn set_io_ctx(&mut self, qd: QDesc, ctx: &NetContext) -> Result<()> {
        let queue = self.table.queue_mut(qd)?;
        if !ctx.is_bound() {
            return Err(Error::InvalidArgument(
                "network context is not bound to a device queue".into(),
            ));
        }
        queue.ctx = Some(ctx.clone());
        Ok(())
    }

    fn bind(&mut self, qd: QDesc, addr: SocketAddr) -> Result<()> {
        let queue = self.table.queue(qd)?;
        bind(queue.inner.fd.as_raw_fd(), &SockaddrStorage::from(addr))?;
        Ok(())
    }

    fn connect(&mut self, qd: QDesc, addr: SocketAddr) -> Result<()> {
        let queue = self.table.queue_mut(qd)?;
        connect(queue.inner.fd.as_raw_fd(), &SockaddrStorage::from(addr))?;
        queue.state = QState::Connected(addr);
        debug!(%qd, peer = %addr, "kernel queue connected");
        Ok(())
    }

    fn local_addr(&self, qd: QDesc) -> Result<SocketAddr> {
        let queue = self.table.queue(qd)?;
        let storage: SockaddrStorage = getsockname(queue.inner.fd.as_raw_fd())?;
        to_std(&storage)
    }

    fn push(&mut self, qd: QDesc, sga: SgArray) -> Result<QToken> {
        let fd = self.table.queue(qd)?.inner.fd.as_raw_fd();
        let len = sga.total_len();

        let result = OneShot::new();
        let handle = self
            .driver
            .register(PushCompletion::new(fd, sga, result.clone()));
        let qt = self
            .table
            .issue(qd, OpKind::Push, UringOp { handle, result })?;
        trace!(%qd, %qt, handle, len, "push submitted");
        Ok(qt)
    }

    fn pop(&mut self, qd: QDesc) -> Result<QToken> {
        let queue = self.table.queue(qd)?;
        let ctx = queue.ctx.as_ref().ok_or_else(|| {
            Error::InvalidArgument(format!("{qd} is not bound to a network context"))
        })?;
        let buf = ctx.pool().alloc()?;
        let fd = queue.inner.fd.as_raw_fd();
        let datagram = queue.inner.ty == SockType::Datagram;

        let result = OneShot::new();
        let handle = self
            .driver
            .register(PopCompletion::new(fd, datagram, buf, result.clone()));
        let qt = self
            .table
            .issue(qd, OpKind::Pop, UringOp { handle, result })?;
        trace!(%qd, %qt, handle, "pop submitted");
        Ok(qt)
    }

    fn poll(&mut self, qt: QToken) -> Poll<Result<QResult>> {
        let (qd, op) = match self.table.pending(qt) {
            Ok((qd, op, _)) => (qd, op),
            Err(e) => return Poll::Ready(Err(e)),
        };

        if let Err(e) = self.driver.reap() {
            return Poll::Ready(Err(e));
        }

        let taken = match self.table.pending(qt) {
            Ok((_, _, pending)) => pending.result.take(),
            Err(e) => return Poll::Ready(Err(e)),
        };

        match taken {
            None => Poll::Pending,
            Some(value) => {
                let value = self.table.resolve(qt).and(value);
                Poll::Ready(value.map(|value| QResult { qd, qt, op, value }))
            }
        }
    }

    fn drop_token(&mut self, qt: QToken) -> Result<()> {
        if let Some(op) = self.table.release(qt)? {
            // A completed result means the kernel is done with this operation.
            if op.result.is_complete() {
                trace!(%qt, handle = op.handle, "released completed operation");
            } else {
                trace!(%qt, handle = op.handle, "cancelling pending operation");
                self.driver.deregister(op.handle);
            }
        }
        Ok(())
    }

    fn close(&mut self, qd: QDesc) -> Result<()> {
        let pending = self.table.pending_on(qd);
        self.table.close(qd)?;
        if pending > 0 {
            warn!(%qd, pending, "closed queue with outstanding tokens");
        }
        debug!(%qd, "kernel queue closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        context::QueueBinding,
        sga::{MemPool, MemPoolOptions},
        wait::{wait, WaitConfig},
    };

    use super::*;

    fn context(buffer_size: usize) -> (MemPool, NetContext) {
        let pool = MemPool::new(&MemPoolOptions {
            buffer_size,
            ..MemPoolOptions::default()
        })
        .unwrap();
        let ctx = NetContext::new(
            pool.clone(),
            vec![QueueBinding {
                device_id: 0,
                queue_id: 0,
            }],
        );
        (pool, ctx)
    }

    fn open(io: &mut UringQueue, ctx: &NetContext) -> QDesc {
        let qd = io
            .socket(AddressFamily::Inet, SockType::Datagram, None)
            .unwrap();
        io.set_io_ctx(qd, ctx).unwrap();
        io.bind(qd, "127.0.0.1:0".parse().unwrap()).unwrap();
        qd
    }

    fn settle(io: &mut UringQueue, qt: QToken) -> Result<QResult> {
        let config = WaitConfig::default();
        loop {
            match wait(io, qt, &config) {
                Err(e) if e.is_timeout() => continue,
                other => break other,
            }
        }
    }

    fn send(io: &mut UringQueue, from: QDesc, to: SocketAddr, payload: &[u8]) -> QToken {
        let sga = SgArray::from_slice(payload).unwrap().with_addr(to);
        io.push(from, sga).unwrap()
    }

    #[test]
    #[ignore = "requires a kernel that permits io_uring"]
    fn udp_round_trip() {
        let (pool, ctx) = context(2048);
        let mut io = UringQueue::with_entries(64).unwrap();

        let a = open(&mut io, &ctx);
        let b = open(&mut io, &ctx);
        let b_addr = io.local_addr(b).unwrap();

        let pop = io.pop(b).unwrap();
        let push = send(&mut io, a, b_addr, b"hello");

        let sent = settle(&mut io, push).unwrap();
        assert!(matches!(sent.value, QValue::Raw(5)));

        let received = settle(&mut io, pop).unwrap();
        let sga = received.into_sga().unwrap();
        assert_eq!(sga.to_vec(), b"hello");
        assert_eq!(sga.addr(), Some(io.local_addr(a).unwrap()));
        sga.release();
        assert_eq!(pool.in_use(), 0);
    }

    #[test]
    #[ignore = "requires a kernel that permits io_uring"]
    fn dropping_a_reaped_token_leaves_later_operations_alone() {
        let (_pool, ctx) = context(2048);
        let mut io = UringQueue::with_entries(64).unwrap();

        let a = open(&mut io, &ctx);
        let b = open(&mut io, &ctx);
        let c = open(&mut io, &ctx);
        let a_addr = io.local_addr(a).unwrap();
        let c_addr = io.local_addr(c).unwrap();

        // The push completes while only the pop is being polled, so its result sits unclaimed.
        let pop = io.pop(a).unwrap();
        let push = send(&mut io, b, a_addr, b"first");
        settle(&mut io, pop).unwrap().into_sga().unwrap().release();
        assert_eq!(io.in_flight(), 0);

        // These reuse the driver slots the finished operations left behind.
        let later = [io.pop(c).unwrap(), io.pop(c).unwrap()];
        io.drop_token(push).unwrap();
        assert_eq!(io.in_flight(), 2);

        for payload in [&b"second"[..], b"third"] {
            let push = send(&mut io, b, c_addr, payload);
            settle(&mut io, push).unwrap();
        }
        let mut received = later
            .into_iter()
            .map(|qt| settle(&mut io, qt).unwrap().into_sga().unwrap().to_vec())
            .collect::<Vec<_>>();
        received.sort();
        assert_eq!(received, vec![b"second".to_vec(), b"third".to_vec()]);
    }

    #[test]
    #[ignore = "requires a kernel that permits io_uring"]
    fn oversized_datagram_is_reported() {
        let (pool, ctx) = context(8);
        let mut io = UringQueue::with_entries(64).unwrap();

        let a = open(&mut io, &ctx);
        let b = open(&mut io, &ctx);
        let b_addr = io.local_addr(b).unwrap();

        let pop = io.pop(b).unwrap();
        let push = send(&mut io, a, b_addr, &[7u8; 32]);
        settle(&mut io, push).unwrap();

        assert!(matches!(
            settle(&mut io, pop),
            Err(Error::ResourceExhausted(_))
        ));
        assert_eq!(pool.in_use(), 0);
    }
}
