use std::{
    collections::{HashMap, VecDeque},
    io,
    net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr},
    sync::{Arc, Mutex, MutexGuard},
    task::Poll,
};

use nix::sys::socket::{AddressFamily, SockProtocol, SockType};
use tracing::{debug, trace, warn};

use crate::{
    context::NetContext,
    queue::{
        table::{QState, QTable},
        OpKind, QDesc, QResult, QToken, QValue,
    },
    sga::SgArray,
    Error, Result,
};

use super::IoQueueApi;

const EPHEMERAL_START: u16 = 49152;
const EPHEMERAL_COUNT: u32 = (u16::MAX - EPHEMERAL_START) as u32 + 1;

struct Datagram {
    from: SocketAddr,
    payload: Vec<u8>,
}

#[derive(Default)]
struct FabricInner {
    ports: HashMap<SocketAddr, VecDeque<Datagram>>,
    next_ephemeral: u32,
}

impl FabricInner {
    fn key_for(&self, addr: SocketAddr) -> Option<SocketAddr> {
        if self.ports.contains_key(&addr) {
            return Some(addr);
        }
        let any = SocketAddr::new(unspecified(addr.ip()), addr.port());
        self.ports.contains_key(&any).then_some(any)
    }

    fn ephemeral(&mut self, ip: IpAddr) -> Result<SocketAddr> {
        for _ in 0..EPHEMERAL_COUNT {
            let port = EPHEMERAL_START + (self.next_ephemeral % EPHEMERAL_COUNT) as u16;
            self.next_ephemeral = self.next_ephemeral.wrapping_add(1);
            let addr = SocketAddr::new(ip, port);
            if !self.ports.contains_key(&addr) {
                return Ok(addr);
            }
        }
        Err(Error::ResourceExhausted(format!(
            "no free ephemeral port left on {ip}"
        )))
    }
}

fn unspecified(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
    }
}

fn loopback(family: AddressFamily) -> IpAddr {
    match family {
        AddressFamily::Inet6 => IpAddr::V6(Ipv6Addr::LOCALHOST),
        _ => IpAddr::V4(Ipv4Addr::LOCALHOST),
    }
}

/// An in process datagram network. Every [LoopbackQueue] created over clones of the same fabric
/// can reach every other queue bound on it, which lets separate service units talk to each other
/// without a kernel or device in between.
///
/// Messages are delivered whole and in order per sender/receiver pair. Sending to an address
/// nobody is bound to silently drops the message on datagram queues, and fails the push with
/// [Error::ConnectionReset] on stream queues.
#[derive(Clone, Default)]
pub struct LoopbackFabric {
    inner: Arc<Mutex<FabricInner>>,
}

impl LoopbackFabric {
    pub fn new() -> LoopbackFabric {
        LoopbackFabric::default()
    }

    fn lock(&self) -> MutexGuard<'_, FabricInner> {
        self.inner
            .lock()
            .expect("failed to lock loopback fabric: poisoned")
    }

    fn bind(&self, addr: SocketAddr) -> Result<SocketAddr> {
        let mut inner = self.lock();
        let addr = if addr.port() == 0 {
            inner.ephemeral(addr.ip())?
        } else {
            addr
        };

        if inner.ports.contains_key(&addr) {
            return Err(Error::IO(io::ErrorKind::AddrInUse.into()));
        }
        inner.ports.insert(addr, VecDeque::new());
        Ok(addr)
    }

    fn unbind(&self, addr: SocketAddr) {
        self.lock().ports.remove(&addr);
    }

    /// Whether some queue is bound to `addr`.
    pub fn is_bound(&self, addr: SocketAddr) -> bool {
        self.lock().key_for(addr).is_some()
    }

    /// Number of messages waiting to be popped at `addr`.
    pub fn queued(&self, addr: SocketAddr) -> usize {
        let inner = self.lock();
        inner
            .key_for(addr)
            .and_then(|key| inner.ports.get(&key))
            .map_or(0, VecDeque::len)
    }

    fn deliver(&self, dest: SocketAddr, dgram: Datagram) -> bool {
        let mut inner = self.lock();
        match inner.key_for(dest) {
            Some(key) => {
                if let Some(queue) = inner.ports.get_mut(&key) {
                    queue.push_back(dgram);
                }
                true
            }
            None => false,
        }
    }

    fn take(&self, local: SocketAddr, peer: Option<SocketAddr>) -> Option<Datagram> {
        let mut inner = self.lock();
        let queue = inner.ports.get_mut(&local)?;
        while let Some(dgram) = queue.pop_front() {
            match peer {
                Some(peer) if peer != dgram.from => {
                    trace!(%local, from = %dgram.from, "dropping message from unconnected peer");
                }
                _ => return Some(dgram),
            }
        }
        None
    }

    /// Put a taken message back at the head of `local`'s queue.
    fn requeue(&self, local: SocketAddr, dgram: Datagram) {
        if let Some(queue) = self.lock().ports.get_mut(&local) {
            queue.push_front(dgram);
        }
    }
}

struct Endpoint {
    family: AddressFamily,
    ty: SockType,
    local: Option<SocketAddr>,
}

enum LoopbackOp {
    Push(Option<Error>),
    Pop,
}

/// A queue backend over a [LoopbackFabric]. Pushes are delivered immediately and their tokens
/// resolve on the first poll, pops resolve once a message is waiting, with the payload copied
/// into buffers from the queue's [NetContext] pool.
pub struct LoopbackQueue {
    fabric: LoopbackFabric,
    table: QTable<Endpoint, LoopbackOp>,
}

impl LoopbackQueue {
    pub fn new(fabric: LoopbackFabric) -> LoopbackQueue {
        LoopbackQueue {
            fabric,
            table: QTable::new(),
        }
    }

    pub fn fabric(&self) -> &LoopbackFabric {
        &self.fabric
    }

    /// Number of open queues.
    pub fn num_queues(&self) -> usize {
        self.table.num_queues()
    }

    /// Number of tokens not yet released, pending or resolved.
    pub fn num_tokens(&self) -> usize {
        self.table.num_tokens()
    }

    fn ensure_bound(fabric: &LoopbackFabric, endpoint: &mut Endpoint) -> Result<SocketAddr> {
        if let Some(local) = endpoint.local {
            return Ok(local);
        }
        let local = fabric.bind(SocketAddr::new(loopback(endpoint.family), 0))?;
        endpoint.local = Some(local);
        Ok(local)
    }

    fn poll_pop(&self, qd: QDesc) -> Poll<Result<QValue>> {
        let queue = match self.table.queue(qd) {
            Ok(queue) => queue,
            Err(e) => return Poll::Ready(Err(e)),
        };
        let Some(local) = queue.inner.local else {
            return Poll::Ready(Err(Error::InvalidArgument(format!(
                "{qd} is not bound to a local address"
            ))));
        };
        let Some(ctx) = &queue.ctx else {
            return Poll::Ready(Err(Error::InvalidArgument(format!(
                "{qd} is not bound to a network context"
            ))));
        };
        let peer = queue.peer();

        match self.fabric.take(local, peer) {
            Some(dgram) => match SgArray::from_pool(ctx.pool(), &dgram.payload) {
                Ok(mut sga) => {
                    sga.set_addr(Some(dgram.from));
                    Poll::Ready(Ok(QValue::Sga(sga)))
                }
                // The message stays queued until buffers are released.
                Err(Error::ResourceExhausted(msg)) => {
                    debug!(%qd, len = dgram.payload.len(), %msg, "no pool buffers for message");
                    self.fabric.requeue(local, dgram);
                    Poll::Pending
                }
                Err(e) => Poll::Ready(Err(e)),
            },
            None => match peer {
                Some(peer) if !self.fabric.is_bound(peer) => {
                    debug!(%qd, %peer, "peer went away");
                    Poll::Ready(Err(Error::ConnectionReset))
                }
                _ => Poll::Pending,
            },
        }
    }
}

impl IoQueueApi for LoopbackQueue {
    fn socket(
        &mut self,
        domain: AddressFamily,
        ty: SockType,
        protocol: Option<SockProtocol>,
    ) -> Result<QDesc> {
        if !matches!(domain, AddressFamily::Inet | AddressFamily::Inet6) {
            return Err(Error::InvalidArgument(format!(
                "unsupported address family {domain:?}"
            )));
        }
        if !matches!(ty, SockType::Datagram | SockType::Stream) {
            return Err(Error::InvalidArgument(format!(
                "unsupported socket type {ty:?}"
            )));
        }

        let qd = self.table.open(Endpoint {
            family: domain,
            ty,
            local: None,
        });
        debug!(%qd, ?domain, ?ty, ?protocol, "loopback queue opened");
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
        let queue = self.table.queue_mut(qd)?;
        if queue.inner.local.is_some() {
            return Err(Error::InvalidArgument(format!("{qd} is already bound")));
        }
        if addr.is_ipv4() != (queue.inner.family == AddressFamily::Inet) {
            return Err(Error::InvalidArgument(format!(
                "{addr} does not match the address family of {qd}"
            )));
        }
        queue.inner.local = Some(self.fabric.bind(addr)?);
        Ok(())
    }

    fn connect(&mut self, qd: QDesc, addr: SocketAddr) -> Result<()> {
        let queue = self.table.queue_mut(qd)?;
        if queue.inner.ty == SockType::Stream && !self.fabric.is_bound(addr) {
            return Err(Error::IO(io::ErrorKind::ConnectionRefused.into()));
        }
        let local = Self::ensure_bound(&self.fabric, &mut queue.inner)?;
        queue.state = QState::Connected(addr);
        debug!(%qd, %local, peer = %addr, "loopback queue connected");
        Ok(())
    }

    fn local_addr(&self, qd: QDesc) -> Result<SocketAddr> {
        self.table
            .queue(qd)?
            .inner
            .local
            .ok_or_else(|| Error::InvalidArgument(format!("{qd} is not bound")))
    }

    fn push(&mut self, qd: QDesc, sga: SgArray) -> Result<QToken> {
        let queue = self.table.queue_mut(qd)?;
        let dest = sga.addr().or(queue.peer()).ok_or_else(|| {
            Error::InvalidArgument(format!(
                "push on unconnected {qd} requires a peer address"
            ))
        })?;
        let mut from = Self::ensure_bound(&self.fabric, &mut queue.inner)?;
        if from.ip().is_unspecified() {
            from.set_ip(loopback(queue.inner.family));
        }

        let payload = sga.to_vec();
        sga.release();
        let len = payload.len();
        let delivered = self.fabric.deliver(dest, Datagram { from, payload });

        let outcome = match (delivered, queue.inner.ty) {
            (false, SockType::Stream) => Some(Error::ConnectionReset),
            (false, _) => {
                trace!(%qd, %dest, "no queue bound at destination, message dropped");
                None
            }
            _ => None,
        };
        let qt = self.table.issue(qd, OpKind::Push, LoopbackOp::Push(outcome))?;
        trace!(%qd, %qt, %dest, len, "push issued");
        Ok(qt)
    }

    fn pop(&mut self, qd: QDesc) -> Result<QToken> {
        let queue = self.table.queue(qd)?;
        if queue.ctx.is_none() {
            return Err(Error::InvalidArgument(format!(
                "{qd} is not bound to a network context"
            )));
        }
        if queue.inner.local.is_none() {
            return Err(Error::InvalidArgument(format!(
                "{qd} must be bound or connected before popping"
            )));
        }
        let qt = self.table.issue(qd, OpKind::Pop, LoopbackOp::Pop)?;
        trace!(%qd, %qt, "pop issued");
        Ok(qt)
    }

    fn poll(&mut self, qt: QToken) -> Poll<Result<QResult>> {
        let (qd, op) = match self.table.pending(qt) {
            Ok((qd, op, _)) => (qd, op),
            Err(e) => return Poll::Ready(Err(e)),
        };

        let value = match op {
            OpKind::Push => match self.table.resolve(qt) {
                Ok(LoopbackOp::Push(None)) => Ok(QValue::None),
                Ok(LoopbackOp::Push(Some(err))) => Err(err),
                Ok(LoopbackOp::Pop) => unreachable!("push token {qt} carried pop state"),
                Err(e) => Err(e),
            },
            OpKind::Pop => match self.poll_pop(qd) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(value) => self.table.resolve(qt).and(value),
            },
        };

        Poll::Ready(value.map(|value| QResult { qd, qt, op, value }))
    }

    fn drop_token(&mut self, qt: QToken) -> Result<()> {
        self.table.release(qt).map(|_| ())
    }

    fn close(&mut self, qd: QDesc) -> Result<()> {
        let pending = self.table.pending_on(qd);
        let queue = self.table.close(qd)?;
        if let Some(local) = queue.inner.local {
            self.fabric.unbind(local);
        }
        if pending > 0 {
            warn!(%qd, pending, "closed queue with outstanding tokens");
        }
        debug!(%qd, "loopback queue closed");
        Ok(())
    }
}
