//! A [ServiceUnit] is the application facing handle the control plane hands out, one per declared
//! service unit. It pairs a queue backend with the unit's [NetContext] and routes every queue
//! operation through that backend, so sockets opened through a unit are always bound to the
//! unit's device queue and buffer pool.

use std::net::SocketAddr;

use nix::sys::socket::{AddressFamily, SockProtocol, SockType};
use tracing::{debug, warn};

use crate::{
    context::NetContext,
    io_queue::IoQueueApi,
    queue::{QDesc, QResult, QToken},
    sga::SgArray,
    wait::{self, WaitConfig, WaitCursor},
    Result,
};

/// One service unit, owning its queue backend `B`.
pub struct ServiceUnit<B> {
    id: usize,
    io: B,
    ctx: NetContext,
    wait: WaitConfig,
}

impl<B> ServiceUnit<B>
where
    B: IoQueueApi,
{
    pub fn new(id: usize, io: B, ctx: NetContext) -> ServiceUnit<B> {
        ServiceUnit {
            id,
            io,
            ctx,
            wait: WaitConfig::default(),
        }
    }

    /// Replace the retry ceiling used by [ServiceUnit::wait] and [ServiceUnit::wait_any].
    pub fn with_wait_config(mut self, wait: WaitConfig) -> ServiceUnit<B> {
        self.wait = wait;
        self
    }

    /// The ordinal this unit was declared at.
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn context(&self) -> &NetContext {
        &self.ctx
    }

    pub fn wait_config(&self) -> &WaitConfig {
        &self.wait
    }

    pub fn io(&self) -> &B {
        &self.io
    }

    pub fn io_mut(&mut self) -> &mut B {
        &mut self.io
    }

    /// Open a queue and bind it to this unit's context. If binding fails the queue is closed
    /// again and the binding error is returned.
    pub fn open_socket(
        &mut self,
        domain: AddressFamily,
        ty: SockType,
        protocol: Option<SockProtocol>,
    ) -> Result<QDesc> {
        let qd = self.io.socket(domain, ty, protocol)?;
        if let Err(e) = self.io.set_io_ctx(qd, &self.ctx) {
            if let Err(close) = self.io.close(qd) {
                warn!(unit = self.id, %qd, error = %close, "failed to close unbindable queue");
            }
            return Err(e);
        }
        debug!(unit = self.id, %qd, "socket opened");
        Ok(qd)
    }

    pub fn bind(&mut self, qd: QDesc, addr: SocketAddr) -> Result<()> {
        self.io.bind(qd, addr)
    }

    pub fn connect(&mut self, qd: QDesc, addr: SocketAddr) -> Result<()> {
        self.io.connect(qd, addr)
    }

    pub fn local_addr(&self, qd: QDesc) -> Result<SocketAddr> {
        self.io.local_addr(qd)
    }

    pub fn push(&mut self, qd: QDesc, sga: SgArray) -> Result<QToken> {
        self.io.push(qd, sga)
    }

    pub fn pop(&mut self, qd: QDesc) -> Result<QToken> {
        self.io.pop(qd)
    }

    pub fn drop_token(&mut self, qt: QToken) -> Result<()> {
        self.io.drop_token(qt)
    }

    pub fn close(&mut self, qd: QDesc) -> Result<()> {
        self.io.close(qd)
    }

    /// Block on `qt`, see [wait::wait].
    pub fn wait(&mut self, qt: QToken) -> Result<QResult> {
        wait::wait(&mut self.io, qt, &self.wait)
    }

    /// Block on the first of `tokens` to resolve, see [wait::wait_any].
    pub fn wait_any(&mut self, tokens: &[QToken], cursor: &mut WaitCursor) -> Result<QResult> {
        wait::wait_any(&mut self.io, tokens, cursor, &self.wait)
    }

    /// Consume the unit and hand back its backend.
    pub fn into_io(self) -> B {
        self.io
    }
}
