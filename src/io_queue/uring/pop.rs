use std::{mem::size_of, os::fd::RawFd, pin::Pin, ptr};

use ::io_uring::{cqueue, opcode, squeue, types};
use nix::libc;

use crate::{
    io_uring::{Completion, CompletionStatus},
    net::{IoVec, MsgHdr, SocketAddrC},
    queue::QValue,
    sga::{PoolBuf, Segment, SgArray},
    sync::OneShot,
    Error, Result,
};

/// An in flight `recvmsg` into a single pool buffer.
pub(super) struct PopCompletion {
    fd: RawFd,
    datagram: bool,
    buf: Option<PoolBuf>,
    addr: Pin<Box<SocketAddrC>>,
    _iovec: Pin<Box<IoVec>>,
    hdr: Pin<Box<MsgHdr>>,
    result: OneShot<Result<QValue>>,
}

impl PopCompletion {
    pub(super) fn new(
        fd: RawFd,
        datagram: bool,
        mut buf: PoolBuf,
        result: OneShot<Result<QValue>>,
    ) -> Self {
        let (addr, addr_len) = SocketAddrC::new();
        let mut addr = Box::pin(addr);

        let mut iovec = Box::pin(IoVec {
            iov_base: buf.as_mut_ptr() as _,
            iov_len: buf.len(),
        });

        let hdr = MsgHdr {
            msg_name: addr.as_mut_ptr() as _,
            msg_namelen: addr_len,
            msg_iov: &mut *iovec as *mut IoVec as *mut libc::iovec,
            msg_iovlen: 1,
            msg_control: ptr::null_mut(),
            msg_controllen: 0,
            msg_flags: 0,
        };

        PopCompletion {
            fd,
            datagram,
            buf: Some(buf),
            addr,
            _iovec: iovec,
            hdr: Box::pin(hdr),
            result,
        }
    }
}

impl PopCompletion {
    fn finish(&mut self, result: i32) -> CompletionStatus {
        if result < 0 {
            self.result.complete(Err(Error::from_errno(-result)));
            return CompletionStatus::Finalized;
        }

        if result == 0 {
            if self.datagram {
                // Empty datagrams can't be represented as a scatter-gather array, wait for the
                // next one instead.
                return CompletionStatus::Rearm;
            }
            self.result.complete(Err(Error::ConnectionAborted));
            return CompletionStatus::Finalized;
        }

        let Some(mut buf) = self.buf.take() else {
            unreachable!("pop completion resolved after its buffer was handed out");
        };

        // Datagrams are received with MSG_TRUNC, so `result` is the full length on the wire.
        let len = result as usize;
        if len > buf.len() || self.hdr.msg_flags & libc::MSG_TRUNC != 0 {
            self.result.complete(Err(Error::ResourceExhausted(format!(
                "{len} byte message does not fit a {} byte pool buffer",
                buf.len()
            ))));
            return CompletionStatus::Finalized;
        }
        buf.truncate(len);

        let addr = if self.datagram {
            self.addr.as_std(self.hdr.msg_namelen)
        } else {
            None
        };
        let sga = SgArray::new(vec![Segment::from(buf)]).map(|mut sga| {
            sga.set_addr(addr);
            QValue::Sga(sga)
        });

        self.result.complete(sga);
        CompletionStatus::Finalized
    }
}

impl Completion for PopCompletion {
    fn resolve(&mut self, value: cqueue::Entry) -> CompletionStatus {
        self.finish(value.result())
    }

    fn as_entry(&mut self) -> squeue::Entry {
        self.hdr.msg_namelen = size_of::<SocketAddrC>() as libc::socklen_t;
        self.hdr.msg_flags = 0;
        let flags = if self.datagram { libc::MSG_TRUNC } else { 0 };
        opcode::RecvMsg::new(types::Fd(self.fd), self.hdr.as_mut_ptr())
            .flags(flags as u32)
            .build()
    }
}

#[cfg(test)]
mod tests {
    use crate::sga::{MemPool, MemPoolOptions};

    use super::*;

    fn pending(pool: &MemPool, datagram: bool) -> (PopCompletion, OneShot<Result<QValue>>) {
        let result = OneShot::new();
        let op = PopCompletion::new(-1, datagram, pool.alloc().unwrap(), result.clone());
        (op, result)
    }

    fn pool() -> MemPool {
        MemPool::new(&MemPoolOptions {
            buffers: 2,
            buffer_size: 8,
        })
        .unwrap()
    }

    #[test]
    fn fills_one_buffer() {
        let pool = pool();
        let (mut op, result) = pending(&pool, true);
        op.buf.as_mut().unwrap()[..3].copy_from_slice(b"abc");

        assert!(matches!(op.finish(3), CompletionStatus::Finalized));
        let sga = match result.take() {
            Some(Ok(QValue::Sga(sga))) => sga,
            other => panic!("unexpected pop result {other:?}"),
        };
        assert_eq!(sga.to_vec(), b"abc");
        assert_eq!(sga.addr(), None);
        drop(op);
        assert_eq!(pool.in_use(), 1);
        sga.release();
        assert_eq!(pool.in_use(), 0);
    }

    #[test]
    fn oversized_datagram_fails_and_frees_the_buffer() {
        let pool = pool();
        let (mut op, result) = pending(&pool, true);
        assert!(matches!(op.finish(32), CompletionStatus::Finalized));
        assert!(matches!(result.take(), Some(Err(Error::ResourceExhausted(_)))));
        assert_eq!(pool.in_use(), 0);

        let (mut op, result) = pending(&pool, true);
        op.hdr.msg_flags = libc::MSG_TRUNC;
        op.finish(8);
        assert!(matches!(result.take(), Some(Err(Error::ResourceExhausted(_)))));
    }

    #[test]
    fn empty_reads() {
        let pool = pool();
        let (mut op, result) = pending(&pool, true);
        assert!(matches!(op.finish(0), CompletionStatus::Rearm));
        assert!(!result.is_complete());

        let (mut op, result) = pending(&pool, false);
        assert!(matches!(op.finish(0), CompletionStatus::Finalized));
        assert!(matches!(result.take(), Some(Err(Error::ConnectionAborted))));
    }

    #[test]
    fn kernel_errors_pass_through() {
        let pool = pool();
        let (mut op, result) = pending(&pool, true);
        op.finish(-libc::ECONNRESET);
        assert!(matches!(result.take(), Some(Err(e)) if e.is_connection_terminated()));
    }
}
