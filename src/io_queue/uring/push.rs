use std::{os::fd::RawFd, pin::Pin, ptr};

use ::io_uring::{cqueue, opcode, squeue, types};

use crate::{
    io_uring::{Completion, CompletionStatus},
    net::{IoVec, MsgHdr, SocketAddrC},
    queue::QValue,
    sga::SgArray,
    sync::OneShot,
    Error, Result,
};

/// An in flight `sendmsg` of one scatter-gather array. The array itself lives in here until the
/// kernel reports completion, so every iovec and the optional peer address stay valid.
pub(super) struct PushCompletion {
    fd: RawFd,
    _sga: SgArray,
    _addr: Option<Pin<Box<SocketAddrC>>>,
    _iovecs: Vec<IoVec>,
    hdr: Pin<Box<MsgHdr>>,
    result: OneShot<Result<QValue>>,
}

impl PushCompletion {
    pub(super) fn new(fd: RawFd, mut sga: SgArray, result: OneShot<Result<QValue>>) -> Self {
        let (addr, addr_ptr, addr_len) = match sga.addr() {
            Some(addr) => {
                let (addr, addr_len) = SocketAddrC::from_std(&addr);
                let mut addr = Box::pin(addr);
                let addr_ptr = addr.as_mut_ptr();
                (Some(addr), addr_ptr as _, addr_len)
            }
            None => (None, ptr::null_mut(), 0),
        };

        let mut iovecs: Vec<IoVec> = sga
            .segments_mut()
            .iter_mut()
            .map(|seg| {
                let bytes = seg.as_mut_bytes();
                IoVec {
                    iov_base: bytes.as_mut_ptr() as _,
                    iov_len: bytes.len(),
                }
            })
            .collect();

        let hdr = MsgHdr {
            msg_name: addr_ptr,
            msg_namelen: addr_len,
            msg_iov: iovecs.as_mut_ptr() as _,
            msg_iovlen: iovecs.len(),
            msg_control: ptr::null_mut(),
            msg_controllen: 0,
            msg_flags: 0,
        };

        PushCompletion {
            fd,
            _sga: sga,
            _addr: addr,
            _iovecs: iovecs,
            hdr: Box::pin(hdr),
            result,
        }
    }
}

impl Completion for PushCompletion {
    fn resolve(&mut self, value: cqueue::Entry) -> CompletionStatus {
        let result = value.result();
        let result = if result < 0 {
            Err(Error::from_errno(-result))
        } else {
            // Stream sockets may send short, so report how much actually went out.
            Ok(QValue::Raw(result as u64))
        };

        self.result.complete(result);
        CompletionStatus::Finalized
    }

    fn as_entry(&mut self) -> squeue::Entry {
        opcode::SendMsg::new(types::Fd(self.fd), self.hdr.as_mut_ptr()).build()
    }
}
