//! C layout types shared by the kernel facing backend.

mod addr;
mod iovec;
mod msghdr;

pub(crate) use addr::SocketAddrC;
pub(crate) use iovec::IoVec;
pub(crate) use msghdr::MsgHdr;
