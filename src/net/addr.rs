use std::{
    mem::{size_of, zeroed},
    net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6},
};

use nix::libc;

/// A C compatible socket address large enough for both address families, handed to the kernel
/// as `msg_name` in send and receive message headers.
#[repr(C)]
pub(crate) union SocketAddrC {
    v4: libc::sockaddr_in,
    v6: libc::sockaddr_in6,
}

impl SocketAddrC {
    /// An empty address and its capacity, to be filled in by the kernel.
    pub(crate) fn new() -> (SocketAddrC, libc::socklen_t) {
        // SAFETY: both variants are plain C structs for which all zeroes is a valid value.
        let addr = unsafe { zeroed::<SocketAddrC>() };
        (addr, size_of::<SocketAddrC>() as libc::socklen_t)
    }

    pub(crate) fn from_std(addr: &SocketAddr) -> (SocketAddrC, libc::socklen_t) {
        match addr {
            SocketAddr::V4(ref v4) => {
                let sin_addr = libc::in_addr {
                    s_addr: u32::from_ne_bytes(v4.ip().octets()),
                };

                let sockaddr_in = libc::sockaddr_in {
                    sin_family: libc::AF_INET as libc::sa_family_t,
                    sin_port: v4.port().to_be(),
                    sin_addr,
                    sin_zero: [0u8; 8],
                };

                let sockaddr = SocketAddrC { v4: sockaddr_in };
                let socklen = size_of::<libc::sockaddr_in>() as libc::socklen_t;
                (sockaddr, socklen)
            }
            SocketAddr::V6(ref v6) => {
                let sockaddr_in6 = libc::sockaddr_in6 {
                    sin6_family: libc::AF_INET6 as libc::sa_family_t,
                    sin6_port: v6.port().to_be(),
                    sin6_addr: libc::in6_addr {
                        s6_addr: v6.ip().octets(),
                    },
                    sin6_flowinfo: v6.flowinfo(),
                    sin6_scope_id: v6.scope_id(),
                };

                let sockaddr = SocketAddrC { v6: sockaddr_in6 };
                let socklen = size_of::<libc::sockaddr_in6>() as libc::socklen_t;
                (sockaddr, socklen)
            }
        }
    }

    /// Read back the address the kernel filled in, `len` is the `msg_namelen` it reported. Returns
    /// [None] when no address of a supported family was supplied.
    pub(crate) fn as_std(&self, len: libc::socklen_t) -> Option<SocketAddr> {
        // SAFETY: the family field sits at the same offset in both variants.
        let family = unsafe { self.v4.sin_family } as libc::c_int;
        match family {
            libc::AF_INET if len as usize >= size_of::<libc::sockaddr_in>() => {
                let v4 = unsafe { self.v4 };
                let ip = Ipv4Addr::from(v4.sin_addr.s_addr.to_ne_bytes());
                Some(SocketAddr::V4(SocketAddrV4::new(ip, u16::from_be(v4.sin_port))))
            }
            libc::AF_INET6 if len as usize >= size_of::<libc::sockaddr_in6>() => {
                let v6 = unsafe { self.v6 };
                Some(SocketAddr::V6(SocketAddrV6::new(
                    Ipv6Addr::from(v6.sin6_addr.s6_addr),
                    u16::from_be(v6.sin6_port),
                    v6.sin6_flowinfo,
                    v6.sin6_scope_id,
                )))
            }
            _ => None,
        }
    }

    pub(crate) fn as_mut_ptr(&mut self) -> *mut libc::sockaddr {
        self as *mut _ as *mut libc::sockaddr
    }
}
