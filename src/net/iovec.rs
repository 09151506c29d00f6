use nix::libc;

/// A C compatible `iovec` describing one segment of a scatter-gather array to the kernel.
#[repr(C)]
pub(crate) struct IoVec {
    pub iov_base: *mut libc::c_void,
    pub iov_len: libc::size_t,
}

// SAFETY: the pointee is owned by the same in flight operation as the IoVec itself, and stays put
// until that operation is finalized.
unsafe impl Send for IoVec {}
