//! The [crate::io_uring] module represents a simplified interface ontop of the [io_uring::IoUring]
//! implementation. This module distills the implementation down to three components:
//! - The [Completion] trait which in flight operations implement to handle I/O results and
//! submission entry creation.
//! - The [CompletionStatus] enum which handles informing the [UringDriver] what to do with the
//! result of a [Completion]
//! - The [UringDriver] which owns the ring and the state of every in flight operation.
//!
//! The driver never blocks, it is advanced by [UringDriver::reap] from within
//! [crate::IoQueueApi::poll] of the [crate::UringQueue] that owns it.

mod cancel;
mod completion;
mod engine;

pub use completion::{Completion, CompletionStatus};
pub use engine::UringDriver;
