//! Synchronization helpers shared between the io_uring driver and the queue tokens.

mod oneshot;

pub(crate) use oneshot::OneShot;
