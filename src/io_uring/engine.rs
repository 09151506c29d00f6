use std::collections::VecDeque;

use io_uring::{squeue, IoUring};
use nix::libc;
use tracing::trace;

use crate::{queue::table::Arena, Result};

use super::{cancel::Cancel, Completion, CompletionStatus};

/// A thin driver around an [IoUring] instance. Operations are registered as [Completion]s and
/// tracked in a generation tagged arena whose handles double as their `user_data`. A handle to a
/// finalized operation never matches a later occupant of the same slot. Completions are only ever
/// collected through the non-blocking [UringDriver::reap].
pub struct UringDriver {
    uring: IoUring,
    backlog: VecDeque<squeue::Entry>,
    state: Arena<Box<dyn Completion>>,
}

impl UringDriver {
    pub fn new(entries: u32) -> Result<UringDriver> {
        let uring = IoUring::builder().build(entries)?;

        let backlog = VecDeque::with_capacity(1024);
        let state = Arena::with_capacity(1024);

        Ok(UringDriver {
            uring,
            backlog,
            state,
        })
    }

    fn clear_backlog(&mut self) -> Result<()> {
        let (submitter, mut sq, _) = self.uring.split();
        loop {
            if sq.is_full() {
                match submitter.submit() {
                    Ok(_) => (),
                    Err(ref err) if err.raw_os_error() == Some(libc::EBUSY) => break,
                    Err(err) => return Err(err.into()),
                }
            }
            sq.sync();

            match self.backlog.pop_front() {
                Some(sqe) => unsafe {
                    let _ = sq.push(&sqe);
                },
                None => break,
            }
        }
        Ok(())
    }

    fn enqueue(&mut self, entry: squeue::Entry) {
        // Push the new entry onto the submission queue, or fallback to our local VecDeque on
        // error. The error in question here, is a queue full error, and is meant to be retried,
        // which is handled in the clear_backlog() fn above.
        unsafe {
            if self.uring.submission().push(&entry).is_err() {
                self.backlog.push_back(entry);
            }
        }
    }

    /// Queue a new operation for submission, returning its handle.
    pub fn register(&mut self, mut op: impl Completion + 'static) -> u64 {
        let entry = op.as_entry();
        let handle = self.state.insert(Box::new(op));
        self.enqueue(entry.user_data(handle));
        handle
    }

    /// Whether the operation behind `handle` is still waiting on the kernel.
    pub fn is_registered(&self, handle: u64) -> bool {
        self.state.get(handle).is_some()
    }

    /// Best effort cancel of the operation behind `handle`. The operation's state stays
    /// registered until its own completion arrives, the kernel may still be reading from or
    /// writing into its buffers until then. Finalized handles are ignored.
    pub fn deregister(&mut self, handle: u64) {
        if !self.is_registered(handle) {
            return;
        }

        let mut op = Cancel::new(handle);
        let entry = op.as_entry();
        let cancel = self.state.insert(Box::new(op));
        self.enqueue(entry.user_data(cancel));
    }

    /// Number of operations the kernel has not finalized yet, cancels included.
    pub fn in_flight(&self) -> usize {
        self.state.len()
    }

    /// Submit queued entries and resolve every completion that is already available, without
    /// waiting for more. Returns the number of completions handled.
    pub fn reap(&mut self) -> Result<usize> {
        match self.uring.submit() {
            Ok(_) => {}
            Err(e) => match e.raw_os_error() {
                Some(libc::EBUSY) => {}
                _ => return Err(e.into()),
            },
        }

        self.clear_backlog()?;

        let mut handled = 0;
        let (_, mut sq, mut cq) = self.uring.split();
        for cqe in &mut cq {
            let user_data = cqe.user_data();

            let state = match self.state.get_mut(user_data) {
                Some(state) => state,
                None => continue,
            };
            handled += 1;

            use CompletionStatus::*;
            match state.resolve(cqe) {
                Rearm => {
                    let entry = state.as_entry().user_data(user_data);
                    unsafe {
                        if sq.push(&entry).is_err() {
                            self.backlog.push_back(entry);
                        }
                    }
                }
                Finalized => {
                    self.state.remove(user_data);
                }
            };
        }

        if handled > 0 {
            trace!(handled, in_flight = self.state.len(), "reaped completions");
        }
        Ok(handled)
    }
}
