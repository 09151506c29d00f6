use io_uring::{cqueue, opcode, squeue, types::CancelBuilder};

use super::{Completion, CompletionStatus};

/// Cancels every submission tagged with `handle`.
pub struct Cancel {
    handle: u64,
}

impl Cancel {
    pub fn new(handle: u64) -> Cancel {
        Cancel { handle }
    }
}

impl Completion for Cancel {
    fn resolve(&mut self, _: cqueue::Entry) -> CompletionStatus {
        CompletionStatus::Finalized
    }

    fn as_entry(&mut self) -> squeue::Entry {
        let cancel = CancelBuilder::user_data(self.handle).all();
        opcode::AsyncCancel2::new(cancel).build()
    }
}
