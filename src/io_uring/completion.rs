use io_uring::{cqueue, squeue};

/// What the [super::UringDriver] should do with an operation after handing it a completion.
pub enum CompletionStatus {
    /// Submit the operation again.
    Rearm,
    /// The operation is done and its state can be dropped.
    Finalized,
}

/// An in flight operation. Implementations own every buffer the kernel may touch until they
/// return [CompletionStatus::Finalized].
pub trait Completion: Send {
    fn resolve(&mut self, value: cqueue::Entry) -> CompletionStatus;
    fn as_entry(&mut self) -> squeue::Entry;
}
