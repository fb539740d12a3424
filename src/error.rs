//! Error taxonomy. Every operation has a fallible `try_*` flavour that
//! returns [`ArenaError`], and a fail-fast flavour that calls [`fatal`].

use thiserror::Error;

/// Everything that can go wrong while allocating through an arena or the
/// allocator context stack. None of these are transient: they are either
/// resource exhaustion or a violated contract.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ArenaError {
    /// The OS refused to hand out a new chunk.
    #[error("out of memory: could not obtain a chunk of {requested} bytes")]
    OutOfMemory { requested: usize },

    /// A context was pushed onto a full stack.
    #[error("allocator context stack overflow: capacity is {capacity}")]
    StackOverflow { capacity: usize },

    /// A context was popped from an empty stack.
    #[error("allocator context stack underflow: no context to pop")]
    StackUnderflow,

    /// Generic allocation with no context installed on this thread.
    #[error("no allocator context installed on this thread")]
    NoContext,

    /// Allocations must be at least one byte long.
    #[error("zero sized allocation requested")]
    ZeroSizedAllocation,

    /// The allocation was already returned to its arena.
    #[error("allocation at {address:#x} returned twice")]
    DoubleReturn { address: usize },

    /// The allocation was issued before its arena was released.
    #[error("allocation at {address:#x} used after its arena was released")]
    UseAfterRelease { address: usize },

    /// The allocation was issued by a different arena.
    #[error("allocation at {address:#x} does not belong to this arena")]
    ForeignPointer { address: usize },

    /// The handle outlived the arena it refers to.
    #[error("allocator handle used after its arena was dropped")]
    DanglingHandle,

    /// A [`crate::ContextGuard`] was dropped while its context was not the
    /// current one.
    #[error("allocator context guard dropped out of order")]
    GuardOutOfOrder,
}

/// Result type used by the fallible operations of this crate.
pub type Result<T> = std::result::Result<T, ArenaError>;

/// Fail-fast path. Logs the error and panics with a human readable message.
/// Unless the caller intercepts the unwind at a process boundary, this
/// terminates the program.
#[cold]
#[track_caller]
pub(crate) fn fatal(error: ArenaError) -> ! {
    tracing::error!(%error, "fatal allocator error");
    panic!("cghost: {error}")
}

/// Unwraps `result` or takes the [`fatal`] path.
#[inline]
#[track_caller]
pub(crate) fn or_fatal<T>(result: Result<T>) -> T {
    match result {
        Ok(value) => value,
        Err(error) => fatal(error),
    }
}
