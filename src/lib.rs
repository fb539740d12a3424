//! Chunked arena allocator with a scoped, stackable allocator context.
//!
//! An [`Arena`] gets memory from the OS in large chunks and hands it out by
//! bumping an offset. Individual allocations can be given back and are
//! reused, but chunks are only returned to the OS when the whole arena is
//! released or dropped.
//!
//! On top of arenas sits a per-thread stack of allocator contexts. Code can
//! install an arena as the current allocator for a call subtree, and the
//! generic [`allocate`] entry point always serves from the top of the stack:
//!
//! ```rust
//! use cghost::{allocate, create_allocator_handle, create_arena, pop_context, push_context};
//!
//! let arena = create_arena();
//! push_context(create_allocator_handle(&arena));
//!
//! let address = allocate(1024);
//! unsafe { address.as_ptr().write_bytes(0, 1024) };
//!
//! pop_context();
//! cghost::release_arena(&arena);
//! ```
//!
//! Errors are fatal by default: they are logged through [`tracing`] and the
//! thread panics. Every operation has a `try_*` flavour returning
//! [`ArenaError`] instead.
//!
//! With the `memory-debug` feature each live allocation remembers which
//! arena issued it and from where, see [`Arena::trace`].

use std::ptr::NonNull;

mod align;
mod arena;
mod block;
mod chunk;
mod config;
mod context;
mod error;
mod freelist;
mod handle;
mod header;
mod list;
mod platform;
#[cfg(feature = "memory-debug")]
mod provenance;

/// Non-null pointer to `T`. We use this in most cases instead of `*mut T`
/// because the compiler will yell at us if we don't write code for the `None`
/// case.
pub(crate) type Pointer<T> = Option<NonNull<T>>;

pub use arena::{Arena, ArenaId};
pub use config::{ALLOCATOR_STACK_SIZE, DEFAULT_ALLOCATOR_STACK_SIZE, DEFAULT_CHUNK_SIZE};
pub use context::{
    allocate, context_depth, current_allocator, enter_context, pop_context, push_context,
    try_allocate, try_pop_context, try_push_context, with_allocator, ContextGuard, ContextStack,
};
pub use error::{ArenaError, Result};
pub use handle::AllocatorHandle;
#[cfg(feature = "memory-debug")]
pub use provenance::ProvenanceHeader;

/// Creates an empty arena with the default chunk size.
pub fn create_arena() -> Arena {
    Arena::new()
}

/// Builds a handle bound to `arena`, ready to be pushed as a context.
pub fn create_allocator_handle(arena: &Arena) -> AllocatorHandle {
    arena.allocator()
}

/// Gives `address` back to `arena` for reuse.
///
/// # Safety
///
/// See [`Arena::return_allocation`].
#[track_caller]
pub unsafe fn return_allocation(arena: &Arena, address: NonNull<u8>) {
    arena.return_allocation(address)
}

/// Releases every chunk of `arena`. All addresses it issued become invalid.
pub fn release_arena(arena: &Arena) {
    arena.release()
}
