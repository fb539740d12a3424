use std::{
    cell::RefCell,
    fmt,
    panic::Location,
    ptr::NonNull,
    rc::{Rc, Weak},
};

use crate::{
    arena::{ArenaId, InternalArena},
    error::{or_fatal, ArenaError, Result},
};

/// Lightweight reference to an [`crate::Arena`]. Handles are what the
/// allocator context stack holds: pushing a handle makes every generic
/// allocation on the current thread go to its arena.
///
/// A handle doesn't keep the arena alive. Using a handle after its arena
/// was dropped is reported as [`ArenaError::DanglingHandle`]. Releasing the
/// arena, on the other hand, doesn't invalidate the handle: the arena is
/// simply empty and will request new chunks.
///
/// Handles are cheap to clone and two handles compare equal when they refer
/// to the same arena.
#[derive(Clone)]
pub struct AllocatorHandle {
    arena: Weak<RefCell<InternalArena>>,
    id: ArenaId,
}

impl AllocatorHandle {
    pub(crate) fn new(arena: Weak<RefCell<InternalArena>>, id: ArenaId) -> Self {
        Self { arena, id }
    }

    /// Id of the arena this handle is bound to.
    pub fn arena_id(&self) -> ArenaId {
        self.id
    }

    /// Whether the arena still exists.
    pub fn is_alive(&self) -> bool {
        self.arena.strong_count() > 0
    }

    fn upgrade(&self) -> Result<Rc<RefCell<InternalArena>>> {
        self.arena.upgrade().ok_or(ArenaError::DanglingHandle)
    }

    /// Allocates `size` bytes from the bound arena. See
    /// [`crate::Arena::allocate`].
    ///
    /// # Panics
    ///
    /// Same as [`crate::Arena::allocate`], and also if the arena was dropped.
    #[track_caller]
    pub fn allocate(&self, size: usize) -> NonNull<u8> {
        or_fatal(self.try_allocate(size))
    }

    /// Fallible version of [`Self::allocate`].
    #[track_caller]
    pub fn try_allocate(&self, size: usize) -> Result<NonNull<u8>> {
        self.allocate_at(size, Location::caller())
    }

    pub(crate) fn allocate_at(
        &self,
        size: usize,
        call_site: &'static Location<'static>,
    ) -> Result<NonNull<u8>> {
        self.upgrade()?.borrow_mut().allocate(size, call_site)
    }

    /// Gives `address` back to the bound arena.
    ///
    /// # Safety
    ///
    /// See [`crate::Arena::return_allocation`].
    #[track_caller]
    pub unsafe fn return_allocation(&self, address: NonNull<u8>) {
        or_fatal(self.try_return_allocation(address))
    }

    /// Fallible version of [`Self::return_allocation`].
    ///
    /// # Safety
    ///
    /// See [`crate::Arena::return_allocation`].
    pub unsafe fn try_return_allocation(&self, address: NonNull<u8>) -> Result<()> {
        self.upgrade()?.borrow_mut().return_allocation(address)
    }

    /// Resizes an allocation of the bound arena. See
    /// [`crate::Arena::reallocate`].
    ///
    /// # Safety
    ///
    /// See [`crate::Arena::return_allocation`].
    #[track_caller]
    pub unsafe fn reallocate(&self, address: NonNull<u8>, new_size: usize) -> NonNull<u8> {
        or_fatal(self.try_reallocate(address, new_size))
    }

    /// Fallible version of [`Self::reallocate`].
    ///
    /// # Safety
    ///
    /// See [`crate::Arena::return_allocation`].
    #[track_caller]
    pub unsafe fn try_reallocate(&self, address: NonNull<u8>, new_size: usize) -> Result<NonNull<u8>> {
        let call_site = Location::caller();
        self.upgrade()?
            .borrow_mut()
            .reallocate(address, new_size, call_site)
    }
}

impl PartialEq for AllocatorHandle {
    fn eq(&self, other: &Self) -> bool {
        Weak::ptr_eq(&self.arena, &other.arena)
    }
}

impl Eq for AllocatorHandle {}

impl fmt::Debug for AllocatorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AllocatorHandle")
            .field("arena", &self.id)
            .field("alive", &self.is_alive())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use crate::{Arena, ArenaError};

    #[test]
    fn handles_allocate_from_their_arena() {
        let arena = Arena::new();
        let handle = arena.allocator();
        assert_eq!(handle.arena_id(), arena.id());

        let address = handle.allocate(64);
        assert_eq!(arena.chunk_count(), 1);

        unsafe {
            address.as_ptr().write_bytes(3, 64);
            let address = handle.reallocate(address, 128);
            assert_eq!(*address.as_ptr().add(63), 3);
            // Either side can give it back.
            arena.return_allocation(address);
        }
    }

    #[test]
    fn handles_compare_by_arena() {
        let first = Arena::new();
        let second = Arena::new();

        assert_eq!(first.allocator(), first.allocator());
        assert_ne!(first.allocator(), second.allocator());
    }

    #[test]
    fn handles_survive_release() {
        let arena = Arena::new();
        let handle = arena.allocator();

        handle.allocate(8);
        arena.release();
        assert!(handle.is_alive());

        handle.allocate(8);
        assert_eq!(arena.chunk_count(), 1);
    }

    #[test]
    fn dangling_handle() {
        let handle = Arena::new().allocator();
        assert!(!handle.is_alive());
        assert_eq!(handle.try_allocate(8), Err(ArenaError::DanglingHandle));
    }

    #[test]
    #[should_panic(expected = "handle used after its arena was dropped")]
    fn dangling_handle_is_fatal() {
        let handle = Arena::new().allocator();
        handle.allocate(8);
    }
}
