use std::{cell::RefCell, marker::PhantomData, panic::Location, ptr::NonNull, thread};

use crate::{
    config::ALLOCATOR_STACK_SIZE,
    error::{fatal, or_fatal, ArenaError, Result},
    handle::AllocatorHandle,
};

/// Bounded LIFO stack of allocator handles. The top of the stack is the
/// current allocator context, which is where [`allocate`] sends every
/// request.
///
/// Each thread has its own stack, reachable through [`push_context`],
/// [`pop_context`] and friends, so this type is only needed directly to
/// build a stack with a custom capacity:
///
/// ```rust
/// use cghost::{Arena, ArenaError, ContextStack};
///
/// let arena = Arena::new();
/// let mut stack = ContextStack::<2>::new();
///
/// stack.push(arena.allocator());
/// stack.push(arena.allocator());
/// assert_eq!(
///     stack.try_push(arena.allocator()),
///     Err(ArenaError::StackOverflow { capacity: 2 })
/// );
/// ```
///
/// `N` defaults to [`ALLOCATOR_STACK_SIZE`], which can be configured at
/// compile time.
#[derive(Debug, Default)]
pub struct ContextStack<const N: usize = ALLOCATOR_STACK_SIZE> {
    handles: Vec<AllocatorHandle>,
}

impl<const N: usize> ContextStack<N> {
    /// Creates an empty stack. Doesn't allocate until the first push, which
    /// reserves room for exactly `N` handles.
    pub const fn new() -> Self {
        Self {
            handles: Vec::new(),
        }
    }

    /// Makes `handle` the current context, or fails if the stack already
    /// holds `N` handles.
    pub fn try_push(&mut self, handle: AllocatorHandle) -> Result<()> {
        if self.handles.len() == N {
            return Err(ArenaError::StackOverflow { capacity: N });
        }

        if self.handles.capacity() == 0 {
            self.handles.reserve_exact(N);
        }

        tracing::trace!(arena = %handle.arena_id(), depth = self.handles.len() + 1, "push context");
        self.handles.push(handle);

        Ok(())
    }

    /// Fail-fast version of [`Self::try_push`].
    #[track_caller]
    pub fn push(&mut self, handle: AllocatorHandle) {
        or_fatal(self.try_push(handle))
    }

    /// Removes the current context, restoring the previous one.
    pub fn try_pop(&mut self) -> Result<AllocatorHandle> {
        let handle = self.handles.pop().ok_or(ArenaError::StackUnderflow)?;
        tracing::trace!(arena = %handle.arena_id(), depth = self.handles.len(), "pop context");

        Ok(handle)
    }

    /// Fail-fast version of [`Self::try_pop`].
    #[track_caller]
    pub fn pop(&mut self) -> AllocatorHandle {
        or_fatal(self.try_pop())
    }

    /// The current context, if any.
    pub fn current(&self) -> Option<&AllocatorHandle> {
        self.handles.last()
    }

    pub fn depth(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub const fn capacity(&self) -> usize {
        N
    }
}

thread_local! {
    static CONTEXT: RefCell<ContextStack> = const { RefCell::new(ContextStack::new()) };
}

/// Installs `handle` as the current allocator of this thread.
///
/// # Panics
///
/// If the stack of this thread is full.
#[track_caller]
pub fn push_context(handle: AllocatorHandle) {
    or_fatal(try_push_context(handle))
}

/// Fallible version of [`push_context`].
pub fn try_push_context(handle: AllocatorHandle) -> Result<()> {
    CONTEXT.with(|stack| stack.borrow_mut().try_push(handle))
}

/// Removes the current allocator of this thread and returns it.
///
/// # Panics
///
/// If the stack of this thread is empty.
#[track_caller]
pub fn pop_context() -> AllocatorHandle {
    or_fatal(try_pop_context())
}

/// Fallible version of [`pop_context`].
pub fn try_pop_context() -> Result<AllocatorHandle> {
    CONTEXT.with(|stack| stack.borrow_mut().try_pop())
}

/// Handle at the top of the stack of this thread.
pub fn current_allocator() -> Option<AllocatorHandle> {
    CONTEXT.with(|stack| stack.borrow().current().cloned())
}

/// Number of contexts installed on this thread.
pub fn context_depth() -> usize {
    CONTEXT.with(|stack| stack.borrow().depth())
}

/// Allocates `size` bytes from the current allocator of this thread.
///
/// # Panics
///
/// If no context is installed, plus everything [`crate::Arena::allocate`]
/// panics on.
#[track_caller]
pub fn allocate(size: usize) -> NonNull<u8> {
    or_fatal(try_allocate(size))
}

/// Fallible version of [`allocate`].
#[track_caller]
pub fn try_allocate(size: usize) -> Result<NonNull<u8>> {
    let call_site = Location::caller();
    let handle = current_allocator().ok_or(ArenaError::NoContext)?;

    handle.allocate_at(size, call_site)
}

/// Pushes `handle` and pops it again when the returned guard is dropped.
/// Guards must be dropped in reverse creation order, which is what
/// happens naturally with scopes. Dropping a guard whose context is not the
/// current one is fatal:
///
/// ```rust
/// use cghost::{allocate, context_depth, enter_context, Arena};
///
/// let arena = Arena::new();
/// {
///     let _guard = enter_context(arena.allocator());
///     allocate(64);
///     assert_eq!(context_depth(), 1);
/// }
/// assert_eq!(context_depth(), 0);
/// ```
#[track_caller]
pub fn enter_context(handle: AllocatorHandle) -> ContextGuard {
    push_context(handle.clone());

    ContextGuard {
        handle,
        depth: context_depth(),
        marker: PhantomData,
    }
}

/// See [`enter_context`]. Not [`Send`], it must be dropped on the thread
/// whose stack it pushed to.
#[must_use = "the context is popped as soon as the guard is dropped"]
#[derive(Debug)]
pub struct ContextGuard {
    /// Context pushed by [`enter_context`].
    handle: AllocatorHandle,
    /// Stack depth right after the push.
    depth: usize,
    marker: PhantomData<*const ()>,
}

impl ContextGuard {
    /// Whether the context of this guard is still the top of the stack.
    fn is_current(&self) -> bool {
        CONTEXT.with(|stack| {
            let stack = stack.borrow();
            stack.depth() == self.depth && stack.current() == Some(&self.handle)
        })
    }
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        let result = if self.is_current() {
            try_pop_context().map(drop)
        } else {
            Err(ArenaError::GuardOutOfOrder)
        };

        if let Err(error) = result {
            if !thread::panicking() {
                fatal(error);
            }
        }
    }
}

/// Runs `f` with `handle` as the current allocator.
#[track_caller]
pub fn with_allocator<R>(handle: AllocatorHandle, f: impl FnOnce() -> R) -> R {
    let _guard = enter_context(handle);
    f()
}

#[cfg(test)]
mod tests {
    use std::panic::{self, AssertUnwindSafe};

    use super::*;
    use crate::Arena;

    #[test]
    fn nesting_is_lifo() {
        let outer = Arena::new();
        let inner = Arena::new();

        assert_eq!(current_allocator(), None);

        push_context(outer.allocator());
        assert_eq!(current_allocator(), Some(outer.allocator()));

        push_context(inner.allocator());
        assert_eq!(current_allocator(), Some(inner.allocator()));
        assert_eq!(context_depth(), 2);

        allocate(16);
        assert_eq!(inner.chunk_count(), 1);
        assert_eq!(outer.chunk_count(), 0);

        assert_eq!(pop_context(), inner.allocator());
        assert_eq!(current_allocator(), Some(outer.allocator()));

        allocate(16);
        assert_eq!(outer.chunk_count(), 1);

        pop_context();
        assert_eq!(current_allocator(), None);
        assert_eq!(context_depth(), 0);
    }

    #[test]
    fn custom_capacity() {
        let arena = Arena::new();
        let mut stack = ContextStack::<4>::new();
        assert_eq!(stack.capacity(), 4);
        assert_eq!(stack.handles.capacity(), 0);

        // The first push reserves the whole bound, later pushes never grow.
        stack.push(arena.allocator());
        let reserved = stack.handles.capacity();
        assert!(reserved >= 4);

        for _ in 1..4 {
            stack.push(arena.allocator());
        }
        assert_eq!(stack.handles.capacity(), reserved);

        assert_eq!(
            stack.try_push(arena.allocator()),
            Err(ArenaError::StackOverflow { capacity: 4 })
        );
        assert_eq!(stack.depth(), 4);

        while !stack.is_empty() {
            stack.pop();
        }
        assert_eq!(stack.try_pop(), Err(ArenaError::StackUnderflow));
    }

    #[test]
    #[should_panic(expected = "stack overflow")]
    fn overflow_is_fatal() {
        let arena = Arena::new();
        for _ in 0..=ALLOCATOR_STACK_SIZE {
            push_context(arena.allocator());
        }
    }

    #[test]
    #[should_panic(expected = "stack underflow")]
    fn underflow_is_fatal() {
        pop_context();
    }

    #[test]
    fn allocate_without_context() {
        assert_eq!(try_allocate(8), Err(ArenaError::NoContext));
    }

    #[test]
    #[should_panic(expected = "no allocator context")]
    fn allocate_without_context_is_fatal() {
        allocate(8);
    }

    #[test]
    fn stacks_are_per_thread() {
        let arena = Arena::new();
        push_context(arena.allocator());

        let depth = thread::spawn(|| {
            assert_eq!(current_allocator(), None);
            let other = Arena::new();
            push_context(other.allocator());
            allocate(32);
            context_depth()
        })
        .join()
        .unwrap();

        assert_eq!(depth, 1);
        assert_eq!(current_allocator(), Some(arena.allocator()));
        pop_context();
    }

    #[test]
    fn guards_pop_on_drop() {
        let outer = Arena::new();
        let inner = Arena::new();

        let _outer = enter_context(outer.allocator());
        {
            let _inner = enter_context(inner.allocator());
            assert_eq!(context_depth(), 2);
        }
        assert_eq!(current_allocator(), Some(outer.allocator()));

        let depth = with_allocator(inner.allocator(), || {
            allocate(8);
            context_depth()
        });
        assert_eq!(depth, 2);
        assert_eq!(inner.chunk_count(), 1);
        assert_eq!(context_depth(), 1);
    }

    #[test]
    #[should_panic(expected = "handle used after its arena was dropped")]
    fn dropped_arena_in_context() {
        push_context(Arena::new().allocator());
        allocate(8);
    }

    #[test]
    #[should_panic(expected = "guard dropped out of order")]
    fn guard_dropped_over_newer_context_is_fatal() {
        let outer = Arena::new();
        let inner = Arena::new();

        let guard = enter_context(outer.allocator());
        push_context(inner.allocator());
        drop(guard);
    }

    #[test]
    fn guard_dropped_out_of_order_leaves_stack_untouched() {
        let outer = Arena::new();
        let inner = Arena::new();

        let guard = enter_context(outer.allocator());
        push_context(inner.allocator());

        let result = panic::catch_unwind(AssertUnwindSafe(|| drop(guard)));
        assert!(result.is_err());

        // The newer context is still current and allocations still go to it.
        assert_eq!(context_depth(), 2);
        assert_eq!(current_allocator(), Some(inner.allocator()));
        allocate(16);
        assert_eq!(inner.chunk_count(), 1);
        assert_eq!(outer.chunk_count(), 0);

        assert_eq!(pop_context(), inner.allocator());
        assert_eq!(pop_context(), outer.allocator());
    }

    #[test]
    #[should_panic(expected = "guard dropped out of order")]
    fn guard_checks_depth_not_only_arena() {
        let arena = Arena::new();

        let guard = enter_context(arena.allocator());
        push_context(arena.allocator());
        drop(guard);
    }
}
