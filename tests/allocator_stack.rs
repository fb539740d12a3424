//! End to end scenarios for arenas used through the allocator context stack.

use std::ptr::NonNull;

use cghost::{
    allocate, context_depth, create_allocator_handle, create_arena, current_allocator,
    pop_context, push_context, release_arena, return_allocation, AllocatorHandle,
};

/// Growable array of `i32` whose buffer comes from the allocator that was
/// current when it was created.
struct IntArray {
    allocator: AllocatorHandle,
    items: NonNull<i32>,
    count: usize,
    capacity: usize,
}

impl IntArray {
    fn with_capacity(capacity: usize) -> Self {
        let allocator = current_allocator().expect("no allocator installed");
        let items = allocator
            .allocate(capacity * std::mem::size_of::<i32>())
            .cast();

        Self {
            allocator,
            items,
            count: 0,
            capacity,
        }
    }

    fn push(&mut self, value: i32) {
        if self.count == self.capacity {
            self.capacity *= 2;
            let bytes = self.capacity * std::mem::size_of::<i32>();
            self.items = unsafe { self.allocator.reallocate(self.items.cast(), bytes).cast() };
        }

        unsafe { self.items.as_ptr().add(self.count).write(value) };
        self.count += 1;
    }

    fn get(&self, index: usize) -> i32 {
        assert!(index < self.count);
        unsafe { *self.items.as_ptr().add(index) }
    }
}

impl Drop for IntArray {
    fn drop(&mut self) {
        unsafe { self.allocator.return_allocation(self.items.cast()) };
    }
}

#[test]
fn arena_basic_alloc() {
    let arena = create_arena();
    push_context(create_allocator_handle(&arena));

    let first = allocate(100);
    let second = allocate(200);

    unsafe {
        return_allocation(&arena, first);
        return_allocation(&arena, second);
    }
    assert_eq!(arena.chunk_count(), 1);

    let third = allocate(150);
    assert_eq!(arena.chunk_count(), 1);

    unsafe { return_allocation(&arena, third) };
    release_arena(&arena);
    assert!(arena.is_empty());

    pop_context();
}

#[test]
fn allocator_stack() {
    let arena = create_arena();
    push_context(create_allocator_handle(&arena));

    let address = allocate(64);
    unsafe { address.as_ptr().write_bytes(0xFF, 64) };

    pop_context();
    assert_eq!(context_depth(), 0);
    release_arena(&arena);
}

#[test]
fn dynamic_array() {
    let arena = create_arena();
    push_context(create_allocator_handle(&arena));

    let mut array = IntArray::with_capacity(8);
    for i in 0..10 {
        array.push(i * 10);
    }

    assert_eq!(array.count, 10);
    assert_eq!(array.get(9), 90);
    assert_eq!(array.get(0), 0);

    drop(array);
    pop_context();
    release_arena(&arena);
}

fn recursive_scenario(depth: usize, max_depth: usize) {
    let arena = create_arena();
    push_context(create_allocator_handle(&arena));

    for _ in 0..1000 {
        allocate(10 * 1024);
    }

    let arena2 = create_arena();
    push_context(create_allocator_handle(&arena2));

    for _ in 0..1000 {
        allocate(1024);
    }

    let array = (depth % 2 == 0).then(|| {
        let mut array = IntArray::with_capacity(1);
        for i in 0..5 {
            array.push((depth * 100 + i) as i32);
        }
        assert_eq!(array.count, 5);
        array
    });

    assert_eq!(context_depth(), 2 * (depth + 1));

    if depth < max_depth {
        recursive_scenario(depth + 1, max_depth);
    }

    if let Some(array) = &array {
        assert_eq!(array.get(4), (depth * 100 + 4) as i32);
    }
    drop(array);

    assert_eq!(pop_context(), create_allocator_handle(&arena2));
    assert_eq!(pop_context(), create_allocator_handle(&arena));
    release_arena(&arena2);
    release_arena(&arena);
}

#[test]
fn allocator_stack_recursive() {
    recursive_scenario(0, 16);
    assert_eq!(context_depth(), 0);
}

#[cfg(feature = "memory-debug")]
#[test]
fn debug_header() {
    let arena = create_arena();
    let address = arena.allocate(32);

    let header = arena.trace(address).expect("allocation not traced");
    assert_eq!(header.owner, arena.id());
    assert!(header.call_site.file().ends_with("allocator_stack.rs"));

    unsafe { return_allocation(&arena, address) };
    release_arena(&arena);
}
