use std::ptr::NonNull;

use cghost::{allocate, context_depth, current_allocator, pop_context, push_context, Arena};

fn print_alloc(addr: NonNull<u8>, size: usize) {
    let arena = current_allocator().map(|handle| handle.arena_id());
    println!("Requested {size} bytes from arena {arena:?} at depth {}", context_depth());
    println!("Received this address: {addr:?}");
}

fn main() {
    let outer = Arena::new();
    let inner = Arena::new();

    push_context(outer.allocator());
    let addr1 = allocate(64);
    print_alloc(addr1, 64);

    println!("\nNow let's install a nested context...");
    push_context(inner.allocator());
    let addr2 = allocate(1024);
    print_alloc(addr2, 1024);

    let addr3 = allocate(128 * 1024);
    print_alloc(addr3, 128 * 1024);

    println!("\nPopping the nested context, allocations go back to the outer arena");
    pop_context();
    let addr4 = allocate(4096);
    print_alloc(addr4, 4096);

    pop_context();

    println!("\nOuter arena: {outer:?}");
    println!("Inner arena: {inner:?}");

    println!("Releasing everything...");
    outer.release();
    inner.release();
    println!("Chunks left: {} and {}", outer.chunk_count(), inner.chunk_count());
}
