use std::{mem, ptr::NonNull};

use crate::{
    arena::ArenaId,
    block::{Block, BLOCK_HEADER_SIZE},
    freelist::FreeList,
    header::Header,
    list::LinkedList,
    platform::page_size,
    Pointer,
};

/// Chunk header size in bytes. See [`Header<T>`] and [`Chunk`].
pub(crate) const CHUNK_HEADER_SIZE: usize = mem::size_of::<Header<Chunk>>();

/// A contiguous memory region obtained from the OS, the unit of growth of an
/// arena. The header lives at the beginning of the region and the rest is
/// bump allocated:
///
/// ```text
/// +--------+---------------------------------------+------------------+
/// |        | +-------+    +-------+    +-------+   |                  |
/// | Chunk  | | Block | -> | Free  | -> | Block |   |  Not used yet    |
/// |        | +-------+    +-------+    +-------+   |                  |
/// +--------+---------------------------------------+------------------+
///          ^                                       ^                  ^
///          |                                       |                  |
///          +--- content address                    +--- used          +--- capacity
/// ```
///
/// Chunks of one arena are not adjacent, `mmap` places them wherever it
/// wants, so they are kept in a linked list in creation order. The last one
/// is the active chunk, the only one that still bump allocates. Blocks tile
/// `[0, used)` without gaps, and free blocks are also linked in the chunk's
/// [`FreeList`].
pub(crate) struct Chunk {
    /// Arena that requested this chunk.
    pub owner: ArenaId,
    /// All blocks carved out of this chunk, in address order.
    pub blocks: LinkedList<Block>,
    /// Blocks of this chunk that were returned and can be reused.
    pub free_blocks: FreeList,
    /// Size of the chunk excluding [`Header<Chunk>`] size. Never changes.
    pub capacity: usize,
    /// Bump offset, bytes from the content address already carved into
    /// blocks. Always `<= capacity`.
    pub used: usize,
}

impl Header<Chunk> {
    /// Chunk size excluding [`CHUNK_HEADER_SIZE`].
    #[inline]
    pub fn capacity(&self) -> usize {
        self.data.capacity
    }

    #[inline]
    pub fn used(&self) -> usize {
        self.data.used
    }

    /// Bytes that can still be bump allocated, headers included.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.data.capacity - self.data.used
    }

    /// Chunk size including [`CHUNK_HEADER_SIZE`]. This is the length that
    /// was requested from the OS.
    #[inline]
    pub fn total_size(&self) -> usize {
        CHUNK_HEADER_SIZE + self.data.capacity
    }

    /// Carves a new block of `size` bytes right after the last one. Returns
    /// `None` if the block and its header don't fit.
    ///
    /// # Safety
    ///
    /// `chunk` must be valid and `size` word aligned.
    pub unsafe fn bump(mut chunk: NonNull<Self>, size: usize) -> Pointer<Header<Block>> {
        let total = BLOCK_HEADER_SIZE.checked_add(size)?;
        if chunk.as_ref().remaining() < total {
            return None;
        }

        let used = chunk.as_ref().used();
        let address = NonNull::new_unchecked(Header::content_address_of(chunk).as_ptr().add(used));

        let block = chunk.as_mut().data.blocks.append(
            Block {
                chunk,
                size,
                is_free: false,
            },
            address,
        );

        chunk.as_mut().data.used += total;

        Some(block)
    }

    /// Gives the last block of the chunk back to the bump area.
    ///
    /// # Safety
    ///
    /// `block` must be the last block of `chunk` and must not be linked in
    /// the free list.
    pub unsafe fn unbump(mut chunk: NonNull<Self>, block: NonNull<Header<Block>>) {
        debug_assert_eq!(chunk.as_ref().data.blocks.last(), Some(block));

        chunk.as_mut().data.used -= block.as_ref().total_size();
        chunk.as_mut().data.blocks.remove(block);
    }
}

/// Calculates the length that we should request from the OS to get a chunk
/// that can hold a block of `size` bytes. The chunk is never smaller than
/// `chunk_size` usable bytes and its length is rounded up to whole pages.
/// Returns `None` on arithmetic overflow.
///
/// # Arguments
///
/// * `size` - Block size without header, already aligned.
///
/// * `chunk_size` - Minimum usable size configured for the arena.
pub(crate) fn determine_chunk_length(size: usize, chunk_size: usize) -> Option<usize> {
    let content = BLOCK_HEADER_SIZE.checked_add(size)?.max(chunk_size);
    let total = CHUNK_HEADER_SIZE.checked_add(content)?;

    // Force round up. If we want to store 4104 bytes and page size is 4096
    // bytes, then we'll request 2 pages (8192 bytes).
    let page = page_size();
    Some(total.checked_add(page - 1)? / page * page)
}
