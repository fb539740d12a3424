use std::{mem, ptr::NonNull};

use crate::{chunk::Chunk, freelist::FreeListNode, header::Header};

/// Minimum block size in bytes. A returned block stores a [`FreeListNode`]
/// in its content, so it has to fit one.
pub(crate) const MIN_BLOCK_SIZE: usize = mem::size_of::<FreeListNode>();

/// Block header size in bytes. See [`Header<T>`] and [`Block`].
pub(crate) const BLOCK_HEADER_SIZE: usize = mem::size_of::<Header<Block>>();

/// Every allocation handed out by an arena is a block carved out of a chunk.
/// The header sits right before the pointer given to the caller:
///
/// ```text
/// +----------------------------+          <----------------------+
/// | pointer to next block      |   <------+                      |
/// +----------------------------+          | Pointer<Node<Block>> |
/// | pointer to prev block      |   <------+                      |
/// +----------------------------+                                 |
/// | pointer to owning chunk    |   <------+                      | Header<Block>
/// +----------------------------+          |                      |
/// | block size                 |          | Block                |
/// +----------------------------+          |                      |
/// | is free flag + padding     |   <------+                      |
/// +----------------------------+          <----------------------+
/// |       Block content        |   <------+
/// |            ...             |          | Pointer handed to the caller
/// |            ...             |   <------+ points to the first byte.
/// +----------------------------+
/// ```
///
/// Next and previous pointers link the blocks of one chunk in address order,
/// which is what allows merging adjacent free blocks. Header size is a
/// multiple of the word size, so if the header is word aligned the content
/// is word aligned too.
pub(crate) struct Block {
    /// Chunk where this block is located.
    pub chunk: NonNull<Header<Chunk>>,
    /// Size of the block excluding [`Header<Block>`] size.
    pub size: usize,
    /// Whether this block sits in the reuse ledger.
    pub is_free: bool,
}

impl Header<Block> {
    /// Returns the block header of a free list node. See [`FreeListNode`].
    ///
    /// # Safety
    ///
    /// `node` must be a node of some chunk free list.
    #[inline]
    pub unsafe fn from_free_list_node(node: NonNull<FreeListNode>) -> NonNull<Self> {
        Self::from_content_address(node.cast())
    }

    /// Pointer to the chunk that contains this block.
    #[inline]
    pub fn chunk(&self) -> NonNull<Header<Chunk>> {
        self.data.chunk
    }

    #[inline]
    pub fn is_free(&self) -> bool {
        self.data.is_free
    }

    /// Block size excluding [`BLOCK_HEADER_SIZE`].
    #[inline]
    pub fn size(&self) -> usize {
        self.data.size
    }

    /// Total block size including [`BLOCK_HEADER_SIZE`].
    #[inline]
    pub fn total_size(&self) -> usize {
        BLOCK_HEADER_SIZE + self.data.size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::align::POINTER_SIZE;

    #[test]
    fn header_keeps_content_word_aligned() {
        assert_eq!(BLOCK_HEADER_SIZE % POINTER_SIZE, 0);
        assert_eq!(MIN_BLOCK_SIZE % POINTER_SIZE, 0);
        assert_eq!(MIN_BLOCK_SIZE, 2 * POINTER_SIZE);
    }
}
