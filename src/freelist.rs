use std::ptr::NonNull;

use crate::{
    block::Block,
    header::Header,
    list::{LinkedList, Node},
};

/// Reuse ledger of one chunk. A returned block doesn't need its content
/// anymore, so the content stores the list node:
///
/// ```text
/// +----------------------------+
/// | pointer to next block      | <--+
/// +----------------------------+    |
/// | pointer to prev block      |    |
/// +----------------------------+    | Node<Block> struct.
/// | chunk, size, free flag     |    |
/// +----------------------------+ <--+
/// | pointer to next free block | <--+
/// +----------------------------+    | Node<()> struct.
/// | pointer to prev free block | <--+
/// +----------------------------+
/// |     Rest of old content    | <--+
/// |          ......            |    | This could be 0 bytes.
/// +----------------------------+ <--+
/// ```
///
/// [`Node<()>`] can only point to other [`Node<()>`], so the free list links
/// block *contents*, not block headers. The header is recovered with
/// [`Header::<Block>::from_free_list_node`].
///
/// Each chunk owns its own free list. The arena scans chunks in creation
/// order and each free list in the order blocks were returned, which is
/// the first fit policy documented in [`crate::Arena::allocate`].
///
/// Nothing else ever points to the content of a free block: the caller gave
/// it back, so any pointer they still hold is a use after free.
pub(crate) type FreeListNode = Node<()>;

/// See [`FreeListNode`].
pub(crate) type FreeList = LinkedList<()>;

impl FreeList {
    /// Adds `block` to the free list and flags it as free.
    ///
    /// # Safety
    ///
    /// `block` must be valid, not free yet and at least
    /// [`crate::block::MIN_BLOCK_SIZE`] bytes long.
    pub unsafe fn append_block(&mut self, mut block: NonNull<Header<Block>>) {
        self.append((), Header::content_address_of(block));
        block.as_mut().data.is_free = true;
    }

    /// Removes `block` from the free list and flags it as used.
    ///
    /// # Safety
    ///
    /// `block` must be linked in this free list.
    pub unsafe fn remove_block(&mut self, mut block: NonNull<Header<Block>>) {
        self.remove(Header::content_address_of(block).cast());
        block.as_mut().data.is_free = false;
    }

    /// Removes `block` from the free list but leaves it flagged as free. Used
    /// for blocks that stop existing (merged into a neighbour or handed back
    /// to the bump area), so that their stale header still reads as free and
    /// returning them again is reported as a double return.
    ///
    /// # Safety
    ///
    /// `block` must be linked in this free list.
    pub unsafe fn unlink_block(&mut self, block: NonNull<Header<Block>>) {
        self.remove(Header::content_address_of(block).cast());
    }

    /// Free list nodes don't point to block headers, so this does the
    /// conversion while iterating.
    ///
    /// # Safety
    ///
    /// See [`LinkedList::iter`].
    pub unsafe fn iter_blocks(&self) -> impl Iterator<Item = NonNull<Header<Block>>> {
        self.iter()
            .map(|node| Header::<Block>::from_free_list_node(node))
    }
}
