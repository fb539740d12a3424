use std::{
    cell::RefCell,
    fmt,
    num::NonZeroU64,
    panic::Location,
    ptr::{self, NonNull},
    rc::Rc,
    sync::atomic::{AtomicU64, Ordering},
};

#[cfg(feature = "memory-debug")]
use crate::provenance::{ProvenanceHeader, ProvenanceTable};
use crate::{
    align::align,
    block::{Block, BLOCK_HEADER_SIZE, MIN_BLOCK_SIZE},
    chunk::{determine_chunk_length, Chunk, CHUNK_HEADER_SIZE},
    config::DEFAULT_CHUNK_SIZE,
    error::{or_fatal, ArenaError, Result},
    freelist::FreeList,
    handle::AllocatorHandle,
    header::Header,
    list::LinkedList,
    platform, Pointer,
};

/// Source of arena identities. Starts at 1 so that every id is non-zero.
static NEXT_ARENA_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of an [`Arena`]. Chunks remember the id of the
/// arena that requested them, which is how pointers given back to the wrong
/// arena are caught.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ArenaId(NonZeroU64);

impl ArenaId {
    fn next() -> Self {
        let id = NEXT_ARENA_ID.fetch_add(1, Ordering::Relaxed);
        Self(NonZeroU64::new(id).unwrap_or(NonZeroU64::MIN))
    }

    /// Numeric value of the id, never 0.
    pub fn get(self) -> u64 {
        self.0.get()
    }
}

impl fmt::Display for ArenaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Arena state. Chunks form a linked list and each chunk carries its own
/// blocks and free list:
///
/// ```text
///                                   Free list of chunk 1
///                              +--------------------------+
///                              |                          |
///           +--------+---------|------------------+       |    +--------+------------------------------+
///           |        | +-------|+    +-------+    +---|---+ |    |        | +-------+    +-------+        |
/// chunks -> | Chunk  | |  Free  | -> | Block | -> | Free  | | -> | Chunk  | | Block | -> | Block | -> ... |
///           |        | +--------+    +-------+    +-------+ |    |        | +-------+    +-------+        |
///           +--------+----------------------------------------+  +--------+------------------------------+
///                                                                     ^
///                                                                     |
///                                                                     +--- Active chunk (bump target).
/// ```
///
/// Needs mutable borrows to operate, so [`Arena`] wraps it in a
/// [`RefCell`]. Handles keep a weak reference to the same cell.
pub(crate) struct InternalArena {
    id: ArenaId,
    /// Minimum usable size of new chunks.
    chunk_size: usize,
    /// Chunks in creation order. The last one is the active chunk.
    chunks: LinkedList<Chunk>,
    #[cfg(feature = "memory-debug")]
    provenance: ProvenanceTable,
}

/// Block size needed to satisfy a request of `size` bytes.
fn block_size_for(size: usize) -> Result<usize> {
    if size == 0 {
        return Err(ArenaError::ZeroSizedAllocation);
    }

    let size = align(size).ok_or(ArenaError::OutOfMemory { requested: size })?;

    Ok(size.max(MIN_BLOCK_SIZE))
}

impl InternalArena {
    fn with_chunk_size(chunk_size: usize) -> Self {
        Self {
            id: ArenaId::next(),
            chunk_size,
            chunks: LinkedList::new(),
            #[cfg(feature = "memory-debug")]
            provenance: ProvenanceTable::default(),
        }
    }

    /// Returns an address where `size` bytes can be written. See
    /// [`Arena::allocate`] for the algorithm.
    #[cfg_attr(not(feature = "memory-debug"), allow(unused_variables))]
    pub fn allocate(
        &mut self,
        size: usize,
        call_site: &'static Location<'static>,
    ) -> Result<NonNull<u8>> {
        let size = block_size_for(size)?;

        let block = unsafe {
            match self.take_free_block(size) {
                Some(block) => block,
                None => self.bump(size)?,
            }
        };

        let address = unsafe { Header::content_address_of(block) };

        #[cfg(feature = "memory-debug")]
        self.provenance.record(
            address,
            ProvenanceHeader {
                owner: self.id,
                call_site,
            },
        );

        tracing::trace!(arena = %self.id, size, ?address, "allocate");

        Ok(address)
    }

    /// Puts the block at `address` in the reuse ledger. Adjacent free blocks
    /// are merged, and free space at the end of the active chunk goes back to
    /// the bump area. Chunks are never released here.
    ///
    /// # Safety
    ///
    /// `address` must have been returned by [`Self::allocate`] or
    /// [`Self::reallocate`] on this arena and not been released since.
    pub unsafe fn return_allocation(&mut self, address: NonNull<u8>) -> Result<()> {
        let block = self.validate(address)?;
        let mut chunk = block.as_ref().chunk();

        chunk.as_mut().data.free_blocks.append_block(block);
        let block = merge_free_blocks_if_possible(block);

        if self.chunks.last() == Some(chunk) && chunk.as_ref().data.blocks.last() == Some(block) {
            chunk.as_mut().data.free_blocks.unlink_block(block);
            Header::<Chunk>::unbump(chunk, block);
        }

        #[cfg(feature = "memory-debug")]
        self.provenance.mark_returned(address);

        tracing::trace!(arena = %self.id, ?address, "return");

        Ok(())
    }

    /// Makes the allocation at `address` hold at least `new_size` bytes. The
    /// block stays where it is if it is already large enough or if it is the
    /// last block of the active chunk and the chunk has room left. Otherwise
    /// the content is moved to a new block and the old one is returned.
    ///
    /// # Safety
    ///
    /// Same as [`Self::return_allocation`].
    pub unsafe fn reallocate(
        &mut self,
        address: NonNull<u8>,
        new_size: usize,
        call_site: &'static Location<'static>,
    ) -> Result<NonNull<u8>> {
        let size = block_size_for(new_size)?;
        let mut block = self.validate(address)?;
        let mut chunk = block.as_ref().chunk();
        let current = block.as_ref().size();

        if current >= size {
            return Ok(address);
        }

        let extra = size - current;
        if self.chunks.last() == Some(chunk)
            && chunk.as_ref().data.blocks.last() == Some(block)
            && chunk.as_ref().remaining() >= extra
        {
            chunk.as_mut().data.used += extra;
            block.as_mut().data.size = size;
            return Ok(address);
        }

        let new_address = self.allocate(new_size, call_site)?;
        ptr::copy_nonoverlapping(address.as_ptr(), new_address.as_ptr(), current);
        self.return_allocation(address)?;

        Ok(new_address)
    }

    /// Gives every chunk back to the OS. The arena can be used again
    /// afterwards, it simply starts from zero chunks.
    pub fn release(&mut self) {
        let chunks = self.chunks.len();

        #[cfg(feature = "memory-debug")]
        {
            let live = self.provenance.release();
            if live > 0 {
                tracing::debug!(arena = %self.id, live, "releasing arena with live allocations");
            }
        }

        unsafe {
            for chunk in self.chunks.iter() {
                let length = chunk.as_ref().total_size();
                platform::return_memory(chunk.cast(), length);
            }
        }

        self.chunks = LinkedList::new();

        if chunks > 0 {
            tracing::debug!(arena = %self.id, chunks, "released arena");
        }
    }

    /// Checks that `address` can be given back to this arena and returns its
    /// block. With `memory-debug` the side table is consulted before touching
    /// the block header, otherwise only the header is checked.
    unsafe fn validate(&self, address: NonNull<u8>) -> Result<NonNull<Header<Block>>> {
        #[cfg(feature = "memory-debug")]
        self.provenance.check(address)?;

        let block = Header::<Block>::from_content_address(address);

        if block.as_ref().chunk().as_ref().data.owner != self.id {
            return Err(ArenaError::ForeignPointer {
                address: address.as_ptr() as usize,
            });
        }

        if block.as_ref().is_free() {
            return Err(ArenaError::DoubleReturn {
                address: address.as_ptr() as usize,
            });
        }

        Ok(block)
    }

    /// First fit over the reuse ledger: chunks in creation order, and within
    /// a chunk blocks in the order they were returned.
    unsafe fn find_free_block(&self, size: usize) -> Pointer<Header<Block>> {
        self.chunks.iter().find_map(|chunk| {
            chunk
                .as_ref()
                .data
                .free_blocks
                .iter_blocks()
                .find(|block| block.as_ref().size() >= size)
        })
    }

    /// Takes a block of at least `size` bytes out of the reuse ledger.
    unsafe fn take_free_block(&mut self, size: usize) -> Pointer<Header<Block>> {
        let block = self.find_free_block(size)?;
        let mut chunk = block.as_ref().chunk();

        split_free_block_if_possible(block, size);
        chunk.as_mut().data.free_blocks.remove_block(block);

        Some(block)
    }

    /// Bump allocates from the active chunk, or from a new chunk if the
    /// active one is full. The space left in a full chunk is not used again.
    unsafe fn bump(&mut self, size: usize) -> Result<NonNull<Header<Block>>> {
        if let Some(block) = self.chunks.last().and_then(|chunk| Header::<Chunk>::bump(chunk, size)) {
            return Ok(block);
        }

        let chunk = self.request_chunk(size)?;

        Header::<Chunk>::bump(chunk, size).ok_or(ArenaError::OutOfMemory { requested: size })
    }

    /// Requests a chunk from the OS where a block of `size` bytes fits, and
    /// makes it the active chunk.
    unsafe fn request_chunk(&mut self, size: usize) -> Result<NonNull<Header<Chunk>>> {
        let length = determine_chunk_length(size, self.chunk_size)
            .ok_or(ArenaError::OutOfMemory { requested: size })?;

        let Some(address) = platform::request_memory(length) else {
            return Err(ArenaError::OutOfMemory { requested: length });
        };

        let chunk = self.chunks.append(
            Chunk {
                owner: self.id,
                blocks: LinkedList::new(),
                free_blocks: FreeList::new(),
                capacity: length - CHUNK_HEADER_SIZE,
                used: 0,
            },
            address,
        );

        #[cfg(feature = "memory-debug")]
        {
            let start = address.as_ptr() as usize;
            self.provenance.reclaim(start..start + length);
        }

        tracing::debug!(arena = %self.id, length, chunks = self.chunks.len(), "requested chunk");

        Ok(chunk)
    }

    fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    fn sum(&self, f: impl Fn(&Header<Chunk>) -> usize) -> usize {
        unsafe { self.chunks.iter().map(|chunk| f(chunk.as_ref())).sum() }
    }
}

impl Drop for InternalArena {
    fn drop(&mut self) {
        self.release();
    }
}

/// Splits `block` in two if what's left after `size` bytes can hold another
/// block. The second half goes to the free list.
///
/// **Before**:
///
/// ```text
///         +-->  +-----------+
///         |     |   Header  | <- H bytes.
/// Block   |     +-----------+
///         |     |  Content  | <- 64 bytes.
///         +-->  +-----------+
/// ```
/// **After**:
///
/// ```text
///         +-->  +-----------+
///         |     |   Header  | <- H bytes.
/// Block 1 |     +-----------+
///         |     |  Content  | <- 8 bytes.
///         +-->  +-----------+
///         |     |   Header  | <- H bytes.
/// Block 2 |     +-----------+
///         |     |  Content  | <- 64 bytes - 8 bytes - H bytes.
///         +-->  +-----------+
/// ```
unsafe fn split_free_block_if_possible(mut block: NonNull<Header<Block>>, size: usize) {
    if block.as_ref().size() < size + BLOCK_HEADER_SIZE + MIN_BLOCK_SIZE {
        return;
    }

    let address = NonNull::new_unchecked(Header::content_address_of(block).as_ptr().add(size));
    let mut chunk = block.as_ref().chunk();

    let remainder = chunk.as_mut().data.blocks.insert_after(
        block,
        Block {
            chunk,
            size: block.as_ref().size() - size - BLOCK_HEADER_SIZE,
            is_free: false,
        },
        address,
    );

    chunk.as_mut().data.free_blocks.append_block(remainder);
    block.as_mut().data.size = size;
}

/// Inverse of [`split_free_block_if_possible`]. Merges `block` with its free
/// neighbours and returns the resulting block, which might start at the
/// previous block.
unsafe fn merge_free_blocks_if_possible(mut block: NonNull<Header<Block>>) -> NonNull<Header<Block>> {
    if block.as_ref().next.is_some_and(|next| next.as_ref().is_free()) {
        merge_next_block(block);
    }

    if let Some(prev) = block.as_ref().prev.filter(|prev| prev.as_ref().is_free()) {
        merge_next_block(prev);
        block = prev;
    }

    block
}

/// Merges the block after `block` into `block`. Both must be free.
///
/// ```text
/// +----------------+---------------+
/// |    Block A     |   Block B     |
/// +----------------+---------------+
///        ^                 |
///        |                 |
///        +-----------------+
///           Merge B into A
/// ```
unsafe fn merge_next_block(mut block: NonNull<Header<Block>>) {
    let next = block.as_ref().next.unwrap_unchecked();
    let mut chunk = block.as_ref().chunk();

    chunk.as_mut().data.free_blocks.unlink_block(next);
    block.as_mut().data.size += next.as_ref().total_size();
    chunk.as_mut().data.blocks.remove(next);
}

/// Region-based allocator. Memory is obtained from the OS in chunks and
/// handed out by bumping an offset; returned allocations are reused within
/// the same arena and everything goes back to the OS at once when the
/// arena is released or dropped.
///
/// All operations take `&self` so that [`AllocatorHandle`]s, which hold a
/// weak reference to the same state, can allocate while the arena is
/// borrowed elsewhere. An arena is neither [`Send`] nor [`Sync`].
///
/// # Examples
///
/// ```rust
/// use cghost::Arena;
///
/// let arena = Arena::new();
///
/// let address = arena.allocate(128);
/// unsafe {
///     address.as_ptr().write_bytes(7, 128);
///     arena.return_allocation(address);
/// }
///
/// // Returning doesn't release chunks, only releasing does.
/// assert_eq!(arena.chunk_count(), 1);
/// arena.release();
/// assert_eq!(arena.chunk_count(), 0);
/// ```
pub struct Arena {
    arena: Rc<RefCell<InternalArena>>,
}

impl Arena {
    /// Creates an empty arena. No memory is requested until the first
    /// allocation.
    pub fn new() -> Self {
        Self::with_chunk_size(DEFAULT_CHUNK_SIZE)
    }

    /// Creates an empty arena whose chunks hold at least `chunk_size` bytes.
    /// Chunks are always rounded up to whole pages.
    pub fn with_chunk_size(chunk_size: usize) -> Self {
        Self {
            arena: Rc::new(RefCell::new(InternalArena::with_chunk_size(chunk_size))),
        }
    }

    pub fn id(&self) -> ArenaId {
        self.arena.borrow().id
    }

    /// Minimum usable size of the chunks of this arena.
    pub fn chunk_size(&self) -> usize {
        self.arena.borrow().chunk_size
    }

    /// Builds a handle bound to this arena. See [`AllocatorHandle`].
    pub fn allocator(&self) -> AllocatorHandle {
        AllocatorHandle::new(Rc::downgrade(&self.arena), self.id())
    }

    /// Allocates `size` bytes. The returned address is word aligned and
    /// stays valid until it's returned or the arena is released.
    ///
    /// Returned allocations are reused first, with a first fit policy:
    /// chunks are scanned in creation order, and the free blocks of each
    /// chunk in the order they were returned. Large free blocks are split.
    /// If nothing fits, the active chunk is bumped, and if the active chunk
    /// is full a new chunk of `max(size, chunk_size)` bytes is requested.
    ///
    /// # Panics
    ///
    /// If `size` is 0 or the OS refuses to give us more memory. See
    /// [`Self::try_allocate`] for the fallible version.
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
        self.arena.borrow_mut().allocate(size, call_site)
    }

    /// Gives `address` back to the arena for reuse. The chunk that contains
    /// it is not released.
    ///
    /// # Safety
    ///
    /// `address` must have been allocated by this arena, must not have been
    /// returned already and the arena must not have been released since.
    /// Some violations are detected (pointers of other arenas, double
    /// returns, and with `memory-debug` use after release), but callers
    /// cannot rely on that.
    ///
    /// # Panics
    ///
    /// When a violation is detected.
    #[track_caller]
    pub unsafe fn return_allocation(&self, address: NonNull<u8>) {
        or_fatal(self.try_return_allocation(address))
    }

    /// Fallible version of [`Self::return_allocation`].
    ///
    /// # Safety
    ///
    /// See [`Self::return_allocation`].
    pub unsafe fn try_return_allocation(&self, address: NonNull<u8>) -> Result<()> {
        self.arena.borrow_mut().return_allocation(address)
    }

    /// Grows or shrinks the allocation at `address` to `new_size` bytes. The
    /// content is preserved up to the smaller of both sizes. The returned
    /// address replaces `address`, which must not be used anymore.
    ///
    /// # Safety
    ///
    /// See [`Self::return_allocation`].
    #[track_caller]
    pub unsafe fn reallocate(&self, address: NonNull<u8>, new_size: usize) -> NonNull<u8> {
        or_fatal(self.try_reallocate(address, new_size))
    }

    /// Fallible version of [`Self::reallocate`].
    ///
    /// # Safety
    ///
    /// See [`Self::return_allocation`].
    #[track_caller]
    pub unsafe fn try_reallocate(&self, address: NonNull<u8>, new_size: usize) -> Result<NonNull<u8>> {
        self.reallocate_at(address, new_size, Location::caller())
    }

    pub(crate) unsafe fn reallocate_at(
        &self,
        address: NonNull<u8>,
        new_size: usize,
        call_site: &'static Location<'static>,
    ) -> Result<NonNull<u8>> {
        self.arena.borrow_mut().reallocate(address, new_size, call_site)
    }

    /// Releases every chunk and resets the arena to the empty state. Every
    /// address issued by this arena becomes invalid, including returned ones.
    pub fn release(&self) {
        self.arena.borrow_mut().release();
    }

    /// Number of chunks currently owned by the arena.
    pub fn chunk_count(&self) -> usize {
        self.arena.borrow().chunk_count()
    }

    /// Whether the arena owns no chunks at all.
    pub fn is_empty(&self) -> bool {
        self.arena.borrow().chunks.is_empty()
    }

    /// Usable bytes of all chunks, excluding chunk headers.
    pub fn capacity(&self) -> usize {
        self.arena.borrow().sum(|chunk| chunk.capacity())
    }

    /// Bytes already carved into blocks in all chunks, block headers
    /// included.
    pub fn used(&self) -> usize {
        self.arena.borrow().sum(|chunk| chunk.used())
    }

    /// Bytes that can still be bump allocated from the active chunk, block
    /// headers included.
    pub fn remaining(&self) -> usize {
        let arena = self.arena.borrow();
        arena
            .chunks
            .last()
            .map_or(0, |chunk| unsafe { chunk.as_ref().remaining() })
    }

    /// Number of blocks sitting in the reuse ledger.
    pub fn free_block_count(&self) -> usize {
        self.arena.borrow().sum(|chunk| chunk.data.free_blocks.len())
    }

    /// Provenance of the live allocation at `address`, if there is one.
    #[cfg(feature = "memory-debug")]
    pub fn trace(&self, address: NonNull<u8>) -> Option<ProvenanceHeader> {
        self.arena.borrow().provenance.trace(address)
    }

    /// Number of allocations that have not been returned yet.
    #[cfg(feature = "memory-debug")]
    pub fn live_allocations(&self) -> usize {
        self.arena.borrow().provenance.live()
    }
}

impl Default for Arena {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Arena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Arena")
            .field("id", &self.id())
            .field("chunks", &self.chunk_count())
            .field("capacity", &self.capacity())
            .field("used", &self.used())
            .finish()
    }
}
