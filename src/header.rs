use std::ptr::NonNull;

use crate::list::Node;

/// Chunk and block headers are also linked list nodes, so this is just an
/// alias to use when we think about a header rather than a list node.
pub(crate) type Header<T> = Node<T>;

impl<T> Header<T> {
    /// Returns a pointer to the [`Header<T>`] that ends right where `address`
    /// begins.
    ///
    /// ```text
    /// +-------------+
    /// |  Header<T>  | <- Returned address points here.
    /// +-------------+
    /// |   Content   | <- Given address should point here.
    /// +-------------+
    /// |     ...     |
    /// +-------------+
    /// ```
    ///
    /// # Safety
    ///
    /// `address` must point exactly to the first byte after a valid
    /// [`Header<T>`]. For blocks, this is a pointer that the arena handed
    /// out and is now being given back.
    #[inline]
    pub unsafe fn from_content_address(address: NonNull<u8>) -> NonNull<Self> {
        NonNull::new_unchecked(address.as_ptr().cast::<Self>().offset(-1))
    }

    /// Returns the address of the first byte after the header.
    ///
    /// Used as `Header::content_address_of(header)` rather than a method on
    /// `&self` so that no intermediate reference to the header is created.
    ///
    /// # Safety
    ///
    /// `header` must be valid. Writing past the size recorded in the header
    /// corrupts whatever comes next.
    #[inline]
    pub unsafe fn content_address_of(header: NonNull<Self>) -> NonNull<u8> {
        NonNull::new_unchecked(header.as_ptr().offset(1)).cast()
    }
}
