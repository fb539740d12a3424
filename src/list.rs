use std::{marker::PhantomData, ptr::NonNull};

use crate::{header::Header, Pointer};

/// Linked list node. See also [`Header<T>`].
pub(crate) struct Node<T> {
    pub next: Pointer<Self>,
    pub prev: Pointer<Self>,
    pub data: T,
}

/// Intrusive doubly linked list. Nodes are never allocated by the list
/// itself, they are written wherever the caller says, which is always
/// somewhere inside a chunk. The list only links them together.
///
/// Arenas use three kinds of lists: the list of chunks of an arena, the list
/// of blocks of a chunk and the free list of a chunk
/// (see [`crate::freelist`]).
pub(crate) struct LinkedList<T> {
    head: Pointer<Node<T>>,
    tail: Pointer<Node<T>>,
    len: usize,
    marker: PhantomData<T>,
}

impl<T> Clone for LinkedList<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for LinkedList<T> {}

impl<T> LinkedList<T> {
    /// Creates an empty linked list.
    pub const fn new() -> Self {
        Self {
            head: None,
            tail: None,
            len: 0,
            marker: PhantomData,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn last(&self) -> Pointer<Node<T>> {
        self.tail
    }

    /// Appends a new node holding `data` at the end of the list. The node is
    /// written to `address`.
    ///
    /// # Safety
    ///
    /// `address` must be valid for writes of a [`Node<T>`] and suitably
    /// aligned. The memory must stay valid while the node is linked.
    pub unsafe fn append(&mut self, data: T, address: NonNull<u8>) -> NonNull<Header<T>> {
        let node = address.cast::<Node<T>>();

        node.as_ptr().write(Node {
            prev: self.tail,
            next: None,
            data,
        });

        if let Some(mut tail) = self.tail {
            tail.as_mut().next = Some(node);
        } else {
            self.head = Some(node);
        }

        self.tail = Some(node);
        self.len += 1;

        node
    }

    /// Inserts a new node holding `data` right after `node`. The new node is
    /// written to `address`.
    ///
    /// # Safety
    ///
    /// `node` must be linked in this list and `address` must satisfy the
    /// same requirements as in [`Self::append`].
    pub unsafe fn insert_after(
        &mut self,
        mut node: NonNull<Node<T>>,
        data: T,
        address: NonNull<u8>,
    ) -> NonNull<Header<T>> {
        let new = address.cast::<Node<T>>();
        let next = node.as_ref().next;

        new.as_ptr().write(Node {
            prev: Some(node),
            next,
            data,
        });

        node.as_mut().next = Some(new);

        match next {
            Some(mut next) => next.as_mut().prev = Some(new),
            None => self.tail = Some(new),
        }

        self.len += 1;

        new
    }

    /// Unlinks `node` from the list. The memory of the node is untouched.
    ///
    /// # Safety
    ///
    /// `node` must be linked in this list.
    pub unsafe fn remove(&mut self, node: NonNull<Node<T>>) {
        let prev = node.as_ref().prev;
        let next = node.as_ref().next;

        match prev {
            Some(mut prev) => prev.as_mut().next = next,
            None => self.head = next,
        }

        match next {
            Some(mut next) => next.as_mut().prev = prev,
            None => self.tail = prev,
        }

        self.len -= 1;
    }

    /// Iterates over the nodes from head to tail. The next link is read
    /// before yielding, so the yielded node may be unlinked (but not
    /// overwritten) while iterating.
    ///
    /// # Safety
    ///
    /// All the nodes must remain valid while the iterator is alive.
    pub unsafe fn iter(&self) -> Iter<T> {
        Iter {
            current: self.head,
            marker: PhantomData,
        }
    }
}

/// See [`LinkedList::iter`].
pub(crate) struct Iter<T> {
    current: Pointer<Node<T>>,
    marker: PhantomData<T>,
}

impl<T> Iterator for Iter<T> {
    type Item = NonNull<Node<T>>;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.current?;
        self.current = unsafe { node.as_ref().next };
        Some(node)
    }
}

#[cfg(test)]
mod tests {
    use std::mem;

    use super::*;

    /// Word aligned scratch memory where the nodes are written.
    fn scratch(nodes: usize) -> Vec<usize> {
        vec![0; nodes * mem::size_of::<Node<u32>>() / mem::size_of::<usize>()]
    }

    unsafe fn slot(memory: *mut usize, index: usize) -> NonNull<u8> {
        let words = mem::size_of::<Node<u32>>() / mem::size_of::<usize>();
        NonNull::new_unchecked(memory.add(index * words).cast())
    }

    unsafe fn values(list: &LinkedList<u32>) -> Vec<u32> {
        list.iter().map(|node| node.as_ref().data).collect()
    }

    #[test]
    fn append_insert_remove() {
        let mut scratch = scratch(4);
        let memory = scratch.as_mut_ptr();
        let mut list = LinkedList::<u32>::new();

        unsafe {
            let first = list.append(1, slot(memory, 0));
            let third = list.append(3, slot(memory, 1));
            assert_eq!(values(&list), [1, 3]);

            let second = list.insert_after(first, 2, slot(memory, 2));
            assert_eq!(values(&list), [1, 2, 3]);

            let fourth = list.insert_after(third, 4, slot(memory, 3));
            assert_eq!(list.last(), Some(fourth));
            assert_eq!(list.len(), 4);

            list.remove(second);
            assert_eq!(values(&list), [1, 3, 4]);

            list.remove(first);
            assert_eq!(values(&list), [3, 4]);

            list.remove(fourth);
            assert_eq!(list.last(), Some(third));

            list.remove(third);
            assert!(list.is_empty());
            assert!(values(&list).is_empty());
            assert_eq!(list.last(), None);
        }
    }
}
