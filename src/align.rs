use std::mem;

/// Pointer size in bytes on the current machine (or target architecture).
/// Every payload handed out by an arena is aligned to this value.
pub(crate) const POINTER_SIZE: usize = mem::size_of::<usize>();

/// Rounds `size` up to the next multiple of [`POINTER_SIZE`]. Returns `None`
/// if that would overflow, which can only happen for absurd requests.
#[inline]
pub(crate) fn align(size: usize) -> Option<usize> {
    Some(size.checked_add(POINTER_SIZE - 1)? & !(POINTER_SIZE - 1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn word_alignment() {
        let mut alignments = Vec::new();

        for i in 0..10 {
            // On 64 bit machine: (1..8), (9..16), (16..24) and so on.
            let sizes = (POINTER_SIZE * i + 1)..=(POINTER_SIZE * (i + 1));
            // Matching the sizes above, this would be: 8, 16, 24 and so on.
            let expected = POINTER_SIZE * (i + 1);
            alignments.push((sizes, expected));
        }

        for (sizes, expected) in alignments {
            for size in sizes {
                assert_eq!(align(size), Some(expected));
            }
        }
    }

    #[test]
    fn overflowing_sizes() {
        assert_eq!(align(0), Some(0));
        assert_eq!(align(usize::MAX), None);
        assert_eq!(align(usize::MAX - POINTER_SIZE + 1), Some(usize::MAX - POINTER_SIZE + 1));
    }
}
