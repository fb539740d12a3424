//! Build-time configuration. Values are read from the environment of the
//! compiler process, so they can be overridden without touching the code:
//!
//! ```text
//! CGHOST_ALLOCATOR_STACK_SIZE=128 CGHOST_CHUNK_SIZE=1048576 cargo build
//! ```
//!
//! Invalid values (empty, non numeric or zero) fail the build.

/// Context stack depth used when `CGHOST_ALLOCATOR_STACK_SIZE` is not set.
pub const DEFAULT_ALLOCATOR_STACK_SIZE: usize = 64;

/// Maximum nesting depth of the allocator context stack of each thread. See
/// [`crate::ContextStack`].
pub const ALLOCATOR_STACK_SIZE: usize = match option_env!("CGHOST_ALLOCATOR_STACK_SIZE") {
    Some(value) => parse_positive(value),
    None => DEFAULT_ALLOCATOR_STACK_SIZE,
};

/// Minimum usable size in bytes of every chunk requested by an arena, unless
/// the arena was built with [`crate::Arena::with_chunk_size`]. Larger
/// allocations get a chunk of their own size. Override with
/// `CGHOST_CHUNK_SIZE`.
pub const DEFAULT_CHUNK_SIZE: usize = match option_env!("CGHOST_CHUNK_SIZE") {
    Some(value) => parse_positive(value),
    None => 64 * 1024,
};

/// Parses a decimal, non-zero integer at compile time.
const fn parse_positive(value: &str) -> usize {
    let bytes = value.as_bytes();
    assert!(!bytes.is_empty(), "cghost configuration value is empty");

    let mut number: usize = 0;
    let mut i = 0;

    while i < bytes.len() {
        assert!(bytes[i].is_ascii_digit(), "cghost configuration value is not a number");
        let digit = (bytes[i] - b'0') as usize;
        number = match number.checked_mul(10) {
            Some(n) => match n.checked_add(digit) {
                Some(n) => n,
                None => panic!("cghost configuration value is too large"),
            },
            None => panic!("cghost configuration value is too large"),
        };
        i += 1;
    }

    assert!(number > 0, "cghost configuration value must be greater than zero");

    number
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_decimal_values() {
        assert_eq!(parse_positive("64"), 64);
        assert_eq!(parse_positive("1"), 1);
        assert_eq!(parse_positive("0065536"), 65536);
    }

    #[test]
    #[should_panic(expected = "greater than zero")]
    fn rejects_zero() {
        parse_positive("0");
    }

    #[test]
    #[should_panic(expected = "not a number")]
    fn rejects_garbage() {
        parse_positive("12kb");
    }

    #[test]
    #[should_panic(expected = "too large")]
    fn rejects_overflow() {
        parse_positive("99999999999999999999999999");
    }
}
