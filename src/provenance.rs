//! Debug bookkeeping enabled by the `memory-debug` feature.
//!
//! Every allocation gets a [`ProvenanceHeader`] recording which arena issued
//! it and where it was requested from. The headers live in a side table
//! keyed by address instead of in the chunk, so an address can be checked
//! without reading memory that might already be unmapped.

use std::{
    collections::{HashMap, HashSet},
    ops::Range,
    panic::Location,
    ptr::NonNull,
};

use crate::{
    arena::ArenaId,
    error::{ArenaError, Result},
};

/// Where an allocation comes from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProvenanceHeader {
    /// Arena that issued the allocation.
    pub owner: ArenaId,
    /// Source location of the allocation request.
    pub call_site: &'static Location<'static>,
}

/// Side table of one arena. An address is in at most one of the three
/// sets at any time.
///
/// `released` only shrinks when the arena maps memory over those addresses
/// again, see [`ProvenanceTable::reclaim`]. Its size is therefore bounded by
/// how many distinct addresses the OS hands to this arena over its lifetime.
#[derive(Default)]
pub(crate) struct ProvenanceTable {
    live: HashMap<usize, ProvenanceHeader>,
    returned: HashSet<usize>,
    released: HashSet<usize>,
}

impl ProvenanceTable {
    pub fn record(&mut self, address: NonNull<u8>, header: ProvenanceHeader) {
        let address = address.as_ptr() as usize;
        self.returned.remove(&address);
        self.released.remove(&address);
        self.live.insert(address, header);
    }

    /// Checks that `address` is a live allocation of this arena.
    pub fn check(&self, address: NonNull<u8>) -> Result<ProvenanceHeader> {
        let address = address.as_ptr() as usize;

        if let Some(header) = self.live.get(&address) {
            return Ok(*header);
        }

        Err(if self.returned.contains(&address) {
            ArenaError::DoubleReturn { address }
        } else if self.released.contains(&address) {
            ArenaError::UseAfterRelease { address }
        } else {
            ArenaError::ForeignPointer { address }
        })
    }

    pub fn mark_returned(&mut self, address: NonNull<u8>) {
        let address = address.as_ptr() as usize;
        if self.live.remove(&address).is_some() {
            self.returned.insert(address);
        }
    }

    pub fn trace(&self, address: NonNull<u8>) -> Option<ProvenanceHeader> {
        self.live.get(&(address.as_ptr() as usize)).copied()
    }

    /// Number of live allocations.
    pub fn live(&self) -> usize {
        self.live.len()
    }

    /// Marks every address ever issued as released and returns how many of
    /// them were still live.
    pub fn release(&mut self) -> usize {
        let live = self.live.len();

        self.released.extend(self.live.drain().map(|(address, _)| address));
        self.released.extend(self.returned.drain());

        live
    }

    /// Forgets released addresses inside `range`, which now belongs to a
    /// fresh chunk of this arena. Stale pointers into it can no longer be
    /// told apart from foreign ones.
    pub fn reclaim(&mut self, range: Range<usize>) {
        if !self.released.is_empty() {
            self.released.retain(|address| !range.contains(address));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn address(value: usize) -> NonNull<u8> {
        NonNull::new(value as *mut u8).unwrap()
    }

    #[test]
    fn lifecycle() {
        let owner = crate::Arena::new().id();
        let header = ProvenanceHeader {
            owner,
            call_site: Location::caller(),
        };
        let mut table = ProvenanceTable::default();

        assert_eq!(
            table.check(address(0x10)),
            Err(ArenaError::ForeignPointer { address: 0x10 })
        );

        table.record(address(0x10), header);
        table.record(address(0x20), header);
        assert_eq!(table.check(address(0x10)), Ok(header));
        assert_eq!(table.live(), 2);

        table.mark_returned(address(0x10));
        assert_eq!(
            table.check(address(0x10)),
            Err(ArenaError::DoubleReturn { address: 0x10 })
        );
        assert_eq!(table.trace(address(0x10)), None);

        assert_eq!(table.release(), 1);
        assert_eq!(
            table.check(address(0x10)),
            Err(ArenaError::UseAfterRelease { address: 0x10 })
        );
        assert_eq!(
            table.check(address(0x20)),
            Err(ArenaError::UseAfterRelease { address: 0x20 })
        );

        // Reissued addresses are live again.
        table.record(address(0x20), header);
        assert_eq!(table.trace(address(0x20)), Some(header));
    }

    #[test]
    fn reclaim_forgets_remapped_addresses() {
        let owner = crate::Arena::new().id();
        let header = ProvenanceHeader {
            owner,
            call_site: Location::caller(),
        };
        let mut table = ProvenanceTable::default();

        for value in [0x1008, 0x1800, 0x2008] {
            table.record(address(value), header);
        }
        assert_eq!(table.release(), 3);

        table.reclaim(0x1000..0x2000);

        assert_eq!(
            table.check(address(0x1008)),
            Err(ArenaError::ForeignPointer { address: 0x1008 })
        );
        assert_eq!(
            table.check(address(0x1800)),
            Err(ArenaError::ForeignPointer { address: 0x1800 })
        );
        assert_eq!(
            table.check(address(0x2008)),
            Err(ArenaError::UseAfterRelease { address: 0x2008 })
        );
    }
}
