use std::ptr::NonNull;

use crate::{
    OS_PAGE_SIZE, TableError,
    system::{commit_memory, release_memory, reserve_memory},
};

/// One contiguous reservation shared by both tables.
///
/// ```text
///   start                   split                      end
///     | constants (grow down) | klasses (grow up)        |
///     |<--------------------- |---------------------->   |
/// ```
///
/// The reservation is released when this is dropped, so it must outlive every
/// [`VirtualSpace`] carved out of it.
#[derive(Debug)]
pub struct ReservedRegion {
    start: NonNull<u8>,
    size: usize,
}

// SAFETY: the region is only an address range, access goes through atomics
unsafe impl Send for ReservedRegion {}
// SAFETY: the region is only an address range, access goes through atomics
unsafe impl Sync for ReservedRegion {}

impl ReservedRegion {
    pub fn reserve(size: usize) -> Result<Self, TableError> {
        debug_assert!(size.is_multiple_of(OS_PAGE_SIZE));
        let start = reserve_memory(size)
            .ok_or(TableError::ReserveFailed { bytes: size })?;
        Ok(Self { start, size })
    }

    pub fn start(&self) -> NonNull<u8> {
        self.start
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Splits the reservation at `low_size` bytes. The lower part grows down
    /// from the split point, the upper part grows up from it.
    pub fn split(&self, low_size: usize) -> (VirtualSpace, VirtualSpace) {
        assert!(low_size <= self.size, "split point outside reservation");
        debug_assert!(low_size.is_multiple_of(OS_PAGE_SIZE));
        // SAFETY: low_size <= size
        let split = unsafe { self.start.add(low_size) };
        // SAFETY: one past the end of the reservation
        let end = unsafe { self.start.add(self.size) };
        let low = VirtualSpace::new(self.start, split, true);
        let high = VirtualSpace::new(split, end, false);
        (low, high)
    }
}

impl Drop for ReservedRegion {
    fn drop(&mut self) {
        release_memory(self.start, self.size);
    }
}

/// The part of a [`ReservedRegion`] owned by a single table.
///
/// Committed memory always touches the origin: `low..low + committed` for
/// tables growing up, `high - committed..high` for tables growing down.
#[derive(Debug)]
pub struct VirtualSpace {
    low: NonNull<u8>,
    high: NonNull<u8>,
    committed: usize,
    grows_down: bool,
}

// SAFETY: mutated only under the owning table's growth lock
unsafe impl Send for VirtualSpace {}

impl VirtualSpace {
    fn new(low: NonNull<u8>, high: NonNull<u8>, grows_down: bool) -> Self {
        Self {
            low,
            high,
            committed: 0,
            grows_down,
        }
    }

    /// The fixed address index 0 is measured from.
    pub fn origin(&self) -> NonNull<u8> {
        if self.grows_down { self.high } else { self.low }
    }

    pub fn grows_down(&self) -> bool {
        self.grows_down
    }

    pub fn reserved_size(&self) -> usize {
        self.high.as_ptr() as usize - self.low.as_ptr() as usize
    }

    pub fn committed_size(&self) -> usize {
        self.committed
    }

    pub fn uncommitted_size(&self) -> usize {
        self.reserved_size() - self.committed
    }

    /// Commits the next `bytes` past the current committed edge.
    pub fn expand_by(&mut self, bytes: usize) -> bool {
        if bytes == 0 || bytes > self.uncommitted_size() {
            return false;
        }
        let chunk = if self.grows_down {
            // SAFETY: committed + bytes <= reserved_size
            unsafe { self.high.sub(self.committed + bytes) }
        } else {
            // SAFETY: committed + bytes <= reserved_size
            unsafe { self.low.add(self.committed) }
        };
        // SAFETY: the chunk lies inside this space's reservation
        if !unsafe { commit_memory(chunk, bytes) } {
            return false;
        }
        self.committed += bytes;
        true
    }
}
