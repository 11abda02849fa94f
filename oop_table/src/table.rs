//! Growable slot table shared by the klass and constant tables.
//!
//! A table owns one [`VirtualSpace`] and measures every slot from the space's
//! origin. Indices are magnitudes internally ("raw" indices); tables growing
//! down expose them negated, so `base + index * 8` addresses the slot in both
//! directions.
//!
//! Reads are plain atomic loads. Allocation is delegated to an
//! [`AllocationPolicy`], which claims slots with CAS and only takes the growth
//! lock when it needs slots beyond `top_table_index`.

use std::{
    fmt,
    ops::Range,
    ptr::NonNull,
    sync::atomic::{AtomicU8, AtomicUsize, Ordering},
};

use parking_lot::Mutex;

use crate::{ManagedRef, Slot, TableError, VirtualSpace, fatal};

const SLOT_SIZE: usize = size_of::<Slot>();

/// Liveness oracle supplied by the collector.
pub type IsAliveFn<'a> = &'a (dyn Fn(ManagedRef) -> bool + Sync);

/// Decides where new entries go.
pub trait AllocationPolicy: Sized + Send + Sync {
    /// Name used in diagnostics.
    const NAME: &'static str;
    const GROWS_DOWN: bool;

    /// Stores `value` and returns its raw index.
    fn put(table: &SlotTable<Self>, value: ManagedRef) -> Result<usize, TableError>;

    fn free(table: &SlotTable<Self>, raw: usize) {
        table.raw_slot(raw).clear();
    }
}

/// Lifecycle of a table. Before construction there is no table at all, so
/// the first observable state is `Reserved`: address space owned, nothing
/// committed yet.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableState {
    Reserved = 0,
    Active = 1,
    Growing = 2,
}

impl From<u8> for TableState {
    fn from(val: u8) -> Self {
        match val {
            1 => TableState::Active,
            2 => TableState::Growing,
            _ => TableState::Reserved,
        }
    }
}

/// A contiguous share of a table's used index range, processed by one GC
/// worker at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Section {
    pub index: usize,
    pub count: usize,
}

impl Section {
    pub const WHOLE: Section = Section { index: 0, count: 1 };

    pub fn new(index: usize, count: usize) -> Self {
        assert!(index < count, "section {index} out of {count}");
        Self { index, count }
    }

    /// Raw indices `1..=len` split into `count` even chunks, the first
    /// `len % count` chunks one larger.
    pub fn range(self, len: usize) -> Range<usize> {
        let base = len / self.count;
        let extra = len % self.count;
        let start = self.index * base + self.index.min(extra);
        let size = base + usize::from(self.index < extra);
        (start + 1)..(start + size + 1)
    }
}

pub struct SlotTable<P: AllocationPolicy> {
    base: NonNull<Slot>,
    growth_size: usize,
    max_index: usize,
    /// The growth lock. Guards committing and the state transition to `Growing`.
    space: Mutex<VirtualSpace>,
    state: AtomicU8,
    // These values are always positive, even when the table grows down.
    /// Slots committed so far.
    top_committed: AtomicUsize,
    /// Raw indices below this are usable. Power of two until capped at `max_index`.
    top_table: AtomicUsize,
    /// Highest raw index ever handed out.
    top_dispensed: AtomicUsize,
    policy: P,
}

// SAFETY: all shared state is atomic or behind the growth lock
unsafe impl<P: AllocationPolicy> Send for SlotTable<P> {}
// SAFETY: all shared state is atomic or behind the growth lock
unsafe impl<P: AllocationPolicy> Sync for SlotTable<P> {}

impl<P: AllocationPolicy> SlotTable<P> {
    pub fn new(
        space: VirtualSpace,
        growth_size: usize,
        initial_top: usize,
        initial_dispensed: usize,
        policy: P,
    ) -> Result<Self, TableError> {
        debug_assert_eq!(space.grows_down(), P::GROWS_DOWN);
        debug_assert_eq!(space.committed_size(), 0, "space should be unused");
        debug_assert!(initial_dispensed < initial_top);

        let max_index = space.reserved_size() / SLOT_SIZE;
        let base = space.origin().cast::<Slot>();
        let table = Self {
            base,
            growth_size,
            max_index,
            space: Mutex::new(space),
            state: AtomicU8::new(TableState::Reserved as u8),
            top_committed: AtomicUsize::new(0),
            top_table: AtomicUsize::new(initial_top.min(max_index)),
            top_dispensed: AtomicUsize::new(initial_dispensed),
            policy,
        };

        {
            let mut space = table.space.lock();
            let top = table.top_table.load(Ordering::Relaxed);
            table.commit_to(&mut space, top)?;
        }
        table.set_state(TableState::Active);
        log::info!(
            "{}: active at {:p}, {} of {} slots committed",
            P::NAME,
            base,
            table.top_committed_index(),
            max_index
        );
        Ok(table)
    }

    #[inline]
    pub fn name(&self) -> &'static str {
        P::NAME
    }

    #[inline]
    pub fn policy(&self) -> &P {
        &self.policy
    }

    pub fn state(&self) -> TableState {
        TableState::from(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: TableState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Used as a fixed base register by generated code.
    #[inline]
    pub fn table_base(&self) -> *const Slot {
        self.base.as_ptr()
    }

    #[inline]
    pub fn max_index(&self) -> usize {
        self.max_index
    }

    #[inline]
    pub fn top_committed_index(&self) -> usize {
        self.top_committed.load(Ordering::Acquire)
    }

    #[inline]
    pub fn top_table_index(&self) -> usize {
        self.top_table.load(Ordering::Acquire)
    }

    #[inline]
    pub fn top_dispensed_index(&self) -> usize {
        self.top_dispensed.load(Ordering::Acquire)
    }

    #[inline]
    fn signed(raw: usize) -> isize {
        if P::GROWS_DOWN { -(raw as isize) } else { raw as isize }
    }

    #[inline]
    fn magnitude(index: isize) -> Option<usize> {
        let raw = if P::GROWS_DOWN { -index } else { index };
        usize::try_from(raw).ok()
    }

    /// True if index is in the used range. Doesn't check the entry itself.
    #[inline]
    pub fn is_valid_index(&self, index: isize) -> bool {
        Self::magnitude(index)
            .is_some_and(|raw| raw >= 1 && raw <= self.top_dispensed_index())
    }

    /// The index of the entry in lowest memory.
    pub fn lowest_used_index(&self) -> isize {
        if P::GROWS_DOWN {
            Self::signed(self.top_dispensed_index())
        } else {
            1
        }
    }

    /// The index of the entry in highest memory.
    pub fn highest_used_index(&self) -> isize {
        if P::GROWS_DOWN {
            -1
        } else {
            Self::signed(self.top_dispensed_index())
        }
    }

    /// Slot at a raw index. Must be committed.
    #[inline(always)]
    pub(crate) fn raw_slot(&self, raw: usize) -> &Slot {
        debug_assert!(
            if P::GROWS_DOWN {
                raw <= self.top_committed_index()
            } else {
                raw < self.top_committed_index()
            },
            "{}: raw index {raw} not committed",
            P::NAME
        );
        // SAFETY: committed slots stay mapped for the life of the table
        unsafe { &*self.base.as_ptr().offset(Self::signed(raw)) }
    }

    /// Address of the slot at `index`. Index 0 is the shared null slot.
    #[inline]
    pub fn get_addr(&self, index: isize) -> &Slot {
        debug_assert!(
            index == 0 || self.is_valid_index(index),
            "{}: index {index} out of range",
            P::NAME
        );
        // SAFETY: valid indices are committed
        unsafe { &*self.base.as_ptr().offset(index) }
    }

    #[inline]
    pub fn get(&self, index: isize) -> ManagedRef {
        if index == 0 {
            return ManagedRef::NULL;
        }
        self.get_addr(index).load()
    }

    pub fn try_put(&self, value: ManagedRef) -> Result<isize, TableError> {
        debug_assert!(value.not_null(), "null cannot be added to {}", P::NAME);
        P::put(self, value).map(Self::signed)
    }

    /// Adds `value` and returns its index. Running out of ids is fatal.
    pub fn put(&self, value: ManagedRef) -> isize {
        self.try_put(value).unwrap_or_else(|err| fatal(err))
    }

    pub fn free(&self, index: isize) {
        debug_assert!(self.is_valid_index(index));
        if let Some(raw) = Self::magnitude(index) {
            P::free(self, raw);
        }
    }

    /// Raises `top_dispensed_index` to at least `raw`. Racing threads settle
    /// on the maximum.
    pub(crate) fn note_dispensed(&self, raw: usize) {
        debug_assert!(raw < self.top_table_index());
        self.top_dispensed.fetch_max(raw, Ordering::AcqRel);
    }

    pub(crate) fn exhausted(&self) -> TableError {
        TableError::Exhausted {
            table: P::NAME,
            top_index: self.top_dispensed_index(),
            max_index: self.max_index,
        }
    }

    /// Grows until `raw` is below `top_table_index`. Threads that lose the
    /// race for the lock find the work already done.
    pub(crate) fn ensure_table_index(&self, raw: usize) -> Result<(), TableError> {
        while self.top_table_index() <= raw {
            let mut space = self.space.lock();
            if self.top_table_index() <= raw {
                self.grow_locked(&mut space)?;
            }
        }
        Ok(())
    }

    /// Doubles `top_table_index`, committing as much memory as that needs.
    pub fn grow(&self) -> Result<(), TableError> {
        let mut space = self.space.lock();
        self.grow_locked(&mut space)
    }

    fn grow_locked(&self, space: &mut VirtualSpace) -> Result<(), TableError> {
        let top_table = self.top_table.load(Ordering::Relaxed);
        if top_table >= self.max_index {
            return Err(self.exhausted());
        }
        let new_top = (top_table * 2).min(self.max_index);

        self.set_state(TableState::Growing);
        let committed = self.commit_to(space, new_top);
        self.set_state(TableState::Active);
        committed?;

        self.top_table.store(new_top, Ordering::Release);
        log::debug!(
            "{}: grew top table index {} -> {}, committed {}",
            P::NAME,
            top_table,
            new_top,
            self.top_committed_index()
        );
        Ok(())
    }

    /// Commits growth sized chunks until `top` slots are backed.
    fn commit_to(
        &self,
        space: &mut VirtualSpace,
        top: usize,
    ) -> Result<(), TableError> {
        let mut committed = self.top_committed.load(Ordering::Relaxed);
        while top > committed {
            let grow_by = self.growth_size.min(space.uncommitted_size());
            if grow_by == 0 || !space.expand_by(grow_by) {
                return Err(TableError::CommitFailed {
                    table: P::NAME,
                    bytes: grow_by,
                });
            }
            committed += grow_by / SLOT_SIZE;
            self.top_committed.store(committed, Ordering::Release);
        }
        Ok(())
    }

    /// Counts non-null entries. For diagnostics, racy against mutation.
    pub fn population(&self) -> usize {
        (1..=self.top_dispensed_index())
            .filter(|&raw| self.raw_slot(raw).load().not_null())
            .count()
    }

    /// Calls `visitor` with every non-null slot. The visitor may store a
    /// relocated reference. Only safe while nothing unlinks concurrently.
    pub fn oops_do(&self, visitor: &mut dyn FnMut(&Slot)) {
        for raw in 1..=self.top_dispensed_index() {
            let slot = self.raw_slot(raw);
            if slot.load().not_null() {
                visitor(slot);
            }
        }
    }

    /// Clears every entry whose referent is dead. Returns the number cleared.
    pub fn unlink(&self, is_alive: IsAliveFn<'_>) -> usize {
        let top = self.top_dispensed_index();
        self.unlink_section(Section::WHOLE, top, is_alive, &mut |_| {})
    }

    /// Clears dead entries in one section of `1..=top`. Survivors are handed
    /// to `mark_live` so the collector can mark through or remap them in place.
    ///
    /// `top` is a `top_dispensed_index` snapshot taken once by the
    /// coordinator and shared by every section of the cycle, so the sections
    /// partition the same range while mutators keep adding entries. Entries
    /// dispensed above it are younger than the cycle and are skipped.
    pub fn unlink_section(
        &self,
        section: Section,
        top: usize,
        is_alive: IsAliveFn<'_>,
        mark_live: &mut dyn FnMut(&Slot),
    ) -> usize {
        debug_assert!(top <= self.top_dispensed_index(), "frontier from the future");
        self.unlink_range(section.range(top), is_alive, mark_live)
    }

    fn unlink_range(
        &self,
        range: Range<usize>,
        is_alive: IsAliveFn<'_>,
        mark_live: &mut dyn FnMut(&Slot),
    ) -> usize {
        let mut cleared = 0;
        for raw in range.clone() {
            let slot = self.raw_slot(raw);
            let value = slot.load();
            if value.is_null() {
                continue;
            }
            if is_alive(value) {
                mark_live(slot);
            } else {
                P::free(self, raw);
                cleared += 1;
            }
        }
        log::trace!("{}: unlinked {cleared} in {range:?}", P::NAME);
        cleared
    }

    /// Splits the used range into `workers` sections and unlinks them on
    /// scoped threads.
    pub fn unlink_parallel(&self, workers: usize, is_alive: IsAliveFn<'_>) -> usize {
        self.unlink_parallel_to(workers, self.top_dispensed_index(), is_alive)
    }

    /// [`SlotTable::unlink_parallel`] over `1..=top`, a frontier snapshot
    /// taken by the caller.
    pub fn unlink_parallel_to(
        &self,
        workers: usize,
        top: usize,
        is_alive: IsAliveFn<'_>,
    ) -> usize {
        debug_assert!(top <= self.top_dispensed_index(), "frontier from the future");
        let workers = workers.max(1);
        std::thread::scope(|scope| {
            let handles = (0..workers)
                .map(|index| {
                    let range = Section::new(index, workers).range(top);
                    scope.spawn(move || {
                        self.unlink_range(range, is_alive, &mut |_| {})
                    })
                })
                .collect::<Vec<_>>();
            handles
                .into_iter()
                .map(|handle| {
                    handle
                        .join()
                        .unwrap_or_else(|payload| std::panic::resume_unwind(payload))
                })
                .sum()
        })
    }

    pub fn print(&self) {
        println!("{self}");
    }
}

impl<P: AllocationPolicy> fmt::Display for SlotTable<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{}: top dispensed index = {}",
            P::NAME,
            self.top_dispensed_index()
        )?;
        write!(f, "{}: population = {}", P::NAME, self.population())
    }
}

impl<P: AllocationPolicy> fmt::Debug for SlotTable<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(P::NAME)
            .field("base", &self.base)
            .field("state", &self.state())
            .field("top_committed", &self.top_committed_index())
            .field("top_table", &self.top_table_index())
            .field("top_dispensed", &self.top_dispensed_index())
            .field("max_index", &self.max_index)
            .finish()
    }
}
