use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use crate::{
    AllocationPolicy, ManagedRef, ObjectModel, Section, SlotTable, TableError,
    TableSettings, VirtualSpace, fatal,
};

/// Klass table: kids are assigned linearly, lowest free first. Grows toward
/// high memory.
pub type ClassTable = SlotTable<LinearScan>;

pub struct LinearScan {
    /// Lower bound for the first free kid.
    first_free: AtomicUsize,
    max_reserved_kid: usize,
    model: Arc<dyn ObjectModel>,
}

impl AllocationPolicy for LinearScan {
    const NAME: &'static str = "KlassTable";
    const GROWS_DOWN: bool = false;

    fn put(table: &ClassTable, value: ManagedRef) -> Result<usize, TableError> {
        loop {
            let kid = table.find_free_raw()?;
            if table.raw_slot(kid).claim(value) {
                return Ok(kid);
            }
        }
    }

    fn free(table: &ClassTable, raw: usize) {
        table.raw_slot(raw).clear();
        let policy = table.policy();
        // reserved kids are only ever rebound, never dispensed
        if raw > policy.max_reserved_kid {
            // racing frees settle on the lowest kid
            policy.first_free.fetch_min(raw, Ordering::AcqRel);
        }
    }
}

impl SlotTable<LinearScan> {
    pub fn with_settings(
        space: VirtualSpace,
        settings: &TableSettings,
        model: Arc<dyn ObjectModel>,
    ) -> Result<Self, TableError> {
        let reserved = settings.max_reserved_kid as usize;
        let policy = LinearScan {
            first_free: AtomicUsize::new(reserved + 1),
            max_reserved_kid: reserved,
            model,
        };
        // reserved kids count as dispensed from the start
        SlotTable::new(space, settings.growth_size, reserved + 1, reserved, policy)
    }

    fn find_free_raw(&self) -> Result<usize, TableError> {
        // most often first == top dispensed + 1
        let first = self.policy().first_free.load(Ordering::Acquire);
        let last = self.top_dispensed_index();

        for kid in first..=last {
            if self.raw_slot(kid).load().is_null() {
                self.advance_hint(first, kid);
                return Ok(kid);
            }
        }

        let kid = last + 1;
        if kid >= self.max_index() || kid > u32::MAX as usize {
            return Err(self.exhausted());
        }
        self.advance_hint(first, kid);
        self.ensure_table_index(kid)?;
        self.note_dispensed(kid);
        Ok(kid)
    }

    /// Moves the hint from `first` past `kid` after `first..kid` was seen full.
    ///
    /// A failed CAS means someone else moved it. A free racing with the scan
    /// clears its slot before retracting the hint, so once the CAS lands any
    /// slot it emptied in `first..kid` is visible and the hint drops back.
    fn advance_hint(&self, first: usize, kid: usize) {
        let first_free = &self.policy().first_free;
        if first_free
            .compare_exchange(first, kid + 1, Ordering::AcqRel, Ordering::Relaxed)
            .is_err()
        {
            return;
        }
        if let Some(freed) =
            (first..kid).find(|&raw| self.raw_slot(raw).load().is_null())
        {
            first_free.fetch_min(freed, Ordering::AcqRel);
        }
    }

    /// The kid the next registration would get, without claiming it or moving
    /// the hint. Another thread may take it first.
    pub fn find_free_kid(&self) -> u32 {
        let first = self.policy().first_free.load(Ordering::Acquire);
        let last = self.top_dispensed_index();
        let kid = (first..=last)
            .find(|&kid| self.raw_slot(kid).load().is_null())
            .unwrap_or(last + 1);
        kid as u32
    }

    /// Binds a bootstrap klass to one of the reserved kids.
    pub fn bind_reserved_klass_id(&self, klass: ManagedRef, kid: u32) {
        let policy = self.policy();
        assert!(
            kid >= 1 && kid as usize <= policy.max_reserved_kid,
            "can only bind reserved kids, got {kid}"
        );
        policy.model.set_klass_id(klass, kid);
        self.raw_slot(kid as usize).store(klass);
    }

    pub fn try_register_klass(&self, klass: ManagedRef) -> Result<u32, TableError> {
        let model = &self.policy().model;
        debug_assert!(model.is_klass(klass), "registering a non klass");
        let kid = self.try_put(klass)? as u32;
        model.set_klass_id(klass, kid);
        Ok(kid)
    }

    /// Adds a klass and records the kid in the klass itself.
    pub fn register_klass(&self, klass: ManagedRef) -> u32 {
        self.try_register_klass(klass)
            .unwrap_or_else(|err| fatal(err))
    }

    pub fn klass_by_id(&self, kid: u32) -> ManagedRef {
        debug_assert!(
            self.is_valid_index(kid as isize),
            "kid ({kid}) out of range - 1 <= {kid} <= {}",
            self.top_dispensed_index()
        );
        self.get(kid as isize)
    }

    pub fn max_klass_id(&self) -> u32 {
        self.top_dispensed_index() as u32
    }

    pub fn max_reserved_kid(&self) -> u32 {
        self.policy().max_reserved_kid as u32
    }

    /// True if `addr` points into the used part of the table.
    pub fn contains<T>(&self, addr: *const T) -> bool {
        let addr = addr.cast::<u8>();
        let low = self.table_base().cast::<u8>();
        let high = self.get_addr(self.highest_used_index()).as_ptr().cast::<u8>();
        low <= addr && addr <= high
    }

    pub fn pretty_name(&self, kid: u32) -> Option<String> {
        if kid == 0 {
            return Some("__null__".to_owned());
        }
        if !self.is_valid_index(kid as isize) {
            return None;
        }
        let klass = self.get(kid as isize);
        if klass.is_null() {
            return None;
        }
        let name = self.policy().model.klass_name(klass);
        Some(name.unwrap_or_else(|| format!("kid {kid}")))
    }

    /// Lets every live klass in the section of `1..=top` drop method code
    /// that died. `top` is the same frontier snapshot the unlink of this cycle
    /// used. Kept apart from unlinking because it reaches outside the table.
    pub fn sweep_weak_method_codes_section(&self, section: Section, top: usize) {
        debug_assert!(top <= self.top_dispensed_index());
        let model = &self.policy().model;
        for kid in section.range(top) {
            let klass = self.raw_slot(kid).load();
            if klass.not_null() {
                model.sweep_weak_method_codes(klass);
            }
        }
    }
}
