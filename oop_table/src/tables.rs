//! The runtime context owning both tables.
//!
//! One reservation is split at the shared base: constants below it with
//! negative indices, klasses above it with positive indices. Index 0 is the
//! null slot at the base itself, so generated code can load any entry with a
//! single `base + index * 8` and never needs to know which table it hit.

use std::{fmt, sync::Arc};

use crate::{
    ClassTable, ConstantTable, IsAliveFn, ManagedRef, ObjectModel,
    ReservedRegion, Section, Slot, TableError, TableSettings, fatal,
};

/// Dispensed frontiers of both tables at the start of an unlink cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frontier {
    pub klasses: usize,
    pub constants: usize,
}

pub struct OopTables {
    klasses: ClassTable,
    constants: ConstantTable,
    model: Arc<dyn ObjectModel>,
    settings: TableSettings,
    // dropped after both tables
    region: ReservedRegion,
}

impl OopTables {
    pub fn new(
        settings: TableSettings,
        model: Arc<dyn ObjectModel>,
    ) -> Result<Self, TableError> {
        settings.validate().map_err(TableError::InvalidSettings)?;

        let total = settings.constant_table_size + settings.class_table_size;
        let region = ReservedRegion::reserve(total)?;
        let (down, up) = region.split(settings.constant_table_size);
        log::info!(
            "oop tables: reserved {} bytes at {:p}, shared base {:p}",
            total,
            region.start(),
            up.origin()
        );

        let constants =
            ConstantTable::with_settings(down, &settings, model.clone())?;
        let klasses = ClassTable::with_settings(up, &settings, model.clone())?;
        debug_assert_eq!(klasses.table_base(), constants.table_base());

        Ok(Self {
            klasses,
            constants,
            model,
            settings,
            region,
        })
    }

    #[inline]
    pub fn klasses(&self) -> &ClassTable {
        &self.klasses
    }

    #[inline]
    pub fn constants(&self) -> &ConstantTable {
        &self.constants
    }

    pub fn settings(&self) -> &TableSettings {
        &self.settings
    }

    /// Size of the reservation backing both tables.
    pub fn reserved_size(&self) -> usize {
        self.region.size()
    }

    /// Shared base of both tables. Fixed for the lifetime of the context.
    #[inline]
    pub fn table_base(&self) -> *const Slot {
        self.klasses.table_base()
    }

    /// Klasses answer their kid, everything else lands in the constant table.
    /// Null maps to the null slot.
    pub fn try_put_oop(&self, object: ManagedRef) -> Result<isize, TableError> {
        if object.is_null() {
            return Ok(0);
        }
        if self.model.is_klass(object) {
            let kid = self.model.klass_id(object) as isize;
            if !self.klasses.is_valid_index(kid) || self.klasses.get(kid) != object {
                return Err(TableError::UnregisteredKlass { klass: object });
            }
            return Ok(kid);
        }
        self.constants.try_put(object)
    }

    pub fn put_oop(&self, object: ManagedRef) -> isize {
        self.try_put_oop(object).unwrap_or_else(|err| fatal(err))
    }

    /// Registers a new klass and returns its kid.
    pub fn put_klass(&self, klass: ManagedRef) -> u32 {
        self.klasses.register_klass(klass)
    }

    pub fn try_put_klass(&self, klass: ManagedRef) -> Result<u32, TableError> {
        self.klasses.try_register_klass(klass)
    }

    #[inline]
    pub fn get_oop_at(&self, index: isize) -> ManagedRef {
        match index {
            0 => ManagedRef::NULL,
            i if i > 0 => self.klasses.get(i),
            i => self.constants.get(i),
        }
    }

    #[inline]
    pub fn get_addr(&self, index: isize) -> &Slot {
        if index < 0 {
            self.constants.get_addr(index)
        } else {
            self.klasses.get_addr(index)
        }
    }

    pub fn is_valid_index(&self, index: isize) -> bool {
        if index < 0 {
            self.constants.is_valid_index(index)
        } else {
            self.klasses.is_valid_index(index)
        }
    }

    pub fn lowest_used_index(&self) -> isize {
        self.constants.lowest_used_index()
    }

    pub fn highest_used_index(&self) -> isize {
        self.klasses.highest_used_index()
    }

    pub fn oops_do(&self, visitor: &mut dyn FnMut(&Slot)) {
        self.klasses.oops_do(visitor);
        self.constants.oops_do(visitor);
    }

    /// Snapshot of both dispensed frontiers. Taken once per unlink cycle and
    /// handed to every [`OopTables::unlink_section`] call of that cycle.
    pub fn frontier(&self) -> Frontier {
        Frontier {
            klasses: self.klasses.top_dispensed_index(),
            constants: self.constants.top_dispensed_index(),
        }
    }

    /// Clears dead entries from both tables and sweeps method code of the
    /// surviving klasses. Returns the number of entries cleared.
    pub fn unlink(&self, is_alive: IsAliveFn<'_>) -> usize {
        self.unlink_section(Section::WHOLE, self.frontier(), is_alive, &mut |_| {})
    }

    /// One GC worker's share of [`OopTables::unlink`]. All sections of a
    /// cycle must use the same `frontier`.
    pub fn unlink_section(
        &self,
        section: Section,
        frontier: Frontier,
        is_alive: IsAliveFn<'_>,
        mark_live: &mut dyn FnMut(&Slot),
    ) -> usize {
        let cleared = self
            .klasses
            .unlink_section(section, frontier.klasses, is_alive, mark_live)
            + self.constants.unlink_section(
                section,
                frontier.constants,
                is_alive,
                mark_live,
            );
        self.klasses
            .sweep_weak_method_codes_section(section, frontier.klasses);
        cleared
    }

    pub fn unlink_parallel(&self, workers: usize, is_alive: IsAliveFn<'_>) -> usize {
        let frontier = self.frontier();
        let cleared = self
            .klasses
            .unlink_parallel_to(workers, frontier.klasses, is_alive)
            + self.constants.unlink_parallel_to(
                workers,
                frontier.constants,
                is_alive,
            );
        self.klasses
            .sweep_weak_method_codes_section(Section::WHOLE, frontier.klasses);
        cleared
    }

    pub fn print(&self) {
        println!("{self}");
    }
}

impl fmt::Display for OopTables {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.klasses)?;
        write!(f, "{}", self.constants)
    }
}

impl fmt::Debug for OopTables {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OopTables")
            .field("klasses", &self.klasses)
            .field("constants", &self.constants)
            .field("region", &self.region)
            .finish()
    }
}

impl Drop for OopTables {
    fn drop(&mut self) {
        if self.settings.print_at_exit {
            self.print();
        }
    }
}
