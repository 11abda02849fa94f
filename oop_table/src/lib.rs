//! Indirection tables for GC managed objects.
//!
//! Generated code refers to klasses and embedded constants by a small signed
//! index into one of two tables sharing a base address. The collector can
//! move or clear entries without patching code.

mod class_table;
mod constant_table;
mod error;
mod model;
mod reference;
mod region;
mod settings;
mod system;
mod table;
mod tables;
#[cfg(test)]
mod testing;

pub use class_table::{ClassTable, LinearScan};
pub use constant_table::{ConstantTable, HashProbe, probe_index};
pub use error::{TableError, fatal};
pub use model::ObjectModel;
pub use reference::{ManagedRef, Slot};
pub use region::{ReservedRegion, VirtualSpace};
pub use settings::TableSettings;
pub use system::OS_PAGE_SIZE;
pub use table::{AllocationPolicy, IsAliveFn, Section, SlotTable, TableState};
pub use tables::{Frontier, OopTables};
