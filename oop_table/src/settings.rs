use crate::{OS_PAGE_SIZE, Slot};

const SLOT_SIZE: usize = size_of::<Slot>();

/// Configuration for the klass and constant oop tables.
#[derive(Debug, Clone)]
pub struct TableSettings {
    /// Bytes reserved for the klass table. Must be a multiple of the OS page size.
    pub class_table_size: usize,
    /// Bytes reserved for the constant table. Must be a multiple of the OS page size.
    pub constant_table_size: usize,
    /// Bytes committed per growth step.
    pub growth_size: usize,
    /// Highest kid handed out by `bind_reserved_klass_id` during bootstrap.
    /// Normal registration starts above it.
    pub max_reserved_kid: u32,
    /// Initial number of constant table slots reachable by hash probing.
    /// Must be a power of two.
    pub initial_probe_size: usize,
    /// Print both tables when the owning context is dropped.
    pub print_at_exit: bool,
}

impl Default for TableSettings {
    fn default() -> Self {
        Self {
            class_table_size: 8 * 1024 * 1024,     // 1M kids
            constant_table_size: 64 * 1024 * 1024, // 8M constants
            growth_size: 1024 * 1024,
            max_reserved_kid: 0,
            initial_probe_size: 2048,
            print_at_exit: false,
        }
    }
}

impl TableSettings {
    pub fn class_max_index(&self) -> usize {
        self.class_table_size / SLOT_SIZE
    }

    pub fn constant_max_index(&self) -> usize {
        self.constant_table_size / SLOT_SIZE
    }

    pub fn validate(&self) -> Result<(), &'static str> {
        if self.class_table_size == 0
            || self.constant_table_size == 0
            || self.growth_size == 0
        {
            return Err("Sizes must be > 0");
        }
        if !self.class_table_size.is_multiple_of(OS_PAGE_SIZE)
            || !self.constant_table_size.is_multiple_of(OS_PAGE_SIZE)
        {
            return Err("table sizes must match OS page alignment");
        }
        if !self.growth_size.is_multiple_of(OS_PAGE_SIZE) {
            return Err("growth_size must match OS page alignment");
        }
        if self.max_reserved_kid as usize + 1 >= self.class_max_index() {
            return Err("max_reserved_kid must leave room in the klass table");
        }
        if !self.initial_probe_size.is_power_of_two()
            || self.initial_probe_size < 4
        {
            return Err("initial_probe_size must be a power of two >= 4");
        }
        if self.initial_probe_size > self.constant_max_index() {
            return Err("initial_probe_size exceeds constant table capacity");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let settings = TableSettings::default();
        assert_eq!(settings.validate(), Ok(()));
        assert_eq!(settings.class_max_index(), 1024 * 1024);
        assert_eq!(settings.constant_max_index(), 8 * 1024 * 1024);
    }

    #[test]
    fn rejects_bad_sizes() {
        let unaligned = TableSettings {
            growth_size: 1000,
            ..Default::default()
        };
        assert!(unaligned.validate().is_err());

        let probe = TableSettings {
            initial_probe_size: 3000,
            ..Default::default()
        };
        assert!(probe.validate().is_err());

        let reserved = TableSettings {
            class_table_size: OS_PAGE_SIZE,
            max_reserved_kid: 600,
            ..Default::default()
        };
        assert!(reserved.validate().is_err());
    }
}
