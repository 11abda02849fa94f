use std::sync::atomic::{AtomicU64, Ordering};

#[cfg(debug_assertions)]
const POISON_MASK: u64 = 0x5a5a_0000_0000_0001;
const ALIGN_MASK: u64 = 0b111;

/// Opaque handle to a GC managed object.
///
/// Equality is identity. The null reference is all zero bits, so freshly
/// committed table memory reads as null.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct ManagedRef(u64);

impl ManagedRef {
    pub const NULL: Self = Self(0);

    #[inline(always)]
    pub fn from_ptr<T>(ptr: *const T) -> Self {
        let addr = ptr as u64;
        debug_assert!(addr & ALIGN_MASK == 0, "object pointer not aligned");
        Self(addr)
    }

    #[inline(always)]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    #[inline(always)]
    pub const fn not_null(self) -> bool {
        self.0 != 0
    }

    #[inline(always)]
    pub fn as_ptr<T>(self) -> *const T {
        self.0 as *const T
    }

    /// Word stored into a table slot.
    #[inline(always)]
    fn to_slot_word(self) -> u64 {
        #[cfg(debug_assertions)]
        if self.0 != 0 {
            return self.0 ^ POISON_MASK;
        }
        self.0
    }

    #[inline(always)]
    fn from_slot_word(word: u64) -> Self {
        #[cfg(debug_assertions)]
        if word != 0 {
            return Self(word ^ POISON_MASK);
        }
        Self(word)
    }
}

impl Default for ManagedRef {
    fn default() -> Self {
        Self::NULL
    }
}

impl core::fmt::Debug for ManagedRef {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        if self.is_null() {
            write!(f, "Ref(null)")
        } else {
            write!(f, "Ref(0x{:x})", self.0)
        }
    }
}

/// One reference sized cell of a table.
///
/// Generated code reads slots directly, everything else goes through these
/// accessors. Debug builds keep the stored word poisoned so raw reads that
/// bypass [`Slot::load`] are caught early.
#[repr(transparent)]
pub struct Slot(AtomicU64);

const _: () = assert!(size_of::<Slot>() == size_of::<u64>());

impl Slot {
    #[inline(always)]
    pub fn load(&self) -> ManagedRef {
        ManagedRef::from_slot_word(self.0.load(Ordering::Acquire))
    }

    #[inline(always)]
    pub fn store(&self, value: ManagedRef) {
        self.0.store(value.to_slot_word(), Ordering::Release);
    }

    #[inline(always)]
    pub fn clear(&self) {
        self.0.store(0, Ordering::Release);
    }

    /// Installs `value` if the slot is null. Returns false when another
    /// thread got there first.
    #[inline(always)]
    pub fn claim(&self, value: ManagedRef) -> bool {
        debug_assert!(value.not_null());
        self.0
            .compare_exchange(
                0,
                value.to_slot_word(),
                Ordering::AcqRel,
                Ordering::Relaxed,
            )
            .is_ok()
    }

    #[inline(always)]
    pub fn as_ptr(&self) -> *const Slot {
        self
    }
}

impl core::fmt::Debug for Slot {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_tuple("Slot").field(&self.load()).finish()
    }
}
