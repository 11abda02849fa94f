use std::sync::Arc;

use crate::{
    AllocationPolicy, ManagedRef, ObjectModel, SlotTable, TableError,
    TableSettings, VirtualSpace,
};

/// Constant table: a log2(N) closed hash table keyed by identity hash.
/// Grows toward low memory, indices are negative.
pub type ConstantTable = SlotTable<HashProbe>;

/// log2 of the slots probed per cache line
const CACHE_LINE_BITS: u32 = 2;
/// hash bits used by the first probe level
const MIN_HASH_BITS: u32 = 8;
/// width of an identity hash
const HASH_BITS: u32 = 31;
const HASH_MASK: u64 = (1 << HASH_BITS) - 1;
/// Shifts the first level down so its lowest candidate is index 4.
const BIAS: u64 = (1 << (MIN_HASH_BITS + CACHE_LINE_BITS)) - (1 << CACHE_LINE_BITS);

/// Candidate raw index for the given attempt, `None` once every slot has been
/// offered.
///
/// The attempt splits into an iteration (low 2 bits) and a level (the rest).
/// Each level takes one more bit of the hash, starting at 8, and prepends a 1
/// so levels land in disjoint ranges that double in size. The iteration is
/// appended so the four attempts of a level share a cache line.
///
/// ```text
///    +------------------------------------------+
///    |             ... 0 | 1 | xxxxxxxx... | yy |
///    +------------------------------------------+
///      xxxx - hash bits, one more per level
///      yy   - iteration (== attempt mod 4)
/// ```
///
/// Level `n` covers raw indices `2^(n+2) - 1020 ..= 2^(n+3) - 1021`, so a probe
/// table of `2^(n+3)` slots reaches all of it. Once the hash runs out of bits
/// or a candidate lands beyond `max_index`, empty slots are filled linearly
/// from the end.
pub fn probe_index(id_hash: u64, attempt: usize, max_index: usize) -> Option<usize> {
    let hash = id_hash & HASH_MASK;
    let iteration = (attempt & ((1 << CACHE_LINE_BITS) - 1)) as u64;
    let width = (attempt >> CACHE_LINE_BITS) as u64 + MIN_HASH_BITS as u64;

    if width <= HASH_BITS as u64 {
        let level = 1u64 << width;
        let index = ((level + (hash & (level - 1))) << CACHE_LINE_BITS) + iteration - BIAS;
        if (index as usize) < max_index {
            return Some(index as usize);
        }
    }

    max_index
        .checked_sub(1 + attempt)
        .filter(|&index| index >= 1)
}

pub struct HashProbe {
    model: Arc<dyn ObjectModel>,
}

impl AllocationPolicy for HashProbe {
    const NAME: &'static str = "CodeCacheOopTable";
    const GROWS_DOWN: bool = true;

    fn put(table: &ConstantTable, value: ManagedRef) -> Result<usize, TableError> {
        let id_hash = table.policy().model.identity_hash(value);

        let mut attempt = 0;
        loop {
            let raw = probe_index(id_hash, attempt, table.max_index())
                .ok_or_else(|| table.exhausted())?;
            attempt += 1;

            table.ensure_table_index(raw)?;
            let slot = table.raw_slot(raw);

            let current = slot.load();
            if current == value {
                return Ok(raw);
            }
            if current.is_null() {
                if slot.claim(value) {
                    table.note_dispensed(raw);
                    return Ok(raw);
                }
                // lost the race, maybe to a thread adding the same object
                if slot.load() == value {
                    return Ok(raw);
                }
            }
        }
    }
}

impl SlotTable<HashProbe> {
    pub fn with_settings(
        space: VirtualSpace,
        settings: &TableSettings,
        model: Arc<dyn ObjectModel>,
    ) -> Result<Self, TableError> {
        let policy = HashProbe { model };
        SlotTable::new(
            space,
            settings.growth_size,
            settings.initial_probe_size,
            0,
            policy,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{OS_PAGE_SIZE, ReservedRegion, testing::TestHeap};

    fn settings() -> TableSettings {
        TableSettings {
            class_table_size: OS_PAGE_SIZE * 4,
            constant_table_size: OS_PAGE_SIZE * 16,
            growth_size: OS_PAGE_SIZE,
            initial_probe_size: 2048,
            ..Default::default()
        }
    }

    fn constant_table(region: &ReservedRegion, heap: &Arc<TestHeap>) -> ConstantTable {
        let (down, _) = region.split(region.size());
        ConstantTable::with_settings(down, &settings(), heap.clone()).unwrap()
    }

    #[test]
    fn probe_keeps_attempt_in_low_bits() {
        for hash in [0u64, 1, 255, 256, 0x7fff_ffff, u64::MAX] {
            for attempt in 0..64 {
                let index = probe_index(hash, attempt, usize::MAX).unwrap();
                assert!(index >= 1);
                assert_eq!(index % 4, attempt % 4, "hash {hash} attempt {attempt}");
            }
        }
    }

    #[test]
    fn probe_levels_double() {
        let hash = 0x1234_5678;
        // first level spans 256 cache lines
        assert_eq!(probe_index(0, 0, usize::MAX), Some(4));
        assert_eq!(probe_index(255, 3, usize::MAX), Some(1027));
        // attempts 4..8 use 9 hash bits, landing above the first level
        let second = probe_index(hash, 4, usize::MAX).unwrap();
        assert!((1028..3076).contains(&second));
        assert_eq!(second - 1028, ((hash & 0x1ff) << 2) as usize);
        let third = probe_index(hash, 9, usize::MAX).unwrap();
        assert!((3076..7172).contains(&third));
        assert_eq!(third - 3076, ((hash & 0x3ff) << 2) as usize + 1);
    }

    #[test]
    fn probe_falls_back_to_linear_fill_from_the_end() {
        let max = 4096;
        // the hash level for this attempt lands past max_index
        assert_eq!(probe_index(0xffff, 12, max), Some(max - 13));
        assert_eq!(probe_index(0xffff, max - 2, max), Some(1));
        assert_eq!(probe_index(0xffff, max - 1, max), None);
    }

    #[test]
    fn put_is_idempotent() {
        let region = ReservedRegion::reserve(OS_PAGE_SIZE * 16).unwrap();
        let heap = TestHeap::new();
        let table = constant_table(&region, &heap);
        let [a] = heap.objects([77]);

        let first = table.put(a);
        assert!(first < 0);
        assert_eq!(table.population(), 1);

        let second = table.put(a);
        assert_eq!(first, second);
        assert_eq!(table.population(), 1);
        assert_eq!(table.get(first), a);
    }

    #[test]
    fn colliding_hashes_probe_within_the_cache_line() {
        let region = ReservedRegion::reserve(OS_PAGE_SIZE * 16).unwrap();
        let heap = TestHeap::new();
        let table = constant_table(&region, &heap);
        // same low 8 bits, so both start at the same candidate
        let [a, b] = heap.objects([5, 5 + 256]);

        let ia = table.put(a);
        let ib = table.put(b);

        assert_ne!(ia, ib);
        assert_eq!((-ia) % 4, 0, "first object placed on attempt 0");
        assert_eq!((-ib) % 4, 1, "second object placed on attempt 1");
        assert_eq!(ib, ia - 1, "same cache line");

        assert_eq!(table.put(a), ia);
        assert_eq!(table.get(ia), a);
        assert_eq!(table.get(ib), b);
    }

    #[test]
    fn valid_indices_are_negative() {
        let region = ReservedRegion::reserve(OS_PAGE_SIZE * 16).unwrap();
        let heap = TestHeap::new();
        let table = constant_table(&region, &heap);
        let [a] = heap.objects([0]);

        let index = table.put(a);
        assert_eq!(index, -4);
        assert_eq!(table.lowest_used_index(), -4);
        assert_eq!(table.highest_used_index(), -1);
        for i in -4..=-1 {
            assert!(table.is_valid_index(i));
        }
        assert!(!table.is_valid_index(-5));
        assert!(!table.is_valid_index(0));
        assert!(!table.is_valid_index(1));
    }

    #[test]
    fn full_levels_grow_the_table() {
        let region = ReservedRegion::reserve(OS_PAGE_SIZE * 16).unwrap();
        let heap = TestHeap::new();
        let table = constant_table(&region, &heap);
        let start_top = table.top_table_index();
        let start_committed = table.top_committed_index();

        // five identical hashes: the first level holds four, the fifth spills
        // into the second level above the initial probe size
        let objs = heap.objects([9 + 256; 5]);
        let indices = objs.map(|obj| table.put(obj));

        assert_eq!(table.population(), 5);
        assert_eq!(table.top_table_index(), start_top * 2);
        assert!(table.top_committed_index() > start_committed);
        assert_eq!(indices[3], -43);
        assert_eq!(indices[4], -2088);
        for (obj, index) in objs.iter().zip(indices) {
            assert_eq!(table.get(index), *obj);
        }
    }

    #[test]
    fn freed_slots_are_reclaimed() {
        let region = ReservedRegion::reserve(OS_PAGE_SIZE * 16).unwrap();
        let heap = TestHeap::new();
        let table = constant_table(&region, &heap);
        let [a, b] = heap.objects([42, 42]);

        let ia = table.put(a);
        table.free(ia);
        assert!(table.get(ia).is_null());
        assert_eq!(table.put(b), ia);
    }

    #[test]
    fn exhausted_table_reports_error() {
        let region = ReservedRegion::reserve(OS_PAGE_SIZE).unwrap();
        let heap = TestHeap::new();
        let (down, _) = region.split(region.size());
        let settings = TableSettings {
            initial_probe_size: 512,
            ..settings()
        };
        let table =
            ConstantTable::with_settings(down, &settings, heap.clone()).unwrap();
        let max = table.max_index();

        let mut placed = 0;
        let error = loop {
            let [obj] = heap.objects([placed as u64 * 31]);
            match table.try_put(obj) {
                Ok(_) => placed += 1,
                Err(err) => break err,
            }
        };

        assert_eq!(placed, max - 1);
        assert!(matches!(
            error,
            TableError::Exhausted { table: "CodeCacheOopTable", max_index, .. } if max_index == max
        ));
    }

    #[test]
    fn unlink_clears_dead_constants() {
        let region = ReservedRegion::reserve(OS_PAGE_SIZE * 16).unwrap();
        let heap = TestHeap::new();
        let table = constant_table(&region, &heap);
        let objs = heap.objects([1, 2, 3, 4, 5, 6]);
        let indices = objs.map(|obj| table.put(obj));

        assert_eq!(table.unlink(&|_| true), 0);
        assert_eq!(table.population(), 6);

        let keep = objs[2];
        assert_eq!(table.unlink(&|r| r == keep), 5);
        assert_eq!(table.get(indices[2]), keep);
        assert_eq!(table.population(), 1);

        table.unlink(&|_| false);
        assert_eq!(table.population(), 0);
    }
}
