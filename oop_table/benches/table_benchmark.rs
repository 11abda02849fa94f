//! Run with:
//!   cargo bench --bench table_benchmark

use std::sync::{
    Arc,
    atomic::{AtomicU32, Ordering},
};

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use oop_table::{ManagedRef, ObjectModel, OopTables, TableSettings};

struct BenchObject {
    hash: u64,
    klass: bool,
    kid: AtomicU32,
}

struct BenchModel;

fn object(r: ManagedRef) -> &'static BenchObject {
    // SAFETY: bench objects are leaked
    unsafe { &*r.as_ptr::<BenchObject>() }
}

impl ObjectModel for BenchModel {
    fn identity_hash(&self, object_ref: ManagedRef) -> u64 {
        object(object_ref).hash
    }

    fn is_klass(&self, object_ref: ManagedRef) -> bool {
        object(object_ref).klass
    }

    fn klass_id(&self, klass: ManagedRef) -> u32 {
        object(klass).kid.load(Ordering::Relaxed)
    }

    fn set_klass_id(&self, klass: ManagedRef, kid: u32) {
        object(klass).kid.store(kid, Ordering::Relaxed);
    }
}

fn leak_objects(count: u64, klass: bool) -> Vec<ManagedRef> {
    (0..count)
        .map(|i| {
            let obj = Box::leak(Box::new(BenchObject {
                hash: i.wrapping_mul(0x9e37_79b9_7f4a_7c15) >> 33,
                klass,
                kid: AtomicU32::new(0),
            }));
            ManagedRef::from_ptr(obj as *const BenchObject)
        })
        .collect()
}

fn new_tables() -> OopTables {
    OopTables::new(TableSettings::default(), Arc::new(BenchModel))
        .expect("default settings are valid")
}

fn bench_constant_put(c: &mut Criterion) {
    let objects = leak_objects(10_000, false);
    c.bench_function("constant_put_10k", |b| {
        b.iter_with_large_drop(|| {
            let tables = new_tables();
            for &obj in &objects {
                black_box(tables.put_oop(obj));
            }
            tables
        })
    });
}

fn bench_constant_put_existing(c: &mut Criterion) {
    let objects = leak_objects(10_000, false);
    let tables = new_tables();
    for &obj in &objects {
        tables.put_oop(obj);
    }
    c.bench_function("constant_put_existing_10k", |b| {
        b.iter(|| {
            for &obj in &objects {
                black_box(tables.put_oop(obj));
            }
        })
    });
}

fn bench_klass_register(c: &mut Criterion) {
    let klasses = leak_objects(10_000, true);
    c.bench_function("klass_register_10k", |b| {
        b.iter_with_large_drop(|| {
            let tables = new_tables();
            for &k in &klasses {
                black_box(tables.put_klass(k));
            }
            tables
        })
    });
}

fn bench_get(c: &mut Criterion) {
    let tables = new_tables();
    let indices = leak_objects(10_000, false)
        .into_iter()
        .map(|obj| tables.put_oop(obj))
        .collect::<Vec<_>>();
    c.bench_function("get_oop_at_10k", |b| {
        b.iter(|| {
            for &index in &indices {
                black_box(tables.get_oop_at(black_box(index)));
            }
        })
    });
}

criterion_group!(
    benches,
    bench_constant_put,
    bench_constant_put_existing,
    bench_klass_register,
    bench_get
);
criterion_main!(benches);
