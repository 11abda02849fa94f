//! Fake object heap for unit tests.

use std::sync::{
    Arc,
    atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering},
};

use parking_lot::Mutex;

use crate::{ManagedRef, ObjectModel};

pub struct TestObject {
    hash: u64,
    klass: bool,
    kid: AtomicU32,
    name: String,
    sweeps: AtomicUsize,
}

#[derive(Default)]
pub struct TestHeap {
    objects: Mutex<Vec<Box<TestObject>>>,
    next_hash: AtomicU64,
}

impl TestHeap {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn allocate(&self, object: TestObject) -> ManagedRef {
        let boxed = Box::new(object);
        let r = ManagedRef::from_ptr(&*boxed);
        self.objects.lock().push(boxed);
        r
    }

    /// Plain objects with the given identity hashes.
    pub fn objects<const N: usize>(&self, hashes: [u64; N]) -> [ManagedRef; N] {
        hashes.map(|hash| {
            self.allocate(TestObject {
                hash,
                klass: false,
                kid: AtomicU32::new(0),
                name: String::new(),
                sweeps: AtomicUsize::new(0),
            })
        })
    }

    pub fn klasses<const N: usize>(&self, names: [&str; N]) -> [ManagedRef; N] {
        names.map(|name| {
            self.allocate(TestObject {
                hash: self.next_hash.fetch_add(1, Ordering::Relaxed),
                klass: true,
                kid: AtomicU32::new(0),
                name: name.to_owned(),
                sweeps: AtomicUsize::new(0),
            })
        })
    }

    fn get(r: ManagedRef) -> &'static TestObject {
        // SAFETY: objects live as long as the heap, tests never outlive it
        unsafe { &*r.as_ptr::<TestObject>() }
    }

    pub fn sweeps(&self, r: ManagedRef) -> usize {
        Self::get(r).sweeps.load(Ordering::Relaxed)
    }
}

impl ObjectModel for TestHeap {
    fn identity_hash(&self, object: ManagedRef) -> u64 {
        Self::get(object).hash
    }

    fn is_klass(&self, object: ManagedRef) -> bool {
        Self::get(object).klass
    }

    fn klass_id(&self, klass: ManagedRef) -> u32 {
        Self::get(klass).kid.load(Ordering::Relaxed)
    }

    fn set_klass_id(&self, klass: ManagedRef, kid: u32) {
        Self::get(klass).kid.store(kid, Ordering::Relaxed);
    }

    fn klass_name(&self, klass: ManagedRef) -> Option<String> {
        Some(Self::get(klass).name.clone())
    }

    fn sweep_weak_method_codes(&self, klass: ManagedRef) {
        Self::get(klass).sweeps.fetch_add(1, Ordering::Relaxed);
    }
}
