use crate::ManagedRef;

/// What the tables need to know about objects, supplied by the embedding VM.
///
/// All calls happen on whatever thread is using the table, including GC
/// workers during sectioned sweeps.
pub trait ObjectModel: Send + Sync {
    /// Stable hash of the object, independent of its current address.
    fn identity_hash(&self, object: ManagedRef) -> u64;

    fn is_klass(&self, object: ManagedRef) -> bool;

    /// The kid stored in the klass itself, 0 if it was never registered.
    fn klass_id(&self, klass: ManagedRef) -> u32;

    fn set_klass_id(&self, klass: ManagedRef, kid: u32);

    fn klass_name(&self, klass: ManagedRef) -> Option<String> {
        let _ = klass;
        None
    }

    /// Drops compiled method metadata of `klass` whose code died.
    fn sweep_weak_method_codes(&self, klass: ManagedRef) {
        let _ = klass;
    }
}
