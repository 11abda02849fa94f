use clap::Parser as ClapParser;
use std::{
    process,
    sync::{
        Arc,
        atomic::{AtomicU32, AtomicU64, Ordering},
    },
    thread,
    time::Instant,
};

use parking_lot::Mutex;

use oop_table::{ManagedRef, ObjectModel, OopTables, TableSettings};

const KB: usize = 1024;

/// Fills both oop tables from several threads, then unlinks part of them.
#[derive(ClapParser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Mutator threads inserting concurrently
    #[arg(short, long, default_value_t = 4)]
    threads: usize,

    /// Klasses registered per thread
    #[arg(long, default_value_t = 1_000)]
    klasses: usize,

    /// Constants inserted per thread
    #[arg(long, default_value_t = 10_000)]
    constants: usize,

    /// Every n-th object survives the unlink, 0 keeps nothing
    #[arg(long, default_value_t = 3)]
    keep_every: usize,

    /// GC workers used for the parallel unlink
    #[arg(long, default_value_t = 4)]
    gc_workers: usize,

    #[arg(long, help = "Klass table reservation in KiB")]
    class_table_kb: Option<usize>,

    #[arg(long, help = "Constant table reservation in KiB")]
    constant_table_kb: Option<usize>,

    #[arg(long, help = "Commit chunk size in KiB")]
    growth_kb: Option<usize>,

    #[arg(long, help = "Kids reserved for bootstrap klasses")]
    reserved_kids: Option<u32>,

    #[arg(long, help = "Initial constant table probe size, power of two")]
    probe_size: Option<usize>,

    #[arg(long, help = "Print table statistics on exit")]
    print_at_exit: bool,
}

impl Cli {
    fn settings(&self) -> TableSettings {
        let defaults = TableSettings::default();
        TableSettings {
            class_table_size: self
                .class_table_kb
                .map_or(defaults.class_table_size, |kb| kb * KB),
            constant_table_size: self
                .constant_table_kb
                .map_or(defaults.constant_table_size, |kb| kb * KB),
            growth_size: self.growth_kb.map_or(defaults.growth_size, |kb| kb * KB),
            max_reserved_kid: self.reserved_kids.unwrap_or(defaults.max_reserved_kid),
            initial_probe_size: self.probe_size.unwrap_or(defaults.initial_probe_size),
            print_at_exit: self.print_at_exit,
        }
    }
}

struct SyntheticObject {
    hash: u64,
    klass: bool,
    kid: AtomicU32,
}

/// Object model backed by boxed stand-ins that live until the program exits.
#[derive(Default)]
struct SyntheticHeap {
    objects: Mutex<Vec<Box<SyntheticObject>>>,
    next_hash: AtomicU64,
}

impl SyntheticHeap {
    fn allocate(&self, klass: bool) -> ManagedRef {
        let seed = self.next_hash.fetch_add(1, Ordering::Relaxed);
        let object = Box::new(SyntheticObject {
            hash: mix(seed),
            klass,
            kid: AtomicU32::new(0),
        });
        let r = ManagedRef::from_ptr(&*object);
        self.objects.lock().push(object);
        r
    }

    fn get(object: ManagedRef) -> &'static SyntheticObject {
        // SAFETY: objects are never freed before exit
        unsafe { &*object.as_ptr::<SyntheticObject>() }
    }
}

/// splitmix64 finalizer, spreads sequential seeds over the hash bits
fn mix(mut x: u64) -> u64 {
    x = (x ^ (x >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    x ^ (x >> 31)
}

impl ObjectModel for SyntheticHeap {
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
        Some(format!("Synthetic{}", Self::get(klass).hash & 0xffff))
    }
}

/// Inserts klasses and constants, returning every object with its index.
fn mutate(tables: &OopTables, heap: &SyntheticHeap, cli: &Cli) -> Vec<(ManagedRef, isize)> {
    let mut placed = Vec::with_capacity(cli.klasses + cli.constants);
    for _ in 0..cli.klasses {
        let klass = heap.allocate(true);
        let kid = tables.put_klass(klass) as isize;
        placed.push((klass, kid));
    }
    for _ in 0..cli.constants {
        let constant = heap.allocate(false);
        let index = tables.put_oop(constant);
        placed.push((constant, index));
    }
    placed
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let heap = Arc::new(SyntheticHeap::default());
    let tables = match OopTables::new(cli.settings(), heap.clone()) {
        Ok(tables) => tables,
        Err(err) => {
            eprintln!("Error creating oop tables: {}", err);
            process::exit(1);
        }
    };

    let start = Instant::now();
    let placed = thread::scope(|scope| {
        let handles = (0..cli.threads)
            .map(|_| {
                let (tables, heap, cli) = (&tables, &*heap, &cli);
                scope.spawn(move || mutate(tables, heap, cli))
            })
            .collect::<Vec<_>>();
        handles
            .into_iter()
            .flat_map(|handle| match handle.join() {
                Ok(placed) => placed,
                Err(_) => {
                    eprintln!("mutator thread panicked");
                    process::exit(1);
                }
            })
            .collect::<Vec<_>>()
    });
    log::info!("inserted {} objects in {:?}", placed.len(), start.elapsed());

    let mismatches = placed
        .iter()
        .filter(|&&(object, index)| tables.get_oop_at(index) != object)
        .count();
    if mismatches > 0 {
        eprintln!("{mismatches} entries read back wrong");
        process::exit(1);
    }

    let survivors = placed
        .iter()
        .enumerate()
        .filter(|(i, _)| cli.keep_every != 0 && i % cli.keep_every == 0)
        .map(|(_, &(object, _))| object)
        .collect::<std::collections::HashSet<_>>();

    println!("before unlink:\n{tables}");
    let start = Instant::now();
    let cleared =
        tables.unlink_parallel(cli.gc_workers, &|object| survivors.contains(&object));
    println!(
        "unlinked {} of {} entries with {} workers in {:?}",
        cleared,
        placed.len(),
        cli.gc_workers,
        start.elapsed()
    );
    println!("after unlink:\n{tables}");
}
