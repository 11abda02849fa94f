use thiserror::Error;

use crate::ManagedRef;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TableError {
    #[error("invalid table settings: {0}")]
    InvalidSettings(&'static str),
    #[error("cannot reserve {bytes} bytes for oop tables")]
    ReserveFailed { bytes: usize },
    #[error("out of space for {table}: cannot commit {bytes} more bytes")]
    CommitFailed { table: &'static str, bytes: usize },
    #[error("klass {klass:?} has no kid, register it before embedding")]
    UnregisteredKlass { klass: ManagedRef },
    #[error("{table} is full: top index {top_index}, max index {max_index}")]
    Exhausted {
        table: &'static str,
        top_index: usize,
        max_index: usize,
    },
}

/// Aborts the process. Indices handed out earlier may already be baked into
/// generated code or object headers, so there is nothing to unwind to.
#[cold]
pub fn fatal(err: TableError) -> ! {
    log::error!("fatal: {err}");
    eprintln!("fatal error: {err}");
    std::process::abort()
}
