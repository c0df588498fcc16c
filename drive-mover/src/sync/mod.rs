pub mod batch;
pub mod invoker;
pub mod mirror;
pub mod policy;
pub mod scheduler;
pub mod tree;

#[cfg(test)]
mod fake;

use std::sync::{Mutex, MutexGuard, PoisonError};

pub use batch::{BatchMutator, BatchProgress, BatchReport, FailedItem};
pub use invoker::{InvokerConfig, RateLimitedInvoker, RetryDecision};
pub use mirror::{LookupTable, MirrorError, MirrorOutcome, TreeMirror};
pub use policy::ReasonPolicy;
pub use scheduler::{RunReport, TaskScheduler};
pub use tree::{FolderIx, FolderTree, Node, NodeKind};

// Poisoned locks are recovered; panics are reported through RunReport.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
