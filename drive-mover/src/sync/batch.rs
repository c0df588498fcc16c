use std::convert::Infallible;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use drive_core::DriveError;
use tracing::{debug, warn};

use super::invoker::RateLimitedInvoker;
use super::lock;
use super::mirror::LookupTable;
use super::policy::ReasonPolicy;
use super::scheduler::TaskScheduler;
use super::tree::Node;
use crate::remote::{DriveRemote, MutateParams};

#[derive(Debug)]
pub struct FailedItem {
    pub node: Node,
    pub error: DriveError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchProgress {
    pub settled: usize,
    pub total: usize,
}

#[derive(Debug, Default)]
pub struct BatchReport {
    pub succeeded: Vec<Node>,
    pub failures: Vec<FailedItem>,
    /// Items whose task panicked; they appear in neither list above.
    pub panicked: usize,
}

impl BatchReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && self.panicked == 0
    }
}

type ProgressFn = Arc<dyn Fn(BatchProgress) + Send + Sync>;

/// Applies one remote mutation per item, collecting failures instead of
/// stopping the batch.
pub struct BatchMutator<R> {
    remote: Arc<R>,
    invoker: RateLimitedInvoker,
    policy: Arc<ReasonPolicy>,
    concurrency: usize,
    progress: Option<ProgressFn>,
}

impl<R: DriveRemote> BatchMutator<R> {
    pub fn new(
        remote: Arc<R>,
        invoker: RateLimitedInvoker,
        policy: Arc<ReasonPolicy>,
        concurrency: usize,
    ) -> Self {
        Self {
            remote,
            invoker,
            policy,
            concurrency,
            progress: None,
        }
    }

    /// Called once for every item that settles, in completion order.
    pub fn with_progress<F>(mut self, progress: F) -> Self
    where
        F: Fn(BatchProgress) + Send + Sync + 'static,
    {
        self.progress = Some(Arc::new(progress));
        self
    }

    pub async fn apply_to_all<M>(&self, items: Vec<Node>, mutation: M) -> BatchReport
    where
        M: Fn(&Node) -> MutateParams + Send + Sync + 'static,
    {
        let total = items.len();
        let mutation = Arc::new(mutation);
        let succeeded: Arc<Mutex<Vec<Node>>> = Arc::default();
        let failures: Arc<Mutex<Vec<FailedItem>>> = Arc::default();
        let settled = Arc::new(AtomicUsize::new(0));
        let scheduler: TaskScheduler<Infallible> = TaskScheduler::new(self.concurrency);

        for item in items {
            let remote = Arc::clone(&self.remote);
            let invoker = self.invoker.clone();
            let policy = Arc::clone(&self.policy);
            let mutation = Arc::clone(&mutation);
            let succeeded = Arc::clone(&succeeded);
            let failures = Arc::clone(&failures);
            let settled = Arc::clone(&settled);
            let progress = self.progress.clone();
            scheduler.add(move || async move {
                let params = mutation(&item);
                let outcome = invoker
                    .invoke_with(
                        || async { remote.mutate(&item.id, &params).await.map(Some) },
                        |err| policy.classify(err),
                        |error| {
                            warn!(id = %item.id, name = %item.name, error = %error, "mutation failed");
                            lock(&failures).push(FailedItem {
                                node: item.clone(),
                                error,
                            });
                            Ok(None)
                        },
                    )
                    .await;
                if let Ok(Some(updated)) = outcome {
                    debug!(id = %updated.id, name = %updated.name, "mutation applied");
                    lock(&succeeded).push(updated);
                }
                let done = settled.fetch_add(1, Ordering::SeqCst) + 1;
                if let Some(progress) = progress {
                    progress(BatchProgress {
                        settled: done,
                        total,
                    });
                }
                Ok(())
            });
        }

        let report = scheduler.run().await;
        if report.panicked > 0 {
            warn!(panicked = report.panicked, "batch tasks panicked");
        }

        BatchReport {
            succeeded: std::mem::take(&mut *lock(&succeeded)),
            failures: std::mem::take(&mut *lock(&failures)),
            panicked: report.panicked,
        }
    }
}

/// Moves a file out of its current parents into their mirrored counterparts.
pub fn reparent_params(node: &Node, lookup: &LookupTable) -> MutateParams {
    MutateParams {
        add_parents: node
            .parent_ids
            .iter()
            .filter_map(|parent| lookup.get(parent))
            .map(str::to_string)
            .collect(),
        remove_parents: node.parent_ids.clone(),
        new_owner: None,
    }
}

pub fn ownership_params(email: &str) -> MutateParams {
    MutateParams {
        new_owner: Some(email.to_string()),
        ..MutateParams::default()
    }
}
