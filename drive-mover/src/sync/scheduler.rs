use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use tokio::sync::{Notify, Semaphore};
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, warn};

use super::lock;

pub const DEFAULT_CONCURRENCY: usize = 10;

type TaskFactory<E> = Box<dyn FnOnce() -> BoxFuture<'static, Result<(), E>> + Send>;

/// Runs a dynamically growing set of tasks with a fixed number of slots.
///
/// Clones share one queue, so a running task can hold a clone and add
/// follow-up work to the same [`run`](Self::run).
pub struct TaskScheduler<E> {
    shared: Arc<Shared<E>>,
}

struct Shared<E> {
    limit: usize,
    gate: Arc<Semaphore>,
    pending: Mutex<VecDeque<TaskFactory<E>>>,
    enqueued: Notify,
}

impl<E> Clone for TaskScheduler<E> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

/// Per-task outcomes of one [`TaskScheduler::run`].
#[derive(Debug)]
pub struct RunReport<E> {
    pub succeeded: usize,
    pub failures: Vec<E>,
    pub panicked: usize,
}

impl<E> Default for RunReport<E> {
    fn default() -> Self {
        Self {
            succeeded: 0,
            failures: Vec::new(),
            panicked: 0,
        }
    }
}

impl<E> RunReport<E> {
    pub fn settled(&self) -> usize {
        self.succeeded + self.failures.len() + self.panicked
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && self.panicked == 0
    }

    pub fn first_failure(self) -> Option<E> {
        self.failures.into_iter().next()
    }

    fn record(&mut self, joined: Result<Result<(), E>, JoinError>) {
        match joined {
            Ok(Ok(())) => self.succeeded += 1,
            Ok(Err(err)) => {
                debug!("scheduled task failed");
                self.failures.push(err);
            }
            Err(err) => {
                warn!(error = %err, "scheduled task panicked");
                self.panicked += 1;
            }
        }
    }
}

impl<E: Send + 'static> TaskScheduler<E> {
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            shared: Arc::new(Shared {
                limit,
                gate: Arc::new(Semaphore::new(limit)),
                pending: Mutex::new(VecDeque::new()),
                enqueued: Notify::new(),
            }),
        }
    }

    pub fn limit(&self) -> usize {
        self.shared.limit
    }

    /// Number of tasks waiting to be started.
    pub fn pending(&self) -> usize {
        self.lock_pending().len()
    }

    pub fn add<F, Fut>(&self, factory: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
    {
        let task: TaskFactory<E> = Box::new(move || factory().boxed());
        self.lock_pending().push_back(task);
        self.shared.enqueued.notify_one();
    }

    /// Drives queued tasks until nothing is pending and nothing is running,
    /// including tasks added while the run is in progress.
    pub async fn run(&self) -> RunReport<E> {
        let mut running: JoinSet<Result<(), E>> = JoinSet::new();
        let mut report = RunReport::default();

        loop {
            let next = self.lock_pending().pop_front();
            if let Some(task) = next {
                let Ok(permit) = Arc::clone(&self.shared.gate).acquire_owned().await else {
                    warn!("admission gate closed; abandoning remaining tasks");
                    break;
                };
                running.spawn(async move {
                    let outcome = task().await;
                    drop(permit);
                    outcome
                });
                continue;
            }

            if running.is_empty() {
                break;
            }

            tokio::select! {
                joined = running.join_next() => {
                    if let Some(joined) = joined {
                        report.record(joined);
                    }
                }
                () = self.shared.enqueued.notified() => {}
            }
        }

        while let Some(joined) = running.join_next().await {
            report.record(joined);
        }
        debug!(
            succeeded = report.succeeded,
            failed = report.failures.len(),
            panicked = report.panicked,
            "scheduler drained"
        );
        report
    }

    fn lock_pending(&self) -> MutexGuard<'_, VecDeque<TaskFactory<E>>> {
        lock(&self.shared.pending)
    }
}
