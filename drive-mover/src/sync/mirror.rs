use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use drive_core::{ChildFilter, DriveError};
use thiserror::Error;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info};

use super::invoker::RateLimitedInvoker;
use super::lock;
use super::policy::ReasonPolicy;
use super::scheduler::{RunReport, TaskScheduler};
use super::tree::{FolderIx, FolderTree, Node};
use crate::remote::DriveRemote;

#[derive(Debug, Error)]
pub enum MirrorError {
    #[error("failed to list children of {folder_id}: {source}")]
    List {
        folder_id: String,
        #[source]
        source: DriveError,
    },
    #[error("failed to create folder {name:?} under {parent_id}: {source}")]
    Create {
        parent_id: String,
        name: String,
        #[source]
        source: DriveError,
    },
    #[error("{0} mirror task(s) panicked")]
    TaskPanicked(usize),
}

/// Source folder id to destination folder id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LookupTable {
    entries: HashMap<String, String>,
}

impl LookupTable {
    /// Pairs both roots, then every source folder whose name matches a
    /// destination child of the already-paired parent.
    pub fn build(source: &FolderTree, dest: &FolderTree) -> Self {
        let mut entries = HashMap::new();
        let mut stack = vec![(source.root(), dest.root())];
        while let Some((src, dst)) = stack.pop() {
            entries.insert(source.node(src).id.clone(), dest.node(dst).id.clone());
            for &child in source.children(src) {
                if let Some(matched) = dest.child_by_name(dst, &source.node(child).name) {
                    stack.push((child, matched));
                }
            }
        }
        Self { entries }
    }

    pub fn get(&self, source_id: &str) -> Option<&str> {
        self.entries.get(source_id).map(String::as_str)
    }

    pub fn contains(&self, source_id: &str) -> bool {
        self.entries.contains_key(source_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn source_ids(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(source, dest)| (source.as_str(), dest.as_str()))
    }
}

#[derive(Debug)]
pub struct MirrorOutcome {
    pub lookup: LookupTable,
    pub source: FolderTree,
    pub dest: FolderTree,
    pub created: usize,
}

/// Recreates a source folder hierarchy under a destination folder.
pub struct TreeMirror<R> {
    source: Arc<R>,
    dest: Arc<R>,
    invoker: RateLimitedInvoker,
    policy: Arc<ReasonPolicy>,
    concurrency: usize,
}

impl<R: DriveRemote> TreeMirror<R> {
    pub fn new(
        source: Arc<R>,
        dest: Arc<R>,
        invoker: RateLimitedInvoker,
        policy: Arc<ReasonPolicy>,
        concurrency: usize,
    ) -> Self {
        Self {
            source,
            dest,
            invoker,
            policy,
            concurrency,
        }
    }

    pub async fn mirror(&self, source_root: Node, dest_root: Node) -> Result<LookupTable, MirrorError> {
        Ok(self.mirror_detailed(source_root, dest_root).await?.lookup)
    }

    pub async fn mirror_detailed(
        &self,
        source_root: Node,
        dest_root: Node,
    ) -> Result<MirrorOutcome, MirrorError> {
        let source = self.fetch_tree(&self.source, source_root).await?;
        info!(folders = source.len(), "fetched source folder structure");
        let dest = self.fetch_tree(&self.dest, dest_root).await?;
        info!(folders = dest.len(), "fetched destination folder structure");

        let source = Arc::new(source);
        let (dest, created) = self.reconcile(Arc::clone(&source), dest).await?;
        info!(created, "destination folder structure is in place");

        let lookup = LookupTable::build(&source, &dest);
        let source = Arc::try_unwrap(source).unwrap_or_else(|shared| (*shared).clone());
        Ok(MirrorOutcome {
            lookup,
            source,
            dest,
            created,
        })
    }

    /// Lists the files directly inside each of `folder_ids`, one task per folder.
    ///
    /// A file reachable through several listed folders is returned once.
    pub async fn collect_files<I, S>(&self, folder_ids: I) -> Result<Vec<Node>, MirrorError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let found: Arc<Mutex<Vec<Node>>> = Arc::default();
        let scheduler = TaskScheduler::new(self.concurrency);
        for folder_id in folder_ids {
            let folder_id = folder_id.into();
            let remote = Arc::clone(&self.source);
            let invoker = self.invoker.clone();
            let policy = Arc::clone(&self.policy);
            let found = Arc::clone(&found);
            scheduler.add(move || async move {
                let files = list_all_children(
                    &*remote,
                    &invoker,
                    &policy,
                    &folder_id,
                    ChildFilter::Files,
                )
                .await
                .map_err(|source| MirrorError::List {
                    folder_id: folder_id.clone(),
                    source,
                })?;
                lock(&found).extend(files);
                Ok(())
            });
        }
        check(scheduler.run().await)?;

        let mut seen = HashSet::new();
        let mut files = std::mem::take(&mut *lock(&found));
        files.retain(|file| seen.insert(file.id.clone()));
        Ok(files)
    }

    async fn fetch_tree(&self, remote: &Arc<R>, root: Node) -> Result<FolderTree, MirrorError> {
        let ctx = Arc::new(FetchContext {
            remote: Arc::clone(remote),
            invoker: self.invoker.clone(),
            policy: Arc::clone(&self.policy),
            claimed: Mutex::new(HashSet::new()),
            listings: Mutex::new(HashMap::new()),
        });
        let scheduler = TaskScheduler::new(self.concurrency);
        schedule_fetch(&scheduler, &ctx, root.id.clone());
        check(scheduler.run().await)?;

        let listings = std::mem::take(&mut *lock(&ctx.listings));
        Ok(assemble(root, listings))
    }

    async fn reconcile(
        &self,
        source: Arc<FolderTree>,
        dest: FolderTree,
    ) -> Result<(FolderTree, usize), MirrorError> {
        let source_root = source.root();
        let dest_root = dest.root();
        let ctx = Arc::new(ReconcileContext {
            remote: Arc::clone(&self.dest),
            invoker: self.invoker.clone(),
            policy: Arc::clone(&self.policy),
            source,
            dest: Mutex::new(dest),
            gates: Mutex::new(HashMap::new()),
            created: AtomicUsize::new(0),
        });
        let scheduler = TaskScheduler::new(self.concurrency);
        schedule_reconcile(&scheduler, &ctx, source_root, dest_root);
        check(scheduler.run().await)?;

        let created = ctx.created.load(Ordering::SeqCst);
        let dest = lock(&ctx.dest).clone();
        Ok((dest, created))
    }
}

struct FetchContext<R> {
    remote: Arc<R>,
    invoker: RateLimitedInvoker,
    policy: Arc<ReasonPolicy>,
    claimed: Mutex<HashSet<String>>,
    listings: Mutex<HashMap<String, Vec<Node>>>,
}

struct ReconcileContext<R> {
    remote: Arc<R>,
    invoker: RateLimitedInvoker,
    policy: Arc<ReasonPolicy>,
    source: Arc<FolderTree>,
    dest: Mutex<FolderTree>,
    /// One gate per destination folder; find-or-create under a folder holds it.
    gates: Mutex<HashMap<FolderIx, Arc<AsyncMutex<()>>>>,
    created: AtomicUsize,
}

impl<R> ReconcileContext<R> {
    fn gate(&self, dest_ix: FolderIx) -> Arc<AsyncMutex<()>> {
        Arc::clone(lock(&self.gates).entry(dest_ix).or_default())
    }
}

fn schedule_fetch<R: DriveRemote>(
    scheduler: &TaskScheduler<MirrorError>,
    ctx: &Arc<FetchContext<R>>,
    folder_id: String,
) {
    // Folders with several parents inside the tree are listed once.
    if !lock(&ctx.claimed).insert(folder_id.clone()) {
        return;
    }
    let next = scheduler.clone();
    let ctx = Arc::clone(ctx);
    scheduler.add(move || async move {
        let children = list_all_children(
            &*ctx.remote,
            &ctx.invoker,
            &ctx.policy,
            &folder_id,
            ChildFilter::Folders,
        )
        .await
        .map_err(|source| MirrorError::List {
            folder_id: folder_id.clone(),
            source,
        })?;
        for child in &children {
            schedule_fetch(&next, &ctx, child.id.clone());
        }
        debug!(folder_id = %folder_id, children = children.len(), "listed folder");
        lock(&ctx.listings).insert(folder_id, children);
        Ok(())
    });
}

fn schedule_reconcile<R: DriveRemote>(
    scheduler: &TaskScheduler<MirrorError>,
    ctx: &Arc<ReconcileContext<R>>,
    source_ix: FolderIx,
    dest_ix: FolderIx,
) {
    let next = scheduler.clone();
    let ctx = Arc::clone(ctx);
    scheduler.add(move || async move {
        // Same-named source siblings share a destination folder; their
        // subtrees must not create the same child twice.
        let gate = ctx.gate(dest_ix);
        let _held = gate.lock().await;
        for &source_child in ctx.source.children(source_ix) {
            let name = &ctx.source.node(source_child).name;
            let existing = lock(&ctx.dest).child_by_name(dest_ix, name);
            let dest_child = match existing {
                Some(ix) => ix,
                None => {
                    let parent_id = lock(&ctx.dest).node(dest_ix).id.clone();
                    let mut created = ctx
                        .invoker
                        .invoke(
                            || ctx.remote.create_folder(&parent_id, name),
                            |err| ctx.policy.classify(err),
                        )
                        .await
                        .map_err(|source| MirrorError::Create {
                            parent_id: parent_id.clone(),
                            name: name.clone(),
                            source,
                        })?;
                    created.name = name.clone();
                    ctx.created.fetch_add(1, Ordering::SeqCst);
                    info!(name = %name, parent_id = %parent_id, id = %created.id, "created folder");
                    lock(&ctx.dest).push_child(dest_ix, created)
                }
            };
            schedule_reconcile(&next, &ctx, source_child, dest_child);
        }
        Ok(())
    });
}

/// Drains every page of a child listing through the invoker.
pub(crate) async fn list_all_children<R: DriveRemote>(
    remote: &R,
    invoker: &RateLimitedInvoker,
    policy: &ReasonPolicy,
    parent_id: &str,
    filter: ChildFilter,
) -> Result<Vec<Node>, DriveError> {
    let mut nodes = Vec::new();
    let mut page_token: Option<String> = None;
    loop {
        let page = invoker
            .invoke(
                || remote.list_children_page(parent_id, filter, page_token.as_deref()),
                |err| policy.classify(err),
            )
            .await?;
        nodes.extend(page.nodes);
        match page.next_page_token {
            Some(next) => page_token = Some(next),
            None => break,
        }
    }
    Ok(nodes)
}

fn assemble(root: Node, mut listings: HashMap<String, Vec<Node>>) -> FolderTree {
    let mut tree = FolderTree::new(root);
    let mut queue = VecDeque::from([tree.root()]);
    while let Some(ix) = queue.pop_front() {
        if let Some(children) = listings.remove(&tree.node(ix).id) {
            queue.extend(tree.attach_children(ix, children));
        }
    }
    tree
}

fn check(report: RunReport<MirrorError>) -> Result<(), MirrorError> {
    let panicked = report.panicked;
    if let Some(err) = report.first_failure() {
        return Err(err);
    }
    if panicked > 0 {
        return Err(MirrorError::TaskPanicked(panicked));
    }
    Ok(())
}
