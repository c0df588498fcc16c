use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use drive_core::{ApiErrorBody, ApiErrorDetail, ChildFilter, DriveError, StatusCode};

use crate::remote::{DriveRemote, MutateParams, Page};
use crate::sync::tree::{Node, NodeKind};

pub(crate) fn api_error(status: u16, reason: &str) -> DriveError {
    let status = StatusCode::from_u16(status).unwrap();
    DriveError::Api {
        status,
        error: Some(ApiErrorBody {
            code: Some(status.as_u16()),
            message: reason.to_string(),
            errors: vec![ApiErrorDetail {
                domain: Some("global".into()),
                reason: reason.to_string(),
                message: None,
            }],
        }),
        body: String::new(),
    }
}

#[derive(Debug, Clone)]
struct Injected {
    status: u16,
    reason: String,
    remaining: Option<usize>,
}

#[derive(Default)]
struct State {
    nodes: HashMap<String, Node>,
    order: Vec<String>,
    next_id: u64,
    list_calls: usize,
    create_calls: usize,
    mutate_calls: usize,
    list_failures: HashMap<String, Injected>,
    create_failures: HashMap<String, Injected>,
    mutate_failures: HashMap<String, Injected>,
}

/// In-memory drive with paged listings and failure injection.
pub(crate) struct FakeDrive {
    page_size: usize,
    state: Mutex<State>,
}

impl FakeDrive {
    pub(crate) fn new() -> Self {
        Self {
            page_size: 2,
            state: Mutex::new(State::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn add_root(&self, name: &str) -> Node {
        self.insert(None, name, NodeKind::Folder)
    }

    pub(crate) fn add_folder(&self, parent: &Node, name: &str) -> Node {
        self.insert(Some(&parent.id), name, NodeKind::Folder)
    }

    pub(crate) fn add_file(&self, parent: &Node, name: &str) -> Node {
        self.insert(Some(&parent.id), name, NodeKind::File)
    }

    fn insert(&self, parent: Option<&str>, name: &str, kind: NodeKind) -> Node {
        let mut state = self.state();
        state.next_id += 1;
        let node = Node {
            id: format!("n{}", state.next_id),
            name: name.to_string(),
            parent_ids: parent.map(|p| vec![p.to_string()]).unwrap_or_default(),
            owner: Some("owner@example.com".into()),
            kind,
        };
        state.order.push(node.id.clone());
        state.nodes.insert(node.id.clone(), node.clone());
        node
    }

    pub(crate) fn fail_listing(&self, folder_id: &str, status: u16, reason: &str) {
        self.state().list_failures.insert(
            folder_id.to_string(),
            Injected {
                status,
                reason: reason.to_string(),
                remaining: None,
            },
        );
    }

    /// Fails every folder creation under `parent_id`.
    pub(crate) fn fail_create(&self, parent_id: &str, status: u16, reason: &str) {
        self.state().create_failures.insert(
            parent_id.to_string(),
            Injected {
                status,
                reason: reason.to_string(),
                remaining: None,
            },
        );
    }

    /// Fails mutations of `node_id`; `times: None` fails forever.
    pub(crate) fn fail_mutation(&self, node_id: &str, status: u16, reason: &str, times: Option<usize>) {
        self.state().mutate_failures.insert(
            node_id.to_string(),
            Injected {
                status,
                reason: reason.to_string(),
                remaining: times,
            },
        );
    }

    pub(crate) fn node(&self, id: &str) -> Option<Node> {
        self.state().nodes.get(id).cloned()
    }

    pub(crate) fn children_of(&self, parent_id: &str, kind: NodeKind) -> Vec<Node> {
        let state = self.state();
        state
            .order
            .iter()
            .filter_map(|id| state.nodes.get(id))
            .filter(|node| node.kind == kind && node.parent_ids.iter().any(|p| p == parent_id))
            .cloned()
            .collect()
    }

    pub(crate) fn create_calls(&self) -> usize {
        self.state().create_calls
    }

    pub(crate) fn mutate_calls(&self) -> usize {
        self.state().mutate_calls
    }

    pub(crate) fn list_calls(&self) -> usize {
        self.state().list_calls
    }
}

fn take_failure(failures: &mut HashMap<String, Injected>, id: &str) -> Option<DriveError> {
    let injected = failures.get_mut(id)?;
    match injected.remaining {
        Some(0) => {
            failures.remove(id);
            None
        }
        Some(left) => {
            injected.remaining = Some(left - 1);
            Some(api_error(injected.status, &injected.reason))
        }
        None => Some(api_error(injected.status, &injected.reason)),
    }
}

impl DriveRemote for FakeDrive {
    async fn get_node(&self, id: &str) -> Result<Node, DriveError> {
        tokio::task::yield_now().await;
        self.node(id).ok_or_else(|| api_error(404, "notFound"))
    }

    async fn list_children_page(
        &self,
        parent_id: &str,
        filter: ChildFilter,
        page_token: Option<&str>,
    ) -> Result<Page, DriveError> {
        tokio::task::yield_now().await;
        let mut state = self.state();
        state.list_calls += 1;
        if let Some(err) = take_failure(&mut state.list_failures, parent_id) {
            return Err(err);
        }
        let matching: Vec<Node> = state
            .order
            .iter()
            .filter_map(|id| state.nodes.get(id))
            .filter(|node| node.parent_ids.iter().any(|p| p == parent_id))
            .filter(|node| match filter {
                ChildFilter::Folders => node.kind == NodeKind::Folder,
                ChildFilter::Files => node.kind == NodeKind::File,
                ChildFilter::All => true,
            })
            .cloned()
            .collect();
        let offset = page_token.and_then(|t| t.parse::<usize>().ok()).unwrap_or(0);
        let end = (offset + self.page_size).min(matching.len());
        Ok(Page {
            nodes: matching[offset.min(end)..end].to_vec(),
            next_page_token: (end < matching.len()).then(|| end.to_string()),
        })
    }

    async fn create_folder(&self, parent_id: &str, name: &str) -> Result<Node, DriveError> {
        tokio::task::yield_now().await;
        {
            let mut state = self.state();
            state.create_calls += 1;
            if let Some(err) = take_failure(&mut state.create_failures, parent_id) {
                return Err(err);
            }
        }
        Ok(self.insert(Some(parent_id), name, NodeKind::Folder))
    }

    async fn mutate(&self, node_id: &str, params: &MutateParams) -> Result<Node, DriveError> {
        tokio::task::yield_now().await;
        let mut state = self.state();
        state.mutate_calls += 1;
        if let Some(err) = take_failure(&mut state.mutate_failures, node_id) {
            return Err(err);
        }
        let node = state
            .nodes
            .get_mut(node_id)
            .ok_or_else(|| api_error(404, "notFound"))?;
        node.parent_ids.retain(|p| !params.remove_parents.contains(p));
        for parent in &params.add_parents {
            if !node.parent_ids.contains(parent) {
                node.parent_ids.push(parent.clone());
            }
        }
        if let Some(owner) = &params.new_owner {
            node.owner = Some(owner.clone());
        }
        Ok(node.clone())
    }
}
