use std::future::Future;

use drive_core::{ChildFilter, DriveClient, DriveError, DriveFile, FileUpdate};

use crate::sync::tree::{Node, NodeKind};

/// One page of a child listing.
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub nodes: Vec<Node>,
    pub next_page_token: Option<String>,
}

/// Fields a mutation changes; unset fields are left alone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MutateParams {
    pub add_parents: Vec<String>,
    pub remove_parents: Vec<String>,
    pub new_owner: Option<String>,
}

impl MutateParams {
    pub fn touches_parents(&self) -> bool {
        !self.add_parents.is_empty() || !self.remove_parents.is_empty()
    }
}

/// The remote operations the sync layer needs.
pub trait DriveRemote: Send + Sync + 'static {
    fn get_node(&self, id: &str) -> impl Future<Output = Result<Node, DriveError>> + Send;

    fn list_children_page(
        &self,
        parent_id: &str,
        filter: ChildFilter,
        page_token: Option<&str>,
    ) -> impl Future<Output = Result<Page, DriveError>> + Send;

    fn create_folder(
        &self,
        parent_id: &str,
        name: &str,
    ) -> impl Future<Output = Result<Node, DriveError>> + Send;

    fn mutate(
        &self,
        node_id: &str,
        params: &MutateParams,
    ) -> impl Future<Output = Result<Node, DriveError>> + Send;
}

impl From<DriveFile> for Node {
    fn from(file: DriveFile) -> Self {
        let kind = if file.is_folder() {
            NodeKind::Folder
        } else {
            NodeKind::File
        };
        let owner = file.owner_email().map(str::to_string);
        Self {
            id: file.id,
            name: file.name,
            parent_ids: file.parents,
            owner,
            kind,
        }
    }
}

/// [`DriveRemote`] backed by the Drive REST client, optionally scoped to one
/// shared drive.
#[derive(Clone)]
pub struct DriveApiRemote {
    client: DriveClient,
    page_size: u32,
    drive_id: Option<String>,
}

impl DriveApiRemote {
    pub fn new(client: DriveClient, page_size: u32) -> Self {
        Self {
            client,
            page_size: page_size.max(1),
            drive_id: None,
        }
    }

    pub fn scoped_to_drive(mut self, drive_id: impl Into<String>) -> Self {
        self.drive_id = Some(drive_id.into());
        self
    }
}

impl DriveRemote for DriveApiRemote {
    async fn get_node(&self, id: &str) -> Result<Node, DriveError> {
        Ok(self.client.get_file(id).await?.into())
    }

    async fn list_children_page(
        &self,
        parent_id: &str,
        filter: ChildFilter,
        page_token: Option<&str>,
    ) -> Result<Page, DriveError> {
        let list = self
            .client
            .list_children_page(
                parent_id,
                filter,
                self.page_size,
                page_token,
                self.drive_id.as_deref(),
            )
            .await?;
        Ok(Page {
            nodes: list.files.into_iter().map(Node::from).collect(),
            next_page_token: list.next_page_token.filter(|token| !token.is_empty()),
        })
    }

    async fn create_folder(&self, parent_id: &str, name: &str) -> Result<Node, DriveError> {
        Ok(self.client.create_folder(parent_id, name).await?.into())
    }

    async fn mutate(&self, node_id: &str, params: &MutateParams) -> Result<Node, DriveError> {
        if let Some(owner) = params.new_owner.as_deref() {
            self.client.transfer_ownership(node_id, owner).await?;
        }
        if params.touches_parents() {
            let update = FileUpdate {
                add_parents: params.add_parents.clone(),
                remove_parents: params.remove_parents.clone(),
            };
            return Ok(self.client.update_parents(node_id, &update).await?.into());
        }
        Ok(self.client.get_file(node_id).await?.into())
    }
}
