use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Folder,
    File,
}

/// A folder or file as seen by the mover.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub id: String,
    pub name: String,
    pub parent_ids: Vec<String>,
    pub owner: Option<String>,
    pub kind: NodeKind,
}

impl Node {
    pub fn folder(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            parent_ids: Vec::new(),
            owner: None,
            kind: NodeKind::Folder,
        }
    }

    pub fn is_folder(&self) -> bool {
        self.kind == NodeKind::Folder
    }
}

/// Handle to a folder stored in a [`FolderTree`].
pub type FolderIx = usize;

#[derive(Debug, Clone)]
struct FolderEntry {
    node: Node,
    children: Vec<FolderIx>,
    child_by_name: HashMap<String, FolderIx>,
    child_by_id: HashMap<String, FolderIx>,
}

impl FolderEntry {
    fn new(node: Node) -> Self {
        Self {
            node,
            children: Vec::new(),
            child_by_name: HashMap::new(),
            child_by_id: HashMap::new(),
        }
    }
}

/// Arena-backed folder hierarchy.
///
/// Every folder keeps its ordered children plus two lookup indexes that are
/// re-derived from the children whenever they change. Sibling names are not
/// unique; the name index keeps the last child carrying a given name.
#[derive(Debug, Clone)]
pub struct FolderTree {
    entries: Vec<FolderEntry>,
}

impl FolderTree {
    pub fn new(root: Node) -> Self {
        Self {
            entries: vec![FolderEntry::new(root)],
        }
    }

    pub fn root(&self) -> FolderIx {
        0
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn node(&self, ix: FolderIx) -> &Node {
        &self.entries[ix].node
    }

    pub fn children(&self, ix: FolderIx) -> &[FolderIx] {
        &self.entries[ix].children
    }

    pub fn child_by_name(&self, ix: FolderIx, name: &str) -> Option<FolderIx> {
        self.entries[ix].child_by_name.get(name).copied()
    }

    pub fn child_by_id(&self, ix: FolderIx, id: &str) -> Option<FolderIx> {
        self.entries[ix].child_by_id.get(id).copied()
    }

    /// Appends `nodes` as children of `ix` and returns their handles.
    pub fn attach_children(&mut self, ix: FolderIx, nodes: Vec<Node>) -> Vec<FolderIx> {
        let mut added = Vec::with_capacity(nodes.len());
        for node in nodes {
            let child = self.entries.len();
            self.entries.push(FolderEntry::new(node));
            added.push(child);
        }
        self.entries[ix].children.extend(added.iter().copied());
        self.reindex(ix);
        added
    }

    pub fn push_child(&mut self, ix: FolderIx, node: Node) -> FolderIx {
        let child = self.entries.len();
        self.entries.push(FolderEntry::new(node));
        self.entries[ix].children.push(child);
        self.reindex(ix);
        child
    }

    fn reindex(&mut self, ix: FolderIx) {
        let mut by_name = HashMap::new();
        let mut by_id = HashMap::new();
        for &child in &self.entries[ix].children {
            let node = &self.entries[child].node;
            by_name.insert(node.name.clone(), child);
            by_id.insert(node.id.clone(), child);
        }
        let entry = &mut self.entries[ix];
        entry.child_by_name = by_name;
        entry.child_by_id = by_id;
    }

    /// Names of the direct children of `ix`, in listing order.
    pub fn child_names(&self, ix: FolderIx) -> Vec<&str> {
        self.children(ix)
            .iter()
            .map(|&child| self.node(child).name.as_str())
            .collect()
    }
}
