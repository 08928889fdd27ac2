//! In-memory project tree.
//!
//! Nodes live in an arena indexed by [`NodeId`]. Folders hold their children
//! in a `BTreeMap`, so every walk visits names in sorted order. Folders are
//! implicit: they are created by the first file stored beneath them and
//! pruned when their last descendant goes. The root folder always exists.

use crate::error::{Error, Result};
use crate::path::ProjectPath;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Index of a node in the tree arena.
pub type NodeId = usize;

/// The root folder's id.
pub const ROOT: NodeId = 0;

/// Where a file's bytes live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "path", rename_all = "snake_case")]
pub enum Location {
    /// Owned by the project, relative to its storage root.
    Internal(PathBuf),
    /// A linked file outside the project, by absolute path.
    External(PathBuf),
}

/// A file node's reference to its backing bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub location: Location,
    /// Suffix the bytes were written with (no leading dot, may be empty).
    pub suffix: String,
}

impl FileRecord {
    pub fn internal(relative: impl Into<PathBuf>, suffix: impl Into<String>) -> Self {
        Self {
            location: Location::Internal(relative.into()),
            suffix: suffix.into(),
        }
    }

    pub fn external(path: impl Into<PathBuf>, suffix: impl Into<String>) -> Self {
        Self {
            location: Location::External(path.into()),
            suffix: suffix.into(),
        }
    }

    pub fn is_internal(&self) -> bool {
        matches!(self.location, Location::Internal(_))
    }
}

/// Kind of node at a project path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Folder,
    File,
}

/// Direct children of a folder, sorted by name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Listing {
    pub files: Vec<String>,
    pub folders: Vec<String>,
}

#[derive(Debug, Clone)]
enum Node {
    Folder { children: BTreeMap<String, NodeId> },
    File { record: FileRecord },
}

#[derive(Debug, Clone)]
struct Slot {
    name: String,
    parent: Option<NodeId>,
    node: Node,
}

/// Arena-backed tree of folders and files.
#[derive(Debug, Clone)]
pub struct Tree {
    slots: Vec<Option<Slot>>,
    free: Vec<NodeId>,
}

impl Default for Tree {
    fn default() -> Self {
        Self::new()
    }
}

impl Tree {
    /// A tree holding only the root folder.
    pub fn new() -> Self {
        Self {
            slots: vec![Some(Slot {
                name: String::new(),
                parent: None,
                node: Node::Folder {
                    children: BTreeMap::new(),
                },
            })],
            free: Vec::new(),
        }
    }

    /// Rebuild a tree from flat `(path, record)` pairs.
    pub fn from_records<I>(records: I) -> Result<Self>
    where
        I: IntoIterator<Item = (ProjectPath, FileRecord)>,
    {
        let mut tree = Self::new();
        for (path, record) in records {
            tree.insert_file(&path, record)?;
        }
        Ok(tree)
    }

    fn slot(&self, id: NodeId) -> Option<&Slot> {
        self.slots.get(id).and_then(Option::as_ref)
    }

    fn slot_mut(&mut self, id: NodeId) -> Option<&mut Slot> {
        self.slots.get_mut(id).and_then(Option::as_mut)
    }

    fn child(&self, parent: NodeId, name: &str) -> Option<NodeId> {
        match &self.slot(parent)?.node {
            Node::Folder { children } => children.get(name).copied(),
            Node::File { .. } => None,
        }
    }

    /// Node at `path`, if any.
    pub fn lookup(&self, path: &ProjectPath) -> Option<NodeId> {
        let mut current = ROOT;
        for segment in path.segments() {
            current = self.child(current, segment)?;
        }
        Some(current)
    }

    pub fn kind_of(&self, id: NodeId) -> Option<NodeKind> {
        self.slot(id).map(|slot| match slot.node {
            Node::Folder { .. } => NodeKind::Folder,
            Node::File { .. } => NodeKind::File,
        })
    }

    /// Kind of node at `path`, if any.
    pub fn kind(&self, path: &ProjectPath) -> Option<NodeKind> {
        self.lookup(path).and_then(|id| self.kind_of(id))
    }

    /// File record of node `id`, if it is a file.
    pub fn file(&self, id: NodeId) -> Option<&FileRecord> {
        match &self.slot(id)?.node {
            Node::File { record } => Some(record),
            Node::Folder { .. } => None,
        }
    }

    /// File record at `path`, if a file lives there.
    pub fn file_at(&self, path: &ProjectPath) -> Option<&FileRecord> {
        self.lookup(path).and_then(|id| self.file(id))
    }

    /// Children of folder `id` in name order. Empty for files.
    pub fn children(&self, id: NodeId) -> Vec<(&str, NodeId)> {
        match self.slot(id).map(|slot| &slot.node) {
            Some(Node::Folder { children }) => children
                .iter()
                .map(|(name, child)| (name.as_str(), *child))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Fail with `PathConflict` if a file cannot be placed at `path`.
    ///
    /// Every proper prefix must be absent or a folder, and `path` itself must
    /// be absent or a file.
    pub fn check_insert(&self, path: &ProjectPath) -> Result<()> {
        if path.is_root() {
            return Err(Error::path_conflict("/", "the project root is a folder"));
        }

        let mut current = ROOT;
        let mut walked = ProjectPath::root();
        let last = path.segments().len() - 1;
        for (depth, segment) in path.segments().iter().enumerate() {
            walked = walked.child(segment);
            let Some(next) = self.child(current, segment) else {
                return Ok(());
            };
            match (depth == last, self.kind_of(next)) {
                (false, Some(NodeKind::File)) => {
                    return Err(Error::path_conflict(
                        walked.to_string(),
                        format!("`{}` is a file and cannot contain `{}`", walked, path),
                    ));
                }
                (true, Some(NodeKind::Folder)) => {
                    return Err(Error::path_conflict(
                        path.to_string(),
                        "a folder already exists at this path",
                    ));
                }
                _ => {}
            }
            current = next;
        }
        Ok(())
    }

    fn alloc(&mut self, slot: Slot) -> NodeId {
        match self.free.pop() {
            Some(id) => {
                self.slots[id] = Some(slot);
                id
            }
            None => {
                self.slots.push(Some(slot));
                self.slots.len() - 1
            }
        }
    }

    fn attach(&mut self, parent: NodeId, name: &str, node: Node) -> NodeId {
        let id = self.alloc(Slot {
            name: name.to_string(),
            parent: Some(parent),
            node,
        });
        if let Some(Slot {
            node: Node::Folder { children },
            ..
        }) = self.slot_mut(parent)
        {
            children.insert(name.to_string(), id);
        }
        id
    }

    /// Place a file at `path`, creating folders as needed.
    ///
    /// Returns the record it replaced, if a file was already there.
    pub fn insert_file(
        &mut self,
        path: &ProjectPath,
        record: FileRecord,
    ) -> Result<Option<FileRecord>> {
        self.check_insert(path)?;

        let Some((last, dirs)) = path.segments().split_last() else {
            return Err(Error::path_conflict("/", "the project root is a folder"));
        };

        let mut current = ROOT;
        for segment in dirs {
            current = match self.child(current, segment) {
                Some(id) => id,
                None => self.attach(
                    current,
                    segment,
                    Node::Folder {
                        children: BTreeMap::new(),
                    },
                ),
            };
        }

        if let Some(existing) = self.child(current, last) {
            if let Some(Slot {
                node: Node::File { record: old },
                ..
            }) = self.slot_mut(existing)
            {
                return Ok(Some(std::mem::replace(old, record)));
            }
            return Err(Error::path_conflict(
                path.to_string(),
                "a folder already exists at this path",
            ));
        }

        self.attach(current, last, Node::File { record });
        Ok(None)
    }

    /// Remove the node at `path`.
    ///
    /// Non-empty folders need `recursive`. Removing the root clears it.
    /// Returns the records of every file removed, in path order.
    pub fn remove(
        &mut self,
        path: &ProjectPath,
        recursive: bool,
    ) -> Result<Vec<(ProjectPath, FileRecord)>> {
        let id = self
            .lookup(path)
            .ok_or_else(|| Error::path_not_found(path.to_string(), "nothing stored at this path"))?;

        let has_children = !self.children(id).is_empty();
        if has_children && !recursive {
            return Err(Error::not_empty(path.to_string()));
        }

        let removed = self.files_under(id, path);

        if id == ROOT {
            let children: Vec<NodeId> = self.children(ROOT).iter().map(|(_, c)| *c).collect();
            for child in children {
                self.free_subtree(child);
            }
            if let Some(Slot {
                node: Node::Folder { children },
                ..
            }) = self.slot_mut(ROOT)
            {
                children.clear();
            }
            return Ok(removed);
        }

        let parent = self.detach(id);
        self.free_subtree(id);
        if let Some(parent) = parent {
            self.prune(parent);
        }
        Ok(removed)
    }

    /// Move the file at `from` to `to`.
    ///
    /// Fails with `PathConflict` if a file exists at `to` and `overwrite` is
    /// false. Returns the record replaced at `to`, if any.
    pub fn rename(
        &mut self,
        from: &ProjectPath,
        to: &ProjectPath,
        overwrite: bool,
    ) -> Result<Option<FileRecord>> {
        let record = self
            .file_at(from)
            .cloned()
            .ok_or_else(|| Error::path_not_found(from.to_string(), "no file at this path"))?;
        if from == to {
            return Ok(None);
        }
        if self.kind(to) == Some(NodeKind::File) && !overwrite {
            return Err(Error::path_conflict(
                to.to_string(),
                "a file already exists at the destination",
            ));
        }
        self.check_insert(to)?;

        self.remove(from, false)?;
        self.insert_file(to, record)
    }

    /// Unlink `id` from its parent, returning the parent.
    fn detach(&mut self, id: NodeId) -> Option<NodeId> {
        let (parent, name) = {
            let slot = self.slot(id)?;
            (slot.parent?, slot.name.clone())
        };
        if let Some(Slot {
            node: Node::Folder { children },
            ..
        }) = self.slot_mut(parent)
        {
            children.remove(&name);
        }
        Some(parent)
    }

    fn free_subtree(&mut self, id: NodeId) {
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let Some(slot) = self.slots.get_mut(current).and_then(Option::take) else {
                continue;
            };
            if let Node::Folder { children } = slot.node {
                stack.extend(children.into_values());
            }
            self.free.push(current);
        }
    }

    /// Drop empty folders from `id` upward, stopping at the root.
    fn prune(&mut self, mut id: NodeId) {
        while id != ROOT && self.kind_of(id) == Some(NodeKind::Folder) {
            if !self.children(id).is_empty() {
                break;
            }
            let parent = self.detach(id);
            self.free_subtree(id);
            match parent {
                Some(parent) => id = parent,
                None => break,
            }
        }
    }

    /// Every file beneath node `id` (itself included), in path order.
    fn files_under(&self, id: NodeId, base: &ProjectPath) -> Vec<(ProjectPath, FileRecord)> {
        let mut files = Vec::new();
        let mut stack = vec![(id, base.clone())];
        while let Some((current, path)) = stack.pop() {
            if let Some(record) = self.file(current) {
                files.push((path, record.clone()));
                continue;
            }
            for (name, child) in self.children(current).into_iter().rev() {
                stack.push((child, path.child(name)));
            }
        }
        files
    }

    /// Every file in the tree, in path order.
    pub fn files(&self) -> Vec<(ProjectPath, FileRecord)> {
        self.files_under(ROOT, &ProjectPath::root())
    }

    pub fn file_count(&self) -> usize {
        self.slots
            .iter()
            .flatten()
            .filter(|slot| matches!(slot.node, Node::File { .. }))
            .count()
    }

    /// Number of live nodes, root included.
    pub fn node_count(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    /// Direct children of the folder at `path`.
    pub fn listing(&self, path: &ProjectPath) -> Result<Listing> {
        let id = self
            .lookup(path)
            .ok_or_else(|| Error::path_not_found(path.to_string(), "no folder at this path"))?;
        if self.kind_of(id) != Some(NodeKind::Folder) {
            return Err(Error::path_not_found(
                path.to_string(),
                "path is a file, not a folder",
            ));
        }

        let mut listing = Listing::default();
        for (name, child) in self.children(id) {
            match self.kind_of(child) {
                Some(NodeKind::File) => listing.files.push(name.to_string()),
                Some(NodeKind::Folder) => listing.folders.push(name.to_string()),
                None => {}
            }
        }
        Ok(listing)
    }
}
