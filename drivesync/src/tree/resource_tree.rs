use std::collections::HashMap;
use std::mem;
use std::ops::{Index, IndexMut};
use std::path::{Component, Path, PathBuf};

use drive_api::RemoteEntry;
use thiserror::Error;

use super::resource::{NodeId, Resource, ResourceDoc};
use super::state::{Stamp, Transition};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TreeError {
    #[error("root record has href {found:?}, expected {expected:?}")]
    RootMismatch { expected: String, found: String },
    #[error("href {0:?} is already tracked by another resource")]
    DuplicateHref(String),
    #[error("{0:?} is not a folder and cannot hold children")]
    NotAFolder(String),
    #[error("{name:?} names parent {parent_href:?} but is stored under {actual:?}")]
    ParentMismatch {
        name: String,
        parent_href: String,
        actual: String,
    },
    #[error("{0:?} already has a parent")]
    AlreadyAttached(String),
    #[error("{0:?} is still attached to its parent")]
    StillAttached(String),
    #[error("{0:?} still has children")]
    HasChildren(String),
    #[error("attaching {child:?} under {parent:?} would create a cycle")]
    Cycle { parent: String, child: String },
    #[error("the root resource cannot be removed")]
    RootRemoval,
}

/// Owner of every [`Resource`] of one synchronized directory.
///
/// Resources live in an arena and are addressed by [`NodeId`]; a handle stays
/// valid until the resource is erased and is never reused. Besides identity,
/// resources are indexed by href. Whoever changes a resource's href must call
/// [`ResourceTree::reinsert`] afterwards.
#[derive(Debug)]
pub struct ResourceTree {
    base_dir: PathBuf,
    root_href: String,
    root: NodeId,
    nodes: Vec<Option<Resource>>,
    by_href: HashMap<String, NodeId>,
    href_of: HashMap<NodeId, String>,
}

impl ResourceTree {
    pub fn new(base_dir: impl Into<PathBuf>, root_href: &str) -> Self {
        assert!(!root_href.is_empty(), "root href must not be empty");
        let root = NodeId(0);
        Self {
            base_dir: base_dir.into(),
            root_href: root_href.to_string(),
            root,
            nodes: vec![Some(Resource::root(root_href))],
            by_href: HashMap::from([(root_href.to_string(), root)]),
            href_of: HashMap::from([(root, root_href.to_string())]),
        }
    }

    /// Rebuilds a tree from a persisted document. The document's top record
    /// must carry `root_href`.
    pub fn from_doc(
        base_dir: impl Into<PathBuf>,
        root_href: &str,
        doc: &ResourceDoc,
    ) -> Result<Self, TreeError> {
        if doc.href != root_href {
            return Err(TreeError::RootMismatch {
                expected: root_href.to_string(),
                found: doc.href.clone(),
            });
        }
        if !doc.folder {
            return Err(TreeError::NotAFolder(doc.name.clone()));
        }
        let mut tree = Self::new(base_dir, root_href);
        let root = tree.root;
        tree.nodes[root.0] = Some(Resource::from_doc(doc));
        tree.add_docs(root, &doc.child)?;
        Ok(tree)
    }

    fn add_docs(&mut self, parent: NodeId, docs: &[ResourceDoc]) -> Result<(), TreeError> {
        for doc in docs {
            let parent_node = &self[parent];
            if !doc.parent_href.is_empty()
                && !parent_node.self_href().is_empty()
                && doc.parent_href != parent_node.self_href()
            {
                return Err(TreeError::ParentMismatch {
                    name: doc.name.clone(),
                    parent_href: doc.parent_href.clone(),
                    actual: parent_node.self_href().to_string(),
                });
            }
            let id = self.insert_child(parent, Resource::from_doc(doc))?;
            self.add_docs(id, &doc.child)?;
        }
        Ok(())
    }

    /// Replaces the whole tree with the one described by `doc`. On error the
    /// current tree is left untouched.
    pub fn read(&mut self, doc: &ResourceDoc) -> Result<(), TreeError> {
        let mut fresh = Self::from_doc(self.base_dir.clone(), &self.root_href, doc)?;
        self.swap(&mut fresh);
        Ok(())
    }

    pub fn serialize(&self) -> ResourceDoc {
        self.serialize_node(self.root)
    }

    pub fn serialize_node(&self, id: NodeId) -> ResourceDoc {
        let resource = &self[id];
        let child = resource
            .children
            .iter()
            .map(|child| self.serialize_node(*child))
            .collect();
        resource.to_doc(child)
    }

    pub fn swap(&mut self, other: &mut Self) {
        mem::swap(self, other);
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn root_href(&self) -> &str {
        &self.root_href
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn get(&self, id: NodeId) -> Option<&Resource> {
        self.nodes.get(id.0).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut Resource> {
        self.nodes.get_mut(id.0).and_then(Option::as_mut)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.get(id).is_some()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.iter().flatten().count()
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &Resource)> + '_ {
        self.nodes
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| slot.as_ref().map(|resource| (NodeId(index), resource)))
    }

    pub fn find_by_href(&self, href: &str) -> Option<NodeId> {
        if href.is_empty() {
            return None;
        }
        self.by_href.get(href).copied()
    }

    /// Linear scan; resource ids survive renames while hrefs do not.
    pub fn find_by_resource_id(&self, resource_id: &str) -> Option<NodeId> {
        if resource_id.is_empty() {
            return None;
        }
        self.iter()
            .find(|(_, resource)| resource.resource_id() == resource_id)
            .map(|(id, _)| id)
    }

    pub fn find_child(&self, parent: NodeId, title: &str) -> Option<NodeId> {
        self[parent]
            .children
            .iter()
            .copied()
            .find(|child| self[*child].name() == title)
    }

    /// Walks the tree from the root. `path` may be absolute under the base
    /// directory or relative to it.
    pub fn find_by_path(&self, path: &Path) -> Option<NodeId> {
        let relative = path.strip_prefix(&self.base_dir).unwrap_or(path);
        let mut node = self.root;
        for component in relative.components() {
            match component {
                Component::Normal(part) => node = self.find_child(node, part.to_str()?)?,
                Component::CurDir => continue,
                _ => return None,
            }
        }
        Some(node)
    }

    /// Local path of a resource; the root maps to the base directory.
    pub fn path(&self, id: NodeId) -> PathBuf {
        self.base_dir.join(self.relative_path(id))
    }

    pub fn relative_path(&self, id: NodeId) -> PathBuf {
        let mut names = Vec::new();
        let mut current = Some(id);
        while let Some(node) = current {
            if node == self.root {
                break;
            }
            let resource = &self[node];
            names.push(resource.name());
            current = resource.parent;
        }
        names.iter().rev().collect()
    }

    /// False for resources hanging off something other than the root, such
    /// as items shared into the account by other owners.
    pub fn is_in_root_tree(&self, id: NodeId) -> bool {
        let mut current = id;
        for _ in 0..self.nodes.len() {
            if current == self.root {
                return true;
            }
            match self.get(current).and_then(Resource::parent) {
                Some(parent) => current = parent,
                None => return false,
            }
        }
        false
    }

    /// Takes ownership of a detached resource and indexes it.
    pub fn insert(&mut self, mut resource: Resource) -> Result<NodeId, TreeError> {
        let href = resource.self_href().to_string();
        if !href.is_empty() && self.by_href.contains_key(&href) {
            return Err(TreeError::DuplicateHref(href));
        }
        resource.parent = None;
        resource.children.clear();
        let id = NodeId(self.nodes.len());
        self.nodes.push(Some(resource));
        if !href.is_empty() {
            self.by_href.insert(href.clone(), id);
            self.href_of.insert(id, href);
        }
        Ok(id)
    }

    /// Links `child` under `parent`, setting both directions.
    pub fn add_child(&mut self, parent: NodeId, child: NodeId) -> Result<(), TreeError> {
        if !self[parent].is_folder() {
            return Err(TreeError::NotAFolder(self[parent].name().to_string()));
        }
        if self[child].parent.is_some() {
            return Err(TreeError::AlreadyAttached(self[child].name().to_string()));
        }
        let mut current = Some(parent);
        while let Some(node) = current {
            if node == child {
                return Err(TreeError::Cycle {
                    parent: self[parent].name().to_string(),
                    child: self[child].name().to_string(),
                });
            }
            current = self[node].parent;
        }
        if child == self.root {
            return Err(TreeError::Cycle {
                parent: self[parent].name().to_string(),
                child: self[child].name().to_string(),
            });
        }

        let parent_href = self[parent].self_href().to_string();
        let node = &mut self[child];
        node.parent = Some(parent);
        if node.parent_href().is_empty() {
            node.set_parent_href(&parent_href);
        }
        self[parent].children.push(child);
        Ok(())
    }

    pub fn insert_child(&mut self, parent: NodeId, resource: Resource) -> Result<NodeId, TreeError> {
        if !self[parent].is_folder() {
            return Err(TreeError::NotAFolder(self[parent].name().to_string()));
        }
        let id = self.insert(resource)?;
        if let Err(err) = self.add_child(parent, id) {
            self.unindex(id);
            self.nodes[id.0] = None;
            return Err(err);
        }
        Ok(id)
    }

    /// Refreshes the href index after a resource's href changed and points
    /// its children at the new href. Returns whether the resource is tracked
    /// by this tree.
    pub fn reinsert(&mut self, id: NodeId) -> Result<bool, TreeError> {
        let Some(resource) = self.get(id) else {
            return Ok(false);
        };
        let href = resource.self_href().to_string();
        if let Some(other) = self.find_by_href(&href)
            && other != id
        {
            return Err(TreeError::DuplicateHref(href));
        }
        self.unindex(id);
        if !href.is_empty() {
            for child in self[id].children.clone() {
                self[child].set_parent_href(&href);
            }
            self.by_href.insert(href.clone(), id);
            self.href_of.insert(id, href);
        }
        Ok(true)
    }

    /// Merges a remote record into a resource and re-keys it.
    pub fn update(
        &mut self,
        id: NodeId,
        entry: &RemoteEntry,
        local: Option<&Stamp>,
    ) -> Result<Transition, TreeError> {
        if let Some(other) = self.find_by_href(&entry.self_href)
            && other != id
        {
            return Err(TreeError::DuplicateHref(entry.self_href.clone()));
        }
        let transition = self[id].merge_remote(entry, local);
        self.reinsert(id)?;
        Ok(transition)
    }

    /// Forgets the remote side of a resource and drops its href key.
    pub fn mark_remote_absent(&mut self, id: NodeId) {
        self[id].clear_remote();
        self.unindex(id);
    }

    /// Unlinks a resource from its parent's child list.
    pub fn detach(&mut self, id: NodeId) -> bool {
        let Some(parent) = self.get(id).and_then(Resource::parent) else {
            return false;
        };
        self[parent].children.retain(|child| *child != id);
        self[id].parent = None;
        true
    }

    /// Destroys a detached, childless resource.
    pub fn erase(&mut self, id: NodeId) -> Result<Resource, TreeError> {
        if id == self.root {
            return Err(TreeError::RootRemoval);
        }
        let resource = &self[id];
        if resource.parent.is_some() {
            return Err(TreeError::StillAttached(resource.name().to_string()));
        }
        if !resource.children.is_empty() {
            return Err(TreeError::HasChildren(resource.name().to_string()));
        }
        self.unindex(id);
        Ok(self.nodes[id.0].take().expect("resource checked live above"))
    }

    /// Detaches a resource and destroys it together with everything below
    /// it. Returns the removed resources in pre-order.
    pub fn remove_subtree(&mut self, id: NodeId) -> Result<Vec<Resource>, TreeError> {
        if id == self.root {
            return Err(TreeError::RootRemoval);
        }
        self.detach(id);
        let order = self.descendants(id);
        let mut removed = Vec::with_capacity(order.len());
        for node in order.into_iter().rev() {
            let resource = &mut self[node];
            resource.parent = None;
            resource.children.clear();
            removed.push(self.erase(node)?);
        }
        removed.reverse();
        Ok(removed)
    }

    /// `id` followed by everything below it, parents before children.
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(node) = stack.pop() {
            out.push(node);
            stack.extend(self[node].children.iter().rev().copied());
        }
        out
    }

    fn unindex(&mut self, id: NodeId) {
        if let Some(old) = self.href_of.remove(&id) {
            self.by_href.remove(&old);
        }
    }
}

impl Clone for ResourceTree {
    /// Deep copy. Handles stay valid in the copy and the root is found again
    /// through the root href.
    fn clone(&self) -> Self {
        let copy = Self {
            base_dir: self.base_dir.clone(),
            root_href: self.root_href.clone(),
            root: self.root,
            nodes: self.nodes.clone(),
            by_href: self.by_href.clone(),
            href_of: self.href_of.clone(),
        };
        debug_assert_eq!(
            copy.by_href.get(&copy.root_href),
            Some(&copy.root),
            "cloned root is not keyed by the root href"
        );
        debug_assert_eq!(copy[copy.root].self_href(), copy.root_href);
        copy
    }
}

impl Index<NodeId> for ResourceTree {
    type Output = Resource;

    fn index(&self, id: NodeId) -> &Resource {
        self.get(id)
            .unwrap_or_else(|| panic!("stale resource handle {id:?}"))
    }
}

impl IndexMut<NodeId> for ResourceTree {
    fn index_mut(&mut self, id: NodeId) -> &mut Resource {
        self.get_mut(id)
            .unwrap_or_else(|| panic!("stale resource handle {id:?}"))
    }
}

#[cfg(test)]
#[path = "resource_tree_tests.rs"]
mod tests;
