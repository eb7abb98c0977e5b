use drive_api::RemoteEntry;
use serde::{Deserialize, Serialize};

use super::state::{Facts, Stamp, State, SyncPoint, Transition, decide};

/// Stable handle of a resource inside its [`ResourceTree`](super::ResourceTree).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) usize);

/// One file or folder, holding the merged local and remote view of it.
///
/// Parent and children are handles into the owning tree; the tree keeps
/// both directions consistent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    name: String,
    self_href: String,
    resource_id: String,
    parent_href: String,
    content_src: String,
    modified: i64,
    md5: Option<String>,
    size: Option<u64>,
    is_folder: bool,
    state: State,
    conflict: bool,
    synced: Option<SyncPoint>,
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: Vec<NodeId>,
}

impl Resource {
    pub(crate) fn root(href: &str) -> Self {
        Self {
            name: String::new(),
            self_href: href.to_string(),
            resource_id: String::new(),
            parent_href: String::new(),
            content_src: String::new(),
            modified: 0,
            md5: None,
            size: None,
            is_folder: true,
            state: State::Sync,
            conflict: false,
            synced: None,
            parent: None,
            children: Vec::new(),
        }
    }

    /// A resource discovered remotely. Its state is settled by the first
    /// [`Resource::merge_remote`] call.
    pub fn from_entry(entry: &RemoteEntry) -> Self {
        let mut resource = Self::placeholder(&entry.title, entry.is_folder);
        resource.apply_entry(entry);
        resource.state = State::RemoteNew;
        resource
    }

    /// A resource found on disk that has no remote counterpart yet.
    pub fn placeholder(name: &str, is_folder: bool) -> Self {
        Self {
            name: name.to_string(),
            is_folder,
            state: State::LocalNew,
            ..Self::root("")
        }
    }

    pub fn is_folder(&self) -> bool {
        self.is_folder
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn self_href(&self) -> &str {
        &self.self_href
    }

    pub fn resource_id(&self) -> &str {
        &self.resource_id
    }

    pub fn parent_href(&self) -> &str {
        &self.parent_href
    }

    pub fn content_src(&self) -> &str {
        &self.content_src
    }

    pub fn modified(&self) -> i64 {
        self.modified
    }

    pub fn md5(&self) -> Option<&str> {
        self.md5.as_deref()
    }

    pub fn size(&self) -> Option<u64> {
        self.size
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn conflict(&self) -> bool {
        self.conflict
    }

    pub fn synced(&self) -> Option<&SyncPoint> {
        self.synced.as_ref()
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn exists_remotely(&self) -> bool {
        !self.self_href.is_empty()
    }

    pub fn remote_stamp(&self) -> Option<Stamp> {
        self.exists_remotely().then(|| Stamp {
            modified: self.modified,
            md5: self.md5.clone(),
            size: self.size,
        })
    }

    /// Merges a fresh remote record and recomputes the state against the
    /// given local stat. The href may change; the tree must be re-keyed.
    pub fn merge_remote(&mut self, entry: &RemoteEntry, local: Option<&Stamp>) -> Transition {
        self.apply_entry(entry);
        self.merge_local(local)
    }

    /// Recomputes the state from the local stat and the cached remote side.
    pub fn merge_local(&mut self, local: Option<&Stamp>) -> Transition {
        let remote = self.remote_stamp();
        let transition = decide(&Facts {
            is_folder: self.is_folder,
            local,
            remote: remote.as_ref(),
            synced: self.synced.as_ref(),
        });
        self.state = transition.state;
        self.conflict = transition.conflict;
        transition
    }

    /// Copies the remote metadata without touching the state.
    pub fn apply_entry(&mut self, entry: &RemoteEntry) {
        self.name = entry.title.clone();
        self.self_href = entry.self_href.clone();
        self.resource_id = entry.resource_id.clone();
        self.parent_href = entry.parent_href.clone();
        self.content_src = entry.content_src.clone();
        self.modified = entry.modified;
        self.md5 = entry.md5.clone();
        self.size = entry.size;
    }

    /// Forgets the remote side after a listing no longer contains it.
    pub(crate) fn clear_remote(&mut self) {
        self.self_href.clear();
        self.resource_id.clear();
        self.content_src.clear();
        self.md5 = None;
        self.size = None;
        self.modified = 0;
    }

    pub(crate) fn set_parent_href(&mut self, href: &str) {
        self.parent_href = href.to_string();
    }

    /// Baseline for an item just created remotely with no content. An upload
    /// that fails afterwards is then seen as a local change next time.
    pub(crate) fn record_created(&mut self) {
        self.synced = Some(SyncPoint {
            at: 0,
            md5: self.md5.clone(),
        });
    }

    /// Drops the last synced point once the local copy was moved aside, so
    /// the remote content reads as new rather than deleted locally.
    pub(crate) fn forget_synced(&mut self) {
        self.synced = None;
    }

    pub fn mark_synced(&mut self, at: i64, md5: Option<String>) {
        self.state = State::Sync;
        self.conflict = false;
        self.synced = Some(SyncPoint { at, md5 });
    }

    pub(crate) fn from_doc(doc: &ResourceDoc) -> Self {
        Self {
            name: doc.name.clone(),
            self_href: doc.href.clone(),
            resource_id: doc.resource_id.clone(),
            parent_href: doc.parent_href.clone(),
            content_src: doc.content_src.clone(),
            modified: doc.modified,
            md5: doc.md5.clone(),
            size: doc.size,
            is_folder: doc.folder,
            state: doc.state,
            conflict: doc.conflict,
            synced: doc.synced.clone(),
            parent: None,
            children: Vec::new(),
        }
    }

    pub(crate) fn to_doc(&self, child: Vec<ResourceDoc>) -> ResourceDoc {
        ResourceDoc {
            name: self.name.clone(),
            href: self.self_href.clone(),
            resource_id: self.resource_id.clone(),
            parent_href: self.parent_href.clone(),
            content_src: self.content_src.clone(),
            modified: self.modified,
            md5: self.md5.clone(),
            size: self.size,
            folder: self.is_folder,
            state: self.state,
            conflict: self.conflict,
            synced: self.synced.clone(),
            child,
        }
    }
}

/// Persisted form of a resource and, recursively, its children.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceDoc {
    pub name: String,
    #[serde(default)]
    pub href: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub resource_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub parent_href: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub content_src: String,
    #[serde(default)]
    pub modified: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub md5: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default)]
    pub folder: bool,
    #[serde(default)]
    pub state: State,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub conflict: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synced: Option<SyncPoint>,
    #[serde(default)]
    pub child: Vec<ResourceDoc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(href: &str, md5: &str, modified: i64) -> RemoteEntry {
        RemoteEntry {
            title: "notes.txt".into(),
            self_href: href.into(),
            resource_id: "rid".into(),
            parent_href: "disk:/".into(),
            content_src: "https://downloader.example/notes".into(),
            modified,
            md5: Some(md5.into()),
            size: Some(4),
            is_folder: false,
        }
    }

    fn local(modified: i64, md5: &str) -> Stamp {
        Stamp {
            modified,
            md5: Some(md5.into()),
            size: Some(4),
        }
    }

    #[test]
    fn new_remote_entry_without_local_copy_is_remote_new() {
        let mut resource = Resource::from_entry(&entry("disk:/notes.txt", "a", 10));
        let transition = resource.merge_remote(&entry("disk:/notes.txt", "a", 10), None);
        assert_eq!(transition.state, State::RemoteNew);
        assert_eq!(resource.state(), State::RemoteNew);
        assert_eq!(resource.self_href(), "disk:/notes.txt");
    }

    #[test]
    fn content_moved_aside_reads_as_remote_new() {
        let mut resource = Resource::from_entry(&entry("disk:/notes.txt", "a", 10));
        resource.mark_synced(20, Some("a".into()));
        resource.forget_synced();

        let transition = resource.merge_remote(&entry("disk:/notes.txt", "b", 30), None);

        assert_eq!(transition.state, State::RemoteNew);
        assert!(resource.synced().is_none());
    }

    #[test]
    fn newer_remote_after_sync_is_remote_changed() {
        let mut resource = Resource::from_entry(&entry("disk:/notes.txt", "a", 10));
        resource.mark_synced(20, Some("a".into()));

        resource.merge_remote(&entry("disk:/notes.txt", "b", 30), Some(&local(15, "a")));

        assert_eq!(resource.state(), State::RemoteChanged);
        assert!(!resource.conflict());
        assert_eq!(resource.md5(), Some("b"));
    }

    #[test]
    fn merge_local_uses_cached_remote_side() {
        let mut resource = Resource::from_entry(&entry("disk:/notes.txt", "a", 10));
        resource.mark_synced(20, Some("a".into()));

        assert_eq!(resource.merge_local(None).state, State::LocalDeleted);
        assert_eq!(
            resource.merge_local(Some(&local(40, "z"))).state,
            State::LocalChanged
        );
    }

    #[test]
    fn placeholder_is_local_new_without_href() {
        let mut resource = Resource::placeholder("draft.md", false);
        assert_eq!(resource.state(), State::LocalNew);
        assert!(!resource.exists_remotely());
        assert_eq!(
            resource.merge_local(Some(&local(1, "x"))).state,
            State::LocalNew
        );
    }

    #[test]
    fn clearing_remote_side_turns_synced_file_into_local_new() {
        let mut resource = Resource::from_entry(&entry("disk:/notes.txt", "a", 10));
        resource.mark_synced(20, Some("a".into()));
        resource.clear_remote();

        assert!(resource.self_href().is_empty());
        assert_eq!(
            resource.merge_local(Some(&local(15, "a"))).state,
            State::LocalNew
        );
    }

    #[test]
    fn interrupted_create_turns_into_local_change() {
        let empty = "d41d8cd98f00b204e9800998ecf8427e";
        let mut resource = Resource::placeholder("notes.txt", false);
        resource.apply_entry(&entry("disk:/notes.txt", empty, 50));
        resource.record_created();

        let transition = resource.merge_local(Some(&local(40, "b")));
        assert_eq!(transition.state, State::LocalChanged);
        assert!(!transition.conflict);
    }

    #[test]
    fn doc_round_trip_preserves_fields() {
        let mut resource = Resource::from_entry(&entry("disk:/notes.txt", "a", 10));
        resource.mark_synced(20, Some("a".into()));
        let doc = resource.to_doc(Vec::new());
        let back = Resource::from_doc(&doc);
        assert_eq!(back, resource);
    }
}
