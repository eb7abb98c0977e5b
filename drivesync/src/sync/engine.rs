use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};

use drive_api::RemoteEntry;
use thiserror::Error;
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::local::{LocalError, LocalFs, LocalStat};
use super::paths::{PathError, local_name};
use super::remote::{Remote, RemoteError};
use crate::tree::state::plan;
use crate::tree::{Action, NodeId, Resource, ResourceTree, Stamp, State, TreeError};

/// Failure of one node. The pass records it and moves on.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error(transparent)]
    Local(#[from] LocalError),
    #[error(transparent)]
    Tree(#[from] TreeError),
    #[error(transparent)]
    Name(#[from] PathError),
    #[error("parent of {0} does not exist remotely yet")]
    ParentNotCreated(PathBuf),
}

/// Failure that stops a pass before any node was reconciled.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("listing the remote tree failed: {0}")]
    Listing(#[from] RemoteError),
    #[error("preparing the sync directory failed: {0}")]
    Local(#[from] LocalError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub path: PathBuf,
    pub message: String,
}

/// What a dry run would have done to one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Planned {
    pub path: PathBuf,
    pub actions: Vec<Action>,
}

#[derive(Debug, Default)]
pub struct SyncReport {
    pub created: usize,
    pub uploaded: usize,
    pub downloaded: usize,
    pub deleted: usize,
    pub conflicts: usize,
    pub planned: Vec<Planned>,
    pub failures: Vec<Failure>,
    pub cancelled: bool,
}

impl SyncReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && !self.cancelled
    }

    fn fail(&mut self, path: PathBuf, err: impl fmt::Display) {
        let message = err.to_string();
        warn!(path = %path.display(), error = %message, "sync failed");
        self.failures.push(Failure { path, message });
    }
}

enum Step {
    Done,
    /// Content was fetched; carries its md5.
    Fetched(String),
    Erased,
}

/// Drives one reconciliation pass over a [`ResourceTree`].
///
/// The engine owns the tree for the duration of the pass: it merges the
/// remote listing, picks up untracked local entries, then walks the tree
/// from the root, parents before children, executing the actions each
/// node's state calls for.
pub struct SyncEngine<R> {
    remote: R,
    local: LocalFs,
    tree: ResourceTree,
    dry_run: bool,
    cancel: CancellationToken,
}

impl<R: Remote> SyncEngine<R> {
    pub fn new(remote: R, local: LocalFs, tree: ResourceTree) -> Self {
        Self {
            remote,
            local,
            tree,
            dry_run: false,
            cancel: CancellationToken::new(),
        }
    }

    /// Plan only: nothing is created, transferred or deleted on either side.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn tree(&self) -> &ResourceTree {
        &self.tree
    }

    pub fn remote(&self) -> &R {
        &self.remote
    }

    pub fn into_tree(self) -> ResourceTree {
        self.tree
    }

    pub async fn run(&mut self) -> Result<SyncReport, EngineError> {
        let mut report = SyncReport::default();
        let root_href = self.tree.root_href().to_string();
        let entries = self.remote.list(&root_href).await?;
        info!(root = %root_href, items = entries.len(), "remote listing fetched");

        if !self.dry_run {
            self.local.create_dir(self.tree.base_dir()).await?;
        }
        self.merge_remote(&entries, &mut report).await;
        self.scan_local(&mut report).await;
        self.sync_pass(&mut report).await;

        info!(
            created = report.created,
            uploaded = report.uploaded,
            downloaded = report.downloaded,
            deleted = report.deleted,
            conflicts = report.conflicts,
            failures = report.failures.len(),
            cancelled = report.cancelled,
            "sync pass finished"
        );
        Ok(report)
    }

    async fn merge_remote(&mut self, entries: &[RemoteEntry], report: &mut SyncReport) {
        let mut seen = HashSet::from([self.tree.root()]);
        for entry in entries {
            match self.merge_entry(entry).await {
                Ok(id) => {
                    seen.insert(id);
                }
                Err(err) => report.fail(PathBuf::from(&entry.self_href), err),
            }
        }

        let absent: Vec<NodeId> = self
            .tree
            .iter()
            .map(|(id, _)| id)
            .filter(|id| !seen.contains(id) && self.tree.is_in_root_tree(*id))
            .collect();
        for id in absent {
            if self.tree[id].exists_remotely() {
                debug!(href = self.tree[id].self_href(), "gone from remote listing");
                self.tree.mark_remote_absent(id);
            }
            let path = self.tree.path(id);
            match self.local.stat(&path).await {
                Ok(stat) => {
                    self.tree[id].merge_local(stamp(&stat));
                }
                Err(err) => report.fail(path, err),
            }
        }
    }

    async fn merge_entry(&mut self, entry: &RemoteEntry) -> Result<NodeId, SyncError> {
        if entry.self_href == self.tree.root_href() {
            return Ok(self.tree.root());
        }
        local_name(&entry.title)?;

        let parent = self.tree.find_by_href(&entry.parent_href);
        let existing = self
            .tree
            .find_by_href(&entry.self_href)
            .or_else(|| self.tree.find_by_resource_id(&entry.resource_id));

        let mut unmoved = None;
        let id = match existing {
            Some(id) => {
                unmoved = self.relocate(id, parent, entry).await?;
                id
            }
            None => {
                let resource = Resource::from_entry(entry);
                match parent {
                    Some(parent) => self.tree.insert_child(parent, resource)?,
                    None => self.tree.insert(resource)?,
                }
            }
        };

        let local_path = match self.tree[id].parent() {
            Some(parent) if self.tree.is_in_root_tree(parent) => {
                Some(unmoved.unwrap_or_else(|| self.tree.path(parent).join(&entry.title)))
            }
            _ => None,
        };
        let stat = match &local_path {
            Some(path) => self.local.stat(path).await?,
            None => None,
        };
        let transition = self.tree.update(id, entry, stamp(&stat))?;
        debug!(
            href = %entry.self_href,
            state = %transition.state,
            conflict = transition.conflict,
            "merged remote entry"
        );
        Ok(id)
    }

    /// Moves a known resource to where the listing now puts it, on disk as
    /// well as in the tree. In a dry run the local copy stays put and its
    /// path is returned.
    async fn relocate(
        &mut self,
        id: NodeId,
        parent: Option<NodeId>,
        entry: &RemoteEntry,
    ) -> Result<Option<PathBuf>, SyncError> {
        let old_parent = self.tree[id].parent();
        if old_parent == parent && self.tree[id].name() == entry.title {
            return Ok(None);
        }
        let from = self.tree.is_in_root_tree(id).then(|| self.tree.path(id));

        self.tree.detach(id);
        if let Some(parent) = parent
            && let Err(err) = self.tree.add_child(parent, id)
        {
            if let Some(old_parent) = old_parent {
                self.tree.add_child(old_parent, id)?;
            }
            return Err(err.into());
        }

        let to = parent
            .filter(|parent| self.tree.is_in_root_tree(*parent))
            .map(|parent| self.tree.path(parent).join(&entry.title));
        let (Some(from), Some(to)) = (from, to) else {
            return Ok(None);
        };
        if self.local.stat(&from).await?.is_none() {
            return Ok(None);
        }
        if self.dry_run {
            return Ok(Some(from));
        }
        info!(from = %from.display(), to = %to.display(), "following remote move");
        self.local.move_to(&from, &to).await?;
        Ok(None)
    }

    /// Adds placeholders for local entries the tree does not know yet.
    async fn scan_local(&mut self, report: &mut SyncReport) {
        let mut folders = vec![self.tree.root()];
        while let Some(folder) = folders.pop() {
            let dir = self.tree.path(folder);
            let entries = match self.local.list_dir(&dir).await {
                Ok(entries) => entries,
                Err(err) => {
                    report.fail(dir, err);
                    continue;
                }
            };

            for entry in entries {
                if self.tree.find_child(folder, &entry.name).is_some() {
                    continue;
                }
                let path = dir.join(&entry.name);
                let placeholder = Resource::placeholder(&entry.name, entry.is_folder);
                let id = match self.tree.insert_child(folder, placeholder) {
                    Ok(id) => id,
                    Err(err) => {
                        report.fail(path, err);
                        continue;
                    }
                };
                match self.local.stat(&path).await {
                    Ok(stat) => {
                        self.tree[id].merge_local(stamp(&stat));
                        debug!(path = %path.display(), "untracked local entry");
                    }
                    Err(err) => report.fail(path, err),
                }
            }

            folders.extend(
                self.tree[folder]
                    .children()
                    .iter()
                    .copied()
                    .filter(|child| self.tree[*child].is_folder()),
            );
        }
    }

    async fn sync_pass(&mut self, report: &mut SyncReport) {
        let root = self.tree.root();
        let mut stack: Vec<NodeId> = self.tree[root].children().iter().rev().copied().collect();
        while let Some(id) = stack.pop() {
            if self.cancel.is_cancelled() {
                info!("sync pass cancelled");
                report.cancelled = true;
                break;
            }
            if !self.tree.contains(id) {
                continue;
            }
            match self.sync(id, report).await {
                Ok(true) => stack.extend(self.tree[id].children().iter().rev().copied()),
                Ok(false) => {}
                Err(err) => {
                    let path = self.tree.path(id);
                    if self.tree[id].is_folder() && !self.tree[id].children().is_empty() {
                        debug!(path = %path.display(), "skipping subtree of failed folder");
                    }
                    report.fail(path, err);
                }
            }
        }
    }

    /// Reconciles one resource. Returns whether its children should be
    /// visited afterwards.
    pub async fn sync(&mut self, id: NodeId, report: &mut SyncReport) -> Result<bool, SyncError> {
        let resource = &self.tree[id];
        let actions = plan(resource.state(), resource.conflict(), resource.is_folder());
        if actions.is_empty() {
            if !self.dry_run && needs_sync_point(resource) {
                let md5 = resource.md5().map(str::to_string);
                self.tree[id].mark_synced(now_unix(), md5);
            }
            return Ok(true);
        }
        let path = self.tree.path(id);
        debug!(
            path = %path.display(),
            state = %resource.state(),
            ?actions,
            "reconciling"
        );

        if self.dry_run {
            let descend = !actions.contains(&Action::Erase);
            report.planned.push(Planned { path, actions });
            return Ok(descend);
        }

        let mut fetched = None;
        for action in actions {
            match self.apply(id, action, &path, report).await? {
                Step::Done => {}
                Step::Fetched(md5) => fetched = Some(md5),
                Step::Erased => return Ok(false),
            }
        }

        let resource = &mut self.tree[id];
        let agreed = fetched.or_else(|| resource.md5().map(str::to_string));
        resource.mark_synced(now_unix(), agreed);
        Ok(true)
    }

    async fn apply(
        &mut self,
        id: NodeId,
        action: Action,
        path: &Path,
        report: &mut SyncReport,
    ) -> Result<Step, SyncError> {
        match action {
            Action::CreateRemote => {
                let parent_href = self.tree[id]
                    .parent()
                    .map(|parent| self.tree[parent].self_href().to_string())
                    .unwrap_or_default();
                if parent_href.is_empty() {
                    return Err(SyncError::ParentNotCreated(path.to_path_buf()));
                }
                let resource = &self.tree[id];
                let entry = self
                    .remote
                    .create(&parent_href, resource.name(), resource.is_folder())
                    .await?;
                info!(path = %path.display(), href = %entry.self_href, "created remotely");

                let resource = &mut self.tree[id];
                resource.apply_entry(&entry);
                resource.record_created();
                self.tree.reinsert(id)?;
                report.created += 1;
            }
            Action::Upload { post } => {
                let href = self.tree[id].self_href().to_string();
                let entry = self.remote.upload(&href, path).await?;
                info!(path = %path.display(), href = %href, post, "uploaded");
                self.tree[id].apply_entry(&entry);
                self.tree.reinsert(id)?;
                report.uploaded += 1;
            }
            Action::CreateLocalDir => {
                self.local.create_dir(path).await?;
                info!(path = %path.display(), "created local folder");
            }
            Action::RenameAside => {
                let kept = self.local.rename_aside(path, now_unix()).await?;
                // Nothing is left at `path` until the download lands.
                self.tree[id].forget_synced();
                warn!(
                    path = %path.display(),
                    kept = %kept.display(),
                    "both sides changed, keeping local copy aside"
                );
                report.conflicts += 1;
            }
            Action::Download => {
                let md5 = self.remote.download(&self.tree[id], path).await?;
                info!(path = %path.display(), "downloaded");
                report.downloaded += 1;
                return Ok(Step::Fetched(md5));
            }
            Action::DeleteRemote => {
                if self.tree[id].exists_remotely() {
                    let href = self.tree[id].self_href().to_string();
                    self.remote.delete(&href).await?;
                    info!(path = %path.display(), href = %href, "deleted remotely");
                }
                self.local.remove(path).await?;
                report.deleted += 1;
            }
            Action::Erase => {
                self.tree.remove_subtree(id)?;
                return Ok(Step::Erased);
            }
        }
        Ok(Step::Done)
    }
}

/// Both sides agree but the agreement was never recorded, or was recorded
/// for other content.
fn needs_sync_point(resource: &Resource) -> bool {
    resource.state() == State::Sync
        && resource.exists_remotely()
        && resource
            .synced()
            .is_none_or(|point| point.md5.as_deref() != resource.md5())
}

fn stamp(stat: &Option<LocalStat>) -> Option<&Stamp> {
    stat.as_ref().map(|stat| &stat.stamp)
}

pub fn now_unix() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;
