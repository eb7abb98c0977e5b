//! Reconciliation state of a single resource.
//!
//! Deciding what a node needs is kept apart from doing it: [`decide`] maps
//! the observed facts about both sides to a [`Transition`], and [`plan`]
//! turns a state into the ordered [`Action`]s the engine executes. Neither
//! touches the network or the filesystem.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum State {
    /// Local and remote agree.
    #[default]
    Sync,
    /// Exists locally only; create it remotely and upload the content.
    LocalNew,
    /// Local copy is newer than the remote one; upload it.
    LocalChanged,
    /// Deleted locally since the last sync; delete it remotely too.
    LocalDeleted,
    /// Exists remotely only; download it.
    RemoteNew,
    /// Remote copy is newer than the local one; download it.
    RemoteChanged,
}

impl State {
    pub fn as_str(&self) -> &'static str {
        match self {
            State::Sync => "sync",
            State::LocalNew => "local_new",
            State::LocalChanged => "local_changed",
            State::LocalDeleted => "local_deleted",
            State::RemoteNew => "remote_new",
            State::RemoteChanged => "remote_changed",
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Modification time and content identity of one side of a resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stamp {
    /// Unix seconds.
    pub modified: i64,
    pub md5: Option<String>,
    pub size: Option<u64>,
}

impl Stamp {
    pub fn same_content(&self, other: &Stamp) -> bool {
        match (&self.md5, &other.md5) {
            (Some(left), Some(right)) => left.eq_ignore_ascii_case(right),
            _ => self.size == other.size && self.modified == other.modified,
        }
    }
}

/// The last synced point of a resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncPoint {
    /// Unix seconds at which the resource was last reconciled.
    pub at: i64,
    /// Content both sides agreed on at that time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub md5: Option<String>,
}

impl SyncPoint {
    /// A side changed when it was modified after the sync point and its
    /// content no longer matches what was agreed on.
    pub fn changed(&self, side: &Stamp) -> bool {
        if side.modified <= self.at {
            return false;
        }
        match (&self.md5, &side.md5) {
            (Some(agreed), Some(current)) => !agreed.eq_ignore_ascii_case(current),
            _ => true,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Facts<'a> {
    pub is_folder: bool,
    pub local: Option<&'a Stamp>,
    pub remote: Option<&'a Stamp>,
    pub synced: Option<&'a SyncPoint>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub state: State,
    /// Both sides changed. The local copy is kept aside before the remote
    /// one is downloaded.
    pub conflict: bool,
}

impl Transition {
    fn to(state: State) -> Self {
        Self {
            state,
            conflict: false,
        }
    }

    fn conflict() -> Self {
        Self {
            state: State::RemoteChanged,
            conflict: true,
        }
    }
}

pub fn decide(facts: &Facts<'_>) -> Transition {
    match (facts.local, facts.remote) {
        (None, None) => Transition::to(State::LocalDeleted),
        (None, Some(_)) if facts.synced.is_some() => Transition::to(State::LocalDeleted),
        (None, Some(_)) => Transition::to(State::RemoteNew),
        (Some(_), None) => Transition::to(State::LocalNew),
        (Some(_), Some(_)) if facts.is_folder => Transition::to(State::Sync),
        (Some(local), Some(remote)) if local.same_content(remote) => Transition::to(State::Sync),
        (Some(local), Some(remote)) => match facts.synced {
            None => Transition::conflict(),
            Some(point) => match (point.changed(local), point.changed(remote)) {
                (false, false) => Transition::to(State::Sync),
                (true, false) => Transition::to(State::LocalChanged),
                (false, true) => Transition::to(State::RemoteChanged),
                (true, true) => Transition::conflict(),
            },
        },
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Create the item remotely and take over the href it is given.
    CreateRemote,
    /// Push local content. `post` fills an item created in the same pass,
    /// otherwise the existing item is overwritten in place.
    Upload { post: bool },
    CreateLocalDir,
    /// Move the local copy to a conflict name so it survives the download.
    RenameAside,
    Download,
    DeleteRemote,
    /// Drop the node and its subtree from the tree.
    Erase,
}

pub fn plan(state: State, conflict: bool, is_folder: bool) -> Vec<Action> {
    match state {
        State::Sync => Vec::new(),
        State::LocalNew if is_folder => vec![Action::CreateRemote],
        State::LocalNew => vec![Action::CreateRemote, Action::Upload { post: true }],
        State::LocalChanged if is_folder => Vec::new(),
        State::LocalChanged => vec![Action::Upload { post: false }],
        State::LocalDeleted => vec![Action::DeleteRemote, Action::Erase],
        State::RemoteNew | State::RemoteChanged if is_folder => vec![Action::CreateLocalDir],
        State::RemoteNew => vec![Action::Download],
        State::RemoteChanged if conflict => vec![Action::RenameAside, Action::Download],
        State::RemoteChanged => vec![Action::Download],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stamp(modified: i64, md5: &str) -> Stamp {
        Stamp {
            modified,
            md5: Some(md5.to_string()),
            size: Some(1),
        }
    }

    fn point(at: i64, md5: &str) -> SyncPoint {
        SyncPoint {
            at,
            md5: Some(md5.to_string()),
        }
    }

    fn file<'a>(
        local: Option<&'a Stamp>,
        remote: Option<&'a Stamp>,
        synced: Option<&'a SyncPoint>,
    ) -> Transition {
        decide(&Facts {
            is_folder: false,
            local,
            remote,
            synced,
        })
    }

    #[test]
    fn missing_locally_after_sync_is_local_deleted() {
        let remote = stamp(10, "a");
        let base = point(20, "a");
        assert_eq!(
            file(None, Some(&remote), Some(&base)).state,
            State::LocalDeleted
        );
    }

    #[test]
    fn missing_locally_never_synced_is_remote_new() {
        let remote = stamp(10, "a");
        assert_eq!(file(None, Some(&remote), None).state, State::RemoteNew);
    }

    #[test]
    fn missing_remotely_is_local_new() {
        let local = stamp(10, "a");
        let base = point(20, "a");
        assert_eq!(file(Some(&local), None, None).state, State::LocalNew);
        assert_eq!(file(Some(&local), None, Some(&base)).state, State::LocalNew);
    }

    #[test]
    fn missing_on_both_sides_is_local_deleted() {
        assert_eq!(file(None, None, None).state, State::LocalDeleted);
    }

    #[test]
    fn identical_content_is_sync() {
        let local = stamp(50, "a");
        let remote = stamp(60, "A");
        assert_eq!(file(Some(&local), Some(&remote), None), Transition::to(State::Sync));
    }

    #[test]
    fn newer_remote_with_new_content_is_remote_changed() {
        let local = stamp(10, "a");
        let remote = stamp(30, "b");
        let base = point(20, "a");
        assert_eq!(
            file(Some(&local), Some(&remote), Some(&base)),
            Transition::to(State::RemoteChanged)
        );
    }

    #[test]
    fn newer_local_with_new_content_is_local_changed() {
        let local = stamp(30, "b");
        let remote = stamp(10, "a");
        let base = point(20, "a");
        assert_eq!(
            file(Some(&local), Some(&remote), Some(&base)).state,
            State::LocalChanged
        );
    }

    #[test]
    fn unchanged_timestamps_are_sync_even_if_hashes_differ() {
        let local = stamp(10, "b");
        let remote = stamp(15, "c");
        let base = point(20, "a");
        assert_eq!(
            file(Some(&local), Some(&remote), Some(&base)).state,
            State::Sync
        );
    }

    #[test]
    fn touched_but_identical_to_sync_point_is_not_a_change() {
        let local = stamp(30, "a");
        let remote = stamp(40, "b");
        let base = point(20, "a");
        assert_eq!(
            file(Some(&local), Some(&remote), Some(&base)).state,
            State::RemoteChanged
        );
    }

    #[test]
    fn both_changed_is_a_conflict() {
        let local = stamp(30, "b");
        let remote = stamp(40, "c");
        let base = point(20, "a");
        assert_eq!(
            file(Some(&local), Some(&remote), Some(&base)),
            Transition::conflict()
        );
    }

    #[test]
    fn differing_content_without_sync_point_is_a_conflict() {
        let local = stamp(30, "b");
        let remote = stamp(40, "c");
        assert!(file(Some(&local), Some(&remote), None).conflict);
    }

    #[test]
    fn folders_present_on_both_sides_are_sync() {
        let local = stamp(30, "b");
        let remote = stamp(40, "c");
        let transition = decide(&Facts {
            is_folder: true,
            local: Some(&local),
            remote: Some(&remote),
            synced: None,
        });
        assert_eq!(transition, Transition::to(State::Sync));
    }

    #[test]
    fn same_facts_give_same_transition() {
        let local = stamp(30, "b");
        let remote = stamp(40, "c");
        let base = point(20, "a");
        let first = file(Some(&local), Some(&remote), Some(&base));
        let second = file(Some(&local), Some(&remote), Some(&base));
        assert_eq!(first, second);
    }

    #[test]
    fn content_without_hashes_falls_back_to_size_and_time() {
        let left = Stamp {
            modified: 5,
            md5: None,
            size: Some(3),
        };
        let mut right = left.clone();
        assert!(left.same_content(&right));
        right.size = Some(4);
        assert!(!left.same_content(&right));
    }

    #[test]
    fn plans_follow_state_and_kind() {
        assert!(plan(State::Sync, false, false).is_empty());
        assert_eq!(plan(State::LocalNew, false, true), vec![Action::CreateRemote]);
        assert_eq!(
            plan(State::LocalNew, false, false),
            vec![Action::CreateRemote, Action::Upload { post: true }]
        );
        assert_eq!(
            plan(State::LocalChanged, false, false),
            vec![Action::Upload { post: false }]
        );
        assert_eq!(
            plan(State::LocalDeleted, false, true),
            vec![Action::DeleteRemote, Action::Erase]
        );
        assert_eq!(plan(State::RemoteNew, false, true), vec![Action::CreateLocalDir]);
        assert_eq!(plan(State::RemoteNew, false, false), vec![Action::Download]);
        assert_eq!(
            plan(State::RemoteChanged, true, false),
            vec![Action::RenameAside, Action::Download]
        );
    }

    #[test]
    fn state_serializes_snake_case() {
        let json = serde_json::to_string(&State::RemoteChanged).unwrap();
        assert_eq!(json, "\"remote_changed\"");
        assert_eq!(State::LocalNew.to_string(), "local_new");
    }
}
