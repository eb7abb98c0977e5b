use thiserror::Error;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::client::{ApiResource, ResourceType};

/// Href of the drive's top-level folder.
pub const ROOT_HREF: &str = "disk:/";

#[derive(Debug, Error)]
pub enum EntryError {
    #[error("invalid modification time {value:?}: {source}")]
    Time {
        value: String,
        source: time::error::Parse,
    },
    #[error("resource {0:?} has no parent href")]
    NoParent(String),
    #[error("resource {0:?} has an empty name")]
    EmptyName(String),
}

/// Immutable snapshot of one remote item's metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    pub title: String,
    pub self_href: String,
    pub resource_id: String,
    pub parent_href: String,
    pub content_src: String,
    /// Unix seconds.
    pub modified: i64,
    pub md5: Option<String>,
    pub size: Option<u64>,
    pub is_folder: bool,
}

impl TryFrom<ApiResource> for RemoteEntry {
    type Error = EntryError;

    fn try_from(resource: ApiResource) -> Result<Self, Self::Error> {
        if resource.name.is_empty() {
            return Err(EntryError::EmptyName(resource.path));
        }
        let parent =
            parent_href(&resource.path).ok_or_else(|| EntryError::NoParent(resource.path.clone()))?;
        let modified = match resource.modified {
            Some(value) => match OffsetDateTime::parse(&value, &Rfc3339) {
                Ok(parsed) => parsed.unix_timestamp(),
                Err(source) => return Err(EntryError::Time { value, source }),
            },
            None => 0,
        };
        Ok(Self {
            title: resource.name,
            self_href: resource.path,
            resource_id: resource.resource_id.unwrap_or_default(),
            parent_href: parent,
            content_src: resource.file.unwrap_or_default(),
            modified,
            md5: resource.md5,
            size: resource.size,
            is_folder: resource.resource_type == ResourceType::Dir,
        })
    }
}

/// Href of the folder containing `href`, or `None` for a top-level folder.
pub fn parent_href(href: &str) -> Option<String> {
    let trimmed = href.trim_end_matches('/');
    let (head, _) = trimmed.rsplit_once('/')?;
    if head.is_empty() || head.ends_with(':') {
        Some(format!("{head}/"))
    } else {
        Some(head.to_string())
    }
}

/// Href of the item named `name` inside the folder `parent`.
pub fn child_href(parent: &str, name: &str) -> String {
    if parent.ends_with('/') {
        format!("{parent}{name}")
    } else {
        format!("{parent}/{name}")
    }
}
