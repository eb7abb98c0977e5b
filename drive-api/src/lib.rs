mod client;
mod entry;

pub use client::{
    ApiResource, DriveClient, DriveError, Link, OperationStatus, ResourceList, ResourceType,
};
pub use entry::{EntryError, ROOT_HREF, RemoteEntry, child_href, parent_href};
