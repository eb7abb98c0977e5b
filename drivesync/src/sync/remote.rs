use std::path::Path;

use drive_api::{DriveClient, DriveError, EntryError, OperationStatus, RemoteEntry, child_href};
use thiserror::Error;

use super::backoff::Backoff;
use super::transfer::{TransferClient, TransferError};
use crate::tree::Resource;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("api error: {0}")]
    Drive(#[from] DriveError),
    #[error("transfer error: {0}")]
    Transfer(#[from] TransferError),
    #[error("bad remote record: {0}")]
    Entry(#[from] EntryError),
    #[error("remote operation {0} failed")]
    OperationFailed(String),
    #[error("remote operation {0} did not finish in time")]
    OperationTimedOut(String),
}

/// The remote side of a sync pass. Each method is one logical operation
/// against the drive.
#[allow(async_fn_in_trait)]
pub trait Remote {
    /// Every item below `root_href`, folders before their contents.
    async fn list(&self, root_href: &str) -> Result<Vec<RemoteEntry>, RemoteError>;

    /// Creates an empty folder or file and returns its authoritative record.
    async fn create(
        &self,
        parent_href: &str,
        name: &str,
        is_folder: bool,
    ) -> Result<RemoteEntry, RemoteError>;

    /// Replaces the content of `href` with `source` and returns the updated
    /// record.
    async fn upload(&self, href: &str, source: &Path) -> Result<RemoteEntry, RemoteError>;

    /// Fetches the content of `resource` into `target` and returns its md5.
    async fn download(&self, resource: &Resource, target: &Path) -> Result<String, RemoteError>;

    /// Deletes `href`. An item that is already gone counts as deleted.
    async fn delete(&self, href: &str) -> Result<(), RemoteError>;
}

/// [`Remote`] backed by the drive REST API.
#[derive(Clone)]
pub struct DriveRemote {
    client: DriveClient,
    transfer: TransferClient,
    page_size: u32,
    backoff: Backoff,
}

impl DriveRemote {
    pub fn new(client: DriveClient, page_size: u32) -> Self {
        Self {
            client,
            transfer: TransferClient::new(),
            page_size,
            backoff: Backoff::polling(),
        }
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    async fn entry(&self, href: &str) -> Result<RemoteEntry, RemoteError> {
        let resource = self.client.get_resource(href).await?;
        Ok(RemoteEntry::try_from(resource)?)
    }

    async fn wait_for_operation(&self, operation_url: &str) -> Result<(), RemoteError> {
        for attempt in 0..self.backoff.attempts() {
            match self.client.get_operation_status(operation_url).await? {
                OperationStatus::Success => return Ok(()),
                OperationStatus::Failure => {
                    return Err(RemoteError::OperationFailed(operation_url.to_string()));
                }
                OperationStatus::InProgress => {
                    tokio::time::sleep(self.backoff.delay(attempt)).await;
                }
            }
        }
        Err(RemoteError::OperationTimedOut(operation_url.to_string()))
    }
}

impl Remote for DriveRemote {
    async fn list(&self, root_href: &str) -> Result<Vec<RemoteEntry>, RemoteError> {
        self.client
            .list_tree(root_href, self.page_size)
            .await?
            .into_iter()
            .map(|resource| RemoteEntry::try_from(resource).map_err(RemoteError::from))
            .collect()
    }

    async fn create(
        &self,
        parent_href: &str,
        name: &str,
        is_folder: bool,
    ) -> Result<RemoteEntry, RemoteError> {
        let href = child_href(parent_href, name);
        if is_folder {
            self.client.create_folder(&href).await?;
        } else {
            // No overwrite: an item that appeared remotely since the listing
            // makes the create fail instead of being clobbered.
            let link = self.client.get_upload_link(&href, false).await?;
            self.transfer.upload_empty(link.href.as_str()).await?;
        }
        self.entry(&href).await
    }

    async fn upload(&self, href: &str, source: &Path) -> Result<RemoteEntry, RemoteError> {
        let link = self.client.get_upload_link(href, true).await?;
        self.transfer.upload(link.href.as_str(), source).await?;
        self.entry(href).await
    }

    async fn download(&self, resource: &Resource, target: &Path) -> Result<String, RemoteError> {
        let expected = resource.md5();
        if !resource.content_src().is_empty() {
            match self
                .transfer
                .download(resource.content_src(), target, expected)
                .await
            {
                Ok(md5) => return Ok(md5),
                // Listed content links expire; fall through to a fresh one.
                Err(TransferError::Request(err)) => {
                    tracing::debug!(href = resource.self_href(), error = %err, "content link rejected");
                }
                Err(err) => return Err(err.into()),
            }
        }
        let link = self.client.get_download_link(resource.self_href()).await?;
        Ok(self
            .transfer
            .download(link.href.as_str(), target, expected)
            .await?)
    }

    async fn delete(&self, href: &str) -> Result<(), RemoteError> {
        match self.client.delete_resource(href, false).await {
            Ok(Some(link)) => self.wait_for_operation(link.href.as_str()).await,
            Ok(None) => Ok(()),
            Err(err) if err.is_not_found() => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
#[path = "remote_tests.rs"]
mod tests;
