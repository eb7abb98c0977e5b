use std::{
    io,
    path::{Path, PathBuf},
};

use futures_util::StreamExt;
use md5::Context;
use reqwest::Client;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use url::Url;

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("download integrity check failed: expected {expected_md5}, got {actual_md5}")]
    IntegrityMismatch {
        expected_md5: String,
        actual_md5: String,
    },
}

/// Moves file content to and from the links handed out by the API.
#[derive(Debug, Clone, Default)]
pub struct TransferClient {
    http: Client,
}

impl TransferClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Streams `href` into `target` through a sibling `.partial` file and
    /// returns the md5 of what was written. The target is only replaced once
    /// the content matched `expected_md5`.
    pub async fn download(
        &self,
        href: &str,
        target: &Path,
        expected_md5: Option<&str>,
    ) -> Result<String, TransferError> {
        let url = Url::parse(href)?;
        let response = self.http.get(url).send().await?.error_for_status()?;

        let partial = partial_path(target);
        let mut file = tokio::fs::File::create(&partial).await?;
        let mut stream = response.bytes_stream();
        let mut md5 = Context::new();

        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(err) => {
                    drop(file);
                    let _ = tokio::fs::remove_file(&partial).await;
                    return Err(err.into());
                }
            };
            file.write_all(&chunk).await?;
            md5.consume(&chunk);
        }

        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        let actual_md5 = format!("{:x}", md5.compute());
        if let Some(expected_md5) = expected_md5
            && !actual_md5.eq_ignore_ascii_case(expected_md5)
        {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(TransferError::IntegrityMismatch {
                expected_md5: expected_md5.to_ascii_lowercase(),
                actual_md5,
            });
        }

        tokio::fs::rename(partial, target).await?;
        Ok(actual_md5)
    }

    pub async fn upload(&self, href: &str, source: &Path) -> Result<(), TransferError> {
        let url = Url::parse(href)?;
        let file = tokio::fs::File::open(source).await?;
        let body = reqwest::Body::wrap_stream(ReaderStream::new(file));
        self.http
            .put(url)
            .body(body)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    /// Creates a zero-length item, used to claim a name before the content
    /// is pushed.
    pub async fn upload_empty(&self, href: &str) -> Result<(), TransferError> {
        let url = Url::parse(href)?;
        self.http
            .put(url)
            .body(Vec::new())
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

/// `notes.txt` downloads into `notes.txt.partial` next to it.
pub fn partial_path(target: &Path) -> PathBuf {
    let mut name = target.file_name().unwrap_or_default().to_os_string();
    name.push(".partial");
    target.with_file_name(name)
}

pub fn is_partial(name: &str) -> bool {
    name.ends_with(".partial")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use wiremock::matchers::{body_bytes, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn download_writes_target_and_returns_md5() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/file"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"hello"))
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let target = dir.path().join("out.txt");
        let client = TransferClient::new();

        let md5 = client
            .download(&format!("{}/file", server.uri()), &target, None)
            .await
            .unwrap();

        assert_eq!(md5, "5d41402abc4b2a76b9719d911017c592");
        assert_eq!(std::fs::read(&target).unwrap(), b"hello");
        assert!(!partial_path(&target).exists());
    }

    #[tokio::test]
    async fn download_accepts_uppercase_expected_md5() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/file"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"hello"))
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let target = dir.path().join("out.txt");
        TransferClient::new()
            .download(
                &format!("{}/file", server.uri()),
                &target,
                Some("5D41402ABC4B2A76B9719D911017C592"),
            )
            .await
            .unwrap();
        assert!(target.exists());
    }

    #[tokio::test]
    async fn mismatched_md5_keeps_existing_target() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/file"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"hello"))
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let target = dir.path().join("bad.txt");
        std::fs::write(&target, b"old").unwrap();
        let client = TransferClient::new();

        let err = client
            .download(&format!("{}/file", server.uri()), &target, Some("deadbeef"))
            .await
            .expect_err("expected md5 mismatch");

        assert!(matches!(err, TransferError::IntegrityMismatch { .. }));
        assert_eq!(std::fs::read(&target).unwrap(), b"old");
        assert!(!partial_path(&target).exists());
    }

    #[tokio::test]
    async fn upload_streams_file_contents() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/upload"))
            .and(body_bytes(b"payload"))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let source = dir.path().join("in.bin");
        std::fs::write(&source, b"payload").unwrap();

        TransferClient::new()
            .upload(&format!("{}/upload", server.uri()), &source)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn upload_reports_http_errors() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/upload"))
            .respond_with(ResponseTemplate::new(507))
            .mount(&server)
            .await;

        let err = TransferClient::new()
            .upload_empty(&format!("{}/upload", server.uri()))
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::Request(_)));
    }

    #[test]
    fn partial_name_appends_suffix() {
        assert_eq!(
            partial_path(Path::new("/sync/notes.txt")),
            PathBuf::from("/sync/notes.txt.partial")
        );
        assert!(is_partial("notes.txt.partial"));
        assert!(!is_partial("notes.txt"));
    }
}
