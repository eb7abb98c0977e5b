//! The persisted resource tree.
//!
//! The cache is the only state kept between passes: one JSON
//! [`ResourceDoc`] for the whole tree. It is replaced atomically so a crash
//! mid-write leaves the previous document intact.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::tree::{ResourceDoc, ResourceTree, TreeError};

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache I/O on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("cache {path} is not valid JSON: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("cache does not describe a valid tree: {0}")]
    Tree(#[from] TreeError),
}

/// Reads the tree saved at `path`. A missing file yields an empty tree.
pub async fn load(
    path: &Path,
    base_dir: &Path,
    root_href: &str,
) -> Result<ResourceTree, CacheError> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            return Ok(ResourceTree::new(base_dir, root_href));
        }
        Err(source) => {
            return Err(CacheError::Io {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    let doc: ResourceDoc = serde_json::from_slice(&bytes).map_err(|source| CacheError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(ResourceTree::from_doc(base_dir, root_href, &doc)?)
}

pub async fn save(tree: &ResourceTree, path: &Path) -> Result<(), CacheError> {
    let io_err = |source| CacheError::Io {
        path: path.to_path_buf(),
        source,
    };
    let bytes = serde_json::to_vec_pretty(&tree.serialize()).map_err(|source| CacheError::Json {
        path: path.to_path_buf(),
        source,
    })?;

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
    }
    let mut tmp = path.as_os_str().to_os_string();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    tokio::fs::write(&tmp, bytes).await.map_err(io_err)?;
    tokio::fs::rename(&tmp, path).await.map_err(io_err)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use drive_api::{ROOT_HREF, RemoteEntry};
    use tempfile::tempdir;

    use super::*;
    use crate::tree::{Resource, State};

    fn sample_tree(base: &Path) -> ResourceTree {
        let mut tree = ResourceTree::new(base, ROOT_HREF);
        let root = tree.root();
        let docs = tree
            .insert_child(
                root,
                Resource::from_entry(&RemoteEntry {
                    title: "Docs".into(),
                    self_href: "disk:/Docs".into(),
                    resource_id: "1:docs".into(),
                    parent_href: "disk:/".into(),
                    content_src: String::new(),
                    modified: 10,
                    md5: None,
                    size: None,
                    is_folder: true,
                }),
            )
            .unwrap();
        tree[docs].mark_synced(20, None);
        tree.insert_child(docs, Resource::placeholder("draft.md", false))
            .unwrap();
        tree
    }

    #[tokio::test]
    async fn missing_cache_gives_empty_tree() {
        let dir = tempdir().unwrap();
        let tree = load(&dir.path().join("state.json"), dir.path(), ROOT_HREF)
            .await
            .unwrap();
        assert_eq!(tree.node_count(), 1);
    }

    #[tokio::test]
    async fn saved_tree_loads_back_identically() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/state.json");
        let tree = sample_tree(dir.path());

        save(&tree, &path).await.unwrap();
        let loaded = load(&path, dir.path(), ROOT_HREF).await.unwrap();

        assert_eq!(loaded.serialize(), tree.serialize());
        let draft = loaded.find_by_path(Path::new("Docs/draft.md")).unwrap();
        assert_eq!(loaded[draft].state(), State::LocalNew);
        assert!(!dir.path().join("nested/state.json.tmp").exists());
    }

    #[tokio::test]
    async fn save_replaces_previous_document() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        save(&sample_tree(dir.path()), &path).await.unwrap();
        save(&ResourceTree::new(dir.path(), ROOT_HREF), &path)
            .await
            .unwrap();

        let loaded = load(&path, dir.path(), ROOT_HREF).await.unwrap();
        assert_eq!(loaded.node_count(), 1);
    }

    #[tokio::test]
    async fn corrupt_cache_is_reported() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, b"{ not json").unwrap();

        let err = load(&path, dir.path(), ROOT_HREF).await.unwrap_err();
        assert!(matches!(err, CacheError::Json { .. }));
    }

    #[tokio::test]
    async fn cache_for_another_root_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        save(&sample_tree(dir.path()), &path).await.unwrap();

        let err = load(&path, dir.path(), "disk:/Other").await.unwrap_err();
        assert!(matches!(
            err,
            CacheError::Tree(TreeError::RootMismatch { .. })
        ));
    }
}
