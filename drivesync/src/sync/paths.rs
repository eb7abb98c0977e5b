use std::path::{Component, Path};

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PathError {
    #[error("resource name is empty")]
    Empty,
    #[error("resource name {0:?} is not a single path component")]
    UnsupportedComponent(String),
}

/// Accepts a remote title only if it maps to exactly one normal component
/// under its parent directory.
pub fn local_name(title: &str) -> Result<&str, PathError> {
    if title.is_empty() {
        return Err(PathError::Empty);
    }
    // Backslashes are separators on Windows and never valid in our titles.
    if title.contains('\\') {
        return Err(PathError::UnsupportedComponent(title.to_string()));
    }

    let mut components = Path::new(title).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(part)), None) if part == title => Ok(title),
        _ => Err(PathError::UnsupportedComponent(title.to_string())),
    }
}
