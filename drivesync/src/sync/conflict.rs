use std::path::{Path, PathBuf};

/// Name the local copy of a conflicted file is moved to before the remote
/// copy is downloaded: `A.txt` becomes `A (conflict <stamp>).txt` in the same
/// directory.
pub fn conflict_path(path: &Path, stamp: i64) -> PathBuf {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();

    let renamed = if let Some((stem, ext)) = name.rsplit_once('.')
        && !stem.is_empty()
    {
        format!("{stem} (conflict {stamp}).{ext}")
    } else {
        format!("{name} (conflict {stamp})")
    };
    path.with_file_name(renamed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_extension_after_marker() {
        assert_eq!(
            conflict_path(Path::new("/sync/Docs/A.txt"), 2),
            PathBuf::from("/sync/Docs/A (conflict 2).txt")
        );
    }

    #[test]
    fn only_last_extension_moves() {
        assert_eq!(
            conflict_path(Path::new("/sync/backup.tar.gz"), 7),
            PathBuf::from("/sync/backup.tar (conflict 7).gz")
        );
    }

    #[test]
    fn names_without_extension_get_suffix() {
        assert_eq!(
            conflict_path(Path::new("/sync/Makefile"), 3),
            PathBuf::from("/sync/Makefile (conflict 3)")
        );
        assert_eq!(
            conflict_path(Path::new("/sync/.bashrc"), 3),
            PathBuf::from("/sync/.bashrc (conflict 3)")
        );
    }
}
