use std::path::{Component, Path, PathBuf};

use log::debug;
use walkdir::WalkDir;

use crate::error::StorageError;

/// Download destinations on the host filesystem, all beneath one root.
#[derive(Debug, Clone)]
pub struct FileSystemStorage {
    root: PathBuf,
}

impl FileSystemStorage {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Creates `root/relative` (and parents) and returns it.
    ///
    /// `relative` must stay below the root: absolute paths and `..`
    /// components are rejected.
    pub fn resolve_job_path<P: AsRef<Path>>(&self, relative: P) -> Result<PathBuf, StorageError> {
        let relative = relative.as_ref();
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes {
            return Err(StorageError::OutsideRoot {
                path: relative.to_path_buf(),
                root: self.root.clone(),
            });
        }

        let path = self.root.join(relative);
        self.ensure_directory(&path)?;
        Ok(path)
    }

    /// Like [`resolve_job_path`](Self::resolve_job_path) for a path already
    /// joined onto the root.
    pub fn prepare_destination(&self, destination: &Path) -> Result<PathBuf, StorageError> {
        let relative = destination
            .strip_prefix(&self.root)
            .map_err(|_| StorageError::OutsideRoot {
                path: destination.to_path_buf(),
                root: self.root.clone(),
            })?;
        self.resolve_job_path(relative)
    }

    pub fn ensure_directory(&self, path: &Path) -> Result<(), StorageError> {
        std::fs::create_dir_all(path).map_err(|e| StorageError::CreateDirectory {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Every regular file below `dir`, recursively, in path order.
    pub fn list_files(&self, dir: &Path) -> Result<Vec<PathBuf>, StorageError> {
        list_files(dir)
    }
}

/// Every regular file below `dir`, recursively, in path order. Symlinks
/// are not followed.
pub fn list_files(dir: &Path) -> Result<Vec<PathBuf>, StorageError> {
    let mut files = Vec::new();

    for entry in WalkDir::new(dir).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|e| StorageError::Scan {
            path: dir.to_path_buf(),
            source: e,
        })?;
        if entry.file_type().is_file() {
            files.push(entry.into_path());
        }
    }

    debug!("Found {} files in {}", files.len(), dir.display());
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_fs::prelude::*;
    use assert_fs::TempDir;

    #[test]
    fn test_resolve_job_path_creates_nested() {
        let temp = TempDir::new().unwrap();
        let storage = FileSystemStorage::new(temp.path());

        let path = storage.resolve_job_path("title/example/123").unwrap();
        assert_eq!(path, temp.path().join("title/example/123"));
        assert!(temp.child("title/example/123").path().is_dir());
    }

    #[test]
    fn test_resolve_job_path_rejects_escape() {
        let temp = TempDir::new().unwrap();
        let storage = FileSystemStorage::new(temp.path());

        assert!(matches!(
            storage.resolve_job_path("../outside"),
            Err(StorageError::OutsideRoot { .. })
        ));
        assert!(matches!(
            storage.resolve_job_path("/etc"),
            Err(StorageError::OutsideRoot { .. })
        ));
    }

    #[test]
    fn test_prepare_destination_outside_root() {
        let temp = TempDir::new().unwrap();
        let storage = FileSystemStorage::new(temp.path().join("root"));
        let err = storage.prepare_destination(&temp.path().join("elsewhere")).unwrap_err();
        assert!(matches!(err, StorageError::OutsideRoot { .. }));
    }

    #[test]
    fn test_list_files_recursive_skips_directories() {
        let temp = TempDir::new().unwrap();
        temp.child("b.jpg").write_str("b").unwrap();
        temp.child("sub/a.png").write_str("a").unwrap();
        temp.child("empty").create_dir_all().unwrap();

        let files = list_files(temp.path()).unwrap();
        let rel: Vec<_> = files
            .iter()
            .map(|p| p.strip_prefix(temp.path()).unwrap().to_path_buf())
            .collect();
        assert_eq!(rel, vec![PathBuf::from("b.jpg"), PathBuf::from("sub/a.png")]);
    }

    #[test]
    fn test_list_files_missing_dir_errors() {
        let temp = TempDir::new().unwrap();
        assert!(list_files(&temp.path().join("missing")).is_err());
    }
}
