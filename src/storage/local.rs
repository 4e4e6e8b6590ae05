//! Хранилище объектов в локальной директории
//!
//! Каждый объект лежит в файле `{root}/{path}`. Запись идет через временный файл
//! в той же директории и атомарное переименование.

use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use log::debug;
use path_clean::PathClean;
use tempfile::NamedTempFile;
use walkdir::WalkDir;

use super::{BlobStore, StorageError};

#[derive(Debug, Clone)]
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    /// Открыть хранилище, создав корневую директорию при необходимости
    pub fn open(root: impl AsRef<Path>) -> Result<Self, StorageError> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root).map_err(|e| {
            StorageError::Unavailable(format!("cannot create storage root {}: {}", root.display(), e))
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Файл объекта; пути, выходящие за пределы корня, отклоняются
    fn resolve(&self, path: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(path).clean();
        let is_contained = !path.is_empty()
            && relative
                .components()
                .all(|component| matches!(component, Component::Normal(_)));
        if !is_contained {
            return Err(StorageError::InvalidPath(path.to_string()));
        }
        Ok(self.root.join(relative))
    }

    fn ensure_root(&self) -> Result<(), StorageError> {
        if self.root.is_dir() {
            Ok(())
        } else {
            Err(StorageError::Unavailable(format!(
                "storage root {} is missing",
                self.root.display()
            )))
        }
    }
}

fn write_atomically(target: &Path, data: &[u8]) -> io::Result<()> {
    let parent = target
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "object path has no parent"))?;
    std::fs::create_dir_all(parent)?;

    let mut temp = NamedTempFile::new_in(parent)?;
    temp.write_all(data)?;
    temp.as_file().sync_all()?;
    temp.persist(target).map_err(|e| e.error)?;
    Ok(())
}

fn to_object_path(root: &Path, file: &Path) -> Option<String> {
    let relative = file.strip_prefix(root).ok()?;
    let parts: Vec<&str> = relative
        .components()
        .map(|component| component.as_os_str().to_str())
        .collect::<Option<_>>()?;
    Some(parts.join("/"))
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn get(&self, path: &str) -> Result<Bytes, StorageError> {
        let file = self.resolve(path)?;
        match tokio::fs::read(&file).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                self.ensure_root()?;
                Err(StorageError::NotFound(path.to_string()))
            }
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    async fn put(&self, path: &str, data: Bytes) -> Result<(), StorageError> {
        let file = self.resolve(path)?;
        self.ensure_root()?;

        let target = file.clone();
        let written = tokio::task::spawn_blocking(move || write_atomically(&target, &data))
            .await
            .map_err(|e| StorageError::Unavailable(format!("write task failed: {}", e)))?;

        match written {
            Ok(()) => {
                debug!("Stored {}", file.display());
                Ok(())
            }
            Err(e) => {
                self.ensure_root()?;
                Err(StorageError::Rejected {
                    path: path.to_string(),
                    reason: e.to_string(),
                })
            }
        }
    }

    async fn exists(&self, path: &str) -> Result<bool, StorageError> {
        let file = self.resolve(path)?;
        match tokio::fs::metadata(&file).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    async fn delete(&self, path: &str) -> Result<(), StorageError> {
        let file = self.resolve(path)?;
        match tokio::fs::remove_file(&file).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        self.ensure_root()?;

        // Обходим только директорию, в которой лежит префикс
        let directory = match prefix.rfind('/') {
            Some(slash) => self.resolve(&prefix[..slash])?,
            None => self.root.clone(),
        };
        let root = self.root.clone();
        let prefix = prefix.to_string();

        tokio::task::spawn_blocking(move || {
            if !directory.is_dir() {
                return Ok(Vec::new());
            }
            let mut paths = Vec::new();
            for entry in WalkDir::new(&directory) {
                let entry = entry.map_err(|e| StorageError::Io(e.into()))?;
                if !entry.file_type().is_file() {
                    continue;
                }
                if let Some(path) = to_object_path(&root, entry.path()) {
                    if path.starts_with(&prefix) {
                        paths.push(path);
                    }
                }
            }
            paths.sort();
            Ok(paths)
        })
        .await
        .map_err(|e| StorageError::Unavailable(format!("list task failed: {}", e)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_put_creates_directories() {
        let dir = tempdir().unwrap();
        let store = LocalBlobStore::open(dir.path()).unwrap();

        store
            .put("users/u/datasets/d/segments/segment_00000.wav", Bytes::from_static(b"data"))
            .await
            .unwrap();

        let on_disk = dir.path().join("users/u/datasets/d/segments/segment_00000.wav");
        assert_eq!(std::fs::read(on_disk).unwrap(), b"data");
        assert!(store.exists("users/u/datasets/d/segments/segment_00000.wav").await.unwrap());
    }

    #[tokio::test]
    async fn test_escaping_paths_are_rejected() {
        let dir = tempdir().unwrap();
        let store = LocalBlobStore::open(dir.path()).unwrap();

        for path in ["../outside", "/etc/passwd", "", "a/../../b"] {
            let err = store.put(path, Bytes::new()).await.unwrap_err();
            assert!(matches!(err, StorageError::InvalidPath(_)), "{}", path);
        }
    }

    #[tokio::test]
    async fn test_missing_object_and_missing_root() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("store");
        let store = LocalBlobStore::open(&root).unwrap();

        assert!(matches!(store.get("nope.wav").await, Err(StorageError::NotFound(_))));

        std::fs::remove_dir_all(&root).unwrap();
        assert!(matches!(store.get("nope.wav").await, Err(StorageError::Unavailable(_))));
        assert!(matches!(
            store.put("a.wav", Bytes::new()).await,
            Err(StorageError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_list_and_delete() {
        let dir = tempdir().unwrap();
        let store = LocalBlobStore::open(dir.path()).unwrap();
        for path in ["d/segments/segment_00001.wav", "d/segments/segment_00000.wav", "d/training_data.jsonl"] {
            store.put(path, Bytes::new()).await.unwrap();
        }

        let listed = store.list("d/segments/").await.unwrap();
        assert_eq!(listed, vec!["d/segments/segment_00000.wav", "d/segments/segment_00001.wav"]);
        assert!(store.list("missing/").await.unwrap().is_empty());

        store.delete("d/segments/segment_00000.wav").await.unwrap();
        store.delete("d/segments/segment_00000.wav").await.unwrap();
        assert_eq!(store.list("d/segments/").await.unwrap().len(), 1);
    }
}
