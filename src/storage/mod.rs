//! Хранилище объектов и записей датасетов
//!
//! `BlobStore` хранит байты по пути, `DatasetStore` хранит записи датасетов по идентификатору.
//! Раскладка путей одна для всех бэкендов и описывается `DatasetPaths`.

pub mod local;
pub mod memory;
pub mod records;
pub mod sink;

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use uuid::Uuid;

use crate::config::{StorageBackend, StorageConfig};
use crate::dataset::TranscriptFormat;
use crate::error::Result;
use crate::media::segmenter::segment_file_name;

pub use local::LocalBlobStore;
pub use memory::MemoryBlobStore;
pub use records::{DatasetStore, FileDatasetStore, MemoryDatasetStore};
pub use sink::BlobSegmentSink;

/// Имя файла манифеста
pub const MANIFEST_FILE_NAME: &str = "training_data.jsonl";

/// Ошибки хранилища объектов
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object not found: {0}")]
    NotFound(String),

    /// Хранилище целиком недоступно
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// Запись конкретного объекта отклонена
    #[error("write to {path} rejected: {reason}")]
    Rejected { path: String, reason: String },

    #[error("invalid object path: {0}")]
    InvalidPath(String),

    #[error("storage IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Хранилище объектов, адресуемых путем
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn get(&self, path: &str) -> std::result::Result<Bytes, StorageError>;

    /// Записать объект атомарно: после ошибки по пути нет частичных данных
    async fn put(&self, path: &str, data: Bytes) -> std::result::Result<(), StorageError>;

    async fn exists(&self, path: &str) -> std::result::Result<bool, StorageError>;

    /// Удалить объект; отсутствие объекта ошибкой не считается
    async fn delete(&self, path: &str) -> std::result::Result<(), StorageError>;

    /// Пути всех объектов с данным префиксом, в лексикографическом порядке
    async fn list(&self, prefix: &str) -> std::result::Result<Vec<String>, StorageError>;
}

/// Раскладка путей одного датасета
///
/// `users/{owner_id}/datasets/{dataset_id}/...`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetPaths {
    owner_id: Uuid,
    dataset_id: Uuid,
}

impl DatasetPaths {
    pub fn new(owner_id: Uuid, dataset_id: Uuid) -> Self {
        Self { owner_id, dataset_id }
    }

    pub fn root(&self) -> String {
        format!("users/{}/datasets/{}", self.owner_id, self.dataset_id)
    }

    pub fn source_audio(&self, extension: &str) -> String {
        format!("{}/source_audio.{}", self.root(), extension)
    }

    pub fn transcript(&self, format: TranscriptFormat) -> String {
        format!("{}/transcript.{}", self.root(), format.extension())
    }

    /// Префикс сегментов, заканчивается на `/`
    pub fn segments_prefix(&self) -> String {
        format!("{}/segments/", self.root())
    }

    pub fn segment(&self, index: usize, extension: &str) -> String {
        format!("{}{}", self.segments_prefix(), segment_file_name(index, extension))
    }

    pub fn manifest(&self) -> String {
        format!("{}/{}", self.root(), MANIFEST_FILE_NAME)
    }

    /// Путь относительно директории датасета, если он ей принадлежит
    pub fn relative<'a>(&self, path: &'a str) -> Option<&'a str> {
        path.strip_prefix(&self.root())
            .and_then(|rest| rest.strip_prefix('/'))
    }
}

/// Открыть хранилище объектов по конфигурации
pub fn open_blob_store(config: &StorageConfig) -> Result<Arc<dyn BlobStore>> {
    match &config.backend {
        StorageBackend::Memory => Ok(Arc::new(MemoryBlobStore::new())),
        StorageBackend::Local { root } => Ok(Arc::new(LocalBlobStore::open(root)?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_layout() {
        let owner = Uuid::nil();
        let id = Uuid::from_u128(1);
        let paths = DatasetPaths::new(owner, id);
        let root = format!("users/{}/datasets/{}", owner, id);

        assert_eq!(paths.root(), root);
        assert_eq!(paths.source_audio("mp3"), format!("{}/source_audio.mp3", root));
        assert_eq!(paths.transcript(TranscriptFormat::Srt), format!("{}/transcript.srt", root));
        assert_eq!(paths.transcript(TranscriptFormat::Text), format!("{}/transcript.txt", root));
        assert_eq!(paths.segment(7, "wav"), format!("{}/segments/segment_00007.wav", root));
        assert_eq!(paths.manifest(), format!("{}/training_data.jsonl", root));
    }

    #[test]
    fn test_relative_path() {
        let paths = DatasetPaths::new(Uuid::nil(), Uuid::from_u128(1));
        let segment = paths.segment(0, "wav");

        assert_eq!(paths.relative(&segment), Some("segments/segment_00000.wav"));
        assert_eq!(paths.relative("users/other/datasets/x/segments/segment_00000.wav"), None);
    }

    #[test]
    fn test_open_memory_backend() {
        assert!(open_blob_store(&StorageConfig::default()).is_ok());
    }
}
