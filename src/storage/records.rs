//! Хранилище записей датасетов
//!
//! Записи хранятся целиком и перезаписываются целиком; источником истины о статусе
//! служит сохраненная запись, а не состояние в памяти контроллера.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::RwLock;
use tempfile::NamedTempFile;
use uuid::Uuid;

use crate::dataset::Dataset;
use crate::error::{DatasetError, Result};

/// Хранилище записей датасетов по идентификатору
#[async_trait]
pub trait DatasetStore: Send + Sync {
    /// Получить запись; отсутствие записи дает `DatasetError::NotFound`
    async fn get(&self, id: Uuid) -> Result<Dataset>;

    /// Сохранить запись целиком
    async fn save(&self, dataset: &Dataset) -> Result<()>;

    /// Записи владельца, новые первыми
    async fn list(&self, owner_id: Uuid) -> Result<Vec<Dataset>>;

    /// Удалить запись; отсутствие записи дает `DatasetError::NotFound`
    async fn delete(&self, id: Uuid) -> Result<()>;
}

fn newest_first(mut datasets: Vec<Dataset>) -> Vec<Dataset> {
    datasets.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
    datasets
}

#[derive(Debug, Default)]
pub struct MemoryDatasetStore {
    records: RwLock<HashMap<Uuid, Dataset>>,
}

impl MemoryDatasetStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DatasetStore for MemoryDatasetStore {
    async fn get(&self, id: Uuid) -> Result<Dataset> {
        self.records.read().get(&id).cloned().ok_or(DatasetError::NotFound(id))
    }

    async fn save(&self, dataset: &Dataset) -> Result<()> {
        self.records.write().insert(dataset.id, dataset.clone());
        Ok(())
    }

    async fn list(&self, owner_id: Uuid) -> Result<Vec<Dataset>> {
        let owned = self
            .records
            .read()
            .values()
            .filter(|dataset| dataset.owner_id == owner_id)
            .cloned()
            .collect();
        Ok(newest_first(owned))
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        self.records.write().remove(&id).map(|_| ()).ok_or(DatasetError::NotFound(id))
    }
}

/// Записи в виде JSON файлов `{root}/{id}.json`
#[derive(Debug, Clone)]
pub struct FileDatasetStore {
    root: PathBuf,
}

impl FileDatasetStore {
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn record_path(&self, id: Uuid) -> PathBuf {
        self.root.join(format!("{}.json", id))
    }
}

#[async_trait]
impl DatasetStore for FileDatasetStore {
    async fn get(&self, id: Uuid) -> Result<Dataset> {
        match tokio::fs::read(self.record_path(id)).await {
            Ok(raw) => Ok(serde_json::from_slice(&raw)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(DatasetError::NotFound(id)),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, dataset: &Dataset) -> Result<()> {
        let json = serde_json::to_vec_pretty(dataset)?;
        let root = self.root.clone();
        let target = self.record_path(dataset.id);

        tokio::task::spawn_blocking(move || -> Result<()> {
            let mut temp = NamedTempFile::new_in(&root)?;
            temp.write_all(&json)?;
            temp.persist(&target).map_err(|e| DatasetError::Io(e.error))?;
            Ok(())
        })
        .await
        .map_err(|e| DatasetError::Other(format!("record save task failed: {}", e)))?
    }

    async fn list(&self, owner_id: Uuid) -> Result<Vec<Dataset>> {
        let mut owned = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            let raw = tokio::fs::read(&path).await?;
            let dataset: Dataset = serde_json::from_slice(&raw)?;
            if dataset.owner_id == owner_id {
                owned.push(dataset);
            }
        }
        Ok(newest_first(owned))
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        match tokio::fs::remove_file(self.record_path(id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(DatasetError::NotFound(id)),
            Err(e) => Err(e.into()),
        }
    }
}
