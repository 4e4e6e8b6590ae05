//! Приемник сегментов поверх хранилища объектов

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use log::warn;

use super::{BlobStore, DatasetPaths, StorageError};
use crate::media::segmenter::{SegmentSink, SinkError};

/// Пишет сегменты датасета в `segments/` через `BlobStore`
pub struct BlobSegmentSink {
    blobs: Arc<dyn BlobStore>,
    paths: DatasetPaths,
    extension: &'static str,
}

impl BlobSegmentSink {
    pub fn new(blobs: Arc<dyn BlobStore>, paths: DatasetPaths, extension: &'static str) -> Self {
        Self {
            blobs,
            paths,
            extension,
        }
    }
}

#[async_trait]
impl SegmentSink for BlobSegmentSink {
    fn segment_path(&self, index: usize) -> String {
        self.paths.segment(index, self.extension)
    }

    async fn write_segment(&self, path: &str, data: Bytes) -> Result<(), SinkError> {
        match self.blobs.put(path, data).await {
            Ok(()) => Ok(()),
            Err(StorageError::Unavailable(reason)) => Err(SinkError::Fatal(reason)),
            Err(err) => {
                // Частичный объект не должен пережить отклоненную запись
                if let Err(cleanup) = self.blobs.delete(path).await {
                    warn!("Failed to remove partial segment {}: {}", path, cleanup);
                }
                Err(SinkError::Rejected(err.to_string()))
            }
        }
    }
}
