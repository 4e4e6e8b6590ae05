//! Основной файл библиотеки tts-dataset-prep
//!
//! Подготовка датасета для обучения TTS: разбор транскрипта (SRT или текст),
//! нарезка исходного аудио на сегменты по временным меткам и запись манифеста
//! JSONL. Статусом датасета управляет `pipeline::DatasetPipeline`.

pub mod config;
pub mod dataset;
pub mod error;
pub mod manifest;
pub mod media;
pub mod notification;
pub mod pipeline;
pub mod progress;
pub mod storage;
pub mod transcript;
pub mod utils;

pub use config::{PipelineConfig, StorageBackend, StorageConfig, TargetFormat, ValidationLimits};
pub use dataset::{Dataset, DatasetStatus, ReadyArtifacts, TranscriptFormat};
pub use error::{DatasetError, Result};
pub use manifest::{build_manifest, read_manifest, ManifestEntry, ManifestWriter};
pub use pipeline::{CreatedDataset, DatasetPipeline, NewDataset, ProcessHandle};
pub use progress::{PipelineStep, ProgressInfo, ProgressObserver};
pub use storage::{BlobStore, DatasetPaths, DatasetStore, StorageError};
pub use transcript::{ParsedTranscript, TimedSpan};
