//! Контроллер конвейера подготовки датасета
//!
//! Единственное место, где меняется статус записи датасета. Запуск обработки
//! возвращает управление сразу после перевода записи в `processing`, сама
//! попытка выполняется в отдельной задаче tokio.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::dataset::{Dataset, DatasetStatus, ReadyArtifacts, TranscriptFormat};
use crate::error::{DatasetError, Result};
use crate::manifest::build_manifest;
use crate::media::{validate_source, Segmenter, SourceAudio};
use crate::progress::{PipelineStep, ProgressObserver, ProgressReporter, ProgressTracker};
use crate::storage::{open_blob_store, BlobSegmentSink, BlobStore, DatasetPaths, DatasetStore};
use crate::transcript::{parse_transcript, ParsedTranscript};

/// Расширение исходного аудио, если имя файла его не содержит
const DEFAULT_AUDIO_EXTENSION: &str = "wav";

/// Запрос на создание датасета
#[derive(Debug, Clone)]
pub struct NewDataset {
    pub owner_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub audio: Bytes,
    /// Имя загруженного файла, из него берется расширение
    pub audio_file_name: Option<String>,
    pub transcript: Bytes,
    pub transcript_format: TranscriptFormat,
    /// Сразу запустить обработку
    pub auto_process: bool,
}

/// Результат создания датасета
pub struct CreatedDataset {
    pub dataset: Dataset,
    /// Запущенная обработка, если запрошена
    pub processing: Option<ProcessHandle>,
}

/// Подтверждение запуска обработки
///
/// Результат попытки наблюдается только через запись датасета.
pub struct ProcessHandle {
    dataset: Dataset,
    task: JoinHandle<()>,
    records: Arc<dyn DatasetStore>,
}

impl ProcessHandle {
    /// Снимок записи на момент запуска (статус `processing`)
    pub fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    pub fn id(&self) -> Uuid {
        self.dataset.id
    }

    /// Дождаться завершения попытки и вернуть сохраненную запись
    pub async fn wait(self) -> Result<Dataset> {
        self.task
            .await
            .map_err(|e| DatasetError::Other(format!("processing task failed: {}", e)))?;
        self.records.get(self.dataset.id).await
    }
}

struct Inner {
    config: PipelineConfig,
    blobs: Arc<dyn BlobStore>,
    records: Arc<dyn DatasetStore>,
    segmenter: Segmenter,
    progress: Arc<ProgressReporter>,
    /// Датасеты, попытка по которым выполняется в этом процессе
    in_flight: Mutex<HashSet<Uuid>>,
}

/// Рекомендательная блокировка попытки, снимается при завершении задачи
struct InFlightGuard {
    inner: Arc<Inner>,
    id: Uuid,
}

impl InFlightGuard {
    fn acquire(inner: Arc<Inner>, id: Uuid) -> Result<Self> {
        if !inner.in_flight.lock().insert(id) {
            return Err(DatasetError::InvalidStateTransition {
                from: DatasetStatus::Processing,
                to: DatasetStatus::Processing,
            });
        }
        Ok(Self { inner, id })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.inner.in_flight.lock().remove(&self.id);
    }
}

/// Контроллер конвейера
#[derive(Clone)]
pub struct DatasetPipeline {
    inner: Arc<Inner>,
}

impl DatasetPipeline {
    pub fn new(config: PipelineConfig, blobs: Arc<dyn BlobStore>, records: Arc<dyn DatasetStore>) -> Result<Self> {
        config.validate()?;
        let segmenter = Segmenter::new(&config);
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                blobs,
                records,
                segmenter,
                progress: Arc::new(ProgressReporter::new()),
                in_flight: Mutex::new(HashSet::new()),
            }),
        })
    }

    /// Создать контроллер с хранилищем объектов из конфигурации
    pub fn from_config(config: PipelineConfig, records: Arc<dyn DatasetStore>) -> Result<Self> {
        let blobs = open_blob_store(&config.storage)?;
        Self::new(config, blobs, records)
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.inner.config
    }

    pub fn add_observer(&self, observer: Box<dyn ProgressObserver>) -> usize {
        self.inner.progress.add_observer(observer)
    }

    pub fn remove_observer(&self, id: usize) -> bool {
        self.inner.progress.remove_observer(id).is_some()
    }

    pub async fn dataset(&self, id: Uuid) -> Result<Dataset> {
        self.inner.records.get(id).await
    }

    pub async fn list_datasets(&self, owner_id: Uuid) -> Result<Vec<Dataset>> {
        self.inner.records.list(owner_id).await
    }

    /// Загрузить исходники и создать запись в статусе `pending`
    pub async fn create_dataset(&self, request: NewDataset) -> Result<CreatedDataset> {
        if request.name.trim().is_empty() {
            return Err(DatasetError::Other("dataset name must not be empty".to_string()));
        }

        let extension = audio_extension(request.audio_file_name.as_deref());
        let limits = self.inner.config.limits;
        let audio = request.audio.clone();
        let hint = extension.clone();
        let decoded = tokio::task::spawn_blocking(move || validate_source(&audio, Some(hint.as_str()), &limits))
            .await
            .map_err(|e| DatasetError::Other(format!("audio validation task failed: {}", e)))??;
        debug!(
            "Validated source audio: {:.2}s at {} Hz, {} channels",
            decoded.duration_seconds(),
            decoded.sample_rate,
            decoded.source_channels
        );

        let id = Uuid::new_v4();
        let paths = DatasetPaths::new(request.owner_id, id);
        let audio_path = paths.source_audio(&extension);
        let transcript_path = paths.transcript(request.transcript_format);

        self.inner.blobs.put(&audio_path, request.audio).await?;
        self.inner.blobs.put(&transcript_path, request.transcript).await?;

        let mut dataset = Dataset::new(
            id,
            request.owner_id,
            request.name,
            audio_path,
            transcript_path,
            request.transcript_format,
        );
        dataset.description = request.description;
        self.inner.records.save(&dataset).await?;
        info!("Dataset {} created for owner {}", id, dataset.owner_id);

        let processing = if request.auto_process {
            Some(self.process(id).await?)
        } else {
            None
        };

        Ok(CreatedDataset { dataset, processing })
    }

    /// Запустить обработку датасета
    ///
    /// Возвращает управление после сохранения статуса `processing`. Датасет в
    /// статусе `processing` или `ready`, а также датасет, который сейчас
    /// очищается или удаляется, отклоняется с `InvalidStateTransition`.
    pub async fn process(&self, id: Uuid) -> Result<ProcessHandle> {
        let guard = InFlightGuard::acquire(self.inner.clone(), id)?;

        let mut dataset = self.inner.records.get(id).await?;
        dataset.begin_processing()?;
        self.inner.records.save(&dataset).await?;
        info!("Dataset {} processing started (attempt {})", id, dataset.attempts);

        let pipeline = self.clone();
        let snapshot = dataset.clone();
        let task = tokio::spawn(async move {
            let _guard = guard;
            pipeline.run_attempt(snapshot).await;
        });

        Ok(ProcessHandle {
            dataset,
            task,
            records: self.inner.records.clone(),
        })
    }

    /// Удалить сегменты датасета, на которые не ссылается его запись
    ///
    /// Остатки неудачных попыток сами по себе не удаляются; операция
    /// запускается оператором для датасета в конечном статусе. Пока она
    /// выполняется, запуск обработки этого датасета отклоняется.
    pub async fn sweep_orphaned_segments(&self, id: Uuid) -> Result<Vec<String>> {
        let (dataset, _guard) = self.settled_dataset(id).await?;
        let paths = DatasetPaths::new(dataset.owner_id, dataset.id);
        let referenced: HashSet<&str> = dataset.segment_paths.iter().map(String::as_str).collect();

        let mut removed = Vec::new();
        for path in self.inner.blobs.list(&paths.segments_prefix()).await? {
            if referenced.contains(path.as_str()) {
                continue;
            }
            self.inner.blobs.delete(&path).await?;
            removed.push(path);
        }

        info!("Dataset {}: removed {} orphaned segments", id, removed.len());
        Ok(removed)
    }

    /// Удалить все объекты датасета и его запись
    pub async fn delete_dataset(&self, id: Uuid) -> Result<usize> {
        let (dataset, _guard) = self.settled_dataset(id).await?;
        let paths = DatasetPaths::new(dataset.owner_id, dataset.id);

        let objects = self.inner.blobs.list(&format!("{}/", paths.root())).await?;
        for path in &objects {
            self.inner.blobs.delete(path).await?;
        }
        self.inner.records.delete(id).await?;

        info!("Dataset {} deleted ({} objects)", id, objects.len());
        Ok(objects.len())
    }

    /// Запись датасета, по которому сейчас не идет попытка
    ///
    /// Возвращенная блокировка удерживается до конца операции над объектами
    /// датасета, новая попытка до ее снятия не запустится.
    async fn settled_dataset(&self, id: Uuid) -> Result<(Dataset, InFlightGuard)> {
        let guard = InFlightGuard::acquire(self.inner.clone(), id).map_err(|_| DatasetError::Busy(id))?;
        let dataset = self.inner.records.get(id).await?;
        if dataset.status == DatasetStatus::Processing {
            return Err(DatasetError::Busy(id));
        }
        Ok((dataset, guard))
    }

    async fn run_attempt(&self, mut dataset: Dataset) {
        let id = dataset.id;
        let tracker = ProgressTracker::new(id, self.inner.progress.clone());

        let outcome = match self.execute(&dataset, &tracker).await {
            Ok(artifacts) => dataset.mark_ready(artifacts),
            Err(err) => Err(err),
        };
        tracker.set_step(PipelineStep::Finalizing);

        match outcome {
            Ok(()) => info!(
                "Dataset {} is ready: {} segments, {:.3}s",
                id,
                dataset.segment_count.unwrap_or_default(),
                dataset.total_duration_seconds.unwrap_or_default()
            ),
            Err(err) => {
                error!("Dataset {} failed: {}", id, err);
                if let Err(transition) = dataset.mark_failed(err.to_cause()) {
                    error!("Dataset {} could not be marked failed: {}", id, transition);
                    return;
                }
            }
        }

        if let Err(err) = self.inner.records.save(&dataset).await {
            error!("Dataset {}: failed to persist {} status: {}", id, dataset.status, err);
            return;
        }
        tracker.complete();
    }

    async fn execute(&self, dataset: &Dataset, tracker: &ProgressTracker) -> Result<ReadyArtifacts> {
        let paths = DatasetPaths::new(dataset.owner_id, dataset.id);

        tracker.set_step(PipelineStep::Fetching);
        let audio = self.inner.blobs.get(&dataset.source_audio_path).await?;
        tracker.update_step_progress(50.0, None);
        let transcript = self.inner.blobs.get(&dataset.transcript_path).await?;
        debug!(
            "Dataset {}: fetched {} bytes of audio, {} bytes of transcript",
            dataset.id,
            audio.len(),
            transcript.len()
        );

        tracker.set_step(PipelineStep::Parsing);
        let segmenter = self.inner.segmenter.clone();
        let format = dataset.transcript_format;
        let hint = file_extension(&dataset.source_audio_path);
        let (parsed, source) =
            tokio::task::spawn_blocking(move || prepare(&segmenter, &audio, &transcript, format, hint.as_deref()))
                .await
                .map_err(|e| DatasetError::Other(format!("preparation task failed: {}", e)))??;
        if !parsed.discarded.is_empty() {
            warn!(
                "Dataset {}: {} transcript blocks discarded",
                dataset.id,
                parsed.discarded.len()
            );
        }

        tracker.set_step(PipelineStep::Segmenting);
        let source_duration_ms = source.duration_ms;
        let sink = BlobSegmentSink::new(
            self.inner.blobs.clone(),
            paths.clone(),
            self.inner.segmenter.target().extension(),
        );
        let report = self
            .inner
            .segmenter
            .segment(Arc::new(source), &parsed.spans, &sink, Some(tracker))
            .await?;

        if report.planned == 0 {
            return Err(DatasetError::EmptyTranscript(format!(
                "none of {} spans overlaps {}ms of source audio",
                parsed.spans.len(),
                source_duration_ms
            )));
        }
        if report.segments.is_empty() {
            return Err(DatasetError::SinkWrite(format!(
                "all {} segment writes were rejected",
                report.failed_writes.len()
            )));
        }
        if !report.failed_writes.is_empty() {
            warn!(
                "Dataset {}: {} of {} segments were not written",
                dataset.id,
                report.failed_writes.len(),
                report.planned
            );
        }

        // Манифест пишется только после подтверждения всех записей сегментов.
        // Он содержит лишь метаданные сегментов, хранилище принимает объект целиком.
        tracker.set_step(PipelineStep::WritingManifest);
        let manifest = build_manifest(&report.segments, &paths)?;
        let manifest_path = paths.manifest();
        self.inner.blobs.put(&manifest_path, Bytes::from(manifest)).await?;

        let total_ms: u64 = report.segments.iter().map(|s| s.end_ms - s.start_ms).sum();
        Ok(ReadyArtifacts {
            segment_paths: report.segments.into_iter().map(|s| s.path).collect(),
            manifest_path,
            total_duration_seconds: total_ms as f64 / 1000.0,
        })
    }
}

/// Разобрать транскрипт и подготовить аудио
///
/// SRT разбирается до декодирования аудио; для текста длительность берется из
/// уже декодированного исходника.
fn prepare(
    segmenter: &Segmenter,
    audio: &[u8],
    transcript: &[u8],
    format: TranscriptFormat,
    hint: Option<&str>,
) -> Result<(ParsedTranscript, SourceAudio)> {
    let mut loaded = None;
    let parsed = parse_transcript(transcript, format, || {
        let source = segmenter.load(audio, hint)?;
        let duration_ms = source.duration_ms;
        loaded = Some(source);
        Ok(duration_ms)
    })?;

    let source = match loaded {
        Some(source) => source,
        None => segmenter.load(audio, hint)?,
    };
    Ok((parsed, source))
}

fn file_extension(path: &str) -> Option<String> {
    Path::new(path)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
}

/// Расширение загруженного аудио, `wav` по умолчанию
fn audio_extension(file_name: Option<&str>) -> String {
    file_name
        .and_then(file_extension)
        .filter(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .unwrap_or_else(|| DEFAULT_AUDIO_EXTENSION.to_string())
}
