//! Нарезка исходного аудио на сегменты
//!
//! Индексы сегментов детерминированы: они назначаются по порядку фрагментам,
//! пережившим обрезку по длительности аудио, и не зависят от порядка записи.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, StreamExt, TryStreamExt};
use log::{debug, info, warn};

use super::audio::{decode_audio, encode_wav, resample_mono};
use crate::config::{PipelineConfig, TargetFormat};
use crate::error::{DatasetError, Result};
use crate::progress::ProgressTracker;
use crate::transcript::TimedSpan;

/// Ширина индекса в имени файла сегмента
pub const SEGMENT_INDEX_WIDTH: usize = 5;

/// Исходное аудио, приведенное к целевой частоте дискретизации
#[derive(Debug, Clone)]
pub struct SourceAudio {
    /// Моно семплы в целевой частоте
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    /// Длительность исходника в миллисекундах
    pub duration_ms: u64,
}

impl SourceAudio {
    /// Семплы интервала `[start_ms, end_ms)`
    fn slice(&self, start_ms: u64, end_ms: u64) -> &[f32] {
        let to_index = |ms: u64| {
            let index = (ms * self.sample_rate as u64 + 500) / 1000;
            (index as usize).min(self.samples.len())
        };
        let start = to_index(start_ms);
        let end = to_index(end_ms).max(start);
        &self.samples[start..end]
    }
}

/// Сегмент, успешно записанный в хранилище
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub index: usize,
    pub start_ms: u64,
    pub end_ms: u64,
    /// Путь в хранилище объектов
    pub path: String,
    /// Текст исходного фрагмента
    pub text: String,
    /// MD5 закодированных байтов
    pub checksum: String,
}

impl Segment {
    pub fn duration_seconds(&self) -> f64 {
        (self.end_ms - self.start_ms) as f64 / 1000.0
    }
}

/// Запланированный к записи сегмент
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedSegment {
    pub index: usize,
    pub start_ms: u64,
    pub end_ms: u64,
    pub text: String,
}

/// Фрагмент, отброшенный при планировании
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DroppedSpan {
    /// Позиция фрагмента во входной последовательности
    pub position: usize,
    pub start_ms: u64,
    pub end_ms: u64,
    pub reason: String,
}

/// Сегмент, запись которого была отклонена
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedWrite {
    pub index: usize,
    pub path: String,
    pub reason: String,
}

/// Итог нарезки
#[derive(Debug, Clone, Default)]
pub struct SegmentationReport {
    /// Записанные сегменты в порядке индексов
    pub segments: Vec<Segment>,
    pub dropped: Vec<DroppedSpan>,
    pub failed_writes: Vec<FailedWrite>,
    /// Сколько сегментов было запланировано
    pub planned: usize,
}

/// Ошибка записи одного сегмента
#[derive(Debug, Clone, thiserror::Error)]
pub enum SinkError {
    /// Запись конкретного сегмента отклонена, частичные данные удалены
    #[error("write rejected: {0}")]
    Rejected(String),
    /// Приемник неработоспособен целиком
    #[error("sink failure: {0}")]
    Fatal(String),
}

/// Приемник закодированных сегментов
#[async_trait]
pub trait SegmentSink: Send + Sync {
    /// Путь сегмента с данным индексом
    fn segment_path(&self, index: usize) -> String;

    /// Записать сегмент целиком либо не оставить от него следов
    async fn write_segment(&self, path: &str, data: Bytes) -> std::result::Result<(), SinkError>;
}

enum WriteOutcome {
    Written(Segment),
    Rejected(FailedWrite),
}

/// Сегментатор с фиксированным целевым форматом
#[derive(Debug, Clone)]
pub struct Segmenter {
    target: TargetFormat,
    max_concurrent_writes: usize,
}

impl Segmenter {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            target: config.target,
            max_concurrent_writes: config.max_concurrent_writes.max(1),
        }
    }

    pub fn target(&self) -> &TargetFormat {
        &self.target
    }

    /// Декодировать исходник и привести его к целевой частоте
    ///
    /// Вычислительно тяжелая операция, вызывающая сторона запускает ее вне асинхронного рантайма.
    pub fn load(&self, data: &[u8], extension_hint: Option<&str>) -> Result<SourceAudio> {
        let decoded = decode_audio(data, extension_hint)?;
        let duration_ms = decoded.duration_ms();
        let samples = resample_mono(&decoded.samples, decoded.sample_rate, self.target.sample_rate)?;

        Ok(SourceAudio {
            samples,
            sample_rate: self.target.sample_rate,
            duration_ms,
        })
    }

    /// Обрезать фрагменты по длительности аудио и назначить индексы
    pub fn plan(spans: &[TimedSpan], total_duration_ms: u64) -> (Vec<PlannedSegment>, Vec<DroppedSpan>) {
        let mut planned = Vec::with_capacity(spans.len());
        let mut dropped = Vec::new();

        for (position, span) in spans.iter().enumerate() {
            let start_ms = span.start_ms.min(total_duration_ms);
            let end_ms = span.end_ms.min(total_duration_ms);

            if end_ms <= start_ms {
                dropped.push(DroppedSpan {
                    position,
                    start_ms: span.start_ms,
                    end_ms: span.end_ms,
                    reason: format!("zero length after clamping to {}ms of audio", total_duration_ms),
                });
                continue;
            }

            planned.push(PlannedSegment {
                index: planned.len(),
                start_ms,
                end_ms,
                text: span.text.clone(),
            });
        }

        (planned, dropped)
    }

    /// Нарезать аудио и записать сегменты через приемник
    ///
    /// Записи разных сегментов идут параллельно. Кодирование выполняется в
    /// пуле блокирующих задач. Отклоненная запись не прерывает остальные,
    /// отказ приемника целиком завершает нарезку с `SinkWrite`.
    pub async fn segment(
        &self,
        source: Arc<SourceAudio>,
        spans: &[TimedSpan],
        sink: &dyn SegmentSink,
        progress: Option<&ProgressTracker>,
    ) -> Result<SegmentationReport> {
        let (planned, dropped) = Self::plan(spans, source.duration_ms);
        for span in &dropped {
            warn!(
                "Dropping span #{} [{}ms, {}ms]: {}",
                span.position, span.start_ms, span.end_ms, span.reason
            );
        }

        let total = planned.len();
        info!("Writing {} segments ({} spans dropped)", total, dropped.len());

        let outcomes: Vec<WriteOutcome> = stream::iter(planned)
            .map(|plan| self.write_one(source.clone(), plan, sink))
            .buffer_unordered(self.max_concurrent_writes)
            .inspect_ok(|_| {
                if let Some(tracker) = progress {
                    tracker.advance(total);
                }
            })
            .try_collect()
            .await?;

        let mut report = SegmentationReport {
            dropped,
            planned: total,
            ..Default::default()
        };
        for outcome in outcomes {
            match outcome {
                WriteOutcome::Written(segment) => report.segments.push(segment),
                WriteOutcome::Rejected(failed) => report.failed_writes.push(failed),
            }
        }
        report.segments.sort_by_key(|s| s.index);
        report.failed_writes.sort_by_key(|f| f.index);

        Ok(report)
    }

    async fn write_one(
        &self,
        source: Arc<SourceAudio>,
        plan: PlannedSegment,
        sink: &dyn SegmentSink,
    ) -> Result<WriteOutcome> {
        let path = sink.segment_path(plan.index);
        let target = self.target;
        let (start_ms, end_ms) = (plan.start_ms, plan.end_ms);
        let (encoded, checksum) = tokio::task::spawn_blocking(move || -> Result<(Vec<u8>, String)> {
            let encoded = encode_wav(source.slice(start_ms, end_ms), &target)?;
            let checksum = format!("{:x}", md5::compute(&encoded));
            Ok((encoded, checksum))
        })
        .await
        .map_err(|e| DatasetError::Other(format!("segment encoding task failed: {}", e)))??;

        match sink.write_segment(&path, Bytes::from(encoded)).await {
            Ok(()) => {
                debug!("Segment {} written to {}", plan.index, path);
                Ok(WriteOutcome::Written(Segment {
                    index: plan.index,
                    start_ms: plan.start_ms,
                    end_ms: plan.end_ms,
                    path,
                    text: plan.text,
                    checksum,
                }))
            }
            Err(SinkError::Rejected(reason)) => {
                warn!("Segment {} discarded: {}", plan.index, reason);
                Ok(WriteOutcome::Rejected(FailedWrite {
                    index: plan.index,
                    path,
                    reason,
                }))
            }
            Err(SinkError::Fatal(reason)) => Err(DatasetError::SinkWrite(format!(
                "segment {} could not be written: {}",
                plan.index, reason
            ))),
        }
    }
}

/// Имя файла сегмента: `segment_00000.wav`
pub fn segment_file_name(index: usize, extension: &str) -> String {
    format!("segment_{:0width$}.{}", index, extension, width = SEGMENT_INDEX_WIDTH)
}
