//! Запись датасета и ее жизненный цикл
//!
//! `pending -> processing -> {ready, failed}`, повтор разрешен только из `failed`.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{DatasetError, Result};

/// Статус датасета
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DatasetStatus {
    Pending,
    Processing,
    Ready,
    Failed,
}

impl DatasetStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Ready => "ready",
            Self::Failed => "failed",
        }
    }

    /// Можно ли запустить обработку из этого состояния
    pub fn can_start_processing(&self) -> bool {
        matches!(self, Self::Pending | Self::Failed)
    }

    /// Завершена ли попытка обработки
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Ready | Self::Failed)
    }
}

impl fmt::Display for DatasetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Формат транскрипта
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TranscriptFormat {
    /// Субтитры SRT с временными метками
    Srt,
    /// Обычный текст без меток
    Text,
}

impl TranscriptFormat {
    /// Разобрать заявленный пользователем формат
    pub fn from_declared(declared: &str) -> Result<Self> {
        match declared.trim().to_ascii_lowercase().as_str() {
            "srt" => Ok(Self::Srt),
            "text" => Ok(Self::Text),
            other => Err(DatasetError::UnsupportedFormat(format!(
                "'{}' (expected one of: srt, text)",
                other
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Srt => "srt",
            Self::Text => "text",
        }
    }

    /// Расширение файла транскрипта в хранилище
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Srt => "srt",
            Self::Text => "txt",
        }
    }
}

impl FromStr for TranscriptFormat {
    type Err = DatasetError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_declared(s)
    }
}

impl fmt::Display for TranscriptFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Запись датасета в хранилище записей
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Dataset {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub status: DatasetStatus,
    /// Путь исходного аудио в хранилище объектов
    pub source_audio_path: String,
    /// Путь транскрипта в хранилище объектов
    pub transcript_path: String,
    pub transcript_format: TranscriptFormat,
    pub segment_count: Option<usize>,
    pub total_duration_seconds: Option<f64>,
    /// Сегменты последней успешной попытки в порядке индексов
    pub segment_paths: Vec<String>,
    pub manifest_path: Option<String>,
    pub error_message: Option<String>,
    /// Количество запущенных попыток обработки
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Итог успешной попытки, который фиксируется в записи
#[derive(Debug, Clone)]
pub struct ReadyArtifacts {
    pub segment_paths: Vec<String>,
    pub manifest_path: String,
    pub total_duration_seconds: f64,
}

impl Dataset {
    /// Создать запись в состоянии `pending`
    pub fn new(
        id: Uuid,
        owner_id: Uuid,
        name: impl Into<String>,
        source_audio_path: impl Into<String>,
        transcript_path: impl Into<String>,
        transcript_format: TranscriptFormat,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            owner_id,
            name: name.into(),
            description: None,
            status: DatasetStatus::Pending,
            source_audio_path: source_audio_path.into(),
            transcript_path: transcript_path.into(),
            transcript_format,
            segment_count: None,
            total_duration_seconds: None,
            segment_paths: Vec::new(),
            manifest_path: None,
            error_message: None,
            attempts: 0,
            created_at: now,
            updated_at: now,
        }
    }

    fn transition_error(&self, to: DatasetStatus) -> DatasetError {
        DatasetError::InvalidStateTransition { from: self.status, to }
    }

    /// Перевести в `processing`; артефакты прошлой попытки считаются замененными
    pub fn begin_processing(&mut self) -> Result<()> {
        if !self.status.can_start_processing() {
            return Err(self.transition_error(DatasetStatus::Processing));
        }
        self.status = DatasetStatus::Processing;
        self.error_message = None;
        self.segment_count = None;
        self.total_duration_seconds = None;
        self.segment_paths.clear();
        self.manifest_path = None;
        self.attempts += 1;
        self.touch();
        Ok(())
    }

    /// Зафиксировать успешную попытку
    pub fn mark_ready(&mut self, artifacts: ReadyArtifacts) -> Result<()> {
        if self.status != DatasetStatus::Processing {
            return Err(self.transition_error(DatasetStatus::Ready));
        }
        if artifacts.segment_paths.is_empty() {
            return Err(DatasetError::Other(
                "a ready dataset must reference at least one segment".to_string(),
            ));
        }
        self.status = DatasetStatus::Ready;
        self.segment_count = Some(artifacts.segment_paths.len());
        self.segment_paths = artifacts.segment_paths;
        self.manifest_path = Some(artifacts.manifest_path);
        self.total_duration_seconds = Some(artifacts.total_duration_seconds);
        self.error_message = None;
        self.touch();
        Ok(())
    }

    /// Зафиксировать неудачную попытку с причиной
    pub fn mark_failed(&mut self, cause: impl Into<String>) -> Result<()> {
        if self.status != DatasetStatus::Processing {
            return Err(self.transition_error(DatasetStatus::Failed));
        }
        let cause = cause.into();
        self.status = DatasetStatus::Failed;
        self.error_message = Some(if cause.trim().is_empty() {
            "processing failed without a reported cause".to_string()
        } else {
            cause
        });
        self.touch();
        Ok(())
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Dataset {
        Dataset::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            "voice",
            "users/u/datasets/d/source_audio.wav",
            "users/u/datasets/d/transcript.srt",
            TranscriptFormat::Srt,
        )
    }

    fn artifacts() -> ReadyArtifacts {
        ReadyArtifacts {
            segment_paths: vec!["users/u/datasets/d/segments/segment_00000.wav".to_string()],
            manifest_path: "users/u/datasets/d/training_data.jsonl".to_string(),
            total_duration_seconds: 1.5,
        }
    }

    #[test]
    fn test_declared_formats() {
        assert_eq!(TranscriptFormat::from_declared("SRT").unwrap(), TranscriptFormat::Srt);
        assert_eq!("text".parse::<TranscriptFormat>().unwrap(), TranscriptFormat::Text);
        assert!(matches!(
            TranscriptFormat::from_declared("vtt"),
            Err(DatasetError::UnsupportedFormat(_))
        ));
        assert_eq!(TranscriptFormat::Text.extension(), "txt");
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut dataset = sample();
        dataset.begin_processing().unwrap();
        assert_eq!(dataset.status, DatasetStatus::Processing);
        assert_eq!(dataset.attempts, 1);

        assert!(!dataset.status.is_terminal());

        dataset.mark_ready(artifacts()).unwrap();
        assert_eq!(dataset.status, DatasetStatus::Ready);
        assert!(dataset.status.is_terminal());
        assert_eq!(dataset.segment_count, Some(1));
        assert!(dataset.manifest_path.is_some());
    }

    #[test]
    fn test_guard_rejects_processing_and_ready() {
        let mut dataset = sample();
        dataset.begin_processing().unwrap();
        let err = dataset.begin_processing().unwrap_err();
        assert!(matches!(
            err,
            DatasetError::InvalidStateTransition {
                from: DatasetStatus::Processing,
                to: DatasetStatus::Processing
            }
        ));

        dataset.mark_ready(artifacts()).unwrap();
        assert!(dataset.begin_processing().is_err());
        assert_eq!(dataset.status, DatasetStatus::Ready);
    }

    #[test]
    fn test_retry_from_failed_clears_previous_attempt() {
        let mut dataset = sample();
        dataset.begin_processing().unwrap();
        dataset.mark_failed("UnreadableAudioError: bad").unwrap();
        assert_eq!(dataset.error_message.as_deref(), Some("UnreadableAudioError: bad"));

        dataset.begin_processing().unwrap();
        assert_eq!(dataset.status, DatasetStatus::Processing);
        assert_eq!(dataset.error_message, None);
        assert_eq!(dataset.attempts, 2);
    }

    #[test]
    fn test_ready_requires_segments_and_failed_requires_message() {
        let mut dataset = sample();
        assert!(dataset.mark_failed("x").is_err());

        dataset.begin_processing().unwrap();
        let empty = ReadyArtifacts { segment_paths: Vec::new(), ..artifacts() };
        assert!(dataset.mark_ready(empty).is_err());

        dataset.mark_failed("  ").unwrap();
        assert!(dataset.error_message.as_deref().is_some_and(|m| !m.trim().is_empty()));
    }
}
