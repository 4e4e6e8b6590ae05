//! Модуль обработки ошибок библиотеки tts-dataset-prep
//!
//! Этот модуль содержит типы ошибок, которые могут возникнуть при подготовке датасета.
//! Только контроллер конвейера превращает ошибку в статус `failed` у записи датасета.

use thiserror::Error;
use uuid::Uuid;

use crate::dataset::DatasetStatus;
use crate::storage::StorageError;

/// Ошибки библиотеки tts-dataset-prep
#[derive(Debug, Error)]
pub enum DatasetError {
    /// В транскрипте не осталось ни одного валидного фрагмента
    #[error("Empty transcript: {0}")]
    EmptyTranscript(String),

    /// Заявленный формат транскрипта не поддерживается
    #[error("Unsupported transcript format: {0}")]
    UnsupportedFormat(String),

    /// Исходное аудио не удалось декодировать
    #[error("Unreadable audio: {0}")]
    UnreadableAudio(String),

    /// Хранилище сегментов отказало целиком
    #[error("Segment sink write failed: {0}")]
    SinkWrite(String),

    /// Недопустимый переход состояния датасета
    #[error("Invalid state transition: dataset is {from}, cannot move to {to}")]
    InvalidStateTransition {
        from: DatasetStatus,
        to: DatasetStatus,
    },

    /// Датасет обрабатывается, операция над его данными невозможна
    #[error("Dataset {0} is being processed")]
    Busy(Uuid),

    /// Хранилище недоступно
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Датасет не найден
    #[error("Dataset not found: {0}")]
    NotFound(Uuid),

    /// Транскрипт не является корректным UTF-8
    #[error("Transcript is not valid UTF-8: {0}")]
    InvalidTranscriptEncoding(String),

    /// Аудио не прошло проверку при загрузке
    #[error("Audio validation failed: {0}")]
    AudioValidation(String),

    /// Запись манифеста не соответствует схеме
    #[error("Invalid manifest entry: {0}")]
    InvalidManifestEntry(String),

    /// Ошибка конфигурации
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Ошибка ввода-вывода
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Ошибка сериализации/десериализации JSON
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Ошибка WAV-кодирования
    #[error("WAV encoding error: {0}")]
    WavEncoding(#[from] hound::Error),

    /// Другая ошибка
    #[error("Other error: {0}")]
    Other(String),
}

impl DatasetError {
    /// Короткое имя класса ошибки, попадает в сообщение записи датасета
    pub fn kind(&self) -> &'static str {
        match self {
            Self::EmptyTranscript(_) => "EmptyTranscriptError",
            Self::UnsupportedFormat(_) => "UnsupportedFormatError",
            Self::UnreadableAudio(_) => "UnreadableAudioError",
            Self::SinkWrite(_) => "SinkWriteError",
            Self::InvalidStateTransition { .. } => "InvalidStateTransitionError",
            Self::Busy(_) => "DatasetBusyError",
            Self::StorageUnavailable(_) => "StorageUnavailableError",
            Self::NotFound(_) => "NotFoundError",
            Self::InvalidTranscriptEncoding(_) => "InvalidTranscriptEncodingError",
            Self::AudioValidation(_) => "AudioValidationError",
            Self::InvalidManifestEntry(_) => "InvalidManifestEntryError",
            Self::Configuration(_) => "ConfigurationError",
            Self::Io(_) => "IoError",
            Self::Json(_) => "JsonError",
            Self::WavEncoding(_) => "WavEncodingError",
            Self::Other(_) => "InternalError",
        }
    }

    /// Человекочитаемая причина для поля `error_message`
    pub fn to_cause(&self) -> String {
        format!("{}: {}", self.kind(), self)
    }
}

impl From<StorageError> for DatasetError {
    fn from(err: StorageError) -> Self {
        DatasetError::StorageUnavailable(err.to_string())
    }
}

impl From<&str> for DatasetError {
    fn from(s: &str) -> Self {
        DatasetError::Other(s.to_string())
    }
}

impl From<String> for DatasetError {
    fn from(s: String) -> Self {
        DatasetError::Other(s)
    }
}

/// Тип Result для библиотеки tts-dataset-prep
pub type Result<T> = std::result::Result<T, DatasetError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cause_carries_kind() {
        let err = DatasetError::UnreadableAudio("bad header".to_string());
        assert_eq!(err.to_cause(), "UnreadableAudioError: Unreadable audio: bad header");
    }

    #[test]
    fn test_storage_error_maps_to_unavailable() {
        let err: DatasetError = StorageError::Unavailable("bucket offline".to_string()).into();
        assert_eq!(err.kind(), "StorageUnavailableError");
    }
}
