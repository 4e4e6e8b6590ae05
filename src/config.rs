//! Модуль конфигурации библиотеки tts-dataset-prep
//!
//! Конфигурация передается в контроллер и сегментатор явно,
//! глобального состояния библиотека не читает.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{DatasetError, Result};

/// Целевой формат сегментов
///
/// Все сегменты одного датасета кодируются в один и тот же формат WAV.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TargetFormat {
    /// Частота дискретизации в Гц
    pub sample_rate: u32,
    /// Количество каналов (1 или 2)
    pub channels: u16,
    /// Разрядность: 16 и 24 бит целые, 32 бит с плавающей точкой
    pub bits_per_sample: u16,
}

impl Default for TargetFormat {
    fn default() -> Self {
        Self {
            sample_rate: 24_000,
            channels: 1,
            bits_per_sample: 16,
        }
    }
}

impl TargetFormat {
    /// Расширение файлов сегментов
    pub fn extension(&self) -> &'static str {
        "wav"
    }

    fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(DatasetError::Configuration("sample_rate must be positive".to_string()));
        }
        if !(1..=2).contains(&self.channels) {
            return Err(DatasetError::Configuration(format!(
                "unsupported channel count: {}",
                self.channels
            )));
        }
        if !matches!(self.bits_per_sample, 16 | 24 | 32) {
            return Err(DatasetError::Configuration(format!(
                "unsupported bits_per_sample: {}",
                self.bits_per_sample
            )));
        }
        Ok(())
    }
}

/// Ограничения на загружаемое аудио
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ValidationLimits {
    /// Максимальный размер файла в мегабайтах
    pub max_audio_file_size_mb: f64,
    /// Максимальная длительность в секундах
    pub max_audio_duration_seconds: f64,
}

impl Default for ValidationLimits {
    fn default() -> Self {
        Self {
            max_audio_file_size_mb: 100.0,
            max_audio_duration_seconds: 3600.0,
        }
    }
}

/// Бэкенд хранилища объектов
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StorageBackend {
    /// Хранение в памяти процесса
    Memory,
    /// Локальная директория
    Local { root: PathBuf },
}

impl Default for StorageBackend {
    fn default() -> Self {
        Self::Memory
    }
}

/// Конфигурация хранилища
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StorageConfig {
    /// Выбранный бэкенд
    pub backend: StorageBackend,
}

/// Конфигурация конвейера
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    /// Формат сегментов
    pub target: TargetFormat,
    /// Максимальное количество одновременных записей сегментов
    pub max_concurrent_writes: usize,
    /// Ограничения на входное аудио
    pub limits: ValidationLimits,
    /// Хранилище
    pub storage: StorageConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            target: TargetFormat::default(),
            max_concurrent_writes: 4,
            limits: ValidationLimits::default(),
            storage: StorageConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Загрузить конфигурацию из JSON файла
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Собрать конфигурацию из переменных окружения поверх значений по умолчанию
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(root) = lookup("DATASET_PREP_STORAGE_ROOT") {
            config.storage.backend = StorageBackend::Local { root: PathBuf::from(root) };
        }
        if let Some(rate) = lookup("DATASET_PREP_SAMPLE_RATE") {
            config.target.sample_rate = rate.trim().parse().map_err(|_| {
                DatasetError::Configuration(format!("DATASET_PREP_SAMPLE_RATE is not a number: {}", rate))
            })?;
        }
        if let Some(writes) = lookup("DATASET_PREP_MAX_CONCURRENT_WRITES") {
            config.max_concurrent_writes = writes.trim().parse().map_err(|_| {
                DatasetError::Configuration(format!(
                    "DATASET_PREP_MAX_CONCURRENT_WRITES is not a number: {}",
                    writes
                ))
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Проверить согласованность настроек
    pub fn validate(&self) -> Result<()> {
        self.target.validate()?;
        if self.max_concurrent_writes == 0 {
            return Err(DatasetError::Configuration(
                "max_concurrent_writes must be at least 1".to_string(),
            ));
        }
        if self.limits.max_audio_file_size_mb <= 0.0 || self.limits.max_audio_duration_seconds <= 0.0 {
            return Err(DatasetError::Configuration("validation limits must be positive".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_are_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.target.sample_rate, 24_000);
        assert_eq!(config.target.channels, 1);
        assert_eq!(config.storage.backend, StorageBackend::Memory);
    }

    #[test]
    fn test_from_lookup_overrides() {
        let vars: HashMap<&str, &str> = [
            ("DATASET_PREP_STORAGE_ROOT", "/var/lib/datasets"),
            ("DATASET_PREP_SAMPLE_RATE", "22050"),
        ]
        .into_iter()
        .collect();

        let config = PipelineConfig::from_lookup(|key| vars.get(key).map(|v| v.to_string())).unwrap();
        assert_eq!(config.target.sample_rate, 22_050);
        assert_eq!(
            config.storage.backend,
            StorageBackend::Local { root: PathBuf::from("/var/lib/datasets") }
        );
        assert_eq!(config.max_concurrent_writes, 4);
    }

    #[test]
    fn test_rejects_bad_values() {
        let err = PipelineConfig::from_lookup(|key| {
            (key == "DATASET_PREP_MAX_CONCURRENT_WRITES").then(|| "0".to_string())
        })
        .unwrap_err();
        assert!(matches!(err, DatasetError::Configuration(_)));

        let mut config = PipelineConfig::default();
        config.target.channels = 6;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.json");
        std::fs::write(
            &path,
            r#"{"target": {"sample_rate": 16000}, "storage": {"backend": {"kind": "local", "root": "/tmp/ds"}}}"#,
        )
        .unwrap();

        let config = PipelineConfig::from_json_file(&path).unwrap();
        assert_eq!(config.target.sample_rate, 16_000);
        assert_eq!(config.target.bits_per_sample, 16);
        assert_eq!(config.max_concurrent_writes, 4);
        assert_eq!(config.storage.backend, StorageBackend::Local { root: PathBuf::from("/tmp/ds") });
    }
}
