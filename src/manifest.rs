//! Манифест обучающего датасета
//!
//! JSONL: одна запись `{"path": ..., "text": ..., "duration": ...}` на строку,
//! в порядке индексов сегментов. `ManifestWriter` пишет строки в любой
//! `Write`; конвейер собирает манифест в память и отдает хранилищу одним
//! объектом.

use std::io::{BufRead, Write};

use serde::{Deserialize, Serialize};

use crate::error::{DatasetError, Result};
use crate::media::Segment;
use crate::storage::DatasetPaths;

/// Одна строка манифеста
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Путь к сегменту относительно директории датасета
    pub path: String,
    pub text: String,
    /// Длительность сегмента в секундах
    pub duration: f64,
}

impl ManifestEntry {
    pub fn validate(&self) -> Result<()> {
        if self.path.trim().is_empty() {
            return Err(DatasetError::InvalidManifestEntry("path is empty".to_string()));
        }
        if self.text.trim().is_empty() {
            return Err(DatasetError::InvalidManifestEntry(format!("text for {} is empty", self.path)));
        }
        if !self.duration.is_finite() || self.duration <= 0.0 {
            return Err(DatasetError::InvalidManifestEntry(format!(
                "duration for {} must be positive, got {}",
                self.path, self.duration
            )));
        }
        Ok(())
    }
}

/// Потоковая запись манифеста
pub struct ManifestWriter<W: Write> {
    out: W,
    written: usize,
    last_index: Option<usize>,
}

impl<W: Write> ManifestWriter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            written: 0,
            last_index: None,
        }
    }

    /// Записать строку для сегмента с данным индексом; индексы должны возрастать
    pub fn write_entry(&mut self, index: usize, entry: &ManifestEntry) -> Result<()> {
        if let Some(last) = self.last_index {
            if index <= last {
                return Err(DatasetError::InvalidManifestEntry(format!(
                    "segment {} written after segment {}",
                    index, last
                )));
            }
        }
        entry.validate()?;

        serde_json::to_writer(&mut self.out, entry)?;
        self.out.write_all(b"\n")?;
        self.last_index = Some(index);
        self.written += 1;
        Ok(())
    }

    pub fn written(&self) -> usize {
        self.written
    }

    /// Сбросить буферы и вернуть приемник
    pub fn finish(mut self) -> Result<W> {
        self.out.flush()?;
        Ok(self.out)
    }
}

/// Запись манифеста для сегмента
pub fn entry_for(segment: &Segment, paths: &DatasetPaths) -> Result<ManifestEntry> {
    let path = paths.relative(&segment.path).ok_or_else(|| {
        DatasetError::InvalidManifestEntry(format!("segment {} lies outside the dataset directory", segment.path))
    })?;
    Ok(ManifestEntry {
        path: path.to_string(),
        text: segment.text.clone(),
        duration: segment.duration_seconds(),
    })
}

/// Собрать манифест по записанным сегментам
pub fn build_manifest(segments: &[Segment], paths: &DatasetPaths) -> Result<Vec<u8>> {
    let mut writer = ManifestWriter::new(Vec::new());
    for segment in segments {
        writer.write_entry(segment.index, &entry_for(segment, paths)?)?;
    }
    writer.finish()
}

/// Прочитать манифест, проверяя каждую строку
pub fn read_manifest<R: BufRead>(input: R) -> Result<Vec<ManifestEntry>> {
    let mut entries = Vec::new();
    for (number, line) in input.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let entry: ManifestEntry = serde_json::from_str(&line).map_err(|e| {
            DatasetError::InvalidManifestEntry(format!("line {}: {}", number + 1, e))
        })?;
        entry.validate()?;
        entries.push(entry);
    }
    Ok(entries)
}
