//! Модуль для разбора транскриптов
//!
//! Превращает байты транскрипта и заявленный формат в упорядоченный
//! список фрагментов с временными метками.

pub mod parser;

pub use parser::{parse_srt, parse_text, parse_transcript};

/// Фрагмент текста с временным интервалом в исходном аудио
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimedSpan {
    /// Начало в миллисекундах
    pub start_ms: u64,
    /// Конец в миллисекундах
    pub end_ms: u64,
    /// Текст фрагмента
    pub text: String,
}

impl TimedSpan {
    /// Создать новый экземпляр TimedSpan
    pub fn new(start_ms: u64, end_ms: u64, text: impl Into<String>) -> Self {
        Self {
            start_ms,
            end_ms,
            text: text.into(),
        }
    }

    /// Длительность в секундах
    pub fn duration_seconds(&self) -> f64 {
        self.end_ms.saturating_sub(self.start_ms) as f64 / 1000.0
    }
}

/// Отброшенный блок транскрипта
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscardedBlock {
    /// Порядковый номер блока в файле, начиная с 1
    pub block_number: usize,
    pub reason: String,
}

/// Результат разбора транскрипта
#[derive(Debug, Clone, Default)]
pub struct ParsedTranscript {
    pub spans: Vec<TimedSpan>,
    /// Некритичные отбросы, не прерывающие разбор
    pub discarded: Vec<DiscardedBlock>,
}
