//! Модуль для отслеживания прогресса выполнения операций
//!
//! Реализация паттерна Observer: контроллер сообщает о ходе каждой попытки
//! обработки, наблюдатели получают уведомления синхронно.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Этапы попытки обработки датасета
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStep {
    /// Загрузка исходников из хранилища
    Fetching,
    /// Разбор транскрипта и декодирование аудио
    Parsing,
    /// Нарезка и запись сегментов
    Segmenting,
    /// Запись манифеста
    WritingManifest,
    /// Фиксация статуса
    Finalizing,
}

impl PipelineStep {
    /// Все этапы в порядке выполнения
    pub const ALL: [PipelineStep; 5] = [
        Self::Fetching,
        Self::Parsing,
        Self::Segmenting,
        Self::WritingManifest,
        Self::Finalizing,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fetching => "fetching",
            Self::Parsing => "parsing",
            Self::Segmenting => "segmenting",
            Self::WritingManifest => "writing_manifest",
            Self::Finalizing => "finalizing",
        }
    }

    /// Весовой коэффициент этапа (в процентах от общего процесса)
    pub fn weight(&self) -> f32 {
        match self {
            Self::Fetching => 10.0,
            Self::Parsing => 20.0,
            Self::Segmenting => 55.0,
            Self::WritingManifest => 10.0,
            Self::Finalizing => 5.0,
        }
    }
}

/// Информация о прогрессе выполнения
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressInfo {
    pub dataset_id: Uuid,
    pub step: PipelineStep,
    /// Процент выполнения текущего этапа (0.0 - 100.0)
    pub step_progress: f32,
    /// Общий процент выполнения попытки (0.0 - 100.0)
    pub total_progress: f32,
    pub details: Option<String>,
}

/// Трейт для наблюдателя, получающего уведомления о прогрессе
pub trait ProgressObserver: Send + Sync {
    fn on_progress_update(&self, progress: &ProgressInfo);
}

/// Реестр наблюдателей
#[derive(Default)]
pub struct ProgressReporter {
    observers: RwLock<HashMap<usize, Box<dyn ProgressObserver>>>,
    next_id: AtomicUsize,
}

impl ProgressReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Добавить наблюдателя, возвращает его идентификатор
    pub fn add_observer(&self, observer: Box<dyn ProgressObserver>) -> usize {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.observers.write().insert(id, observer);
        id
    }

    /// Удалить наблюдателя по идентификатору
    pub fn remove_observer(&self, id: usize) -> Option<Box<dyn ProgressObserver>> {
        self.observers.write().remove(&id)
    }

    pub fn notify(&self, progress: &ProgressInfo) {
        for observer in self.observers.read().values() {
            observer.on_progress_update(progress);
        }
    }
}

struct TrackerState {
    step: PipelineStep,
    /// Сумма весов завершенных этапов
    completed_weight: f32,
    /// Счетчик завершенных единиц работы внутри этапа
    done_units: usize,
}

/// Трекер прогресса одной попытки обработки
pub struct ProgressTracker {
    dataset_id: Uuid,
    reporter: Arc<ProgressReporter>,
    state: Mutex<TrackerState>,
}

impl ProgressTracker {
    pub fn new(dataset_id: Uuid, reporter: Arc<ProgressReporter>) -> Self {
        Self {
            dataset_id,
            reporter,
            state: Mutex::new(TrackerState {
                step: PipelineStep::Fetching,
                completed_weight: 0.0,
                done_units: 0,
            }),
        }
    }

    /// Перейти к этапу; предыдущие этапы считаются завершенными
    pub fn set_step(&self, step: PipelineStep) {
        let info = {
            let mut state = self.state.lock();
            state.step = step;
            state.done_units = 0;
            state.completed_weight = PipelineStep::ALL
                .iter()
                .take_while(|s| **s != step)
                .map(|s| s.weight())
                .sum();
            self.snapshot(&state, 0.0, None)
        };
        self.reporter.notify(&info);
    }

    /// Обновить прогресс текущего этапа
    pub fn update_step_progress(&self, step_progress: f32, details: Option<String>) {
        let info = {
            let state = self.state.lock();
            self.snapshot(&state, step_progress, details)
        };
        self.reporter.notify(&info);
    }

    /// Отметить одну завершенную единицу работы из `total`
    pub fn advance(&self, total: usize) {
        let info = {
            let mut state = self.state.lock();
            state.done_units += 1;
            let step_progress = if total == 0 {
                100.0
            } else {
                state.done_units as f32 * 100.0 / total as f32
            };
            let details = format!("{}/{}", state.done_units, total);
            self.snapshot(&state, step_progress, Some(details))
        };
        self.reporter.notify(&info);
    }

    /// Попытка завершена
    pub fn complete(&self) {
        let info = ProgressInfo {
            dataset_id: self.dataset_id,
            step: PipelineStep::Finalizing,
            step_progress: 100.0,
            total_progress: 100.0,
            details: None,
        };
        self.reporter.notify(&info);
    }

    fn snapshot(&self, state: &TrackerState, step_progress: f32, details: Option<String>) -> ProgressInfo {
        let step_progress = step_progress.clamp(0.0, 100.0);
        let total = state.completed_weight + state.step.weight() * step_progress / 100.0;
        ProgressInfo {
            dataset_id: self.dataset_id,
            step: state.step,
            step_progress,
            total_progress: total.clamp(0.0, 100.0),
            details,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification::MemoryProgressObserver;

    #[test]
    fn test_weights_sum_to_hundred() {
        let total: f32 = PipelineStep::ALL.iter().map(|s| s.weight()).sum();
        assert_eq!(total, 100.0);
    }

    #[test]
    fn test_tracker_reports_cumulative_progress() {
        let reporter = Arc::new(ProgressReporter::new());
        let observer = MemoryProgressObserver::new();
        reporter.add_observer(Box::new(observer.clone()));

        let tracker = ProgressTracker::new(Uuid::nil(), reporter.clone());
        tracker.set_step(PipelineStep::Segmenting);
        tracker.advance(2);
        tracker.advance(2);
        tracker.complete();

        let history = observer.history();
        assert_eq!(history.len(), 4);
        assert_eq!(history[0].total_progress, 30.0);
        assert_eq!(history[1].step_progress, 50.0);
        assert_eq!(history[2].total_progress, 85.0);
        assert_eq!(history[2].details.as_deref(), Some("2/2"));
        assert_eq!(history[3].total_progress, 100.0);
    }

    #[test]
    fn test_removed_observer_is_silent() {
        let reporter = Arc::new(ProgressReporter::new());
        let observer = MemoryProgressObserver::new();
        let id = reporter.add_observer(Box::new(observer.clone()));
        assert!(reporter.remove_observer(id).is_some());

        ProgressTracker::new(Uuid::nil(), reporter).set_step(PipelineStep::Fetching);
        assert!(observer.history().is_empty());
    }
}
