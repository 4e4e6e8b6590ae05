//! Модуль для реализации системы уведомлений
//!
//! Конкретные наблюдатели для системы прогресса конвейера.

use std::sync::Arc;

use log::{debug, info};
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::progress::{ProgressInfo, ProgressObserver};

/// Наблюдатель, пишущий прогресс в лог
#[derive(Debug, Default)]
pub struct LogProgressObserver {
    prefix: Option<String>,
}

impl LogProgressObserver {
    /// Создать наблюдатель с префиксом сообщений
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: Some(prefix.into()),
        }
    }
}

impl ProgressObserver for LogProgressObserver {
    fn on_progress_update(&self, progress: &ProgressInfo) {
        let prefix = self.prefix.as_deref().unwrap_or("");
        let details = progress
            .details
            .as_deref()
            .map(|d| format!(", {}", d))
            .unwrap_or_default();

        // Поштучные обновления нарезки слишком шумные для info
        if progress.details.is_some() {
            debug!(
                "{}[{}] {}: {:.1}% (total {:.1}%){}",
                prefix,
                progress.dataset_id,
                progress.step.as_str(),
                progress.step_progress,
                progress.total_progress,
                details
            );
        } else {
            info!(
                "{}[{}] {}: {:.1}% (total {:.1}%)",
                prefix,
                progress.dataset_id,
                progress.step.as_str(),
                progress.step_progress,
                progress.total_progress
            );
        }
    }
}

/// Наблюдатель, сохраняющий информацию о прогрессе в памяти
#[derive(Debug, Clone, Default)]
pub struct MemoryProgressObserver {
    history: Arc<Mutex<Vec<ProgressInfo>>>,
}

impl MemoryProgressObserver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Получить историю обновлений прогресса
    pub fn history(&self) -> Vec<ProgressInfo> {
        self.history.lock().clone()
    }

    pub fn clear_history(&self) {
        self.history.lock().clear();
    }
}

impl ProgressObserver for MemoryProgressObserver {
    fn on_progress_update(&self, progress: &ProgressInfo) {
        self.history.lock().push(progress.clone());
    }
}

/// Наблюдатель, пересылающий обновления в канал tokio
pub struct ChannelProgressObserver {
    sender: mpsc::UnboundedSender<ProgressInfo>,
}

impl ChannelProgressObserver {
    /// Создать наблюдатель и приемную сторону канала
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ProgressInfo>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl ProgressObserver for ChannelProgressObserver {
    fn on_progress_update(&self, progress: &ProgressInfo) {
        // Получатель мог уже закрыться, уведомления не критичны
        let _ = self.sender.send(progress.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::PipelineStep;
    use uuid::Uuid;

    fn info(step: PipelineStep) -> ProgressInfo {
        ProgressInfo {
            dataset_id: Uuid::nil(),
            step,
            step_progress: 0.0,
            total_progress: 0.0,
            details: None,
        }
    }

    #[test]
    fn test_log_observer_keeps_prefix() {
        let observer = LogProgressObserver::with_prefix("talk ");
        assert_eq!(observer.prefix.as_deref(), Some("talk "));
        observer.on_progress_update(&info(PipelineStep::Parsing));

        assert_eq!(LogProgressObserver::default().prefix, None);
    }

    #[test]
    fn test_memory_observer_keeps_history() {
        let observer = MemoryProgressObserver::new();
        observer.on_progress_update(&info(PipelineStep::Fetching));
        observer.on_progress_update(&info(PipelineStep::Parsing));
        assert_eq!(observer.history().len(), 2);

        observer.clear_history();
        assert!(observer.history().is_empty());
    }

    #[tokio::test]
    async fn test_channel_observer_forwards_updates() {
        let (observer, mut receiver) = ChannelProgressObserver::new();
        observer.on_progress_update(&info(PipelineStep::Segmenting));

        let received = receiver.recv().await.unwrap();
        assert_eq!(received.step, PipelineStep::Segmenting);
    }

    #[test]
    fn test_channel_observer_survives_closed_receiver() {
        let (observer, receiver) = ChannelProgressObserver::new();
        drop(receiver);
        observer.on_progress_update(&info(PipelineStep::Finalizing));
    }
}
