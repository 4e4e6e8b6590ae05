//! Вспомогательные функции

pub mod logger;

pub use logger::init_logger;
