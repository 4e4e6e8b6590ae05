//! Модуль для работы с аудио
//!
//! `audio` отвечает за декодирование, ресемплинг и кодирование,
//! `segmenter` нарезает исходное аудио на сегменты по фрагментам транскрипта.

pub mod audio;
pub mod segmenter;

pub use audio::{decode_audio, encode_wav, resample_mono, validate_source, DecodedAudio};
pub use segmenter::{
    DroppedSpan, FailedWrite, PlannedSegment, Segment, SegmentSink, SegmentationReport, Segmenter, SinkError,
    SourceAudio,
};
