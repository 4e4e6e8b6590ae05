//! Модуль для парсинга транскриптов
//!
//! Поддерживаются субтитры SRT и обычный текст. Битые блоки SRT не прерывают
//! разбор, а попадают в список отброшенных.

use log::{debug, warn};
use once_cell::sync::Lazy;
use regex::Regex;

use super::{DiscardedBlock, ParsedTranscript, TimedSpan};
use crate::dataset::TranscriptFormat;
use crate::error::{DatasetError, Result};

/// Строка интервала `HH:MM:SS,mmm --> HH:MM:SS,mmm`, настройки после второй метки игнорируются
static TIMING_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^\s*(\d+):(\d{1,2}):(\d{1,2})[,.](\d{1,3})\s*-->\s*(\d+):(\d{1,2}):(\d{1,2})[,.](\d{1,3})(?:\s|$)",
    )
    .expect("timing line pattern is valid")
});

/// Разобрать транскрипт заявленного формата
///
/// `source_duration_ms` вызывается только для непустого текстового транскрипта:
/// единственный фрагмент покрывает все исходное аудио.
pub fn parse_transcript<F>(raw: &[u8], format: TranscriptFormat, source_duration_ms: F) -> Result<ParsedTranscript>
where
    F: FnOnce() -> Result<u64>,
{
    let content = decode_utf8(raw)?;
    match format {
        TranscriptFormat::Srt => parse_srt(&content),
        TranscriptFormat::Text => {
            // Пустой текст отклоняется до декодирования аудио
            if content.trim().is_empty() {
                return Err(empty_text());
            }
            let duration_ms = source_duration_ms()?;
            parse_text(&content, duration_ms)
        }
    }
}

fn decode_utf8(raw: &[u8]) -> Result<String> {
    let content = std::str::from_utf8(raw).map_err(|e| DatasetError::InvalidTranscriptEncoding(e.to_string()))?;
    Ok(content.trim_start_matches('\u{feff}').to_string())
}

/// Разобрать обычный текст в один фрагмент `[0, duration_ms]`
pub fn parse_text(content: &str, duration_ms: u64) -> Result<ParsedTranscript> {
    let text = content.trim();
    if text.is_empty() {
        return Err(empty_text());
    }
    if duration_ms == 0 {
        return Err(DatasetError::UnreadableAudio("source audio contains no samples".to_string()));
    }

    Ok(ParsedTranscript {
        spans: vec![TimedSpan::new(0, duration_ms, text)],
        discarded: Vec::new(),
    })
}

fn empty_text() -> DatasetError {
    DatasetError::EmptyTranscript("plain-text transcript is empty".to_string())
}

/// Разобрать SRT
///
/// Фрагменты сортируются по началу, пересечения обрезаются по концу предыдущего фрагмента.
pub fn parse_srt(content: &str) -> Result<ParsedTranscript> {
    let normalized = content.replace("\r\n", "\n").replace('\r', "\n");

    let mut parsed: Vec<(usize, TimedSpan)> = Vec::new();
    let mut discarded = Vec::new();

    for (i, block) in split_blocks(&normalized).into_iter().enumerate() {
        let block_number = i + 1;
        match parse_block(&block) {
            Ok(span) => parsed.push((block_number, span)),
            Err(reason) => {
                warn!("Skipping SRT block {}: {}", block_number, reason);
                discarded.push(DiscardedBlock { block_number, reason });
            }
        }
    }

    // SRT обязан быть упорядочен, но на практике это не гарантируется
    parsed.sort_by_key(|(_, span)| (span.start_ms, span.end_ms));

    let mut spans: Vec<TimedSpan> = Vec::with_capacity(parsed.len());
    for (block_number, mut span) in parsed {
        if let Some(prev) = spans.last() {
            if span.start_ms < prev.end_ms {
                debug!(
                    "Clipping SRT block {} start from {}ms to {}ms",
                    block_number, span.start_ms, prev.end_ms
                );
                span.start_ms = prev.end_ms;
            }
        }
        if span.start_ms >= span.end_ms {
            let reason = "span is fully covered by the previous span".to_string();
            warn!("Skipping SRT block {}: {}", block_number, reason);
            discarded.push(DiscardedBlock { block_number, reason });
            continue;
        }
        spans.push(span);
    }

    if spans.is_empty() {
        return Err(DatasetError::EmptyTranscript(format!(
            "no valid subtitle blocks ({} discarded)",
            discarded.len()
        )));
    }

    discarded.sort_by_key(|d| d.block_number);
    Ok(ParsedTranscript { spans, discarded })
}

/// Разбить текст на блоки по пустым строкам
fn split_blocks(content: &str) -> Vec<Vec<&str>> {
    let mut blocks = Vec::new();
    let mut current = Vec::new();

    for line in content.lines() {
        if line.trim().is_empty() {
            if !current.is_empty() {
                blocks.push(std::mem::take(&mut current));
            }
        } else {
            current.push(line);
        }
    }
    if !current.is_empty() {
        blocks.push(current);
    }

    blocks
}

/// Разбор одного блока: `index / timestamp_range / text_lines`
fn parse_block(lines: &[&str]) -> std::result::Result<TimedSpan, String> {
    let timing_index = lines
        .iter()
        .take(2)
        .position(|line| line.contains("-->"))
        .ok_or_else(|| "missing timestamp line".to_string())?;

    let timing_line = lines[timing_index];
    let (start_ms, end_ms) =
        parse_timing_line(timing_line).ok_or_else(|| format!("unparsable timestamp line '{}'", timing_line.trim()))?;

    let text = lines[timing_index + 1..]
        .iter()
        .map(|line| line.trim())
        .filter(|line| !line.is_empty())
        .collect::<Vec<&str>>()
        .join(" ");

    if text.is_empty() {
        return Err("block has no text".to_string());
    }
    if start_ms >= end_ms {
        return Err(format!("end {}ms is not after start {}ms", end_ms, start_ms));
    }

    Ok(TimedSpan::new(start_ms, end_ms, text))
}

fn parse_timing_line(line: &str) -> Option<(u64, u64)> {
    let caps = TIMING_LINE.captures(line)?;
    let field = |i: usize| caps.get(i).map(|m| m.as_str());

    let start = to_millis(field(1)?, field(2)?, field(3)?, field(4)?)?;
    let end = to_millis(field(5)?, field(6)?, field(7)?, field(8)?)?;
    Some((start, end))
}

/// Перевод `HH:MM:SS,mmm` в миллисекунды
fn to_millis(hours: &str, minutes: &str, seconds: &str, fraction: &str) -> Option<u64> {
    let hours = hours.parse::<u64>().ok()?;
    let minutes = minutes.parse::<u64>().ok()?;
    let seconds = seconds.parse::<u64>().ok()?;
    if minutes >= 60 || seconds >= 60 {
        return None;
    }

    let value = fraction.parse::<u64>().ok()?;
    let millis = match fraction.len() {
        1 => value * 100,
        2 => value * 10,
        _ => value,
    };

    Some(hours * 3_600_000 + minutes * 60_000 + seconds * 1000 + millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    const THREE_BLOCKS: &str = "1\n00:00:01,000 --> 00:00:03,500\nFirst line\n\n2\n00:00:04,000 --> 00:00:06,000\nSecond\nline wraps\n\n3\n00:00:06,500 --> 00:00:09,250\nThird line\n";

    fn no_decode() -> Result<u64> {
        panic!("source audio must not be decoded")
    }

    #[test]
    fn test_to_millis() {
        assert_eq!(to_millis("01", "02", "03", "456"), Some(3_723_456));
        assert_eq!(to_millis("00", "00", "01", "5"), Some(1_500));
        assert_eq!(to_millis("00", "61", "00", "000"), None);
    }

    #[test]
    fn test_parse_timing_line_with_settings() {
        assert_eq!(
            parse_timing_line("00:01:23,456 --> 00:02:34.567 X1:40 X2:600"),
            Some((83_456, 154_567))
        );
        assert_eq!(parse_timing_line("00:01:23 --> 00:02:34"), None);
    }

    #[test]
    fn test_parse_srt_blocks() {
        let parsed = parse_transcript(THREE_BLOCKS.as_bytes(), TranscriptFormat::Srt, no_decode).unwrap();

        assert_eq!(parsed.spans.len(), 3);
        assert!(parsed.discarded.is_empty());
        assert_eq!(parsed.spans[0], TimedSpan::new(1_000, 3_500, "First line"));
        assert_eq!(parsed.spans[1].text, "Second line wraps");
        assert_eq!(parsed.spans[2].end_ms, 9_250);
    }

    #[test]
    fn test_malformed_block_is_discarded() {
        let srt = format!("{}\n4\n00:00:10,000 -> 00:00:11,000\nBroken arrow\n\n5\nNo timing here\n", THREE_BLOCKS);
        let parsed = parse_srt(&srt).unwrap();

        assert_eq!(parsed.spans.len(), 3);
        assert_eq!(parsed.discarded.len(), 2);
        assert_eq!(parsed.discarded[0].block_number, 4);
        assert_eq!(parsed.discarded[1].reason, "missing timestamp line");
    }

    #[test]
    fn test_unordered_and_overlapping_spans() {
        let srt = "2\n00:00:05,000 --> 00:00:08,000\nlater\n\n1\n00:00:01,000 --> 00:00:06,000\nearlier\n\n3\n00:00:02,000 --> 00:00:04,000\nswallowed\n";
        let parsed = parse_srt(srt).unwrap();

        assert_eq!(parsed.spans.len(), 2);
        assert_eq!(parsed.spans[0], TimedSpan::new(1_000, 6_000, "earlier"));
        assert_eq!(parsed.spans[1], TimedSpan::new(6_000, 8_000, "later"));
        assert_eq!(parsed.discarded.len(), 1);
        assert_eq!(parsed.discarded[0].block_number, 3);

        for pair in parsed.spans.windows(2) {
            assert!(pair[0].start_ms <= pair[1].start_ms);
            assert!(pair[0].end_ms <= pair[1].start_ms);
        }
    }

    /// Детерминированный генератор xorshift для наборов блоков
    struct Xorshift(u64);

    impl Xorshift {
        fn next(&mut self, bound: u64) -> u64 {
            self.0 ^= self.0 << 13;
            self.0 ^= self.0 >> 7;
            self.0 ^= self.0 << 17;
            self.0 % bound
        }
    }

    fn srt_time(ms: u64) -> String {
        format!(
            "{:02}:{:02}:{:02},{:03}",
            ms / 3_600_000,
            ms / 60_000 % 60,
            ms / 1000 % 60,
            ms % 1000
        )
    }

    #[test]
    fn test_shuffled_overlapping_sets_stay_sorted_and_disjoint() {
        for seed in 1..=64u64 {
            let mut rng = Xorshift(seed.wrapping_mul(0x9e37_79b9_7f4a_7c15));
            let count = 2 + rng.next(14) as usize;

            let mut blocks: Vec<(u64, u64)> = (0..count)
                .map(|_| {
                    let start = rng.next(20_000);
                    (start, start + 1 + rng.next(6_000))
                })
                .collect();
            for i in (1..blocks.len()).rev() {
                let j = rng.next(i as u64 + 1) as usize;
                blocks.swap(i, j);
            }

            let srt: String = blocks
                .iter()
                .enumerate()
                .map(|(i, (start, end))| format!("{}\n{} --> {}\nline {}\n\n", i + 1, srt_time(*start), srt_time(*end), i))
                .collect();
            let parsed = parse_srt(&srt).unwrap();

            assert_eq!(parsed.spans.len() + parsed.discarded.len(), count, "seed {}", seed);
            for span in &parsed.spans {
                assert!(span.start_ms < span.end_ms, "seed {}: empty span {:?}", seed, span);
                assert!(blocks.iter().any(|(_, end)| *end == span.end_ms), "seed {}", seed);
            }
            for pair in parsed.spans.windows(2) {
                assert!(pair[0].start_ms <= pair[1].start_ms, "seed {}: {:?}", seed, pair);
                assert!(pair[0].end_ms <= pair[1].start_ms, "seed {}: {:?}", seed, pair);
            }
            assert!(parsed.discarded.windows(2).all(|d| d[0].block_number < d[1].block_number));
        }
    }

    #[test]
    fn test_crlf_and_bom() {
        let srt = "\u{feff}1\r\n00:00:00,000 --> 00:00:01,000\r\nHello\r\n\r\n";
        let parsed = parse_transcript(srt.as_bytes(), TranscriptFormat::Srt, no_decode).unwrap();
        assert_eq!(parsed.spans, vec![TimedSpan::new(0, 1_000, "Hello")]);
    }

    #[test]
    fn test_all_blocks_malformed() {
        let srt = "1\n00:00:xx,000 --> 00:00:01,000\nA\n\n2\nB\n\n3\n00:00:03,000 --> 00:00:02,000\nC\n";
        let err = parse_srt(srt).unwrap_err();
        assert!(matches!(err, DatasetError::EmptyTranscript(_)));
    }

    #[test]
    fn test_plain_text_single_span() {
        let parsed = parse_transcript(b"  Hello world.\nSecond sentence.  ", TranscriptFormat::Text, || Ok(12_500)).unwrap();
        assert_eq!(
            parsed.spans,
            vec![TimedSpan::new(0, 12_500, "Hello world.\nSecond sentence.")]
        );
        assert_eq!(parsed.spans[0].duration_seconds(), 12.5);
    }

    #[test]
    fn test_plain_text_empty_or_invalid() {
        let err = parse_transcript(b" \n ", TranscriptFormat::Text, || Ok(1_000)).unwrap_err();
        assert!(matches!(err, DatasetError::EmptyTranscript(_)));

        let err = parse_transcript(&[0xff, 0xfe, 0x00], TranscriptFormat::Text, || Ok(1_000)).unwrap_err();
        assert!(matches!(err, DatasetError::InvalidTranscriptEncoding(_)));
    }

    #[test]
    fn test_empty_text_rejected_before_decoding() {
        let err = parse_transcript(b"", TranscriptFormat::Text, no_decode).unwrap_err();
        assert!(matches!(err, DatasetError::EmptyTranscript(_)));

        let err = parse_transcript("\u{feff} \r\n\t".as_bytes(), TranscriptFormat::Text, no_decode).unwrap_err();
        assert!(matches!(err, DatasetError::EmptyTranscript(_)));
    }

    #[test]
    fn test_duration_error_propagates() {
        let err = parse_transcript(b"text", TranscriptFormat::Text, || {
            Err(DatasetError::UnreadableAudio("corrupt".to_string()))
        })
        .unwrap_err();
        assert!(matches!(err, DatasetError::UnreadableAudio(_)));
    }
}
