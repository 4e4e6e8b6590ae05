//! # Audio Format Handling
//!
//! Декодирование исходного аудио в моно PCM, ресемплинг и кодирование сегментов в WAV.
//!
//! - WAV читается через hound, остальные контейнеры (MP3, AAC, FLAC и т.д.) через Symphonia
//! - Многоканальное аудио сводится в моно
//! - Ресемплинг выполняется FFT-ресемплером Rubato

use std::io::Cursor;

use dasp::sample::I24;
use dasp::Sample;
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use log::{debug, info, warn};
use rubato::{FftFixedIn, Resampler};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::config::{TargetFormat, ValidationLimits};
use crate::error::{DatasetError, Result};

/// Верхняя граница семпла, при которой 24-битное значение не выходит за диапазон
const FULL_SCALE_MAX: f32 = 1.0 - f32::EPSILON;

/// Декодированное аудио: моно семплы в исходной частоте дискретизации
#[derive(Debug, Clone)]
pub struct DecodedAudio {
    /// PCM семплы f32 в диапазоне [-1.0, 1.0]
    pub samples: Vec<f32>,
    /// Частота дискретизации исходника
    pub sample_rate: u32,
    /// Количество каналов исходника до сведения в моно
    pub source_channels: u16,
}

impl DecodedAudio {
    /// Длительность в миллисекундах (с округлением вниз)
    pub fn duration_ms(&self) -> u64 {
        self.samples.len() as u64 * 1000 / self.sample_rate as u64
    }

    pub fn duration_seconds(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// Декодировать аудио из памяти
///
/// `extension_hint` помогает Symphonia выбрать демультиплексор, WAV распознается по заголовку.
pub fn decode_audio(data: &[u8], extension_hint: Option<&str>) -> Result<DecodedAudio> {
    let decoded = if is_riff_wave(data) {
        decode_wav(data)?
    } else {
        decode_with_symphonia(data, extension_hint)?
    };

    if decoded.samples.is_empty() {
        return Err(DatasetError::UnreadableAudio("no audio samples decoded".to_string()));
    }

    info!(
        "Decoded {} samples at {} Hz ({} source channels, {:.3}s)",
        decoded.samples.len(),
        decoded.sample_rate,
        decoded.source_channels,
        decoded.duration_seconds()
    );
    Ok(decoded)
}

fn is_riff_wave(data: &[u8]) -> bool {
    data.len() >= 12 && &data[0..4] == b"RIFF" && &data[8..12] == b"WAVE"
}

/// Декодирует WAV через hound
fn decode_wav(data: &[u8]) -> Result<DecodedAudio> {
    let reader = WavReader::new(Cursor::new(data))
        .map_err(|e| DatasetError::UnreadableAudio(format!("invalid WAV header: {}", e)))?;

    let spec = reader.spec();
    if spec.channels == 0 || spec.sample_rate == 0 {
        return Err(DatasetError::UnreadableAudio(format!(
            "invalid WAV spec: {} channels at {} Hz",
            spec.channels, spec.sample_rate
        )));
    }

    let interleaved: Vec<f32> = match spec.sample_format {
        SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<std::result::Result<Vec<f32>, hound::Error>>()
            .map_err(|e| DatasetError::UnreadableAudio(format!("corrupt WAV data: {}", e)))?,
        SampleFormat::Int => {
            let scale = (1_i64 << (spec.bits_per_sample.clamp(1, 32) - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<std::result::Result<Vec<f32>, hound::Error>>()
                .map_err(|e| DatasetError::UnreadableAudio(format!("corrupt WAV data: {}", e)))?
        }
    };

    Ok(DecodedAudio {
        samples: downmix(&interleaved, spec.channels as usize),
        sample_rate: spec.sample_rate,
        source_channels: spec.channels,
    })
}

/// Декодирует прочие форматы через Symphonia
fn decode_with_symphonia(data: &[u8], extension_hint: Option<&str>) -> Result<DecodedAudio> {
    let mss = MediaSourceStream::new(Box::new(Cursor::new(data.to_vec())), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = extension_hint {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| DatasetError::UnreadableAudio(format!("unrecognised audio container: {}", e)))?;

    let mut format = probed.format;
    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| DatasetError::UnreadableAudio("no audio track found".to_string()))?;

    let track_id = track.id;
    let codec_params = track.codec_params.clone();
    let sample_rate = codec_params
        .sample_rate
        .ok_or_else(|| DatasetError::UnreadableAudio("audio track has no sample rate".to_string()))?;

    let mut decoder = symphonia::default::get_codecs()
        .make(&codec_params, &DecoderOptions::default())
        .map_err(|e| DatasetError::UnreadableAudio(format!("unsupported codec: {}", e)))?;

    let mut samples = Vec::new();
    let mut source_channels = codec_params.channels.map(|c| c.count() as u16).unwrap_or(1);

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(DatasetError::UnreadableAudio(format!("failed to read packet: {}", e))),
        };

        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                let spec = *decoded.spec();
                let channels = spec.channels.count();
                source_channels = channels as u16;

                let mut buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
                buffer.copy_interleaved_ref(decoded);
                samples.extend(downmix(buffer.samples(), channels));
            }
            Err(SymphoniaError::DecodeError(msg)) => {
                // Битый пакет пропускаем, остальной поток остается пригодным
                warn!("Skipping undecodable packet: {}", msg);
            }
            Err(e) => return Err(DatasetError::UnreadableAudio(format!("decoder failure: {}", e))),
        }
    }

    Ok(DecodedAudio {
        samples,
        sample_rate,
        source_channels,
    })
}

/// Сведение чередующихся каналов в моно
fn downmix(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Ресемплинг моно сигнала
///
/// Длина результата равна `round(len * to_rate / from_rate)`, задержка фильтра компенсируется.
pub fn resample_mono(input: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
    if from_rate == to_rate || input.is_empty() {
        return Ok(input.to_vec());
    }

    const CHUNK: usize = 1024;
    const SUB_CHUNKS: usize = 2;

    let mut resampler = FftFixedIn::<f32>::new(from_rate as usize, to_rate as usize, CHUNK, SUB_CHUNKS, 1)
        .map_err(|e| DatasetError::Other(format!("failed to build resampler: {}", e)))?;

    let expected = ((input.len() as u64 * to_rate as u64 + from_rate as u64 / 2) / from_rate as u64) as usize;
    let delay = resampler.output_delay();

    let mut output = Vec::with_capacity(expected + delay + CHUNK);
    let mut chunk = Vec::with_capacity(CHUNK);
    let mut pos = 0;

    // Хвост дополняется тишиной, пока не выйдут все задержанные семплы
    while output.len() < expected + delay {
        let needed = resampler.input_frames_next();
        chunk.clear();
        chunk.resize(needed, 0.0);
        if pos < input.len() {
            let end = (pos + needed).min(input.len());
            chunk[..end - pos].copy_from_slice(&input[pos..end]);
            pos = end;
        }

        let frames = resampler
            .process(std::slice::from_ref(&chunk), None)
            .map_err(|e| DatasetError::Other(format!("resampling failed: {}", e)))?;
        output.extend_from_slice(&frames[0]);
    }

    output.drain(..delay);
    output.truncate(expected);

    debug!("Resampled {} -> {} samples ({} Hz -> {} Hz)", input.len(), output.len(), from_rate, to_rate);
    Ok(output)
}

/// Кодирует моно PCM семплы в WAV заданного формата
///
/// При двух каналах моно сигнал дублируется в оба канала.
pub fn encode_wav(samples: &[f32], format: &TargetFormat) -> Result<Vec<u8>> {
    let spec = WavSpec {
        channels: format.channels,
        sample_rate: format.sample_rate,
        bits_per_sample: format.bits_per_sample,
        sample_format: if format.bits_per_sample == 32 {
            SampleFormat::Float
        } else {
            SampleFormat::Int
        },
    };

    let bytes_per_frame = format.channels as usize * format.bits_per_sample as usize / 8;
    let mut cursor = Cursor::new(Vec::with_capacity(44 + samples.len() * bytes_per_frame));
    {
        let mut writer = WavWriter::new(&mut cursor, spec)?;
        for &sample in samples {
            let sample = sample.clamp(-1.0, FULL_SCALE_MAX);
            for _ in 0..format.channels {
                match format.bits_per_sample {
                    16 => writer.write_sample(sample.to_sample::<i16>())?,
                    24 => writer.write_sample(sample.to_sample::<I24>().inner())?,
                    _ => writer.write_sample(sample)?,
                }
            }
        }
        writer.finalize()?;
    }

    Ok(cursor.into_inner())
}

/// Проверка загружаемого аудио: размер, читаемость и длительность
pub fn validate_source(data: &[u8], extension_hint: Option<&str>, limits: &ValidationLimits) -> Result<DecodedAudio> {
    let size_mb = data.len() as f64 / (1024.0 * 1024.0);
    if size_mb > limits.max_audio_file_size_mb {
        return Err(DatasetError::AudioValidation(format!(
            "File size ({:.1}MB) exceeds maximum ({}MB)",
            size_mb, limits.max_audio_file_size_mb
        )));
    }

    let decoded = decode_audio(data, extension_hint)?;
    let duration = decoded.duration_seconds();
    if duration > limits.max_audio_duration_seconds {
        return Err(DatasetError::AudioValidation(format!(
            "Duration ({:.0}s) exceeds maximum ({}s)",
            duration, limits.max_audio_duration_seconds
        )));
    }

    Ok(decoded)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// WAV с синусоидой 440 Гц, 16 бит
    pub(crate) fn sine_wav(sample_rate: u32, channels: u16, seconds: f32) -> Vec<u8> {
        let spec = WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let frames = (sample_rate as f32 * seconds) as usize;
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = WavWriter::new(&mut cursor, spec).unwrap();
            for i in 0..frames {
                let t = i as f32 / sample_rate as f32;
                let value = ((t * 440.0 * 2.0 * std::f32::consts::PI).sin() * 0.5 * i16::MAX as f32) as i16;
                for _ in 0..channels {
                    writer.write_sample(value).unwrap();
                }
            }
            writer.finalize().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn test_decode_wav_duration() {
        let wav = sine_wav(16_000, 1, 12.5);
        let decoded = decode_audio(&wav, Some("wav")).unwrap();
        assert_eq!(decoded.sample_rate, 16_000);
        assert_eq!(decoded.samples.len(), 200_000);
        assert_eq!(decoded.duration_ms(), 12_500);
    }

    #[test]
    fn test_stereo_is_downmixed() {
        let wav = sine_wav(8_000, 2, 0.5);
        let decoded = decode_audio(&wav, None).unwrap();
        assert_eq!(decoded.source_channels, 2);
        assert_eq!(decoded.samples.len(), 4_000);
    }

    #[test]
    fn test_garbage_is_unreadable() {
        let garbage = vec![0x13_u8; 4096];
        let err = decode_audio(&garbage, Some("mp3")).unwrap_err();
        assert!(matches!(err, DatasetError::UnreadableAudio(_)));

        let mut truncated = sine_wav(8_000, 1, 0.1);
        truncated.truncate(20);
        let err = decode_audio(&truncated, Some("wav")).unwrap_err();
        assert!(matches!(err, DatasetError::UnreadableAudio(_)));
    }

    #[test]
    fn test_resample_length() {
        let input = vec![0.25_f32; 16_000];
        let output = resample_mono(&input, 16_000, 24_000).unwrap();
        assert_eq!(output.len(), 24_000);

        let same = resample_mono(&input, 16_000, 16_000).unwrap();
        assert_eq!(same, input);
    }

    #[test]
    fn test_encode_wav_roundtrip_spec() {
        let format = TargetFormat {
            sample_rate: 22_050,
            channels: 2,
            bits_per_sample: 24,
        };
        let samples = vec![0.5_f32; 2_205];
        let bytes = encode_wav(&samples, &format).unwrap();

        let reader = WavReader::new(Cursor::new(&bytes)).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.sample_rate, 22_050);
        assert_eq!(spec.channels, 2);
        assert_eq!(spec.bits_per_sample, 24);
        assert_eq!(reader.duration(), 2_205);
    }

    #[test]
    fn test_validate_source_limits() {
        let wav = sine_wav(8_000, 1, 2.0);
        let limits = ValidationLimits {
            max_audio_file_size_mb: 100.0,
            max_audio_duration_seconds: 1.0,
        };
        let err = validate_source(&wav, Some("wav"), &limits).unwrap_err();
        assert!(matches!(err, DatasetError::AudioValidation(_)));

        let tiny = ValidationLimits {
            max_audio_file_size_mb: 0.001,
            max_audio_duration_seconds: 10.0,
        };
        let err = validate_source(&wav, Some("wav"), &tiny).unwrap_err();
        assert!(err.to_string().contains("exceeds maximum"));

        assert!(validate_source(&wav, Some("wav"), &ValidationLimits::default()).is_ok());
    }
}
