//! Ordered, lossless joining of per-chunk audio
//!
//! WAV is joined sample by sample with `hound`. MP3 streams are joined at the
//! frame level, dropping the ID3v2 tag of every chunk after the first. Any
//! other container goes through the transcoder's concat operation.

use std::io::Cursor;

use tracing::debug;

use crate::error::SpeechError;
use crate::ports::Transcoder;
use crate::types::{AudioData, AudioFormat};

/// Join chunk audio in order into one stream of the same format
///
/// # Errors
///
/// Returns `SpeechError::AudioProcessing` if the parts disagree on format or
/// cannot be parsed, and `SpeechError::TranscodeUnavailable` if the format
/// needs a transcoder that is not installed.
pub async fn join_chunks(
    mut parts: Vec<AudioData>,
    transcoder: &dyn Transcoder,
) -> Result<AudioData, SpeechError> {
    let Some(format) = parts.first().map(AudioData::format) else {
        return Err(SpeechError::AudioProcessing(
            "No audio chunks to join".to_string(),
        ));
    };

    if let Some(other) = parts.iter().find(|p| p.format() != format) {
        return Err(SpeechError::AudioProcessing(format!(
            "Cannot join {format} chunk with {} chunk",
            other.format()
        )));
    }

    if parts.len() == 1 {
        return Ok(parts.remove(0));
    }

    debug!(chunks = parts.len(), format = %format, "Joining chunk audio");

    match format {
        AudioFormat::Wav => join_wav(&parts),
        AudioFormat::Mp3 => Ok(join_mp3(&parts)),
        _ => join_with_transcoder(&parts, format, transcoder).await,
    }
}

/// Append the samples of every WAV part to the first part's stream
fn join_wav(parts: &[AudioData]) -> Result<AudioData, SpeechError> {
    let mut readers = Vec::with_capacity(parts.len());
    for (index, part) in parts.iter().enumerate() {
        let reader = hound::WavReader::new(Cursor::new(part.data())).map_err(|e| {
            SpeechError::AudioProcessing(format!("Failed to parse WAV chunk {index}: {e}"))
        })?;
        readers.push(reader);
    }

    let Some(spec) = readers.first().map(hound::WavReader::spec) else {
        return Err(SpeechError::AudioProcessing(
            "No WAV chunks to join".to_string(),
        ));
    };
    if let Some(index) = readers.iter().position(|r| r.spec() != spec) {
        return Err(SpeechError::AudioProcessing(format!(
            "WAV chunk {index} has a different sample format"
        )));
    }

    let mut out = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut out, spec).map_err(|e| {
            SpeechError::AudioProcessing(format!("Failed to start WAV output: {e}"))
        })?;

        for (index, reader) in readers.iter_mut().enumerate() {
            let copied = match spec.sample_format {
                hound::SampleFormat::Float => reader
                    .samples::<f32>()
                    .try_for_each(|s| writer.write_sample(s?)),
                hound::SampleFormat::Int => reader
                    .samples::<i32>()
                    .try_for_each(|s| writer.write_sample(s?)),
            };
            copied.map_err(|e| {
                SpeechError::AudioProcessing(format!("Failed to copy WAV chunk {index}: {e}"))
            })?;
        }

        writer.finalize().map_err(|e| {
            SpeechError::AudioProcessing(format!("Failed to finish WAV output: {e}"))
        })?;
    }

    Ok(AudioData::new(out.into_inner(), AudioFormat::Wav))
}

/// Concatenate MP3 frame streams
fn join_mp3(parts: &[AudioData]) -> AudioData {
    let total = parts.iter().map(AudioData::size_bytes).sum();
    let mut out = Vec::with_capacity(total);

    for (index, part) in parts.iter().enumerate() {
        let data = part.data();
        if index == 0 {
            out.extend_from_slice(data);
        } else {
            out.extend_from_slice(&data[id3v2_len(data).min(data.len())..]);
        }
    }

    AudioData::new(out, AudioFormat::Mp3)
}

/// Length of a leading ID3v2 tag, header and optional footer included
fn id3v2_len(data: &[u8]) -> usize {
    if data.len() < 10 || &data[..3] != b"ID3" {
        return 0;
    }
    // Tag size is a 28-bit synchsafe integer
    let size = data[6..10]
        .iter()
        .fold(0usize, |acc, b| (acc << 7) | usize::from(b & 0x7f));
    let footer = if data[5] & 0x10 == 0 { 0 } else { 10 };
    10 + size + footer
}

async fn join_with_transcoder(
    parts: &[AudioData],
    format: AudioFormat,
    transcoder: &dyn Transcoder,
) -> Result<AudioData, SpeechError> {
    if !transcoder.is_available().await {
        return Err(SpeechError::TranscodeUnavailable(format!(
            "Joining {} {format} chunks requires a transcoder",
            parts.len()
        )));
    }

    let dir = tempfile::tempdir()
        .map_err(|e| SpeechError::AudioProcessing(format!("Failed to create temp dir: {e}")))?;

    let mut inputs = Vec::with_capacity(parts.len());
    for (index, part) in parts.iter().enumerate() {
        let path = dir.path().join(format!("chunk_{index:04}.{}", format.extension()));
        tokio::fs::write(&path, part.data()).await?;
        inputs.push(path);
    }

    let output = dir.path().join(format!("joined.{}", format.extension()));
    transcoder.concat(&inputs, &output).await?;

    let data = tokio::fs::read(&output).await?;
    Ok(AudioData::new(data, format))
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};

    use async_trait::async_trait;

    use super::*;

    #[derive(Debug)]
    struct NoTranscoder;

    #[async_trait]
    impl Transcoder for NoTranscoder {
        async fn is_available(&self) -> bool {
            false
        }

        async fn transcode(&self, _: &Path, _: &Path, _: AudioFormat) -> Result<(), SpeechError> {
            Err(SpeechError::TranscodeUnavailable("none".to_string()))
        }

        async fn concat(&self, _: &[PathBuf], _: &Path) -> Result<(), SpeechError> {
            Err(SpeechError::TranscodeUnavailable("none".to_string()))
        }
    }

    fn wav(samples: &[i16]) -> AudioData {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 16000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for s in samples {
                writer.write_sample(*s).unwrap();
            }
            writer.finalize().unwrap();
        }
        AudioData::new(cursor.into_inner(), AudioFormat::Wav)
    }

    #[tokio::test]
    async fn joins_wav_samples_in_order() {
        let joined = join_chunks(vec![wav(&[1, 2]), wav(&[3]), wav(&[4, 5])], &NoTranscoder)
            .await
            .unwrap();

        let mut reader = hound::WavReader::new(Cursor::new(joined.data())).unwrap();
        let samples: Vec<i16> = reader.samples::<i16>().map(Result::unwrap).collect();
        assert_eq!(samples, vec![1, 2, 3, 4, 5]);
        assert_eq!(reader.spec().sample_rate, 16000);
    }

    #[tokio::test]
    async fn wav_parts_with_different_rates_are_rejected() {
        let other = hound::WavSpec {
            channels: 1,
            sample_rate: 22050,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, other).unwrap();
            writer.write_sample(7i16).unwrap();
            writer.finalize().unwrap();
        }

        let parts = vec![wav(&[1]), AudioData::new(cursor.into_inner(), AudioFormat::Wav)];
        let err = join_chunks(parts, &NoTranscoder).await.unwrap_err();
        assert!(matches!(err, SpeechError::AudioProcessing(_)));
    }

    #[tokio::test]
    async fn joins_mp3_dropping_later_id3_tags() {
        let mut tagged = b"ID3\x04\x00\x00\x00\x00\x00\x02TT".to_vec();
        tagged.extend_from_slice(&[0xff, 0xfb, 0x02]);
        let first = AudioData::new(vec![0xff, 0xfb, 0x01], AudioFormat::Mp3);
        let second = AudioData::new(tagged, AudioFormat::Mp3);

        let joined = join_chunks(vec![first, second], &NoTranscoder).await.unwrap();
        assert_eq!(joined.data(), &[0xff, 0xfb, 0x01, 0xff, 0xfb, 0x02]);
    }

    #[tokio::test]
    async fn single_part_is_returned_unchanged() {
        let part = AudioData::new(vec![1, 2, 3], AudioFormat::Ogg);
        let joined = join_chunks(vec![part.clone()], &NoTranscoder).await.unwrap();
        assert_eq!(joined, part);
    }

    #[tokio::test]
    async fn other_formats_need_a_transcoder() {
        let parts = vec![
            AudioData::new(vec![1], AudioFormat::M4a),
            AudioData::new(vec![2], AudioFormat::M4a),
        ];
        let err = join_chunks(parts, &NoTranscoder).await.unwrap_err();
        assert!(matches!(err, SpeechError::TranscodeUnavailable(_)));
    }

    #[tokio::test]
    async fn mixed_formats_are_rejected() {
        let parts = vec![
            AudioData::new(vec![1], AudioFormat::Mp3),
            AudioData::new(vec![2], AudioFormat::Wav),
        ];
        assert!(join_chunks(parts, &NoTranscoder).await.is_err());
    }

    #[test]
    fn id3_length_includes_header() {
        assert_eq!(id3v2_len(b"ID3\x04\x00\x00\x00\x00\x01\x00"), 10 + 128);
        assert_eq!(id3v2_len(&[0xff, 0xfb]), 0);
    }
}
