//! Audio preparation for the recognizers.
//!
//! Browser recordings arrive as WAV, WebM or Ogg. WAV is decoded in-process
//! with `hound`; anything else is converted by an external `ffmpeg`. Either
//! way the result is mono PCM at the recognizer sample rate.

use std::ffi::OsStr;
use std::io::Cursor;
use std::path::PathBuf;

use parley_core::error::{ParleyError, Result};

use crate::command;

/// Container format sniffed from the first bytes of a recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioContainer {
    Wav,
    Ogg,
    WebM,
    Unknown,
}

impl AudioContainer {
    pub fn sniff(bytes: &[u8]) -> Self {
        if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WAVE" {
            AudioContainer::Wav
        } else if bytes.starts_with(b"OggS") {
            AudioContainer::Ogg
        } else if bytes.starts_with(&[0x1A, 0x45, 0xDF, 0xA3]) {
            AudioContainer::WebM
        } else {
            AudioContainer::Unknown
        }
    }

    /// File suffix handed to ffmpeg so it can pick a demuxer.
    fn suffix(self) -> &'static str {
        match self {
            AudioContainer::Wav => ".wav",
            AudioContainer::Ogg => ".ogg",
            AudioContainer::WebM => ".webm",
            AudioContainer::Unknown => ".audio",
        }
    }
}

/// Converts arbitrary recordings to mono PCM at a fixed sample rate.
#[derive(Debug, Clone)]
pub struct AudioConverter {
    ffmpeg_path: String,
    sample_rate: u32,
}

impl AudioConverter {
    pub fn new(ffmpeg_path: impl Into<String>, sample_rate: u32) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
            sample_rate,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Decode `bytes` into mono f32 samples at [`sample_rate`](Self::sample_rate).
    pub async fn to_mono(&self, bytes: &[u8]) -> Result<Vec<f32>> {
        if bytes.is_empty() {
            return Err(ParleyError::Audio("Empty audio payload".to_string()));
        }

        let container = AudioContainer::sniff(bytes);
        if container == AudioContainer::Wav {
            match decode_wav(bytes) {
                Ok((samples, rate)) => return Ok(resample(&samples, rate, self.sample_rate)),
                Err(e) => {
                    tracing::debug!(error = %e, "In-process WAV decode failed, trying ffmpeg");
                }
            }
        }
        self.convert_with_ffmpeg(bytes, container).await
    }

    /// Run ffmpeg over temp files; both are removed when this returns.
    async fn convert_with_ffmpeg(&self, bytes: &[u8], container: AudioContainer) -> Result<Vec<f32>> {
        let input = tempfile::Builder::new()
            .prefix("parley-in-")
            .suffix(container.suffix())
            .tempfile()?;
        let output = tempfile::Builder::new()
            .prefix("parley-out-")
            .suffix(".wav")
            .tempfile()?;
        tokio::fs::write(input.path(), bytes).await?;

        let in_path: PathBuf = input.path().to_path_buf();
        let out_path: PathBuf = output.path().to_path_buf();
        let rate = self.sample_rate.to_string();
        let args: [&OsStr; 12] = [
            OsStr::new("-y"),
            OsStr::new("-loglevel"),
            OsStr::new("error"),
            OsStr::new("-i"),
            in_path.as_os_str(),
            OsStr::new("-ac"),
            OsStr::new("1"),
            OsStr::new("-ar"),
            OsStr::new(&rate),
            OsStr::new("-f"),
            OsStr::new("wav"),
            out_path.as_os_str(),
        ];
        command::run(&self.ffmpeg_path, args, ParleyError::Audio).await?;

        let converted = tokio::fs::read(&out_path).await?;
        let (samples, rate) = decode_wav(&converted)?;
        tracing::debug!(
            container = ?container,
            samples = samples.len(),
            "Audio converted with ffmpeg"
        );
        Ok(resample(&samples, rate, self.sample_rate))
    }
}

/// Decode a WAV byte buffer into mono f32 samples and its sample rate.
pub fn decode_wav(bytes: &[u8]) -> Result<(Vec<f32>, u32)> {
    let mut reader = hound::WavReader::new(Cursor::new(bytes))
        .map_err(|e| ParleyError::Audio(format!("Cannot read WAV: {e}")))?;
    let spec = reader.spec();

    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Int => {
            let max = (1i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
            reader
                .samples::<i32>()
                .map(|s| {
                    s.map(|v| v as f32 / max)
                        .map_err(|e| ParleyError::Audio(format!("WAV read error: {e}")))
                })
                .collect::<Result<Vec<f32>>>()?
        }
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .map(|s| s.map_err(|e| ParleyError::Audio(format!("WAV read error: {e}"))))
            .collect::<Result<Vec<f32>>>()?,
    };

    Ok((downmix(&samples, spec.channels), spec.sample_rate))
}

/// Average interleaved frames into a single channel.
pub fn downmix(samples: &[f32], channels: u16) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }
    let ch = channels as usize;
    samples
        .chunks(ch)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

/// Linear resampling from `from_rate` to `to_rate`.
pub fn resample(input: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || from_rate == 0 || to_rate == 0 || input.is_empty() {
        return input.to_vec();
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let output_len = (input.len() as f64 / ratio).ceil() as usize;
    let mut output = Vec::with_capacity(output_len);

    for i in 0..output_len {
        let src_idx = i as f64 * ratio;
        let idx0 = (src_idx.floor() as usize).min(input.len() - 1);
        let idx1 = (idx0 + 1).min(input.len() - 1);
        let frac = (src_idx - idx0 as f64) as f32;
        output.push(input[idx0] * (1.0 - frac) + input[idx1] * frac);
    }

    output
}

/// Little-endian signed 16-bit PCM, the format streaming recognizers consume.
pub fn to_pcm16(samples: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &s in samples {
        let v = (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Inverse of [`to_pcm16`]. A trailing odd byte is ignored.
pub fn from_pcm16(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / i16::MAX as f32)
        .collect()
}

/// Encode mono samples as a 16-bit WAV file in memory.
pub fn encode_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)
            .map_err(|e| ParleyError::Audio(format!("Cannot write WAV: {e}")))?;
        for &s in samples {
            let v = (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
            writer
                .write_sample(v)
                .map_err(|e| ParleyError::Audio(format!("WAV write error: {e}")))?;
        }
        writer
            .finalize()
            .map_err(|e| ParleyError::Audio(format!("WAV write error: {e}")))?;
    }
    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone(len: usize) -> Vec<f32> {
        (0..len).map(|i| ((i % 32) as f32 / 32.0) - 0.5).collect()
    }

    #[test]
    fn test_sniff_containers() {
        let wav = encode_wav(&[0.0; 10], 16000).unwrap();
        assert_eq!(AudioContainer::sniff(&wav), AudioContainer::Wav);
        assert_eq!(AudioContainer::sniff(b"OggS\0\x02rest"), AudioContainer::Ogg);
        assert_eq!(
            AudioContainer::sniff(&[0x1A, 0x45, 0xDF, 0xA3, 0x01]),
            AudioContainer::WebM
        );
        assert_eq!(AudioContainer::sniff(b"RIFF"), AudioContainer::Unknown);
        assert_eq!(AudioContainer::sniff(&[]), AudioContainer::Unknown);
    }

    #[test]
    fn test_resample_halves_length() {
        let out = resample(&tone(32000), 32000, 16000);
        assert_eq!(out.len(), 16000);
    }

    #[test]
    fn test_resample_identity_and_empty() {
        let input = tone(100);
        assert_eq!(resample(&input, 16000, 16000), input);
        assert!(resample(&[], 44100, 16000).is_empty());
    }

    #[test]
    fn test_downmix_averages_frames() {
        let stereo = vec![1.0, 0.0, 0.5, 0.5, -1.0, 1.0];
        assert_eq!(downmix(&stereo, 2), vec![0.5, 0.5, 0.0]);
        assert_eq!(downmix(&stereo, 1), stereo);
    }

    #[test]
    fn test_pcm16_conversion() {
        let bytes = to_pcm16(&[0.0, 1.0, -1.0, 2.0]);
        assert_eq!(bytes.len(), 8);
        assert_eq!(&bytes[0..2], &[0, 0]);
        assert_eq!(i16::from_le_bytes([bytes[2], bytes[3]]), i16::MAX);
        assert_eq!(i16::from_le_bytes([bytes[6], bytes[7]]), i16::MAX);

        let back = from_pcm16(&bytes[..7]);
        assert_eq!(back.len(), 3);
        assert!((back[1] - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_decode_stereo_wav() {
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 8000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for _ in 0..100 {
                writer.write_sample(i16::MAX).unwrap();
                writer.write_sample(0i16).unwrap();
            }
            writer.finalize().unwrap();
        }
        let (samples, rate) = decode_wav(&cursor.into_inner()).unwrap();
        assert_eq!(rate, 8000);
        assert_eq!(samples.len(), 100);
        assert!((samples[0] - 0.5).abs() < 1e-3);
    }

    #[test]
    fn test_decode_garbage_is_audio_error() {
        let err = decode_wav(b"definitely not audio").unwrap_err();
        assert!(matches!(err, ParleyError::Audio(_)));
    }

    #[tokio::test]
    async fn test_wav_input_is_resampled_in_process() {
        let converter = AudioConverter::new("parley-no-such-ffmpeg", 16000);
        let wav = encode_wav(&tone(8000), 8000).unwrap();
        let samples = converter.to_mono(&wav).await.unwrap();
        assert_eq!(samples.len(), 16000);
    }

    #[tokio::test]
    async fn test_non_wav_without_ffmpeg_fails() {
        let converter = AudioConverter::new("parley-no-such-ffmpeg", 16000);
        let err = converter.to_mono(b"OggS-not-really").await.unwrap_err();
        assert!(matches!(err, ParleyError::Audio(_)));
        assert!(converter.to_mono(&[]).await.is_err());
    }
}
