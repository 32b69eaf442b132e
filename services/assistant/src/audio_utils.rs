//! PCM16 codec: normalized `f32` samples <-> 16-bit little-endian PCM <-> base64.

use base64::Engine;
use std::time::Duration;

// Define standard sample rates for clarity and consistency
pub const CAPTURE_SAMPLE_RATE: u32 = 16_000;
pub const PLAYBACK_SAMPLE_RATE: u32 = 24_000;
pub const CAPTURE_BLOCK_SIZE: usize = 4096;

/// Why an inbound audio payload could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("Invalid base64 payload: {0}")]
    InvalidEncoding(String),
    #[error("PCM16 payload has an odd byte count: {0}")]
    OddLength(usize),
}

/// Converts one normalized sample to PCM16.
///
/// Clamps to `[-1, 1]`; negative values scale by 32768, non-negative by 32767,
/// truncating toward zero. NaN maps to silence.
pub fn f32_to_i16(sample: f32) -> i16 {
    let s = sample.clamp(-1.0, 1.0);
    if s < 0.0 {
        (s * 32768.0) as i16
    } else {
        (s * 32767.0) as i16
    }
}

pub fn i16_to_f32(sample: i16) -> f32 {
    sample as f32 / 32768.0
}

/// Packs samples as PCM16 little-endian bytes.
pub fn encode_pcm16_bytes(samples: &[f32]) -> Vec<u8> {
    samples
        .iter()
        .flat_map(|&s| f32_to_i16(s).to_le_bytes())
        .collect()
}

/// Unpacks PCM16 little-endian bytes. The byte count must be even.
pub fn decode_pcm16_bytes(bytes: &[u8]) -> Result<Vec<f32>, CodecError> {
    if bytes.len() % 2 != 0 {
        return Err(CodecError::OddLength(bytes.len()));
    }
    Ok(bytes
        .chunks_exact(2)
        .map(|c| i16_to_f32(i16::from_le_bytes([c[0], c[1]])))
        .collect())
}

/// Encodes samples into base64 PCM16, the transport-safe form.
pub fn encode(samples: &[f32]) -> String {
    base64::engine::general_purpose::STANDARD.encode(encode_pcm16_bytes(samples))
}

/// Decodes base64 PCM16 back into normalized samples.
pub fn decode(base64_fragment: &str) -> Result<Vec<f32>, CodecError> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(base64_fragment)
        .map_err(|e| CodecError::InvalidEncoding(e.to_string()))?;
    decode_pcm16_bytes(&bytes)
}

/// Encodes arbitrary bytes (e.g. a JPEG frame) as base64.
pub fn encode_bytes(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

/// Root-mean-square of a block; zero for an empty block.
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f32 = samples.iter().map(|s| s * s).sum();
    (sum / samples.len() as f32).sqrt()
}

/// Mime type announcing raw PCM16 at `sample_rate`.
pub fn pcm_mime(sample_rate: u32) -> String {
    format!("audio/pcm;rate={}", sample_rate)
}

/// Playback length of `len` mono samples at `sample_rate`.
pub fn chunk_duration(len: usize, sample_rate: u32) -> Duration {
    frame_time(len as u64, sample_rate)
}

/// Clock time at which sample `frame` plays, truncated to whole nanoseconds.
pub fn frame_time(frame: u64, sample_rate: u32) -> Duration {
    let nanos = u128::from(frame) * 1_000_000_000 / u128::from(sample_rate.max(1));
    Duration::from_nanos(nanos as u64)
}

/// Index of the first sample that plays at or after `at`.
pub fn frame_at(at: Duration, sample_rate: u32) -> u64 {
    let scaled = at.as_nanos() * u128::from(sample_rate.max(1));
    scaled.div_ceil(1_000_000_000) as u64
}
