//! PCM16 sample codec and base64 wire framing.
//!
//! ```text
//! AudioBlock (f32, [-1, 1]) ──encode──► PCM16LE bytes ──to_wire_text──► base64
//! base64 ──from_wire_text──► PCM16LE bytes ──decode──► PlaybackSegment (f32, [-1, 1))
//! ```
//!
//! Encoding scales by a configurable factor (32767 by default) after clamping;
//! decoding always divides by 32768.

use base64::{engine::general_purpose::STANDARD, Engine as _};

use crate::buffering::chunk::PlaybackSegment;
use crate::error::{BanterError, Result};

/// Default encode scale. Symmetric: 1.0 → 32767, -1.0 → -32767.
pub const DEFAULT_PCM_SCALE: f32 = 32767.0;

/// Decode divisor for int16 → f32.
pub const PCM_DECODE_DIVISOR: f32 = 32768.0;

/// Stateless converter between normalized f32 samples and PCM16LE bytes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PcmCodec {
    scale: f32,
    sample_rate: u32,
}

impl PcmCodec {
    /// `scale` is clamped to `1.0..=32767.0` so clamped input can never overflow i16.
    pub fn new(scale: f32, sample_rate: u32) -> Self {
        let scale = if scale.is_finite() {
            scale.clamp(1.0, DEFAULT_PCM_SCALE)
        } else {
            DEFAULT_PCM_SCALE
        };
        Self { scale, sample_rate }
    }

    pub fn scale(&self) -> f32 {
        self.scale
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Clamp, scale and serialize samples as little-endian int16.
    ///
    /// Magnitudes are rounded away from zero: with the 32767 encode scale and
    /// the 32768 decode divisor this keeps every round-tripped sample within
    /// one quantization step of its input. NaN encodes as silence.
    pub fn encode(&self, samples: &[f32]) -> Vec<u8> {
        let mut out = Vec::with_capacity(samples.len() * 2);
        for &sample in samples {
            let scaled = sample.clamp(-1.0, 1.0) * self.scale;
            let quantized = if scaled >= 0.0 {
                scaled.ceil()
            } else {
                scaled.floor()
            };
            out.extend_from_slice(&(quantized as i16).to_le_bytes());
        }
        out
    }

    /// Interpret `bytes` as little-endian int16 samples.
    ///
    /// # Errors
    /// `BanterError::MalformedFrame` when the byte length is odd.
    pub fn decode(&self, bytes: &[u8]) -> Result<PlaybackSegment> {
        if bytes.len() % 2 != 0 {
            return Err(BanterError::MalformedFrame { len: bytes.len() });
        }
        let samples = bytes
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / PCM_DECODE_DIVISOR)
            .collect();
        Ok(PlaybackSegment::new(samples, self.sample_rate))
    }
}

impl Default for PcmCodec {
    fn default() -> Self {
        Self::new(DEFAULT_PCM_SCALE, crate::session::WIRE_SAMPLE_RATE)
    }
}

/// Base64-encode a binary frame for the JSON envelope.
pub fn to_wire_text(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Decode a base64 payload back into bytes.
///
/// # Errors
/// `BanterError::Decode` on invalid base64 input.
pub fn from_wire_text(text: &str) -> Result<Vec<u8>> {
    Ok(STANDARD.decode(text.trim())?)
}
