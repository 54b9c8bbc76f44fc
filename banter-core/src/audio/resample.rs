//! Sample-rate conversion using a rubato `FastFixedIn` resampler.
//!
//! ## Design
//!
//! The wire format is fixed at 24 kHz mono, while `cpal` devices run at their
//! native rate (commonly 44.1 or 48 kHz). `RateConverter` bridges that gap in
//! both directions:
//!
//! - capture: device rate → 24 kHz, on the capture worker thread
//! - playback: 24 kHz → device rate, once per segment on the render thread
//!
//! When both rates match, `RateConverter` is a passthrough and no rubato
//! session is created at all.
//!
//! ## Usage
//!
//! ```ignore
//! let mut rc = RateConverter::new(48_000, 24_000, 960)?;
//! let mut out = rc.process(&raw_samples);
//! out.extend(rc.flush()); // end of a finite buffer
//! ```

use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use tracing::error;

use crate::error::{BanterError, Result};

/// Converts f32 mono audio from one fixed sample rate to another.
pub struct RateConverter {
    /// `None` when input rate == output rate (passthrough mode).
    resampler: Option<FastFixedIn<f32>>,
    /// Accumulation buffer — holds partial input chunks between calls.
    input_buf: Vec<f32>,
    /// How many input samples rubato expects per process call.
    chunk_size: usize,
    /// Pre-allocated output buffer: `[1][output_frames_max]`.
    output_buf: Vec<Vec<f32>>,
    ratio: f64,
}

impl RateConverter {
    /// Create a new converter.
    ///
    /// # Parameters
    /// - `input_rate`: Sample rate of the incoming audio (Hz).
    /// - `output_rate`: Sample rate to produce (Hz).
    /// - `chunk_size`: Input frame count per rubato call (e.g. `960`).
    ///
    /// # Errors
    /// Returns `BanterError::AudioDevice` if rubato fails to initialise.
    pub fn new(input_rate: u32, output_rate: u32, chunk_size: usize) -> Result<Self> {
        let ratio = output_rate as f64 / input_rate.max(1) as f64;
        if input_rate == output_rate {
            return Ok(Self {
                resampler: None,
                input_buf: Vec::new(),
                chunk_size,
                output_buf: Vec::new(),
                ratio,
            });
        }

        let resampler = FastFixedIn::<f32>::new(
            ratio,
            1.0, // fixed ratio — no dynamic adjustment
            PolynomialDegree::Cubic,
            chunk_size,
            1, // mono
        )
        .map_err(|e| BanterError::AudioDevice(format!("resampler init: {e}")))?;

        let max_out = resampler.output_frames_max();
        let output_buf = vec![vec![0f32; max_out]; 1];

        tracing::debug!(input_rate, output_rate, chunk_size, max_out, "resampler ready");

        Ok(Self {
            resampler: Some(resampler),
            input_buf: Vec::new(),
            chunk_size,
            output_buf,
            ratio,
        })
    }

    /// Process incoming samples, returning resampled output (may be empty).
    ///
    /// Samples are accumulated internally until a full `chunk_size` block is
    /// available for rubato. Any remainder is kept for the next call.
    ///
    /// In passthrough mode (same rates), input is returned directly.
    pub fn process(&mut self, samples: &[f32]) -> Vec<f32> {
        let Some(ref mut resampler) = self.resampler else {
            return samples.to_vec();
        };

        self.input_buf.extend_from_slice(samples);

        let mut result = Vec::new();

        while self.input_buf.len() >= self.chunk_size {
            let input_slice = &self.input_buf[..self.chunk_size];

            match resampler.process_into_buffer(&[input_slice], &mut self.output_buf, None) {
                Ok((_consumed, produced)) => {
                    result.extend_from_slice(&self.output_buf[0][..produced]);
                }
                Err(e) => {
                    error!("resampler process error: {e}");
                }
            }

            self.input_buf.drain(..self.chunk_size);
        }

        result
    }

    /// Push out whatever is still buffered by zero-padding it to a full chunk.
    ///
    /// Output is trimmed to the length the buffered input maps to, so a
    /// finite segment does not gain a tail of padding.
    pub fn flush(&mut self) -> Vec<f32> {
        if self.resampler.is_none() || self.input_buf.is_empty() {
            return Vec::new();
        }
        let pending = self.input_buf.len();
        let keep = (pending as f64 * self.ratio).round() as usize;
        let padding = self.chunk_size - pending;
        let mut out = self.process(&vec![0.0; padding]);
        out.truncate(keep);
        out
    }

    /// Returns `true` when input rate == output rate (no resampling occurs).
    pub fn is_passthrough(&self) -> bool {
        self.resampler.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passthrough_identity() {
        let mut rc = RateConverter::new(24_000, 24_000, 960).unwrap();
        assert!(rc.is_passthrough());
        let samples: Vec<f32> = (0..480).map(|i| i as f32 * 0.001).collect();
        let out = rc.process(&samples);
        assert_eq!(out, samples);
        assert!(rc.flush().is_empty());
    }

    #[test]
    fn ratio_48k_to_24k_correct_length() {
        let mut rc = RateConverter::new(48_000, 24_000, 960).unwrap();
        assert!(!rc.is_passthrough());
        // 960 input samples at 48 kHz → ~480 at 24 kHz
        let out = rc.process(&vec![0.0f32; 960]);
        assert!(!out.is_empty(), "expected non-empty output");
        let expected = 480usize;
        assert!(
            (out.len() as isize - expected as isize).unsigned_abs() <= 10,
            "output len={} expected≈{}",
            out.len(),
            expected
        );
    }

    #[test]
    fn partial_accumulation_returns_empty() {
        let mut rc = RateConverter::new(48_000, 24_000, 960).unwrap();
        let out = rc.process(&vec![0.0f32; 500]);
        assert!(
            out.is_empty(),
            "expected empty output for partial chunk, got {}",
            out.len()
        );
    }

    #[test]
    fn multiple_partial_chunks_accumulate() {
        let mut rc = RateConverter::new(48_000, 24_000, 960).unwrap();
        let out1 = rc.process(&vec![0.0f32; 500]);
        assert!(out1.is_empty());
        let out2 = rc.process(&vec![0.0f32; 500]);
        assert!(!out2.is_empty(), "second push should trigger processing");
    }

    #[test]
    fn flush_emits_tail_of_finite_segment() {
        // 24 kHz segment rendered on a 48 kHz device
        let mut rc = RateConverter::new(24_000, 48_000, 960).unwrap();
        let mut out = rc.process(&vec![0.1f32; 1_200]);
        let before_flush = out.len();
        out.extend(rc.flush());
        assert!(out.len() > before_flush, "flush should emit the 240-sample tail");
        let expected = 2_400usize;
        assert!(
            (out.len() as isize - expected as isize).unsigned_abs() <= 40,
            "output len={} expected≈{}",
            out.len(),
            expected
        );
        assert!(rc.flush().is_empty(), "second flush has nothing left");
    }
}
