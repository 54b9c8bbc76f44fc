//! Microphone capture via the cpal backend.
//!
//! # Design constraints
//!
//! The cpal input callback runs on an OS audio thread at elevated priority.
//! It **must not** allocate, block on a lock or perform I/O. It therefore only
//! mono-mixes into a scratch buffer and pushes into an SPSC ring producer.
//!
//! A dedicated capture worker drains the ring, resamples to the session rate
//! and re-chunks into fixed-size [`AudioBlock`]s, handing each one to the
//! registered [`BlockCallback`].
//!
//! # Threading note
//!
//! `cpal::Stream` is `!Send` on most platforms (COM on Windows, CoreAudio on
//! macOS). The worker thread therefore creates the stream, owns it for its
//! whole life and drops it on exit. A sync channel carries the open result
//! back to [`CaptureSource::open`].

pub mod device;
pub mod output;
pub mod resample;

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use crate::buffering::chunk::AudioBlock;
use crate::error::{BanterError, Result};

/// What a capture source needs to know to start delivering blocks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureParams {
    /// Rate of the delivered blocks (Hz). The device may run at another rate.
    pub sample_rate: u32,
    /// Samples per delivered block.
    pub block_size: usize,
    /// Input device name to prefer over the system default.
    pub preferred_device: Option<String>,
}

/// Delivered from a capture source to its consumer.
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureEvent {
    Block(AudioBlock),
    /// The device failed after opening; no more blocks will follow.
    Failed(String),
}

/// Consumer callback registered on [`CaptureSource::open`].
pub type BlockCallback = Box<dyn FnMut(CaptureEvent) + Send + 'static>;

/// A microphone-like source of fixed-size audio blocks.
pub trait CaptureSource: Send {
    /// Acquire the device and start delivering blocks to `deliver`.
    ///
    /// # Errors
    /// - `BanterError::PermissionDenied` when microphone access is refused.
    /// - `BanterError::AudioDevice` / `AudioStream` / `NoDefaultInputDevice`
    ///   on hardware failure.
    /// - `BanterError::AlreadyActive` if already open.
    fn open(&mut self, params: &CaptureParams, deliver: BlockCallback) -> Result<()>;

    /// Stop delivery and release the device. Idempotent.
    fn close(&mut self);

    fn is_open(&self) -> bool;
}

/// Map a backend error message onto the capture error taxonomy.
#[cfg(any(feature = "audio-cpal", test))]
pub(crate) fn classify_device_error(message: String) -> BanterError {
    let lowered = message.to_ascii_lowercase();
    if lowered.contains("permission")
        || lowered.contains("denied")
        || lowered.contains("not authorized")
    {
        BanterError::PermissionDenied(message)
    } else {
        BanterError::AudioStream(message)
    }
}

/// Capture source backed by the system microphone.
#[derive(Default)]
pub struct CpalCapture {
    /// Shared with the worker and the audio callback; `false` makes both no-op.
    running: Option<Arc<AtomicBool>>,
}

impl CpalCapture {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CaptureSource for CpalCapture {
    #[cfg(feature = "audio-cpal")]
    fn open(&mut self, params: &CaptureParams, deliver: BlockCallback) -> Result<()> {
        if self.is_open() {
            return Err(BanterError::AlreadyActive);
        }

        let running = Arc::new(AtomicBool::new(true));
        let (open_tx, open_rx) = std::sync::mpsc::channel::<Result<u32>>();
        let worker_running = Arc::clone(&running);
        let worker_params = params.clone();

        std::thread::Builder::new()
            .name("banter-capture".into())
            .spawn(move || cpal_backend::run_worker(worker_params, worker_running, open_tx, deliver))?;

        match open_rx.recv() {
            Ok(Ok(device_rate)) => {
                tracing::info!(
                    device_rate,
                    sample_rate = params.sample_rate,
                    block_size = params.block_size,
                    "capture started"
                );
                self.running = Some(running);
                Ok(())
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(BanterError::Other(anyhow::anyhow!(
                "capture worker died before reporting device state"
            ))),
        }
    }

    #[cfg(not(feature = "audio-cpal"))]
    fn open(&mut self, _params: &CaptureParams, _deliver: BlockCallback) -> Result<()> {
        Err(BanterError::AudioStream(
            "compiled without audio-cpal feature".into(),
        ))
    }

    fn close(&mut self) {
        if let Some(running) = self.running.take() {
            running.store(false, Ordering::Release);
            tracing::info!("capture stop requested");
        }
    }

    fn is_open(&self) -> bool {
        self.running
            .as_ref()
            .map(|r| r.load(Ordering::Acquire))
            .unwrap_or(false)
    }
}

impl Drop for CpalCapture {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(feature = "audio-cpal")]
mod cpal_backend {
    use std::sync::{
        atomic::{AtomicBool, Ordering},
        mpsc, Arc,
    };
    use std::time::Duration;

    use cpal::{
        traits::{DeviceTrait, StreamTrait},
        SampleFormat, SizedSample, Stream, StreamConfig,
    };
    use crossbeam_channel::{Receiver, Sender};
    use tracing::{debug, error, info, warn};

    use super::{classify_device_error, resample::RateConverter, BlockCallback, CaptureEvent, CaptureParams};
    use crate::buffering::{
        chunk::BlockAssembler, create_audio_ring, AudioProducer, Consumer, Producer,
    };
    use crate::error::{BanterError, Result};

    /// Samples drained from the ring per worker iteration.
    const DRAIN_CHUNK: usize = 960;

    /// Worker sleep when the ring is empty (avoids busy-wait burning a core).
    const EMPTY_SLEEP_MS: u64 = 5;

    struct InputStream {
        /// Kept alive so the stream is not dropped prematurely.
        _stream: Stream,
        sample_rate: u32,
    }

    pub(super) fn run_worker(
        params: CaptureParams,
        running: Arc<AtomicBool>,
        open_tx: mpsc::Sender<Result<u32>>,
        mut deliver: BlockCallback,
    ) {
        let (producer, mut consumer) = create_audio_ring();
        let (fault_tx, fault_rx) = crossbeam_channel::bounded::<String>(4);

        let opened = open_input_stream(
            producer,
            Arc::clone(&running),
            fault_tx,
            params.preferred_device.as_deref(),
        )
        .and_then(|stream| {
            let rc = RateConverter::new(stream.sample_rate, params.sample_rate, DRAIN_CHUNK)?;
            Ok((stream, rc))
        });

        let (stream, mut resampler) = match opened {
            Ok(pair) => {
                let _ = open_tx.send(Ok(pair.0.sample_rate));
                pair
            }
            Err(e) => {
                running.store(false, Ordering::Release);
                let _ = open_tx.send(Err(e));
                return;
            }
        };

        let mut assembler = BlockAssembler::new(params.block_size, params.sample_rate);
        let mut raw = vec![0f32; DRAIN_CHUNK];

        pump(
            &running,
            &fault_rx,
            &mut consumer,
            &mut raw,
            &mut resampler,
            &mut assembler,
            &mut deliver,
        );

        // Stream drops here, releasing the device on the thread that opened it.
        drop(stream);
        debug!("capture worker exited");
    }

    fn pump(
        running: &AtomicBool,
        fault_rx: &Receiver<String>,
        consumer: &mut crate::buffering::AudioConsumer,
        raw: &mut [f32],
        resampler: &mut RateConverter,
        assembler: &mut BlockAssembler,
        deliver: &mut BlockCallback,
    ) {
        while running.load(Ordering::Acquire) {
            if let Ok(reason) = fault_rx.try_recv() {
                error!(%reason, "capture device failed");
                running.store(false, Ordering::Release);
                deliver(CaptureEvent::Failed(reason));
                return;
            }

            let n = consumer.pop_slice(raw);
            if n == 0 {
                std::thread::sleep(Duration::from_millis(EMPTY_SLEEP_MS));
                continue;
            }

            let resampled = resampler.process(&raw[..n]);
            for block in assembler.push(&resampled) {
                deliver(CaptureEvent::Block(block));
            }
        }
    }

    fn open_input_stream(
        producer: AudioProducer,
        running: Arc<AtomicBool>,
        fault_tx: Sender<String>,
        preferred_device_name: Option<&str>,
    ) -> Result<InputStream> {
        let device = crate::audio::device::select_input_device(preferred_device_name)?;

        info!(
            device = device.name().unwrap_or_default().as_str(),
            "opening input device"
        );

        let supported = device
            .default_input_config()
            .map_err(|e| classify_device_error(e.to_string()))?;

        let sample_rate = supported.sample_rate().0;
        let channels = supported.channels();
        info!(sample_rate, channels, "input config selected");

        let config = StreamConfig {
            channels,
            sample_rate: supported.sample_rate(),
            buffer_size: cpal::BufferSize::Default,
        };

        let stream = match supported.sample_format() {
            SampleFormat::F32 => build_mono_stream::<f32>(
                &device, &config, producer, running, fault_tx, |s| s,
            ),
            SampleFormat::I16 => build_mono_stream::<i16>(
                &device, &config, producer, running, fault_tx, |s| s as f32 / 32768.0,
            ),
            SampleFormat::U8 => build_mono_stream::<u8>(
                &device, &config, producer, running, fault_tx, |s| (s as f32 - 128.0) / 128.0,
            ),
            fmt => {
                return Err(BanterError::AudioStream(format!(
                    "unsupported sample format: {fmt:?}"
                )))
            }
        }?;

        stream
            .play()
            .map_err(|e| classify_device_error(e.to_string()))?;

        Ok(InputStream {
            _stream: stream,
            sample_rate,
        })
    }

    /// Build an input stream that mono-mixes every frame and pushes it into the ring.
    fn build_mono_stream<T>(
        device: &cpal::Device,
        config: &StreamConfig,
        mut producer: AudioProducer,
        running: Arc<AtomicBool>,
        fault_tx: Sender<String>,
        to_f32: fn(T) -> f32,
    ) -> Result<Stream>
    where
        T: SizedSample + Send + 'static,
    {
        let ch = config.channels.max(1) as usize;
        let mut mix_buf: Vec<f32> = Vec::new();

        device
            .build_input_stream(
                config,
                move |data: &[T], _info| {
                    if !running.load(Ordering::Relaxed) {
                        return;
                    }
                    let frames = data.len() / ch;
                    mix_buf.resize(frames, 0.0);
                    for (f, out) in mix_buf.iter_mut().enumerate() {
                        let base = f * ch;
                        let sum: f32 = data[base..base + ch].iter().map(|s| to_f32(*s)).sum();
                        *out = sum / ch as f32;
                    }
                    let written = producer.push_slice(&mix_buf);
                    if written < mix_buf.len() {
                        warn!("capture ring full: dropped {} frames", mix_buf.len() - written);
                    }
                },
                move |err| {
                    error!("audio stream error: {err}");
                    let _ = fault_tx.try_send(err.to_string());
                },
                None,
            )
            .map_err(|e| classify_device_error(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permission_messages_map_to_permission_denied() {
        assert!(matches!(
            classify_device_error("Access denied by the OS".into()),
            BanterError::PermissionDenied(_)
        ));
        assert!(matches!(
            classify_device_error("The user has not authorized microphone permission".into()),
            BanterError::PermissionDenied(_)
        ));
        assert!(matches!(
            classify_device_error("device disconnected".into()),
            BanterError::AudioStream(_)
        ));
    }

    #[test]
    fn closed_capture_is_idempotent() {
        let mut capture = CpalCapture::new();
        assert!(!capture.is_open());
        capture.close();
        capture.close();
        assert!(!capture.is_open());
    }
}
