//! Audio output for playback segments.
//!
//! Every segment gets its own output stream: the render thread opens the
//! device, plays exactly one segment, drops the stream and reports
//! completion. Nothing is reused between segments, so segments of different
//! lengths chain without inheriting stale buffer state or timing.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
#[cfg(any(feature = "audio-cpal", test))]
use std::time::{Duration, Instant};

#[cfg(any(feature = "audio-cpal", test))]
use crossbeam_channel::{RecvTimeoutError, Sender};
#[cfg(any(feature = "audio-cpal", test))]
use tracing::{debug, error, warn};

use crate::buffering::chunk::PlaybackSegment;
use crate::error::Result;

/// Completion hook handed to [`AudioSink::render`].
pub type RenderDone = Box<dyn FnOnce() + Send + 'static>;

/// Control handle for one in-flight render.
#[derive(Debug, Clone, Default)]
pub struct RenderHandle {
    stop: Arc<AtomicBool>,
    failed: Arc<AtomicBool>,
}

impl RenderHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Force the render to end now. The sink still fires its completion hook.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    /// Mark the render as failed. Call before the completion hook fires.
    pub fn fail(&self) {
        self.failed.store(true, Ordering::Release);
    }

    /// `true` if the segment never reached the device.
    pub fn has_failed(&self) -> bool {
        self.failed.load(Ordering::Acquire)
    }

    /// Flag shared with the rendering side; `true` means "stop now".
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }
}

/// Renders playback segments to an output device.
pub trait AudioSink: Send {
    /// Start rendering `segment` on a fresh output resource and return at once.
    ///
    /// `done` must be invoked exactly once when rendering ends, either
    /// naturally or after [`RenderHandle::stop`]. A device that fails after
    /// this returns is reported with [`RenderHandle::fail`] followed by `done`.
    /// When this returns `Err` nothing was started and `done` is never invoked.
    fn render(&mut self, segment: PlaybackSegment, done: RenderDone) -> Result<RenderHandle>;
}

/// Output sink backed by the system speakers.
#[derive(Debug, Clone, Default)]
pub struct CpalSink {
    preferred_device: Option<String>,
}

impl CpalSink {
    pub fn new(preferred_device: Option<String>) -> Self {
        Self { preferred_device }
    }
}

impl AudioSink for CpalSink {
    #[cfg(feature = "audio-cpal")]
    fn render(&mut self, segment: PlaybackSegment, done: RenderDone) -> Result<RenderHandle> {
        let handle = RenderHandle::new();
        let worker = handle.clone();
        let preferred = self.preferred_device.clone();

        // The device is opened on the render thread so the caller's event
        // loop never waits on it.
        std::thread::Builder::new()
            .name("banter-render".into())
            .spawn(move || {
                let nominal = Duration::from_secs_f64(segment.duration_secs());
                let stop = worker.stop_flag();
                run_render(&worker, nominal, done, move |drained_tx| {
                    cpal_backend::open_playback_stream(segment, preferred.as_deref(), stop, drained_tx)
                });
            })?;

        Ok(handle)
    }

    #[cfg(not(feature = "audio-cpal"))]
    fn render(&mut self, _segment: PlaybackSegment, _done: RenderDone) -> Result<RenderHandle> {
        Err(crate::error::BanterError::AudioStream(
            "compiled without audio-cpal feature".into(),
        ))
    }
}

/// How often the render thread re-checks the stop flag.
#[cfg(any(feature = "audio-cpal", test))]
const STOP_POLL_MS: u64 = 10;

/// Extra time a render may take past its nominal duration before it is
/// abandoned (a stalled device must not wedge the queue).
#[cfg(any(feature = "audio-cpal", test))]
const STALL_GRACE: Duration = Duration::from_secs(2);

/// Body of a render thread: open the stream, wait until it drains, is
/// stopped or stalls, release it and fire `done` exactly once.
///
/// `open` receives the sender the stream signals once playback has drained;
/// its return value is held for the duration of the render.
#[cfg(any(feature = "audio-cpal", test))]
fn run_render<S>(
    handle: &RenderHandle,
    nominal: Duration,
    done: RenderDone,
    open: impl FnOnce(Sender<()>) -> Result<S>,
) {
    let (drained_tx, drained_rx) = crossbeam_channel::bounded::<()>(1);

    let stream = match open(drained_tx) {
        Ok(stream) => stream,
        Err(e) => {
            error!(error = %e, "could not open output device");
            handle.fail();
            done();
            return;
        }
    };

    let deadline = Instant::now() + nominal + STALL_GRACE;
    loop {
        if handle.is_stopped() {
            debug!("render stopped early");
            break;
        }
        match drained_rx.recv_timeout(Duration::from_millis(STOP_POLL_MS)) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {
                if Instant::now() >= deadline {
                    warn!(?nominal, "output device stalled; abandoning segment");
                    break;
                }
            }
        }
    }

    drop(stream);
    done();
}

/// Read position of one segment inside an output callback.
#[cfg(any(feature = "audio-cpal", test))]
struct Playhead {
    samples: Vec<f32>,
    cursor: usize,
}

#[cfg(any(feature = "audio-cpal", test))]
impl Playhead {
    fn new(samples: Vec<f32>) -> Self {
        Self { samples, cursor: 0 }
    }

    /// Fill one device buffer, duplicating each sample across `channels`,
    /// and pad with silence past the end.
    ///
    /// Returns `true` once the segment has drained: every sample was handed
    /// to the device in an earlier buffer, so the buffer holding the tail has
    /// been consumed. A stopped playhead drains at once.
    fn fill<T: Copy>(
        &mut self,
        data: &mut [T],
        channels: usize,
        stopped: bool,
        from_f32: impl Fn(f32) -> T,
    ) -> bool {
        let tail_already_out = self.cursor >= self.samples.len();
        for frame in data.chunks_mut(channels.max(1)) {
            let value = match self.samples.get(self.cursor) {
                Some(v) if !stopped => {
                    self.cursor += 1;
                    *v
                }
                _ => 0.0,
            };
            let out = from_f32(value);
            for slot in frame.iter_mut() {
                *slot = out;
            }
        }
        stopped || tail_already_out
    }
}

#[cfg(feature = "audio-cpal")]
mod cpal_backend {
    use std::sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    };

    use cpal::{
        traits::{DeviceTrait, StreamTrait},
        SampleFormat, SizedSample, Stream, StreamConfig,
    };
    use crossbeam_channel::Sender;
    use tracing::{debug, error};

    use super::Playhead;
    use crate::audio::{classify_device_error, resample::RateConverter};
    use crate::buffering::chunk::PlaybackSegment;
    use crate::error::{BanterError, Result};

    /// Input frames per rubato call when adapting a segment to the device rate.
    const RENDER_CHUNK: usize = 480;

    pub(super) fn open_playback_stream(
        segment: PlaybackSegment,
        preferred: Option<&str>,
        stop: Arc<AtomicBool>,
        drained_tx: Sender<()>,
    ) -> Result<Stream> {
        let device = crate::audio::device::select_output_device(preferred)?;
        let supported = device
            .default_output_config()
            .map_err(|e| BanterError::AudioDevice(e.to_string()))?;

        let device_rate = supported.sample_rate().0;
        let config = StreamConfig {
            channels: supported.channels(),
            sample_rate: supported.sample_rate(),
            buffer_size: cpal::BufferSize::Default,
        };

        let mut rc = RateConverter::new(segment.sample_rate, device_rate, RENDER_CHUNK)?;
        let mut samples = rc.process(&segment.samples);
        samples.extend(rc.flush());

        debug!(
            segment_samples = segment.samples.len(),
            device_samples = samples.len(),
            device_rate,
            "rendering segment"
        );

        let stream = match supported.sample_format() {
            SampleFormat::F32 => {
                build_playback_stream::<f32>(&device, &config, samples, stop, drained_tx, |v| v)
            }
            SampleFormat::I16 => build_playback_stream::<i16>(
                &device, &config, samples, stop, drained_tx, |v| (v.clamp(-1.0, 1.0) * 32767.0) as i16,
            ),
            SampleFormat::U16 => build_playback_stream::<u16>(
                &device, &config, samples, stop, drained_tx, |v| {
                    (v.clamp(-1.0, 1.0) * 32767.0 + 32768.0) as u16
                },
            ),
            fmt => {
                return Err(BanterError::AudioStream(format!(
                    "unsupported output sample format: {fmt:?}"
                )))
            }
        }?;

        stream
            .play()
            .map_err(|e| classify_device_error(e.to_string()))?;
        Ok(stream)
    }

    /// Build an output stream that plays `samples` once on every channel,
    /// then outputs silence and signals `drained_tx`.
    fn build_playback_stream<T>(
        device: &cpal::Device,
        config: &StreamConfig,
        samples: Vec<f32>,
        stop: Arc<AtomicBool>,
        drained_tx: Sender<()>,
        from_f32: fn(f32) -> T,
    ) -> Result<Stream>
    where
        T: SizedSample + Send + 'static,
    {
        let ch = config.channels.max(1) as usize;
        let mut playhead = Playhead::new(samples);

        device
            .build_output_stream(
                config,
                move |data: &mut [T], _info| {
                    let stopped = stop.load(Ordering::Relaxed);
                    if playhead.fill(data, ch, stopped, from_f32) {
                        let _ = drained_tx.try_send(());
                    }
                },
                |err| error!("output stream error: {err}"),
                None,
            )
            .map_err(|e| classify_device_error(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BanterError;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn render_handle_stop_is_shared() {
        let handle = RenderHandle::new();
        let flag = handle.stop_flag();
        let clone = handle.clone();
        assert!(!handle.is_stopped());
        clone.stop();
        assert!(handle.is_stopped());
        assert!(flag.load(Ordering::Acquire));
    }

    #[test]
    fn playhead_drains_only_after_a_buffer_of_silence() {
        let mut playhead = Playhead::new(vec![0.25, 0.5, 0.75]);
        let mut buf = [0.0f32; 4];

        // stereo: two frames per buffer
        assert!(!playhead.fill(&mut buf, 2, false, |v| v));
        assert_eq!(buf, [0.25, 0.25, 0.5, 0.5]);

        // the tail goes out here; the device has not played it yet
        assert!(!playhead.fill(&mut buf, 2, false, |v| v));
        assert_eq!(buf, [0.75, 0.75, 0.0, 0.0]);

        assert!(playhead.fill(&mut buf, 2, false, |v| v));
        assert_eq!(buf, [0.0; 4]);
    }

    #[test]
    fn stopped_playhead_writes_silence_and_drains_at_once() {
        let mut playhead = Playhead::new(vec![0.5; 8]);
        let mut buf = [1i16; 4];
        assert!(playhead.fill(&mut buf, 1, true, |v| (v * 32767.0) as i16));
        assert_eq!(buf, [0; 4]);
    }

    fn completion_counter() -> (Arc<AtomicUsize>, RenderDone) {
        let fired = Arc::new(AtomicUsize::new(0));
        let hook = Arc::clone(&fired);
        (
            fired,
            Box::new(move || {
                hook.fetch_add(1, Ordering::SeqCst);
            }),
        )
    }

    #[test]
    fn open_failure_marks_handle_and_still_completes() {
        let handle = RenderHandle::new();
        let (fired, done) = completion_counter();
        run_render::<()>(&handle, Duration::from_millis(10), done, |_drained| {
            Err(BanterError::NoDefaultOutputDevice)
        });
        assert!(handle.has_failed());
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn drained_signal_ends_render_once() {
        let handle = RenderHandle::new();
        let (fired, done) = completion_counter();
        run_render(&handle, Duration::from_secs(5), done, |drained| {
            drained.send(()).unwrap();
            Ok(drained)
        });
        assert!(!handle.has_failed());
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn stop_ends_render_without_a_drain() {
        let handle = RenderHandle::new();
        let remote = handle.clone();
        let stopper = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(30));
            remote.stop();
        });

        let (fired, done) = completion_counter();
        let started = Instant::now();
        // holding the sender keeps the stream "playing" until stopped
        run_render(&handle, Duration::from_secs(5), done, Ok);
        stopper.join().unwrap();

        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!handle.has_failed());
    }
}
