//! Sequential playback queue with barge-in.
//!
//! ## State machine
//!
//! ```text
//!            enqueue                 Drain(gen)               Completed(id)
//!   Idle ─────────────► Scheduled ─────────────► Rendering ───────────────► Rendering(next) | Idle
//!    ▲                      │                        │
//!    └──── interrupt ◄──────┴────────────────────────┘
//! ```
//!
//! The queue never calls back into itself. Starting a drain and reporting a
//! render completion both go out through the [`SignalNotifier`] and come back
//! in through [`PlaybackQueue::on_signal`] on the owner's event loop, so every
//! mutation happens on that loop.
//!
//! `interrupt()` bumps the drain generation and forgets the active render id.
//! A drain signal or completion that was already in flight then no longer
//! matches and is ignored: late completions never dequeue anything.

use std::collections::VecDeque;
use std::sync::Arc;

use tracing::{debug, trace, warn};

use crate::audio::output::{AudioSink, RenderHandle};
use crate::buffering::chunk::PlaybackSegment;

/// Identifies one render. Never reused within a queue.
pub type RenderId = u64;

/// Signals a [`PlaybackQueue`] asks its owner to feed back via `on_signal`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackSignal {
    /// Start rendering the queue head, if this generation is still current.
    Drain { generation: u64 },
    /// The output device finished (or was forced to stop) a render.
    Completed(RenderId),
}

/// Delivers signals back to the queue owner's event loop.
pub type SignalNotifier = Arc<dyn Fn(PlaybackSignal) + Send + Sync>;

enum Activity {
    Idle,
    /// A `Drain` signal is on its way; nothing renders yet.
    Scheduled,
    Rendering { id: RenderId, handle: RenderHandle },
}

/// FIFO of decoded segments rendered one at a time.
pub struct PlaybackQueue {
    sink: Box<dyn AudioSink>,
    pending: VecDeque<PlaybackSegment>,
    activity: Activity,
    generation: u64,
    next_render_id: RenderId,
    notify: SignalNotifier,
}

impl PlaybackQueue {
    pub fn new(sink: Box<dyn AudioSink>, notify: SignalNotifier) -> Self {
        Self {
            sink,
            pending: VecDeque::new(),
            activity: Activity::Idle,
            generation: 0,
            next_render_id: 0,
            notify,
        }
    }

    /// Append a segment. If nothing is rendering, schedule a drain.
    pub fn enqueue(&mut self, segment: PlaybackSegment) {
        self.pending.push_back(segment);
        trace!(queued = self.pending.len(), "segment enqueued");
        if matches!(self.activity, Activity::Idle) {
            self.activity = Activity::Scheduled;
            (self.notify)(PlaybackSignal::Drain {
                generation: self.generation,
            });
        }
    }

    /// Feed a signal back into the queue.
    ///
    /// Returns `true` when the signal was current and acted on, `false` when
    /// it was stale (superseded by an interrupt or unknown render).
    pub fn on_signal(&mut self, signal: PlaybackSignal) -> bool {
        match signal {
            PlaybackSignal::Drain { generation } => {
                if generation != self.generation || !matches!(self.activity, Activity::Scheduled) {
                    trace!(generation, current = self.generation, "stale drain signal ignored");
                    return false;
                }
                self.start_next();
                true
            }
            PlaybackSignal::Completed(id) => match &self.activity {
                Activity::Rendering { id: active, handle } if *active == id => {
                    if handle.has_failed() {
                        warn!(render_id = id, "segment could not be played; skipping");
                    } else {
                        debug!(render_id = id, "segment finished");
                    }
                    self.start_next();
                    true
                }
                _ => {
                    debug!(render_id = id, "late render completion ignored");
                    false
                }
            },
        }
    }

    /// Barge-in: drop everything queued and cut off the active render.
    ///
    /// Returns the number of segments discarded (queued plus active).
    /// A no-op returning 0 when idle.
    pub fn interrupt(&mut self) -> usize {
        let mut dropped = self.pending.len();
        self.pending.clear();
        self.generation = self.generation.wrapping_add(1);
        if let Activity::Rendering { id, handle } =
            std::mem::replace(&mut self.activity, Activity::Idle)
        {
            handle.stop();
            dropped += 1;
            debug!(render_id = id, "active render stopped");
        }
        dropped
    }

    /// `true` while a segment is being rendered.
    pub fn is_playing(&self) -> bool {
        matches!(self.activity, Activity::Rendering { .. })
    }

    /// `true` when nothing is queued, scheduled or rendering.
    pub fn is_idle(&self) -> bool {
        matches!(self.activity, Activity::Idle) && self.pending.is_empty()
    }

    /// Segments waiting behind the active one.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    fn start_next(&mut self) {
        self.activity = Activity::Idle;
        while let Some(segment) = self.pending.pop_front() {
            let id = self.next_render_id;
            self.next_render_id = self.next_render_id.wrapping_add(1);
            let notify = Arc::clone(&self.notify);
            let done = Box::new(move || notify(PlaybackSignal::Completed(id)));
            match self.sink.render(segment, done) {
                Ok(handle) => {
                    trace!(render_id = id, queued = self.pending.len(), "segment rendering");
                    self.activity = Activity::Rendering { id, handle };
                    return;
                }
                Err(e) => {
                    warn!(render_id = id, error = %e, "segment render failed; skipping");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::output::RenderDone;
    use crate::error::{BanterError, Result};
    use parking_lot::Mutex;

    /// Records renders and keeps their completion hooks for the test to fire.
    #[derive(Clone, Default)]
    struct ScriptedSink {
        rendered: Arc<Mutex<Vec<usize>>>,
        hooks: Arc<Mutex<Vec<(RenderHandle, RenderDone)>>>,
        fail_lengths: Vec<usize>,
    }

    impl AudioSink for ScriptedSink {
        fn render(&mut self, segment: PlaybackSegment, done: RenderDone) -> Result<RenderHandle> {
            if self.fail_lengths.contains(&segment.samples.len()) {
                return Err(BanterError::AudioStream("scripted failure".into()));
            }
            self.rendered.lock().push(segment.samples.len());
            let handle = RenderHandle::new();
            self.hooks.lock().push((handle.clone(), done));
            Ok(handle)
        }
    }

    struct Harness {
        queue: PlaybackQueue,
        sink: ScriptedSink,
        signals: Arc<Mutex<Vec<PlaybackSignal>>>,
    }

    impl Harness {
        fn new(sink: ScriptedSink) -> Self {
            let signals = Arc::new(Mutex::new(Vec::new()));
            let sink_signals = Arc::clone(&signals);
            let queue = PlaybackQueue::new(
                Box::new(sink.clone()),
                Arc::new(move |s| sink_signals.lock().push(s)),
            );
            Self {
                queue,
                sink,
                signals,
            }
        }

        /// Deliver every queued signal, like the owner's event loop would.
        fn pump(&mut self) {
            loop {
                let batch: Vec<_> = self.signals.lock().drain(..).collect();
                if batch.is_empty() {
                    return;
                }
                for s in batch {
                    self.queue.on_signal(s);
                }
            }
        }

        /// Fire the completion hook of the `n`-th render.
        fn complete(&mut self, n: usize) {
            let (_, done) = self.sink.hooks.lock().remove(n);
            done();
        }

        fn rendered(&self) -> Vec<usize> {
            self.sink.rendered.lock().clone()
        }
    }

    fn seg(len: usize) -> PlaybackSegment {
        PlaybackSegment::new(vec![0.0; len], 24_000)
    }

    #[test]
    fn renders_in_fifo_order_one_at_a_time() {
        let mut h = Harness::new(ScriptedSink::default());
        h.queue.enqueue(seg(1));
        h.queue.enqueue(seg(2));
        h.queue.enqueue(seg(3));
        h.pump();
        assert_eq!(h.rendered(), vec![1]);
        assert!(h.queue.is_playing());
        assert_eq!(h.queue.len(), 2);

        h.complete(0);
        h.pump();
        assert_eq!(h.rendered(), vec![1, 2]);

        h.complete(0);
        h.pump();
        h.complete(0);
        h.pump();
        assert_eq!(h.rendered(), vec![1, 2, 3]);
        assert!(!h.queue.is_playing());
        assert!(h.queue.is_idle());
    }

    #[test]
    fn interrupt_before_drain_prevents_any_render() {
        let mut h = Harness::new(ScriptedSink::default());
        h.queue.enqueue(seg(4));
        h.queue.enqueue(seg(6));
        assert_eq!(h.queue.interrupt(), 2);
        h.pump();
        assert!(h.rendered().is_empty());
        assert!(h.queue.is_empty());
        assert!(h.queue.is_idle());
    }

    #[test]
    fn late_completion_after_interrupt_is_a_no_op() {
        let mut h = Harness::new(ScriptedSink::default());
        h.queue.enqueue(seg(4));
        h.pump();
        assert!(h.queue.is_playing());

        assert_eq!(h.queue.interrupt(), 1);
        assert!(h.sink.hooks.lock()[0].0.is_stopped());
        assert!(!h.queue.is_playing());

        h.complete(0);
        h.pump();
        assert_eq!(h.rendered(), vec![4]);
        assert!(!h.queue.is_playing());
        assert!(h.queue.is_idle());
    }

    #[test]
    fn late_completion_does_not_skip_audio_enqueued_after_interrupt() {
        let mut h = Harness::new(ScriptedSink::default());
        h.queue.enqueue(seg(1));
        h.pump();
        h.queue.interrupt();

        h.queue.enqueue(seg(2));
        h.queue.enqueue(seg(3));
        h.pump();
        assert_eq!(h.rendered(), vec![1, 2]);

        // completion of the interrupted first render arrives late
        h.complete(0);
        h.pump();
        assert_eq!(h.rendered(), vec![1, 2], "stale completion must not advance the queue");
        assert!(h.queue.is_playing());
        assert_eq!(h.queue.len(), 1);

        h.complete(0);
        h.pump();
        assert_eq!(h.rendered(), vec![1, 2, 3]);
    }

    #[test]
    fn interrupt_when_idle_is_a_no_op() {
        let mut h = Harness::new(ScriptedSink::default());
        assert_eq!(h.queue.interrupt(), 0);
        assert_eq!(h.queue.interrupt(), 0);
        h.pump();
        assert!(h.queue.is_idle());
        assert!(h.rendered().is_empty());
    }

    #[test]
    fn failed_render_skips_to_next_segment() {
        let sink = ScriptedSink {
            fail_lengths: vec![5],
            ..Default::default()
        };
        let mut h = Harness::new(sink);
        h.queue.enqueue(seg(5));
        h.queue.enqueue(seg(7));
        h.pump();
        assert_eq!(h.rendered(), vec![7]);
        assert!(h.queue.is_playing());
    }

    #[test]
    fn render_that_fails_after_starting_advances_on_completion() {
        let mut h = Harness::new(ScriptedSink::default());
        h.queue.enqueue(seg(5));
        h.queue.enqueue(seg(7));
        h.pump();
        assert_eq!(h.rendered(), vec![5]);

        // the device failed to open on the render thread
        let (handle, done) = h.sink.hooks.lock().remove(0);
        handle.fail();
        done();
        h.pump();
        assert_eq!(h.rendered(), vec![5, 7]);
        assert!(h.queue.is_playing());
    }

    #[test]
    fn enqueue_during_render_waits_for_completion() {
        let mut h = Harness::new(ScriptedSink::default());
        h.queue.enqueue(seg(1));
        h.pump();
        h.queue.enqueue(seg(2));
        h.pump();
        assert_eq!(h.rendered(), vec![1]);
        assert!(h.signals.lock().is_empty(), "no extra drain while rendering");
    }
}
