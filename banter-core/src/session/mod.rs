//! `VoiceSession`: lifecycle controller for one conversation.
//!
//! ## Lifecycle
//!
//! ```text
//! VoiceSession::new()
//!     └─► start(token)   → Starting → microphone open, socket connecting → Active{capturing}
//!         ├─► speech_started   → playback interrupted, capture untouched
//!         ├─► device failure   → stop(), status = Error
//!         └─► stop()           → capture closed, socket closed, playback interrupted → Idle
//! ```
//!
//! ## Event loop
//!
//! Capture blocks, socket notifications and playback signals all arrive on one
//! unbounded channel and are handled one at a time by whichever task drives
//! [`process_next`](VoiceSession::process_next) / [`run`](VoiceSession::run).
//! Nothing else mutates session, queue or socket state, so interrupt and
//! enqueue are ordered exactly as their socket messages arrived.
//!
//! Every `start()` and `stop()` opens a new epoch. Capture and socket events
//! are tagged with the epoch they were registered under; events from an older
//! epoch are dropped on arrival.

pub mod diagnostics;

use std::future::Future;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, trace, warn};

use crate::{
    audio::{output::AudioSink, BlockCallback, CaptureEvent, CaptureParams, CaptureSource},
    codec::{self, PcmCodec, DEFAULT_PCM_SCALE},
    error::{BanterError, Result},
    events::{SessionStatus, SessionStatusEvent},
    playback::{PlaybackQueue, PlaybackSignal},
    transport::{
        AuthToken, ConnectionState, InboundMessage, TransportCallback, TransportEvent,
        TransportSession, WireSchema,
    },
};

pub use diagnostics::{DiagnosticsSnapshot, SessionDiagnostics};

/// Sample rate of every PCM frame on the wire (Hz).
pub const WIRE_SAMPLE_RATE: u32 = 24_000;

/// Status events buffered for slow subscribers.
const STATUS_CAP: usize = 64;

/// Configuration for a [`VoiceSession`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct SessionConfig {
    /// `ws://` or `wss://` URL of the media stream endpoint.
    pub endpoint_url: String,
    pub schema: WireSchema,
    /// Rate of captured blocks and decoded segments. Default: 24000.
    pub sample_rate: u32,
    /// Samples per captured block.
    pub block_size: usize,
    /// Encode scale for f32 → int16. Default: 32767.
    pub pcm_scale: f32,
    pub preferred_input_device: Option<String>,
    /// Speaker name for the host to hand to its [`AudioSink`] (e.g. `CpalSink::new`).
    pub preferred_output_device: Option<String>,
}

impl SessionConfig {
    /// Local relay deployment: bare `{payload}` envelopes, 1024-sample blocks.
    pub fn local_relay() -> Self {
        Self {
            endpoint_url: "ws://localhost:5050/media-stream".into(),
            schema: WireSchema::untyped(),
            block_size: 1024,
            ..Self::voice_ai_platform()
        }
    }

    /// Voice AI platform deployment: typed envelopes with a token handshake,
    /// 16384-sample blocks.
    pub fn voice_ai_platform() -> Self {
        Self {
            endpoint_url: "ws://localhost:8000/api/v1/voice-ai/media-stream".into(),
            schema: WireSchema::typed(),
            sample_rate: WIRE_SAMPLE_RATE,
            block_size: 16_384,
            pcm_scale: DEFAULT_PCM_SCALE,
            preferred_input_device: None,
            preferred_output_device: None,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::voice_ai_platform()
    }
}

/// Externally visible session state.
///
/// Playback is tracked by the queue itself; see [`VoiceSession::is_playing`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Starting,
    Active { capturing: bool },
}

enum SessionEvent {
    Capture { epoch: u64, event: CaptureEvent },
    Transport { epoch: u64, event: TransportEvent },
    Playback(PlaybackSignal),
}

/// One full-duplex voice conversation.
///
/// Construct with injected capture and output backends, call
/// [`start`](Self::start), then drive the event loop with
/// [`run`](Self::run) (or [`process_next`](Self::process_next) in tests).
/// `start()` must be called from inside a tokio runtime.
pub struct VoiceSession {
    config: SessionConfig,
    codec: PcmCodec,
    state: SessionState,
    epoch: u64,
    capture: Box<dyn CaptureSource>,
    transport: Option<TransportSession>,
    playback: PlaybackQueue,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    events_rx: mpsc::UnboundedReceiver<SessionEvent>,
    status_tx: broadcast::Sender<SessionStatusEvent>,
    diagnostics: Arc<SessionDiagnostics>,
}

impl VoiceSession {
    pub fn new(
        config: SessionConfig,
        capture: Box<dyn CaptureSource>,
        sink: Box<dyn AudioSink>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (status_tx, _) = broadcast::channel(STATUS_CAP);

        let playback_tx = events_tx.clone();
        let playback = PlaybackQueue::new(
            sink,
            Arc::new(move |signal| {
                let _ = playback_tx.send(SessionEvent::Playback(signal));
            }),
        );

        Self {
            codec: PcmCodec::new(config.pcm_scale, config.sample_rate),
            config,
            state: SessionState::Idle,
            epoch: 0,
            capture,
            transport: None,
            playback,
            events_tx,
            events_rx,
            status_tx,
            diagnostics: Arc::new(SessionDiagnostics::default()),
        }
    }

    /// Acquire the microphone, open the socket and go Active with capture on.
    ///
    /// Blocks until the capture device is confirmed open. The socket connects
    /// in the background; a connection failure is logged and does not prevent
    /// entering Active.
    ///
    /// # Errors
    /// - `BanterError::AlreadyActive` unless the session is Idle.
    /// - `BanterError::PermissionDenied` / device errors from the capture
    ///   source. The session stays Idle and an `Error` status is broadcast.
    pub fn start(&mut self, token: Option<AuthToken>) -> Result<()> {
        if self.state != SessionState::Idle {
            warn!(state = ?self.state, "start() ignored: session already running");
            return Err(BanterError::AlreadyActive);
        }

        self.epoch = self.epoch.wrapping_add(1);
        let epoch = self.epoch;
        self.set_state(SessionState::Starting, None);

        let params = CaptureParams {
            sample_rate: self.config.sample_rate,
            block_size: self.config.block_size,
            preferred_device: self.config.preferred_input_device.clone(),
        };
        let capture_tx = self.events_tx.clone();
        let deliver: BlockCallback = Box::new(move |event| {
            let _ = capture_tx.send(SessionEvent::Capture { epoch, event });
        });

        if let Err(e) = self.capture.open(&params, deliver) {
            error!(error = %e, "microphone acquisition failed");
            self.capture.close();
            self.epoch = self.epoch.wrapping_add(1);
            self.state = SessionState::Idle;
            self.broadcast(SessionStatus::Error, Some(e.to_string()));
            return Err(e);
        }

        let transport_tx = self.events_tx.clone();
        let on_event: TransportCallback = Arc::new(move |event| {
            let _ = transport_tx.send(SessionEvent::Transport { epoch, event });
        });
        let mut transport = TransportSession::new(self.config.schema.clone());
        if let Err(e) = transport.connect(&self.config.endpoint_url, token, on_event) {
            warn!(error = %e, "could not connect; session continues without a socket");
        }
        self.transport = Some(transport);

        self.set_state(SessionState::Active { capturing: true }, None);
        info!(
            endpoint = %self.config.endpoint_url,
            sample_rate = self.config.sample_rate,
            block_size = self.config.block_size,
            "voice session started"
        );
        Ok(())
    }

    /// End the conversation. Idempotent; valid in any state.
    pub fn stop(&mut self) {
        if self.teardown() {
            self.set_state(SessionState::Idle, None);
            info!("voice session stopped");
        }
    }

    /// Toggle the capturing sub-state while Active.
    ///
    /// Returns `false` (and does nothing) when the session is not Active.
    /// Muted blocks are still delivered by the source and discarded here.
    pub fn set_capturing(&mut self, capturing: bool) -> bool {
        match self.state {
            SessionState::Active { .. } => {
                self.state = SessionState::Active { capturing };
                info!(capturing, "capture toggled");
                true
            }
            _ => false,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_capturing(&self) -> bool {
        matches!(self.state, SessionState::Active { capturing: true })
    }

    /// `true` while a segment is rendering.
    pub fn is_playing(&self) -> bool {
        self.playback.is_playing()
    }

    /// Segments waiting behind the active render.
    pub fn queued_segments(&self) -> usize {
        self.playback.len()
    }

    /// State of the current socket; `Idle` when no conversation is running.
    pub fn connection_state(&self) -> ConnectionState {
        self.transport
            .as_ref()
            .map(TransportSession::state)
            .unwrap_or(ConnectionState::Idle)
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Subscribe to status change events.
    pub fn subscribe_status(&self) -> broadcast::Receiver<SessionStatusEvent> {
        self.status_tx.subscribe()
    }

    /// Shared traffic counters.
    pub fn diagnostics(&self) -> Arc<SessionDiagnostics> {
        Arc::clone(&self.diagnostics)
    }

    /// Wait for the next event and handle it.
    pub async fn process_next(&mut self) {
        if let Some(event) = self.events_rx.recv().await {
            self.handle_event(event);
        }
    }

    /// Handle every event already queued without waiting. Returns how many
    /// were handled.
    pub fn process_pending(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(event) = self.events_rx.try_recv() {
            self.handle_event(event);
            handled += 1;
        }
        handled
    }

    /// Drive the event loop until `shutdown` resolves, then `stop()`.
    pub async fn run<F>(&mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        loop {
            let next = tokio::select! {
                _ = &mut shutdown => None,
                event = self.events_rx.recv() => event,
            };
            match next {
                Some(event) => self.handle_event(event),
                None => break,
            }
        }
        self.stop();
    }

    // ── Event handling ───────────────────────────────────────────────────────

    fn handle_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Capture { epoch, .. } | SessionEvent::Transport { epoch, .. }
                if epoch != self.epoch =>
            {
                trace!(epoch, current = self.epoch, "event from a previous conversation ignored");
            }
            SessionEvent::Capture { event, .. } => self.on_capture(event),
            SessionEvent::Transport { event, .. } => self.on_transport(event),
            SessionEvent::Playback(signal) => {
                let completion = matches!(signal, PlaybackSignal::Completed(_));
                if self.playback.on_signal(signal) && completion {
                    SessionDiagnostics::bump(&self.diagnostics.segments_completed);
                }
            }
        }
    }

    fn on_capture(&mut self, event: CaptureEvent) {
        match event {
            CaptureEvent::Block(block) => {
                SessionDiagnostics::bump(&self.diagnostics.blocks_captured);
                if !self.is_capturing() {
                    SessionDiagnostics::bump(&self.diagnostics.blocks_discarded);
                    return;
                }
                let payload = codec::to_wire_text(&self.codec.encode(&block.samples));
                let sent = self
                    .transport
                    .as_ref()
                    .map(|t| t.send_audio(payload))
                    .unwrap_or(false);
                if sent {
                    SessionDiagnostics::bump(&self.diagnostics.blocks_sent);
                    trace!(samples = block.len(), "block sent");
                } else {
                    SessionDiagnostics::bump(&self.diagnostics.blocks_discarded);
                }
            }
            CaptureEvent::Failed(reason) => {
                error!(%reason, "capture device failed; stopping session");
                if self.teardown() {
                    self.state = SessionState::Idle;
                    self.broadcast(SessionStatus::Error, Some(reason));
                }
            }
        }
    }

    fn on_transport(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Opened => info!("streaming to voice endpoint"),
            TransportEvent::Inbound(InboundMessage::Audio { payload }) => {
                SessionDiagnostics::bump(&self.diagnostics.audio_frames_received);
                self.on_audio(&payload);
            }
            TransportEvent::Inbound(InboundMessage::SpeechStarted) => {
                if !matches!(self.state, SessionState::Active { .. }) {
                    return;
                }
                let dropped = self.playback.interrupt();
                SessionDiagnostics::bump(&self.diagnostics.interrupts);
                info!(dropped, "barge-in: playback interrupted");
            }
            TransportEvent::Malformed(reason) => {
                SessionDiagnostics::bump(&self.diagnostics.malformed_frames);
                debug!(%reason, "malformed message dropped");
            }
            TransportEvent::Error(reason) => debug!(%reason, "transport error reported"),
            TransportEvent::Closed => {
                info!("socket closed; session stays active until stop()");
            }
        }
    }

    fn on_audio(&mut self, payload: &str) {
        if !matches!(self.state, SessionState::Active { .. }) {
            return;
        }
        let decoded = codec::from_wire_text(payload).and_then(|bytes| self.codec.decode(&bytes));
        match decoded {
            Ok(segment) if segment.is_empty() => trace!("empty audio frame ignored"),
            Ok(segment) => {
                self.playback.enqueue(segment);
                SessionDiagnostics::bump(&self.diagnostics.segments_enqueued);
            }
            Err(e) => {
                SessionDiagnostics::bump(&self.diagnostics.malformed_frames);
                warn!(error = %e, "dropping undecodable audio frame");
            }
        }
    }

    // ── Internal helpers ─────────────────────────────────────────────────────

    /// Release capture, socket and playback. Returns whether anything was running.
    fn teardown(&mut self) -> bool {
        let was_running = self.state != SessionState::Idle;
        self.epoch = self.epoch.wrapping_add(1);
        self.capture.close();
        if let Some(mut transport) = self.transport.take() {
            transport.close();
        }
        let dropped = self.playback.interrupt();
        if dropped > 0 {
            debug!(dropped, "pending playback discarded");
        }
        self.state = SessionState::Idle;
        was_running
    }

    fn set_state(&mut self, state: SessionState, detail: Option<String>) {
        self.state = state;
        let status = match state {
            SessionState::Idle => SessionStatus::Idle,
            SessionState::Starting => SessionStatus::Starting,
            SessionState::Active { .. } => SessionStatus::Active,
        };
        self.broadcast(status, detail);
    }

    fn broadcast(&self, status: SessionStatus, detail: Option<String>) {
        let _ = self.status_tx.send(SessionStatusEvent { status, detail });
    }
}

impl Drop for VoiceSession {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::output::{RenderDone, RenderHandle};
    use crate::buffering::chunk::{AudioBlock, PlaybackSegment};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone, Default)]
    struct FakeCapture {
        deliver: Arc<Mutex<Option<BlockCallback>>>,
        opens: Arc<AtomicUsize>,
        deny: bool,
    }

    impl FakeCapture {
        fn emit(&self, event: CaptureEvent) {
            if let Some(deliver) = self.deliver.lock().as_mut() {
                deliver(event);
            }
        }
    }

    impl CaptureSource for FakeCapture {
        fn open(&mut self, _params: &CaptureParams, deliver: BlockCallback) -> Result<()> {
            if self.deny {
                return Err(BanterError::PermissionDenied("microphone blocked".into()));
            }
            self.opens.fetch_add(1, Ordering::SeqCst);
            *self.deliver.lock() = Some(deliver);
            Ok(())
        }

        fn close(&mut self) {
            self.deliver.lock().take();
        }

        fn is_open(&self) -> bool {
            self.deliver.lock().is_some()
        }
    }

    #[derive(Clone, Default)]
    struct FakeSink {
        rendered: Arc<Mutex<Vec<usize>>>,
        hooks: Arc<Mutex<Vec<(RenderHandle, RenderDone)>>>,
    }

    impl AudioSink for FakeSink {
        fn render(&mut self, segment: PlaybackSegment, done: RenderDone) -> Result<RenderHandle> {
            self.rendered.lock().push(segment.samples.len());
            let handle = RenderHandle::new();
            self.hooks.lock().push((handle.clone(), done));
            Ok(handle)
        }
    }

    fn session(capture: FakeCapture, sink: FakeSink) -> VoiceSession {
        let config = SessionConfig {
            // Nothing listens here; the socket fails in the background.
            endpoint_url: "ws://127.0.0.1:9/media-stream".into(),
            block_size: 4,
            ..SessionConfig::default()
        };
        VoiceSession::new(config, Box::new(capture), Box::new(sink))
    }

    fn audio(session: &VoiceSession, payload: &str) -> SessionEvent {
        SessionEvent::Transport {
            epoch: session.epoch,
            event: TransportEvent::Inbound(InboundMessage::Audio {
                payload: payload.into(),
            }),
        }
    }

    #[test]
    fn presets_match_deployments() {
        let relay = SessionConfig::local_relay();
        assert_eq!(relay.block_size, 1024);
        assert!(relay.schema.type_field.is_none());
        assert!(!relay.schema.auth_handshake);

        let platform = SessionConfig::voice_ai_platform();
        assert_eq!(platform.block_size, 16_384);
        assert!(platform.schema.auth_handshake);
        assert_eq!(platform.sample_rate, WIRE_SAMPLE_RATE);
    }

    #[test]
    fn stop_before_start_is_harmless() {
        let mut s = session(FakeCapture::default(), FakeSink::default());
        s.stop();
        s.stop();
        assert_eq!(s.state(), SessionState::Idle);
        assert!(!s.is_playing());
    }

    #[tokio::test]
    async fn start_then_stop_twice() {
        let capture = FakeCapture::default();
        let mut s = session(capture.clone(), FakeSink::default());
        let mut status = s.subscribe_status();

        s.start(None).unwrap();
        assert_eq!(s.state(), SessionState::Active { capturing: true });
        assert!(capture.is_open());

        s.stop();
        s.stop();
        assert_eq!(s.state(), SessionState::Idle);
        assert!(!capture.is_open());

        let seen: Vec<_> = std::iter::from_fn(|| status.try_recv().ok())
            .map(|e| e.status)
            .collect();
        assert_eq!(
            seen,
            vec![SessionStatus::Starting, SessionStatus::Active, SessionStatus::Idle]
        );
    }

    #[tokio::test]
    async fn second_start_is_rejected_without_reacquiring() {
        let capture = FakeCapture::default();
        let mut s = session(capture.clone(), FakeSink::default());
        s.start(None).unwrap();
        assert!(matches!(s.start(None), Err(BanterError::AlreadyActive)));
        assert_eq!(capture.opens.load(Ordering::SeqCst), 1);
        s.stop();
    }

    #[tokio::test]
    async fn denied_microphone_leaves_session_idle() {
        let capture = FakeCapture {
            deny: true,
            ..Default::default()
        };
        let mut s = session(capture, FakeSink::default());
        let mut status = s.subscribe_status();

        assert!(matches!(s.start(None), Err(BanterError::PermissionDenied(_))));
        assert_eq!(s.state(), SessionState::Idle);

        let last = std::iter::from_fn(|| status.try_recv().ok()).last().unwrap();
        assert_eq!(last.status, SessionStatus::Error);
        assert!(last.detail.unwrap().contains("microphone blocked"));
    }

    #[tokio::test]
    async fn device_failure_stops_the_session() {
        let capture = FakeCapture::default();
        let mut s = session(capture.clone(), FakeSink::default());
        s.start(None).unwrap();

        capture.emit(CaptureEvent::Failed("device unplugged".into()));
        s.process_pending();

        assert_eq!(s.state(), SessionState::Idle);
        assert!(!capture.is_open());
    }

    #[tokio::test]
    async fn events_from_a_previous_conversation_are_ignored() {
        let capture = FakeCapture::default();
        let mut s = session(capture.clone(), FakeSink::default());
        s.start(None).unwrap();
        let stale = s.epoch;
        s.stop();
        s.start(None).unwrap();

        s.handle_event(SessionEvent::Capture {
            epoch: stale,
            event: CaptureEvent::Failed("old device".into()),
        });
        assert_eq!(s.state(), SessionState::Active { capturing: true });
        s.stop();
    }

    #[tokio::test]
    async fn muted_blocks_are_discarded() {
        let capture = FakeCapture::default();
        let mut s = session(capture.clone(), FakeSink::default());
        s.start(None).unwrap();
        assert!(s.set_capturing(false));
        assert_eq!(s.state(), SessionState::Active { capturing: false });

        capture.emit(CaptureEvent::Block(AudioBlock::new(vec![0.1; 4], WIRE_SAMPLE_RATE)));
        s.process_pending();

        let snap = s.diagnostics().snapshot();
        assert_eq!(snap.blocks_captured, 1);
        assert_eq!(snap.blocks_discarded, 1);
        assert_eq!(snap.blocks_sent, 0);
        s.stop();
        assert!(!s.set_capturing(true));
    }

    #[tokio::test]
    async fn inbound_audio_renders_and_barge_in_cuts_it_off() {
        let sink = FakeSink::default();
        let mut s = session(FakeCapture::default(), sink.clone());
        s.start(None).unwrap();

        // 4 bytes → 2 samples, 6 bytes → 3 samples
        s.handle_event(audio(&s, "AAABAA=="));
        s.handle_event(audio(&s, "AAABAAIA"));
        s.process_pending();
        assert!(s.is_playing());
        assert_eq!(s.queued_segments(), 1);
        assert_eq!(*sink.rendered.lock(), vec![2]);

        s.handle_event(SessionEvent::Transport {
            epoch: s.epoch,
            event: TransportEvent::Inbound(InboundMessage::SpeechStarted),
        });
        assert!(!s.is_playing());
        assert_eq!(s.queued_segments(), 0);
        assert!(sink.hooks.lock()[0].0.is_stopped());
        assert_eq!(s.state(), SessionState::Active { capturing: true });

        // the interrupted render reports completion late
        let (_, done) = sink.hooks.lock().remove(0);
        done();
        s.process_pending();
        assert!(!s.is_playing());
        assert_eq!(*sink.rendered.lock(), vec![2]);
        assert_eq!(s.diagnostics().snapshot().interrupts, 1);
        s.stop();
    }

    #[tokio::test]
    async fn malformed_base64_is_dropped() {
        let sink = FakeSink::default();
        let mut s = session(FakeCapture::default(), sink.clone());
        s.start(None).unwrap();

        s.handle_event(audio(&s, "not*base64!"));
        s.handle_event(audio(&s, "AAEC"));
        s.process_pending();

        assert_eq!(s.queued_segments(), 0);
        assert!(!s.is_playing());
        assert!(sink.rendered.lock().is_empty());
        assert_eq!(s.diagnostics().snapshot().malformed_frames, 2);
        assert_eq!(s.state(), SessionState::Active { capturing: true });
        s.stop();
    }

    #[test]
    fn audio_while_idle_is_ignored() {
        let sink = FakeSink::default();
        let mut s = session(FakeCapture::default(), sink.clone());
        s.handle_event(audio(&s, "AAABAA=="));
        s.process_pending();
        assert!(sink.rendered.lock().is_empty());
    }
}
