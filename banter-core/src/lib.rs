//! # banter-core
//!
//! Real-time, full-duplex voice client engine.
//!
//! ## Architecture
//!
//! ```text
//! Microphone → CpalCapture → SPSC RingBuffer → capture worker (resample, chunk)
//!                                                    │ AudioBlock
//!                                                    ▼
//!                         VoiceSession event loop ──encode──► TransportSession ⇄ endpoint
//!                                  ▲   │                              │
//!                    PlaybackSignal│   │decode                        │ audio / speech_started
//!                                  │   ▼                              │
//!               CpalSink ◄── PlaybackQueue ◄──────────────────────────┘
//! ```
//!
//! The audio callbacks are zero-alloc. All session state is mutated on one
//! event loop; capture, socket and render completions reach it as messages.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod audio;
pub mod buffering;
pub mod codec;
pub mod error;
pub mod events;
pub mod playback;
pub mod session;
pub mod transport;

// Convenience re-exports for downstream crates
pub use audio::{
    output::{AudioSink, CpalSink, RenderDone, RenderHandle},
    CaptureEvent, CaptureParams, CaptureSource, CpalCapture,
};
pub use buffering::chunk::{AudioBlock, PlaybackSegment};
pub use codec::PcmCodec;
pub use error::BanterError;
pub use events::{SessionStatus, SessionStatusEvent};
pub use playback::PlaybackQueue;
pub use session::{
    DiagnosticsSnapshot, SessionConfig, SessionDiagnostics, SessionState, VoiceSession,
    WIRE_SAMPLE_RATE,
};
pub use transport::{AuthToken, ConnectionState, InboundMessage, TransportSession, WireSchema};
