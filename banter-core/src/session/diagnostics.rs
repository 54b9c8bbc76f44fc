use std::sync::atomic::{AtomicUsize, Ordering};

use serde::Serialize;

/// Running traffic counters for one [`VoiceSession`](crate::VoiceSession).
///
/// Counters accumulate across starts.
#[derive(Debug, Default)]
pub struct SessionDiagnostics {
    pub blocks_captured: AtomicUsize,
    pub blocks_sent: AtomicUsize,
    /// Blocks dropped because capture was muted or the socket was not open.
    pub blocks_discarded: AtomicUsize,
    pub audio_frames_received: AtomicUsize,
    pub segments_enqueued: AtomicUsize,
    pub segments_completed: AtomicUsize,
    pub malformed_frames: AtomicUsize,
    pub interrupts: AtomicUsize,
}

impl SessionDiagnostics {
    pub(crate) fn bump(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            blocks_captured: self.blocks_captured.load(Ordering::Relaxed),
            blocks_sent: self.blocks_sent.load(Ordering::Relaxed),
            blocks_discarded: self.blocks_discarded.load(Ordering::Relaxed),
            audio_frames_received: self.audio_frames_received.load(Ordering::Relaxed),
            segments_enqueued: self.segments_enqueued.load(Ordering::Relaxed),
            segments_completed: self.segments_completed.load(Ordering::Relaxed),
            malformed_frames: self.malformed_frames.load(Ordering::Relaxed),
            interrupts: self.interrupts.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticsSnapshot {
    pub blocks_captured: usize,
    pub blocks_sent: usize,
    pub blocks_discarded: usize,
    pub audio_frames_received: usize,
    pub segments_enqueued: usize,
    pub segments_completed: usize,
    pub malformed_frames: usize,
    pub interrupts: usize,
}
