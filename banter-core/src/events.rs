//! Status events broadcast to observers of a [`VoiceSession`](crate::VoiceSession).
//!
//! Subscribe with [`VoiceSession::subscribe_status`](crate::VoiceSession::subscribe_status).
//! Both types serialize to camelCase JSON so a host can forward them as-is.

use serde::{Deserialize, Serialize};

/// Emitted whenever the session changes state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatusEvent {
    pub status: SessionStatus,
    /// Human-readable detail, e.g. why capture failed.
    pub detail: Option<String>,
}

/// Coarse session state as seen from outside.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Not started, or stopped.
    Idle,
    /// Acquiring the microphone and connecting.
    Starting,
    /// Conversation running.
    Active,
    /// A fatal error ended (or prevented) the conversation. The session is
    /// back to idle and may be started again.
    Error,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_event_serializes_lowercase_status() {
        let event = SessionStatusEvent {
            status: SessionStatus::Error,
            detail: Some("microphone denied".into()),
        };
        let json = serde_json::to_value(&event).expect("serialize status event");
        assert_eq!(json["status"], "error");
        assert_eq!(json["detail"], "microphone denied");
    }

    #[test]
    fn status_event_without_detail_round_trips() {
        let json = r#"{"status":"active","detail":null}"#;
        let event: SessionStatusEvent = serde_json::from_str(json).expect("deserialize");
        assert_eq!(event.status, SessionStatus::Active);
        assert!(event.detail.is_none());
    }
}
