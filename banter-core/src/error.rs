use thiserror::Error;

/// All errors produced by banter-core.
#[derive(Debug, Error)]
pub enum BanterError {
    #[error("microphone access denied: {0}")]
    PermissionDenied(String),

    #[error("audio device error: {0}")]
    AudioDevice(String),

    #[error("audio stream error: {0}")]
    AudioStream(String),

    #[error("no default input device found")]
    NoDefaultInputDevice,

    #[error("no default output device found")]
    NoDefaultOutputDevice,

    #[error("malformed PCM16 frame: odd byte length {len}")]
    MalformedFrame { len: usize },

    #[error("invalid base64 payload: {0}")]
    Decode(#[from] base64::DecodeError),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("invalid endpoint url '{url}': {reason}")]
    InvalidEndpoint { url: String, reason: String },

    #[error("session is already active")]
    AlreadyActive,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl BanterError {
    /// Errors scoped to a single inbound message; the session keeps running.
    pub fn is_per_message(&self) -> bool {
        matches!(
            self,
            BanterError::MalformedFrame { .. } | BanterError::Decode(_) | BanterError::Protocol(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, BanterError>;
