//! JSON envelopes exchanged with the voice endpoint.
//!
//! Two deployments speak slightly different dialects:
//!
//! | | Variant A ([`WireSchema::typed`]) | Variant B ([`WireSchema::untyped`]) |
//! |---|---|---|
//! | audio out / in | `{"type":"audio","payload":"<b64>"}` | `{"payload":"<b64>"}` |
//! | barge-in | `{"type":"speech_started"}` | — |
//! | auth on open | `{"token":"<token>"}` | — |
//!
//! A [`WireSchema`] captures the field names and the handshake flag so the
//! framing code never has to know which deployment it is talking to.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{BanterError, Result};

/// Opaque session token from the login collaborator.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthToken(String);

impl AuthToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AuthToken(<redacted>)")
    }
}

/// Field names and handshake behaviour of one deployment's wire dialect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct WireSchema {
    /// Discriminator field. `None` means audio is recognised by payload presence.
    pub type_field: Option<String>,
    pub audio_type: String,
    pub speech_started_type: String,
    pub payload_field: String,
    pub token_field: String,
    /// Send `{token_field: <token>}` once after the socket opens.
    pub auth_handshake: bool,
}

impl WireSchema {
    /// Variant A: typed envelopes, barge-in signal, token handshake.
    pub fn typed() -> Self {
        Self {
            type_field: Some("type".into()),
            audio_type: "audio".into(),
            speech_started_type: "speech_started".into(),
            payload_field: "payload".into(),
            token_field: "token".into(),
            auth_handshake: true,
        }
    }

    /// Variant B: bare `{payload}` envelopes, no handshake.
    pub fn untyped() -> Self {
        Self {
            type_field: None,
            auth_handshake: false,
            ..Self::typed()
        }
    }

    /// Serialize an outbound audio envelope around a base64 payload.
    pub fn audio_envelope(&self, payload: String) -> String {
        let mut map = Map::new();
        if let Some(type_field) = &self.type_field {
            map.insert(type_field.clone(), Value::String(self.audio_type.clone()));
        }
        map.insert(self.payload_field.clone(), Value::String(payload));
        Value::Object(map).to_string()
    }

    /// Serialize the one-shot auth envelope.
    pub fn auth_envelope(&self, token: &AuthToken) -> String {
        let mut map = Map::new();
        map.insert(
            self.token_field.clone(),
            Value::String(token.as_str().to_string()),
        );
        Value::Object(map).to_string()
    }

    /// Route one inbound text message.
    ///
    /// Returns `Ok(None)` for well-formed messages this client does not handle.
    ///
    /// # Errors
    /// `BanterError::Protocol` when the text is not a JSON object or an audio
    /// message carries no string payload.
    pub fn classify(&self, text: &str) -> Result<Option<InboundMessage>> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| BanterError::Protocol(format!("invalid JSON: {e}")))?;
        let Value::Object(map) = value else {
            return Err(BanterError::Protocol("envelope is not a JSON object".into()));
        };

        match &self.type_field {
            Some(type_field) => match map.get(type_field).and_then(Value::as_str) {
                Some(t) if t == self.audio_type => self.audio_payload(&map).map(Some),
                Some(t) if t == self.speech_started_type => Ok(Some(InboundMessage::SpeechStarted)),
                _ => Ok(None),
            },
            None if map.contains_key(&self.payload_field) => self.audio_payload(&map).map(Some),
            None => Ok(None),
        }
    }

    fn audio_payload(&self, map: &Map<String, Value>) -> Result<InboundMessage> {
        match map.get(&self.payload_field) {
            Some(Value::String(payload)) => Ok(InboundMessage::Audio {
                payload: payload.clone(),
            }),
            Some(_) => Err(BanterError::Protocol(format!(
                "'{}' is not a string",
                self.payload_field
            ))),
            None => Err(BanterError::Protocol(format!(
                "audio message without '{}'",
                self.payload_field
            ))),
        }
    }
}

impl Default for WireSchema {
    fn default() -> Self {
        Self::typed()
    }
}

/// The two inbound messages the client acts on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundMessage {
    /// Base64 PCM16LE mono audio to play.
    Audio { payload: String },
    /// The remote heard the user start talking: barge-in.
    SpeechStarted,
}
