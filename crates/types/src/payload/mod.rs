pub mod gateway;
pub mod speaking;
pub mod voice;

pub use self::speaking::{Speaking, SpeakingFlags};

use serde::Deserialize;
use std::error::Error;
use std::fmt::Display;

use crate::{OpCode, VoiceOpCode};

/// Any inbound event the gateway control channel emits.
#[derive(Clone, Debug, PartialEq)]
pub enum GatewayEvent {
    /// An event was dispatched, carrying a sequence number.
    Dispatch(gateway::Dispatch),
    /// The server requested an immediate heartbeat.
    HeartbeatRequest,
    /// The server acknowledged a client heartbeat.
    HeartbeatAck,
    /// First payload of a connection, carrying the heartbeat interval.
    Hello(gateway::Hello),
    /// The session is invalid; `resumable` tells whether a resume
    /// may still be attempted.
    InvalidSession { resumable: bool },
    /// The server requested a reconnect.
    Reconnect,
}

impl GatewayEvent {
    /// Parses a gateway frame into a typed event.
    ///
    /// Returns `Ok(None)` for opcodes this crate does not know about so the
    /// caller can skip them.
    pub fn from_json(event: &str) -> Result<Option<Self>, EventParseError> {
        let raw: RawPayload = serde_json::from_str(event).map_err(EventParseError::new(event))?;
        let Some(opcode) = OpCode::from(raw.op) else {
            return Ok(None);
        };

        let parsed = match opcode {
            OpCode::Dispatch => {
                let sequence = raw.s.ok_or_else(|| EventParseError {
                    kind: EventParseErrorType::Deserializing {
                        event: event.to_owned(),
                    },
                    source: Some("dispatch event is missing a sequence".into()),
                })?;
                let kind = raw.t.ok_or_else(|| EventParseError {
                    kind: EventParseErrorType::Deserializing {
                        event: event.to_owned(),
                    },
                    source: Some("dispatch event is missing a type".into()),
                })?;
                Self::Dispatch(gateway::Dispatch {
                    sequence,
                    kind,
                    data: raw.d,
                })
            }
            OpCode::Heartbeat => Self::HeartbeatRequest,
            OpCode::HeartbeatAck => Self::HeartbeatAck,
            OpCode::Hello => {
                let hello = gateway::Hello::deserialize(raw.d)
                    .map_err(EventParseError::new(event))?;
                Self::Hello(hello)
            }
            OpCode::InvalidSession => {
                let resumable =
                    bool::deserialize(raw.d).map_err(EventParseError::new(event))?;
                Self::InvalidSession { resumable }
            }
            OpCode::Reconnect => Self::Reconnect,
            OpCode::Identify | OpCode::Resume => {
                return Err(EventParseError {
                    kind: EventParseErrorType::UnexpectedOpcode { opcode: raw.op },
                    source: None,
                });
            }
        };

        Ok(Some(parsed))
    }
}

/// Any inbound event the voice gateway emits.
#[derive(Clone, Debug, PartialEq)]
pub enum VoiceEvent {
    /// The server acknowledged a client heartbeat.
    HeartbeatAck,
    /// First payload of a connection, carrying the heartbeat interval.
    Hello(voice::Hello),
    /// Completion of the voice handshake.
    Ready(voice::Ready),
    /// A previous session was successfully resumed.
    Resumed,
    /// The negotiated encryption mode and secret key.
    SessionDescription(voice::SessionDescription),
    /// A user's speaking state changed.
    Speaking(Speaking),
}

impl VoiceEvent {
    /// Parses a voice gateway frame into a typed event.
    ///
    /// Returns `Ok(None)` for opcodes this crate does not know about so the
    /// caller can skip them.
    pub fn from_json(event: &str) -> Result<Option<Self>, EventParseError> {
        let raw: RawPayload = serde_json::from_str(event).map_err(EventParseError::new(event))?;
        let Some(opcode) = VoiceOpCode::from(raw.op) else {
            return Ok(None);
        };

        let parsed = match opcode {
            VoiceOpCode::HeartbeatAck => Self::HeartbeatAck,
            VoiceOpCode::Hello => Self::Hello(
                voice::Hello::deserialize(raw.d).map_err(EventParseError::new(event))?,
            ),
            VoiceOpCode::Ready => Self::Ready(
                voice::Ready::deserialize(raw.d).map_err(EventParseError::new(event))?,
            ),
            VoiceOpCode::Resumed => Self::Resumed,
            VoiceOpCode::SessionDescription => Self::SessionDescription(
                voice::SessionDescription::deserialize(raw.d)
                    .map_err(EventParseError::new(event))?,
            ),
            VoiceOpCode::Speaking => Self::Speaking(
                Speaking::deserialize(raw.d).map_err(EventParseError::new(event))?,
            ),
            VoiceOpCode::Identify
            | VoiceOpCode::SelectProtocol
            | VoiceOpCode::Heartbeat
            | VoiceOpCode::Resume => {
                return Err(EventParseError {
                    kind: EventParseErrorType::UnexpectedOpcode { opcode: raw.op },
                    source: None,
                });
            }
        };

        Ok(Some(parsed))
    }
}

/// Envelope shared by every gateway frame. Unknown fields are ignored.
#[derive(Deserialize)]
struct RawPayload {
    op: u8,
    #[serde(default)]
    s: Option<u64>,
    #[serde(default)]
    t: Option<String>,
    #[serde(default)]
    d: serde_json::Value,
}

/// A frame could not be turned into a typed event.
#[derive(Debug)]
pub struct EventParseError {
    pub(crate) kind: EventParseErrorType,
    pub(crate) source: Option<Box<dyn Error + Send + Sync>>,
}

impl EventParseError {
    fn new(event: &str) -> impl FnOnce(serde_json::Error) -> Self {
        let event = event.to_owned();
        move |source| Self {
            kind: EventParseErrorType::Deserializing { event },
            source: Some(Box::new(source)),
        }
    }

    #[must_use]
    pub const fn kind(&self) -> &EventParseErrorType {
        &self.kind
    }
}

impl Display for EventParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            EventParseErrorType::Deserializing { event } => {
                f.write_str("gateway event could not be deserialized: event=")?;
                f.write_str(event)
            }
            EventParseErrorType::UnexpectedOpcode { opcode } => {
                write!(f, "received client-to-server opcode {opcode} from the server")
            }
        }
    }
}

impl Error for EventParseError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.source
            .as_ref()
            .map(|source| &**source as &(dyn Error + 'static))
    }
}

#[derive(Debug)]
#[non_exhaustive]
pub enum EventParseErrorType {
    /// The frame could not be deserialized.
    Deserializing { event: String },

    /// The server sent an opcode only clients may send.
    UnexpectedOpcode { opcode: u8 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_gateway_hello() {
        let event = r#"{"op":10,"d":{"heartbeat_interval":41250},"s":null,"t":null}"#;
        let parsed = GatewayEvent::from_json(event).unwrap();
        assert_eq!(
            parsed,
            Some(GatewayEvent::Hello(gateway::Hello {
                heartbeat_interval: 41250,
            }))
        );
    }

    #[test]
    fn parses_dispatch_with_session_id() {
        let event = r#"{"op":0,"s":1,"t":"READY","d":{"session_id":"abc","v":10}}"#;
        let Some(GatewayEvent::Dispatch(dispatch)) = GatewayEvent::from_json(event).unwrap()
        else {
            panic!("expected dispatch");
        };

        assert_eq!(dispatch.sequence, 1);
        assert_eq!(dispatch.kind, "READY");

        let ready = dispatch
            .ready()
            .unwrap()
            .expect("should carry a ready payload");
        assert_eq!(ready.session_id, "abc");
    }

    #[test]
    fn dispatch_without_sequence_is_an_error() {
        let event = r#"{"op":0,"t":"READY","d":{}}"#;
        assert!(GatewayEvent::from_json(event).is_err());
    }

    #[test]
    fn parses_invalid_session_flag() {
        let event = r#"{"op":9,"d":false}"#;
        assert_eq!(
            GatewayEvent::from_json(event).unwrap(),
            Some(GatewayEvent::InvalidSession { resumable: false })
        );
    }

    #[test]
    fn unknown_opcode_is_skipped() {
        let event = r#"{"op":12,"d":{}}"#;
        assert_eq!(GatewayEvent::from_json(event).unwrap(), None);
    }

    #[test]
    fn parses_voice_hello_with_float_interval() {
        let event = r#"{"op":8,"d":{"heartbeat_interval":13750.0}}"#;
        assert_eq!(
            VoiceEvent::from_json(event).unwrap(),
            Some(VoiceEvent::Hello(voice::Hello {
                heartbeat_interval: 13750,
            }))
        );
    }

    #[test]
    fn parses_voice_ready() {
        let event = r#"{"op":2,"d":{"ssrc":5,"ip":"203.0.113.4","port":4000,"modes":["aead_xchacha20_poly1305_rtpsize"]}}"#;
        let Some(VoiceEvent::Ready(ready)) = VoiceEvent::from_json(event).unwrap() else {
            panic!("expected ready");
        };
        assert_eq!(ready.ssrc, 5);
        assert_eq!(ready.port, 4000);
    }
}
