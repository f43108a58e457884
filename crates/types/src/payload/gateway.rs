use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::Token;

/// A dispatched event with its sequence number.
///
/// The event body is kept as raw JSON; interpreting anything beyond the
/// handshake-relevant dispatches is the consumer's job.
#[derive(Clone, Debug, PartialEq)]
pub struct Dispatch {
    /// Sequence number of the event, used for heartbeats and resuming.
    pub sequence: u64,
    /// Name of the dispatched event, `READY` for example.
    pub kind: String,
    /// Raw event body.
    pub data: Value,
}

impl Dispatch {
    /// Parses the body as a `READY` payload, if this dispatch is one.
    ///
    /// A `READY` body that fails to deserialize is an error rather than
    /// `None`; no session can start without it.
    pub fn ready(&self) -> Result<Option<Ready>, serde_json::Error> {
        if self.kind == "READY" {
            serde_json::from_value(self.data.clone()).map(Some)
        } else {
            Ok(None)
        }
    }

    /// Whether this dispatch confirms a successful resume.
    #[must_use]
    pub fn is_resumed(&self) -> bool {
        self.kind == "RESUMED"
    }
}

/// Data of the `READY` dispatch that the connection itself cares about.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Ready {
    /// Id of the newly established session, required to resume it later.
    pub session_id: String,
    /// Gateway url to use for resuming, when the server provides one.
    #[serde(default)]
    pub resume_gateway_url: Option<String>,
}

/// First payload received after connecting.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Hello {
    /// Interval in milliseconds the client should heartbeat with.
    pub heartbeat_interval: u64,
}

/// Starts a new gateway session.
#[derive(Clone, Debug, Serialize)]
pub struct Identify {
    pub token: Token,
    pub properties: IdentifyProperties,
    pub compress: bool,
    pub large_threshold: u64,
    pub intents: u64,
}

impl Identify {
    #[must_use]
    pub fn new(token: Token, intents: u64) -> Self {
        Self {
            token,
            properties: IdentifyProperties::default(),
            compress: false,
            large_threshold: 250,
            intents,
        }
    }
}

/// Connection properties sent when identifying.
#[derive(Clone, Debug, Serialize)]
pub struct IdentifyProperties {
    pub os: String,
    pub browser: String,
    pub device: String,
}

impl Default for IdentifyProperties {
    fn default() -> Self {
        Self {
            os: std::env::consts::OS.to_owned(),
            browser: "switchboard".to_owned(),
            device: "switchboard".to_owned(),
        }
    }
}

/// Resumes a previously disconnected session.
#[derive(Clone, Debug, Serialize)]
pub struct Resume {
    pub token: Token,
    pub session_id: String,
    pub seq: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn identify_shape() {
        let identify = Identify::new(Token::from("a.b.c"), 1 << 7);
        let value = serde_json::to_value(&identify).unwrap();

        assert_eq!(value["token"], json!("a.b.c"));
        assert_eq!(value["compress"], json!(false));
        assert_eq!(value["large_threshold"], json!(250));
        assert_eq!(value["intents"], json!(128));
        assert_eq!(value["properties"]["browser"], json!("switchboard"));
    }

    #[test]
    fn resume_shape() {
        let resume = Resume {
            token: Token::from("a.b.c"),
            session_id: "abc".to_owned(),
            seq: 1,
        };
        let value = serde_json::to_value(&resume).unwrap();

        assert_eq!(
            value,
            json!({"token": "a.b.c", "session_id": "abc", "seq": 1})
        );
    }

    #[test]
    fn non_ready_dispatch_has_no_session() {
        let dispatch = Dispatch {
            sequence: 3,
            kind: "MESSAGE_CREATE".to_owned(),
            data: json!({"session_id": "nope"}),
        };
        assert!(dispatch.ready().unwrap().is_none());
        assert!(!dispatch.is_resumed());
    }

    #[test]
    fn malformed_ready_body_is_an_error() {
        let dispatch = Dispatch {
            sequence: 1,
            kind: "READY".to_owned(),
            data: json!({"v": 10}),
        };
        assert!(dispatch.ready().is_err());
    }
}
