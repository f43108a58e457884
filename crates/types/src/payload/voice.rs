use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use twilight_model::id::{
    Id,
    marker::{GuildMarker, UserMarker},
};

use crate::payload::SpeakingFlags;
use crate::deserializers::{ip_string, millis_from_f64};
use crate::{RTP_KEY_LEN, Token};

/// First payload received after connecting to the voice gateway.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Hello {
    /// Interval in milliseconds the client should heartbeat with.
    ///
    /// The voice gateway reports this as a floating point value.
    #[serde(with = "millis_from_f64")]
    pub heartbeat_interval: u64,
}

/// Completion of the websocket half of the voice handshake.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Ready {
    /// Synchronization source assigned to this client.
    pub ssrc: u32,
    /// Address of the voice media server.
    #[serde(with = "ip_string")]
    pub ip: IpAddr,
    /// Port of the voice media server.
    pub port: u16,
    /// Encryption modes the server supports, in no particular order.
    pub modes: Vec<String>,
}

/// The negotiated protocol description, carrying the secret key.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct SessionDescription {
    /// Encryption mode the server settled on.
    pub mode: String,
    /// Key used to encrypt and decrypt voice packets.
    pub secret_key: [u8; RTP_KEY_LEN],
}

/// Starts a new voice gateway session.
#[derive(Clone, Debug, Serialize)]
pub struct Identify {
    pub server_id: Id<GuildMarker>,
    pub user_id: Id<UserMarker>,
    pub session_id: String,
    pub token: Token,
}

/// Resumes a previously disconnected voice session.
#[derive(Clone, Debug, Serialize)]
pub struct Resume {
    pub server_id: Id<GuildMarker>,
    pub session_id: String,
    pub token: Token,
}

/// Tells the server which transport and encryption mode to use.
#[derive(Clone, Debug, Serialize)]
pub struct SelectProtocol {
    pub protocol: String,
    pub data: SelectProtocolData,
}

impl SelectProtocol {
    /// Selects UDP with the externally visible address found through ip
    /// discovery.
    #[must_use]
    pub fn udp(address: IpAddr, port: u16, mode: impl Into<String>) -> Self {
        Self {
            protocol: "udp".to_owned(),
            data: SelectProtocolData {
                address,
                port,
                mode: mode.into(),
            },
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct SelectProtocolData {
    #[serde(with = "ip_string")]
    pub address: IpAddr,
    pub port: u16,
    pub mode: String,
}

/// Announces this client's speaking state.
#[derive(Clone, Debug, Serialize)]
pub struct SentSpeaking {
    pub speaking: SpeakingFlags,
    pub delay: u8,
    pub ssrc: u32,
}
