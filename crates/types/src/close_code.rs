use serde_repr::{Deserialize_repr, Serialize_repr};
use std::{error::Error, fmt::Display};

/// Gateway close event codes.
#[derive(Clone, Copy, Debug, Deserialize_repr, Eq, Hash, PartialEq, Serialize_repr)]
#[non_exhaustive]
#[repr(u16)]
pub enum CloseCode {
    /// An unknown error occurred.
    UnknownError = 4000,
    /// An invalid opcode was sent.
    UnknownOpcode = 4001,
    /// An invalid payload was sent.
    DecodeError = 4002,
    /// A payload was sent prior to identifying.
    NotAuthenticated = 4003,
    /// An invalid token was sent when identifying.
    AuthenticationFailed = 4004,
    /// Multiple identify payloads were sent.
    AlreadyAuthenticated = 4005,
    /// An invalid sequence was sent for resuming.
    InvalidSequence = 4007,
    /// Too many payloads were sent in a certain amount of time.
    RateLimited = 4008,
    /// The session timed out.
    SessionTimedOut = 4009,
    /// An invalid shard was sent when identifying.
    InvalidShard = 4010,
    /// Sharding is required to connect.
    ShardingRequired = 4011,
    /// An invalid version for the gateway was sent.
    InvalidApiVersion = 4012,
    /// An invalid intent was sent.
    InvalidIntents = 4013,
    /// A disallowed intent was sent, may need allowlisting.
    DisallowedIntents = 4014,
}

impl CloseCode {
    /// Whether a raw close code permits another connection attempt at all.
    ///
    /// The authentication failure family (bad token, sharding or intent
    /// misconfiguration) is terminal; everything else, including close codes
    /// this enum does not know about, may retry.
    #[must_use]
    pub const fn is_retryable(code: u16) -> bool {
        !matches!(code, 4004 | 4010..=4014)
    }

    /// Whether a raw close code leaves the prior session in a resumable
    /// state. Codes at or above the reserved authentication range always
    /// force a fresh identify.
    #[must_use]
    pub const fn is_resumable(code: u16) -> bool {
        code < 4010 && code != 4004
    }
}

impl From<CloseCode> for u16 {
    fn from(val: CloseCode) -> Self {
        val as u16
    }
}

/// Voice gateway close event codes.
#[derive(Clone, Copy, Debug, Deserialize_repr, Eq, Hash, PartialEq, Serialize_repr)]
#[non_exhaustive]
#[repr(u16)]
pub enum VoiceCloseCode {
    /// An invalid opcode was sent.
    UnknownOpcode = 4001,
    /// An invalid payload was sent.
    DecodeError = 4002,
    /// A payload was sent prior to identifying.
    NotAuthenticated = 4003,
    /// An invalid token was sent when identifying.
    AuthenticationFailed = 4004,
    /// Multiple identify payloads were sent.
    AlreadyAuthenticated = 4005,
    /// The session was invalidated.
    SessionNoLongerValid = 4006,
    /// The session timed out.
    SessionTimedOut = 4009,
    /// The specified voice server was not found.
    ServerNotFound = 4011,
    /// An unknown protocol was sent.
    UnknownProtocol = 4012,
    /// Disconnected from the voice channel.
    Disconnected = 4014,
    /// The voice server crashed.
    VoiceServerCrashed = 4015,
    /// The encryption mode could not be recognized.
    UnknownEncryptionMode = 4016,
}

impl VoiceCloseCode {
    /// Whether a raw close code permits another voice connection attempt.
    ///
    /// An invalid token and a deliberate channel disconnect are terminal.
    #[must_use]
    pub const fn is_retryable(code: u16) -> bool {
        !matches!(code, 4004 | 4014)
    }

    /// Whether a raw close code leaves the voice session resumable. Every
    /// code in the voice protocol range invalidates the session.
    #[must_use]
    pub const fn is_resumable(code: u16) -> bool {
        code < 4000
    }
}

impl From<VoiceCloseCode> for u16 {
    fn from(val: VoiceCloseCode) -> Self {
        val as u16
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct CloseCodeConversionError {
    code: u16,
}

impl CloseCodeConversionError {
    #[must_use]
    const fn new(code: u16) -> Self {
        Self { code }
    }

    #[must_use]
    pub const fn code(&self) -> u16 {
        self.code
    }
}

impl Display for CloseCodeConversionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.code, f)?;
        f.write_str(" is not a valid close code")
    }
}

impl Error for CloseCodeConversionError {}

impl TryFrom<u16> for CloseCode {
    type Error = CloseCodeConversionError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        let close_code = match value {
            4000 => Self::UnknownError,
            4001 => Self::UnknownOpcode,
            4002 => Self::DecodeError,
            4003 => Self::NotAuthenticated,
            4004 => Self::AuthenticationFailed,
            4005 => Self::AlreadyAuthenticated,
            4007 => Self::InvalidSequence,
            4008 => Self::RateLimited,
            4009 => Self::SessionTimedOut,
            4010 => Self::InvalidShard,
            4011 => Self::ShardingRequired,
            4012 => Self::InvalidApiVersion,
            4013 => Self::InvalidIntents,
            4014 => Self::DisallowedIntents,
            _ => return Err(CloseCodeConversionError::new(value)),
        };

        Ok(close_code)
    }
}

impl TryFrom<u16> for VoiceCloseCode {
    type Error = CloseCodeConversionError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        let close_code = match value {
            4001 => Self::UnknownOpcode,
            4002 => Self::DecodeError,
            4003 => Self::NotAuthenticated,
            4004 => Self::AuthenticationFailed,
            4005 => Self::AlreadyAuthenticated,
            4006 => Self::SessionNoLongerValid,
            4009 => Self::SessionTimedOut,
            4011 => Self::ServerNotFound,
            4012 => Self::UnknownProtocol,
            4014 => Self::Disconnected,
            4015 => Self::VoiceServerCrashed,
            4016 => Self::UnknownEncryptionMode,
            _ => return Err(CloseCodeConversionError::new(value)),
        };

        Ok(close_code)
    }
}
