use std::error::Error;
use std::fmt::{self, Debug, Display};
use twilight_model::gateway::CloseFrame;

/// The voice connection failed in a way it will not recover from.
#[derive(Debug)]
pub struct VoiceError {
    pub(crate) kind: VoiceErrorType,
    pub(crate) source: Option<Box<dyn Error + Send + Sync>>,
}

impl VoiceError {
    pub(crate) const fn fatally_closed(frame: Option<CloseFrame<'static>>) -> Self {
        Self {
            kind: VoiceErrorType::FatallyClosed { frame },
            source: None,
        }
    }

    pub(crate) const fn retries_exhausted() -> Self {
        Self {
            kind: VoiceErrorType::RetriesExhausted,
            source: None,
        }
    }

    pub(crate) const fn partial_disconnect() -> Self {
        Self {
            kind: VoiceErrorType::PartialDisconnect,
            source: None,
        }
    }

    #[must_use]
    pub const fn kind(&self) -> &VoiceErrorType {
        &self.kind
    }
}

impl Display for VoiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            VoiceErrorType::FatallyClosed { frame: Some(frame) } => {
                write!(
                    f,
                    "voice gateway closed the connection with code {}",
                    frame.code
                )
            }
            VoiceErrorType::FatallyClosed { frame: None } => {
                f.write_str("voice gateway closed the connection")
            }
            VoiceErrorType::RetriesExhausted => f.write_str("ran out of reconnect attempts"),
            VoiceErrorType::NoSupportedMode { modes } => {
                write!(f, "no supported encryption mode offered: {modes:?}")
            }
            VoiceErrorType::PartialDisconnect => {
                f.write_str("audio transport died while the control channel stayed up")
            }
        }
    }
}

impl Error for VoiceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.source
            .as_ref()
            .map(|source| &**source as &(dyn Error + 'static))
    }
}

#[derive(Debug)]
#[non_exhaustive]
pub enum VoiceErrorType {
    /// The server closed with a code that forbids another attempt.
    FatallyClosed { frame: Option<CloseFrame<'static>> },

    /// Every allowed reconnect attempt failed.
    RetriesExhausted,

    /// The server offered no encryption mode this crate implements.
    NoSupportedMode { modes: Vec<String> },

    /// An audio task stopped while the websocket stayed healthy.
    PartialDisconnect,
}
