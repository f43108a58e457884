use std::error::Error;
use std::fmt::{self, Debug, Display};
use twilight_model::gateway::CloseFrame;

/// The gateway connection failed in a way it will not recover from.
#[derive(Debug)]
pub struct GatewayError {
    pub(crate) kind: GatewayErrorType,
    pub(crate) source: Option<Box<dyn Error + Send + Sync>>,
}

impl GatewayError {
    pub(crate) const fn fatally_closed(frame: Option<CloseFrame<'static>>) -> Self {
        Self {
            kind: GatewayErrorType::FatallyClosed { frame },
            source: None,
        }
    }

    pub(crate) const fn retries_exhausted() -> Self {
        Self {
            kind: GatewayErrorType::RetriesExhausted,
            source: None,
        }
    }

    #[must_use]
    pub const fn kind(&self) -> &GatewayErrorType {
        &self.kind
    }
}

impl Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            GatewayErrorType::FatallyClosed { frame: Some(frame) } => {
                write!(f, "gateway closed the connection with code {}", frame.code)
            }
            GatewayErrorType::FatallyClosed { frame: None } => {
                f.write_str("gateway closed the connection")
            }
            GatewayErrorType::RetriesExhausted => {
                f.write_str("ran out of reconnect attempts")
            }
        }
    }
}

impl Error for GatewayError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.source
            .as_ref()
            .map(|source| &**source as &(dyn Error + 'static))
    }
}

#[derive(Debug)]
#[non_exhaustive]
pub enum GatewayErrorType {
    /// The server closed with a code that forbids another attempt.
    FatallyClosed { frame: Option<CloseFrame<'static>> },

    /// Every allowed reconnect attempt failed.
    RetriesExhausted,
}
