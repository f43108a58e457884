use serde::Serialize;
use std::fmt::{self, Debug, Display};

/// An authentication token that keeps itself out of logs.
///
/// `Debug` and `Display` print a placeholder; the real value only leaves
/// through [`expose`](Self::expose) or serialization into a payload.
#[derive(Clone, Serialize)]
#[serde(transparent)]
pub struct Token(Box<str>);

impl Token {
    /// Returns the secret value.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl From<String> for Token {
    fn from(value: String) -> Self {
        Self(value.into_boxed_str())
    }
}

impl From<&str> for Token {
    fn from(value: &str) -> Self {
        Self(value.into())
    }
}

impl Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Token(<redacted>)")
    }
}

impl Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<redacted>")
    }
}
