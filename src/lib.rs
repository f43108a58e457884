#![forbid(unsafe_code)]
#![warn(
    clippy::pedantic,
    clippy::must_use_candidate,
    clippy::empty_enum,
    clippy::unwrap_used
)]
#![allow(
    clippy::new_without_default,
    clippy::empty_docs,
    clippy::missing_errors_doc,
    clippy::module_name_repetitions
)]

pub mod crypto;
pub mod gateway;
pub mod heartbeat;
pub mod reconnect;
pub mod session;
pub mod shutdown;
pub mod transport;

/// This module drives the voice side of a connection: the voice websocket,
/// ip discovery, packet encryption, and the paired audio tasks.
pub mod voice;

mod pipeline;

pub use switchboard_types as types;

pub use self::reconnect::ReconnectOptions;
pub use self::types::Token;
