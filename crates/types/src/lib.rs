#![forbid(unsafe_code)]
#![warn(
    clippy::pedantic,
    clippy::must_use_candidate,
    clippy::empty_enum,
    clippy::unwrap_used
)]
#![allow(
    clippy::new_without_default,
    clippy::missing_errors_doc,
    clippy::module_name_repetitions
)]

mod deserializers;

pub mod close_code;
pub mod opcode;
pub mod payload;
pub mod token;

pub use self::close_code::{CloseCode, VoiceCloseCode};
pub use self::opcode::{OpCode, VoiceOpCode};
pub use self::payload::{GatewayEvent, VoiceEvent};
pub use self::token::Token;

/// Discord gateway API version that switchboard currently supports.
pub const GATEWAY_VERSION: u8 = 10;

/// Discord voice gateway API version that switchboard currently supports.
pub const VOICE_GATEWAY_VERSION: u8 = 4;

/// Secret key size used to encrypt and decrypt voice packets.
pub const RTP_KEY_LEN: usize = 32;
