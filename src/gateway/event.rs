use switchboard_types::payload::gateway::{Dispatch, Ready};
use twilight_model::gateway::CloseFrame;

/// Connection-level events handed to the consumer, in receive order.
#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    /// The handshake finished with a fresh session.
    Ready(Ready),

    /// The previous session was resumed; missed dispatches follow.
    Resumed,

    /// An ordered gateway dispatch.
    Dispatch(Dispatch),

    /// The connection wound down for good, carrying the final close frame
    /// when the server sent one. Always the last event.
    Closed(Option<CloseFrame<'static>>),
}
