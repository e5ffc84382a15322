pub mod channel;
pub mod messages;

pub use channel::{endpoint_url, ChannelHandle, InboundEvent, InboundStream, SignalingChannel};
pub use messages::{ClientMessage, ServerMessage, TextPayload};
