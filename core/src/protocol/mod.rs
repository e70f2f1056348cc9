//! Session server wire protocol

pub mod codec;
pub mod messages;

pub use codec::{
    decode_client, decode_server, encode_client, encode_server, MAX_INBOUND_SIZE,
    MAX_MESSAGE_SIZE,
};
pub use messages::{Broadcast, ClientEnvelope, ClientMessage, ServerEnvelope, ServerMessage};
