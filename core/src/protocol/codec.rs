// Message codec: JSON text frames with size limits

use super::messages::{ClientEnvelope, ServerEnvelope};
use crate::error::{Result, SyncError};

/// Maximum encoded outgoing message: 64 KB
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Maximum accepted incoming frame: 1 MB. Snapshots of large sessions are
/// well above the outgoing limit.
pub const MAX_INBOUND_SIZE: usize = 1024 * 1024;

/// Serialize a client envelope, rejecting it if it exceeds `max_size`
pub fn encode_client(envelope: &ClientEnvelope, max_size: usize) -> Result<String> {
    let text = serde_json::to_string(envelope)?;
    if text.len() > max_size {
        return Err(SyncError::MessageTooLarge {
            size: text.len(),
            max: max_size,
        });
    }
    Ok(text)
}

/// Deserialize a server frame
pub fn decode_server(text: &str) -> Result<ServerEnvelope> {
    if text.len() > MAX_INBOUND_SIZE {
        return Err(SyncError::Codec(format!(
            "Frame too large: {} bytes (max {})",
            text.len(),
            MAX_INBOUND_SIZE
        )));
    }
    Ok(serde_json::from_str(text)?)
}

/// Serialize a server envelope (used by in-process test servers)
pub fn encode_server(envelope: &ServerEnvelope) -> Result<String> {
    Ok(serde_json::to_string(envelope)?)
}

/// Deserialize a client frame (used by in-process test servers)
pub fn decode_client(text: &str) -> Result<ClientEnvelope> {
    if text.len() > MAX_INBOUND_SIZE {
        return Err(SyncError::Codec(format!(
            "Frame too large: {} bytes (max {})",
            text.len(),
            MAX_INBOUND_SIZE
        )));
    }
    Ok(serde_json::from_str(text)?)
}
