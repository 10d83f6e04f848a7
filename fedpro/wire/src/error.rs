//! Wire protocol error types.

use thiserror::Error;

/// Wire protocol errors
#[derive(Error, Debug)]
pub enum WireError {
    /// Packet size below the header size or above the configured limit
    #[error("invalid packet size: {0}")]
    PacketSize(u64),

    /// Unknown message type code
    #[error("unknown message type {0}")]
    Type(u32),

    /// Unknown status or reason code in a control payload
    #[error("unknown code {0}")]
    Code(u32),

    /// Unsupported protocol version
    #[error("version unsupported: {0}")]
    Version(u32),

    /// Payload too short for the declared message type
    #[error("truncated payload for {typ}: {len} bytes")]
    Truncated {
        /// Message type whose payload was short
        typ: &'static str,
        /// Bytes actually available
        len: usize,
    },

    /// Malformed frame structure
    #[error("malformed frame")]
    Malformed,
}
