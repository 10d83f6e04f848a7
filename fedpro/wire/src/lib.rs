//! Wire protocol framing, sequence numbers and control payloads for the
//! federate protocol client.
//!
//! This crate provides the low-level wire format shared by the session layer:
//! the 24-byte message header, incremental frame decoding over a byte stream,
//! skip-zero cyclic sequence numbers, and the typed payloads of the
//! session-control messages.
//!
//! ## Wire Format
//!
//! ```text
//! +------------------------+------------------------------+
//! | u32 packet_size        | total size including header  |
//! +------------------------+------------------------------+
//! | u32 sequence_number    | 0 = unsequenced              |
//! +------------------------+------------------------------+
//! | u64 session_id         | 0 = no session yet           |
//! +------------------------+------------------------------+
//! | u32 last_received      | receive watermark            |
//! +------------------------+------------------------------+
//! | u32 message_type       | see MessageType              |
//! +------------------------+------------------------------+
//! | payload                | packet_size - 24 bytes       |
//! +------------------------+------------------------------+
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod frame;
pub mod header;
pub mod payload;
pub mod sequence;

// Re-export main types
pub use error::WireError;
pub use frame::{FrameDecoder, Message, DEFAULT_MAX_PACKET_SIZE};
pub use header::{
    MessageHeader, MessageType, HEADER_SIZE, NO_SESSION_ID, PROTOCOL_VERSION,
};
pub use payload::{
    NewSessionPayload, NewSessionStatusPayload, ResponsePayload, ResumeRequestPayload,
    ResumeStatus, ResumeStatusPayload, SessionStatus,
};
pub use sequence::SequenceNumber;
