//! Typed payloads for control messages.
//!
//! Data messages carry opaque blobs owned by the upper API layer; the
//! session-control messages defined here have small fixed formats that the
//! session engine must understand.

use crate::sequence::SequenceNumber;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

/// Reason codes in a new-session-status reply
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStatus {
    /// Session accepted
    Success = 0,
    /// Server does not speak the offered protocol version
    UnsupportedVersion = 1,
    /// Server cannot host another session
    OutOfResources = 2,
    /// Unspecified failure
    Other = 99,
}

impl TryFrom<u32> for SessionStatus {
    type Error = crate::WireError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(SessionStatus::Success),
            1 => Ok(SessionStatus::UnsupportedVersion),
            2 => Ok(SessionStatus::OutOfResources),
            99 => Ok(SessionStatus::Other),
            _ => Err(crate::WireError::Code(value)),
        }
    }
}

/// Status codes in a resume-status reply
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResumeStatus {
    /// The server holds enough history to continue the session
    OkToResume = 0,
    /// The session id is unknown or already terminated
    InvalidSession = 1,
    /// The server dropped messages the client never received
    InsufficientHistory = 2,
    /// Unspecified failure
    Other = 99,
}

impl TryFrom<u32> for ResumeStatus {
    type Error = crate::WireError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ResumeStatus::OkToResume),
            1 => Ok(ResumeStatus::InvalidSession),
            2 => Ok(ResumeStatus::InsufficientHistory),
            99 => Ok(ResumeStatus::Other),
            _ => Err(crate::WireError::Code(value)),
        }
    }
}

/// New-session payload: the protocol version the client speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewSessionPayload {
    /// Offered protocol version
    pub version: u32,
}

impl NewSessionPayload {
    /// Encoded size in bytes
    pub const SIZE: usize = 4;

    /// Encode the payload (big-endian)
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32(self.version);
    }

    /// Decode the payload
    pub fn decode(buf: &mut Bytes) -> Result<Self, crate::WireError> {
        if buf.len() < Self::SIZE {
            return Err(crate::WireError::Truncated {
                typ: "new-session",
                len: buf.len(),
            });
        }
        Ok(Self {
            version: buf.get_u32(),
        })
    }
}

/// New-session-status payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewSessionStatusPayload {
    /// Outcome of the session establishment
    pub reason: SessionStatus,
}

impl NewSessionStatusPayload {
    /// Encoded size in bytes
    pub const SIZE: usize = 4;

    /// Encode the payload (big-endian)
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32(self.reason as u32);
    }

    /// Decode the payload
    pub fn decode(buf: &mut Bytes) -> Result<Self, crate::WireError> {
        if buf.len() < Self::SIZE {
            return Err(crate::WireError::Truncated {
                typ: "new-session-status",
                len: buf.len(),
            });
        }
        Ok(Self {
            reason: SessionStatus::try_from(buf.get_u32())?,
        })
    }
}

/// Resume-request payload: what the client has seen and what it can replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumeRequestPayload {
    /// Highest sequence number the client received before the drop
    pub last_received: SequenceNumber,
    /// Oldest sequence number still held in the client's replay buffer
    pub oldest_available: SequenceNumber,
}

impl ResumeRequestPayload {
    /// Encoded size in bytes
    pub const SIZE: usize = 8;

    /// Encode the payload (big-endian)
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32(self.last_received.get());
        buf.put_u32(self.oldest_available.get());
    }

    /// Decode the payload
    pub fn decode(buf: &mut Bytes) -> Result<Self, crate::WireError> {
        if buf.len() < Self::SIZE {
            return Err(crate::WireError::Truncated {
                typ: "resume-request",
                len: buf.len(),
            });
        }
        Ok(Self {
            last_received: SequenceNumber::new(buf.get_u32()),
            oldest_available: SequenceNumber::new(buf.get_u32()),
        })
    }
}

/// Resume-status payload: the server's verdict plus its receive watermark.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumeStatusPayload {
    /// Whether the session can continue
    pub status: ResumeStatus,
    /// Highest sequence number the server received from this client
    pub last_received: SequenceNumber,
}

impl ResumeStatusPayload {
    /// Encoded size in bytes
    pub const SIZE: usize = 8;

    /// Encode the payload (big-endian)
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32(self.status as u32);
        buf.put_u32(self.last_received.get());
    }

    /// Decode the payload
    pub fn decode(buf: &mut Bytes) -> Result<Self, crate::WireError> {
        if buf.len() < Self::SIZE {
            return Err(crate::WireError::Truncated {
                typ: "resume-status",
                len: buf.len(),
            });
        }
        Ok(Self {
            status: ResumeStatus::try_from(buf.get_u32())?,
            last_received: SequenceNumber::new(buf.get_u32()),
        })
    }
}

/// Payload of heartbeat-response, call-response and callback-response
/// messages: the sequence number being answered plus an opaque blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponsePayload {
    /// Sequence number of the message this responds to
    pub responding_to: SequenceNumber,
    /// Opaque result or exception bytes, owned by the upper layer
    pub blob: Bytes,
}

impl ResponsePayload {
    /// Encoded size in bytes
    pub fn size(&self) -> usize {
        4 + self.blob.len()
    }

    /// Encode the payload (big-endian)
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32(self.responding_to.get());
        buf.put_slice(&self.blob);
    }

    /// Decode the payload. The remainder of the buffer is the blob.
    pub fn decode(buf: &mut Bytes) -> Result<Self, crate::WireError> {
        if buf.len() < 4 {
            return Err(crate::WireError::Truncated {
                typ: "response",
                len: buf.len(),
            });
        }
        let responding_to = SequenceNumber::new(buf.get_u32());
        Ok(Self {
            responding_to,
            blob: buf.split_to(buf.len()),
        })
    }
}
