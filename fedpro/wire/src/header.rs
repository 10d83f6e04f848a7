//! Message header processing for the wire protocol.
//!
//! This module defines the 24-byte fixed header carried by every message,
//! which identifies the session, the message type, and the sequencing
//! information needed for resumption.

use crate::sequence::SequenceNumber;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

/// Protocol version sent in the new-session payload
pub const PROTOCOL_VERSION: u32 = 1;

/// Header size in bytes
pub const HEADER_SIZE: usize = 24;

/// Session id used before a session has been established
pub const NO_SESSION_ID: u64 = 0;

/// Message types as defined in the wire protocol
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    /// Session establishment request
    NewSession = 1,
    /// Session establishment reply
    NewSessionStatus = 2,
    /// Keep-alive probe
    Heartbeat = 3,
    /// Keep-alive reply
    HeartbeatResponse = 4,
    /// Orderly termination request
    Terminate = 5,
    /// Orderly termination reply
    Terminated = 6,
    /// Session resumption request
    ResumeRequest = 10,
    /// Session resumption reply
    ResumeStatus = 11,
    /// Sequenced service call
    CallRequest = 20,
    /// Reply to a service call
    CallResponse = 21,
    /// Sequenced callback from the remote side
    CallbackRequest = 22,
    /// Reply to a callback
    CallbackResponse = 23,
}

impl MessageType {
    /// Control messages manage the session itself rather than carry
    /// application traffic.
    pub fn is_control(self) -> bool {
        (self as u32) < 20
    }

    /// Responses the client produces to remote traffic. These take the
    /// alternate lane of the fair outgoing queue so that a backlog of
    /// requests cannot starve them.
    pub fn is_remote_response(self) -> bool {
        matches!(self, MessageType::CallResponse | MessageType::CallbackResponse)
    }
}

impl TryFrom<u32> for MessageType {
    type Error = crate::WireError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(MessageType::NewSession),
            2 => Ok(MessageType::NewSessionStatus),
            3 => Ok(MessageType::Heartbeat),
            4 => Ok(MessageType::HeartbeatResponse),
            5 => Ok(MessageType::Terminate),
            6 => Ok(MessageType::Terminated),
            10 => Ok(MessageType::ResumeRequest),
            11 => Ok(MessageType::ResumeStatus),
            20 => Ok(MessageType::CallRequest),
            21 => Ok(MessageType::CallResponse),
            22 => Ok(MessageType::CallbackRequest),
            23 => Ok(MessageType::CallbackResponse),
            _ => Err(crate::WireError::Type(value)),
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            MessageType::NewSession => "CTRL_NEW_SESSION",
            MessageType::NewSessionStatus => "CTRL_NEW_SESSION_STATUS",
            MessageType::Heartbeat => "CTRL_HEARTBEAT",
            MessageType::HeartbeatResponse => "CTRL_HEARTBEAT_RESPONSE",
            MessageType::Terminate => "CTRL_TERMINATE_SESSION",
            MessageType::Terminated => "CTRL_SESSION_TERMINATED",
            MessageType::ResumeRequest => "CTRL_RESUME_REQUEST",
            MessageType::ResumeStatus => "CTRL_RESUME_STATUS",
            MessageType::CallRequest => "HLA_CALL_REQUEST",
            MessageType::CallResponse => "HLA_CALL_RESPONSE",
            MessageType::CallbackRequest => "HLA_CALLBACK_REQUEST",
            MessageType::CallbackResponse => "HLA_CALLBACK_RESPONSE",
        };
        f.write_str(name)
    }
}

/// Message header structure (24 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageHeader {
    /// Total packet size including this header
    pub packet_size: u32,
    /// Sequence number, or `SequenceNumber::NONE` for unsequenced messages
    pub sequence_number: SequenceNumber,
    /// Session id, `NO_SESSION_ID` only on the initial new-session message
    pub session_id: u64,
    /// Highest sequence number received from the remote side
    pub last_received: SequenceNumber,
    /// Message type
    pub message_type: MessageType,
}

impl MessageHeader {
    /// Build a header for a payload of `payload_size` bytes.
    pub fn with_payload(
        payload_size: usize,
        sequence_number: SequenceNumber,
        session_id: u64,
        last_received: SequenceNumber,
        message_type: MessageType,
    ) -> Self {
        Self {
            packet_size: (HEADER_SIZE + payload_size) as u32,
            sequence_number,
            session_id,
            last_received,
            message_type,
        }
    }

    /// Size of the payload that follows this header.
    pub fn payload_size(&self) -> usize {
        self.packet_size as usize - HEADER_SIZE
    }

    /// Encode the header to bytes (big-endian)
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32(self.packet_size);
        buf.put_u32(self.sequence_number.get());
        buf.put_u64(self.session_id);
        buf.put_u32(self.last_received.get());
        buf.put_u32(self.message_type as u32);
    }

    /// Decode a header from bytes (big-endian)
    pub fn decode(buf: &mut Bytes) -> Result<Self, crate::WireError> {
        if buf.len() < HEADER_SIZE {
            return Err(crate::WireError::Malformed);
        }

        let packet_size = buf.get_u32();
        if (packet_size as usize) < HEADER_SIZE {
            return Err(crate::WireError::PacketSize(packet_size as u64));
        }

        let sequence_number = SequenceNumber::new(buf.get_u32());
        let session_id = buf.get_u64();
        let last_received = SequenceNumber::new(buf.get_u32());
        let message_type = MessageType::try_from(buf.get_u32())?;

        Ok(Self {
            packet_size,
            sequence_number,
            session_id,
            last_received,
            message_type,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_type_conversion() {
        assert_eq!(MessageType::try_from(1).unwrap(), MessageType::NewSession);
        assert_eq!(MessageType::try_from(23).unwrap(), MessageType::CallbackResponse);
        assert!(MessageType::try_from(7).is_err());
        assert!(MessageType::try_from(24).is_err());
    }

    #[test]
    fn control_partition() {
        assert!(MessageType::Heartbeat.is_control());
        assert!(MessageType::ResumeStatus.is_control());
        assert!(!MessageType::CallRequest.is_control());
        assert!(!MessageType::CallbackResponse.is_control());
    }

    #[test]
    fn remote_response_predicate() {
        assert!(MessageType::CallResponse.is_remote_response());
        assert!(MessageType::CallbackResponse.is_remote_response());
        assert!(!MessageType::CallRequest.is_remote_response());
        assert!(!MessageType::HeartbeatResponse.is_remote_response());
    }

    #[test]
    fn header_encode_decode() {
        let header = MessageHeader::with_payload(
            10,
            SequenceNumber::new(42),
            0xDEADBEEF,
            SequenceNumber::new(7),
            MessageType::CallRequest,
        );
        assert_eq!(header.packet_size, 34);
        assert_eq!(header.payload_size(), 10);

        let mut buf = BytesMut::new();
        header.encode(&mut buf);
        assert_eq!(buf.len(), HEADER_SIZE);

        let mut bytes = buf.freeze();
        let decoded = MessageHeader::decode(&mut bytes).unwrap();
        assert_eq!(header, decoded);
    }

    #[test]
    fn header_rejects_undersized_packet() {
        let mut buf = BytesMut::new();
        buf.put_u32(8); // smaller than the header itself
        buf.put_u32(1);
        buf.put_u64(0);
        buf.put_u32(0);
        buf.put_u32(3);
        assert!(MessageHeader::decode(&mut buf.freeze()).is_err());
    }
}
