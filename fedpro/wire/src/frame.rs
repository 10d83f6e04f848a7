//! Message framing for the wire protocol.
//!
//! A message on the wire is a 24-byte header followed by
//! `packet_size - HEADER_SIZE` bytes of payload. The decoder consumes a byte
//! stream incrementally and yields complete messages.

use crate::header::{MessageHeader, MessageType, HEADER_SIZE};
use crate::sequence::SequenceNumber;
use bytes::{Bytes, BytesMut};

/// Maximum packet size accepted by the decoder (16 MiB)
pub const DEFAULT_MAX_PACKET_SIZE: usize = 16 * 1024 * 1024;

/// A complete wire message: header plus raw payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Message header
    pub header: MessageHeader,
    /// Raw payload bytes; interpretation depends on the message type
    pub payload: Bytes,
}

impl Message {
    /// Build a message; the header's packet size is derived from the payload.
    pub fn new(
        sequence_number: SequenceNumber,
        session_id: u64,
        last_received: SequenceNumber,
        message_type: MessageType,
        payload: Bytes,
    ) -> Self {
        Self {
            header: MessageHeader::with_payload(
                payload.len(),
                sequence_number,
                session_id,
                last_received,
                message_type,
            ),
            payload,
        }
    }

    /// Sequence number shorthand
    pub fn sequence_number(&self) -> SequenceNumber {
        self.header.sequence_number
    }

    /// Message type shorthand
    pub fn message_type(&self) -> MessageType {
        self.header.message_type
    }

    /// Encode the message to a contiguous buffer
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_SIZE + self.payload.len());
        self.header.encode(&mut buf);
        buf.extend_from_slice(&self.payload);
        buf.freeze()
    }
}

/// Incremental decoder for the framed message stream.
#[derive(Debug)]
pub struct FrameDecoder {
    max_packet_size: usize,
}

impl FrameDecoder {
    /// Create a decoder with the default packet size limit
    pub fn new() -> Self {
        Self {
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
        }
    }

    /// Create a decoder with a custom packet size limit
    pub fn with_limit(max_packet_size: usize) -> Self {
        Self { max_packet_size }
    }

    /// Decode one message from the buffer.
    ///
    /// Returns `Ok(None)` when more bytes are needed; decoded messages are
    /// removed from the buffer.
    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Message>, crate::WireError> {
        // Need the packet size field first.
        if buf.len() < 4 {
            return Ok(None);
        }

        let packet_size = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;

        if packet_size < HEADER_SIZE || packet_size > self.max_packet_size {
            return Err(crate::WireError::PacketSize(packet_size as u64));
        }

        if buf.len() < packet_size {
            return Ok(None);
        }

        let mut packet = buf.split_to(packet_size).freeze();
        let header = MessageHeader::decode(&mut packet)?;
        // What remains of the packet is the payload.
        Ok(Some(Message {
            header,
            payload: packet,
        }))
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BufMut;

    fn sample_message() -> Message {
        Message::new(
            SequenceNumber::new(9),
            77,
            SequenceNumber::new(3),
            MessageType::CallRequest,
            Bytes::from_static(b"hello"),
        )
    }

    #[test]
    fn encode_decode_round_trip() {
        let message = sample_message();
        let mut buf = BytesMut::from(&message.encode()[..]);

        let mut decoder = FrameDecoder::new();
        let decoded = decoder.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, message);
        assert!(buf.is_empty());
    }

    #[test]
    fn partial_input_yields_none() {
        let encoded = sample_message().encode();
        let mut decoder = FrameDecoder::new();

        // Feed one byte at a time; only the final byte completes a message.
        let mut buf = BytesMut::new();
        for (i, byte) in encoded.iter().enumerate() {
            buf.put_u8(*byte);
            let result = decoder.decode(&mut buf).unwrap();
            if i + 1 < encoded.len() {
                assert!(result.is_none());
            } else {
                assert!(result.is_some());
            }
        }
    }

    #[test]
    fn two_messages_in_one_buffer() {
        let first = sample_message();
        let second = Message::new(
            SequenceNumber::new(10),
            77,
            SequenceNumber::new(3),
            MessageType::Heartbeat,
            Bytes::new(),
        );
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&first.encode());
        buf.extend_from_slice(&second.encode());

        let mut decoder = FrameDecoder::new();
        assert_eq!(decoder.decode(&mut buf).unwrap().unwrap(), first);
        assert_eq!(decoder.decode(&mut buf).unwrap().unwrap(), second);
        assert!(decoder.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn oversized_packet_is_rejected() {
        let mut buf = BytesMut::new();
        buf.put_u32(u32::MAX);
        buf.extend_from_slice(&[0u8; 20]);
        let mut decoder = FrameDecoder::new();
        assert!(decoder.decode(&mut buf).is_err());
    }

    #[test]
    fn undersized_packet_is_rejected() {
        let mut buf = BytesMut::new();
        buf.put_u32(4);
        let mut decoder = FrameDecoder::new();
        assert!(decoder.decode(&mut buf).is_err());
    }

    #[test]
    fn unknown_message_type_is_rejected() {
        let mut buf = BytesMut::new();
        buf.put_u32(HEADER_SIZE as u32);
        buf.put_u32(1);
        buf.put_u64(1);
        buf.put_u32(0);
        buf.put_u32(12345);
        let mut decoder = FrameDecoder::new();
        assert!(decoder.decode(&mut buf).is_err());
    }
}
