//! Outgoing message plumbing.
//!
//! Messages enter the fair queue unsequenced; the replay buffer assigns the
//! sequence number when a message is pulled toward the socket, and registers
//! the caller's completion sender under that number at the same time.

use crate::error::{ResponseResult, SessionError};
use bytes::{Bytes, BytesMut};
use fedpro_wire::{
    Message, MessageType, NewSessionPayload, ResponsePayload, ResumeRequestPayload,
    SequenceNumber, NO_SESSION_ID, PROTOCOL_VERSION,
};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tokio::sync::oneshot;

/// Completion senders for requests awaiting a response, keyed by the
/// sequence number assigned at send time.
pub type PendingMap = Arc<Mutex<HashMap<u32, oneshot::Sender<ResponseResult>>>>;

/// A message waiting in the fair queue, not yet sequenced.
pub struct QueuedMessage {
    /// Message type; decides the queue lane
    pub message_type: MessageType,
    /// Encoded payload bytes
    pub payload: Bytes,
    /// Completion sender for request-style messages
    pub completer: Option<oneshot::Sender<ResponseResult>>,
}

impl QueuedMessage {
    /// A sequenced service call carrying opaque bytes from the upper layer.
    pub fn call_request(payload: Bytes, completer: oneshot::Sender<ResponseResult>) -> Self {
        Self {
            message_type: MessageType::CallRequest,
            payload,
            completer: Some(completer),
        }
    }

    /// A response to a callback received from the remote side.
    pub fn callback_response(responding_to: SequenceNumber, blob: Bytes) -> Self {
        let response = ResponsePayload {
            responding_to,
            blob,
        };
        let mut buf = BytesMut::with_capacity(response.size());
        response.encode(&mut buf);
        Self {
            message_type: MessageType::CallbackResponse,
            payload: buf.freeze(),
            completer: None,
        }
    }

    /// A keep-alive probe.
    pub fn heartbeat(completer: oneshot::Sender<ResponseResult>) -> Self {
        Self {
            message_type: MessageType::Heartbeat,
            payload: Bytes::new(),
            completer: Some(completer),
        }
    }

    /// An orderly termination request. The reply is matched by type rather
    /// than by sequence number, so there is no completer here.
    pub fn terminate() -> Self {
        Self {
            message_type: MessageType::Terminate,
            payload: Bytes::new(),
            completer: None,
        }
    }

    /// Fail the waiting caller, if any.
    pub fn abort(self, error: SessionError) {
        if let Some(completer) = self.completer {
            let _ = completer.send(Err(error));
        }
    }
}

impl std::fmt::Debug for QueuedMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueuedMessage")
            .field("message_type", &self.message_type)
            .field("payload_len", &self.payload.len())
            .field("has_completer", &self.completer.is_some())
            .finish()
    }
}

/// The initial message of a fresh session. Written directly to the socket,
/// outside the queue, with the very first sequence number.
pub fn new_session_message() -> Message {
    let payload = NewSessionPayload {
        version: PROTOCOL_VERSION,
    };
    let mut buf = BytesMut::with_capacity(NewSessionPayload::SIZE);
    payload.encode(&mut buf);
    Message::new(
        SequenceNumber::INITIAL,
        NO_SESSION_ID,
        SequenceNumber::NONE,
        MessageType::NewSession,
        buf.freeze(),
    )
}

/// A resumption request. Written directly and unsequenced, since it sits
/// outside the replayed flow.
pub fn resume_request_message(
    session_id: u64,
    last_received: SequenceNumber,
    oldest_available: SequenceNumber,
) -> Message {
    let payload = ResumeRequestPayload {
        last_received,
        oldest_available,
    };
    let mut buf = BytesMut::with_capacity(ResumeRequestPayload::SIZE);
    payload.encode(&mut buf);
    Message::new(
        SequenceNumber::NONE,
        session_id,
        last_received,
        MessageType::ResumeRequest,
        buf.freeze(),
    )
}

/// Future resolving to the response of a sequenced request.
///
/// If the session goes away without answering, the future resolves to a
/// session-lost error rather than hanging.
pub struct ResponseFuture {
    rx: oneshot::Receiver<ResponseResult>,
}

impl ResponseFuture {
    pub(crate) fn new(rx: oneshot::Receiver<ResponseResult>) -> Self {
        Self { rx }
    }
}

impl Future for ResponseFuture {
    type Output = ResponseResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(SessionError::Lost(
                "session dropped the request without responding".into(),
            ))),
            Poll::Pending => Poll::Pending,
        }
    }
}
