//! Socket writer loop.
//!
//! One writer runs per connection. It peeks the next message from the replay
//! buffer, writes it, verifies the sequence numbering, and only then consumes
//! the message, so a write that dies mid-flight leaves the message in place
//! for the next connection to replay.

use crate::buffers::HistoryBuffer;
use crate::error::SessionError;
use crate::timeout::TimeoutTimer;
use fedpro_wire::SequenceNumber;
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

pub(crate) struct SocketWriter {
    history: Arc<HistoryBuffer>,
    expected_next: SequenceNumber,
    last_written: SequenceNumber,
}

impl SocketWriter {
    pub fn new(history: Arc<HistoryBuffer>, expected_next: SequenceNumber) -> Self {
        Self {
            history,
            expected_next,
            last_written: SequenceNumber::NONE,
        }
    }

    /// Drain the replay buffer into the sink until cancelled or the sink
    /// fails. A write error leaves the unconfirmed message in the buffer.
    pub async fn run<W>(
        mut self,
        mut sink: W,
        cancel: CancellationToken,
        activity: Arc<TimeoutTimer>,
    ) -> Result<(), SessionError>
    where
        W: AsyncWrite + Unpin,
    {
        loop {
            let message = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(()),
                message = self.history.wait_and_peek() => message,
            };

            let encoded = message.encode();
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(()),
                result = sink.write_all(&encoded) => result?,
            }

            let sequence_number = message.sequence_number();
            if sequence_number != self.expected_next {
                debug!(
                    sent = %sequence_number,
                    previous = %self.last_written,
                    "non-sequential sequence number in outgoing message"
                );
            }
            trace!(seq = %sequence_number, typ = %message.message_type(), "sent message");

            self.last_written = sequence_number;
            self.expected_next = sequence_number.next();
            self.history.advance();
            activity.extend();
        }
    }
}
