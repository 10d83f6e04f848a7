//! Replay buffer with lazy sequence assignment.
//!
//! Messages sit in the fair queue without a sequence number. Only when the
//! socket writer pulls a message toward the wire does it get the next number
//! on the cycle, together with the current receive watermark, and its
//! completion sender is registered for the response. Sent messages stay
//! retained so the writer can replay them after a resume.

use crate::buffers::ring::RingBuffer;
use crate::buffers::round_robin::RoundRobinBuffer;
use crate::message::{PendingMap, QueuedMessage};
use fedpro_wire::{Message, SequenceNumber};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

struct Inner {
    ring: RingBuffer<Message>,
    next_sequence: SequenceNumber,
}

/// Sequencing and replay stage between the fair queue and the socket writer.
pub struct HistoryBuffer {
    queue: Arc<RoundRobinBuffer<QueuedMessage>>,
    inner: Mutex<Inner>,
    session_id: Arc<AtomicU64>,
    received_watermark: Arc<AtomicU32>,
    pending: PendingMap,
}

impl HistoryBuffer {
    /// Create a replay buffer over the fair queue.
    ///
    /// `initial_sequence` is the number the first pulled message receives.
    /// The watermark and session id cells are shared with the reader, which
    /// updates them as traffic arrives.
    pub fn new(
        queue: Arc<RoundRobinBuffer<QueuedMessage>>,
        capacity: usize,
        initial_sequence: SequenceNumber,
        session_id: Arc<AtomicU64>,
        received_watermark: Arc<AtomicU32>,
        pending: PendingMap,
    ) -> Self {
        Self {
            queue,
            inner: Mutex::new(Inner {
                ring: RingBuffer::new(capacity),
                next_sequence: initial_sequence,
            }),
            session_id,
            received_watermark,
            pending,
        }
    }

    /// The next message to write, waiting for one when nothing is pending.
    ///
    /// Replayed messages come first; otherwise a message is pulled from the
    /// fair queue and sequenced. The message is not consumed until
    /// [`advance`](Self::advance) confirms the write.
    pub async fn wait_and_peek(&self) -> Message {
        loop {
            if let Some(message) = self.lock().ring.peek().cloned() {
                return message;
            }
            let queued = self.queue.poll().await;
            self.admit(queued);
        }
    }

    /// Consume the message returned by the last peek. It stays retained for
    /// replay until the ring overwrites it.
    pub fn advance(&self) {
        self.lock().ring.poll();
    }

    /// Rewind so that the next peek returns the message right after
    /// `sequence_number`. Returns false when that message is no longer
    /// retained.
    pub fn rewind_to_after(&self, sequence_number: SequenceNumber) -> bool {
        let mut inner = self.lock();
        if inner
            .ring
            .rewind_to(|m| m.sequence_number() == sequence_number)
        {
            inner.ring.poll();
            true
        } else {
            false
        }
    }

    /// Rewind to the oldest retained message.
    pub fn rewind_to_first(&self) {
        self.lock().ring.rewind_to_first();
    }

    /// Sequence number of the oldest retained message, or the sentinel when
    /// nothing has been sequenced yet.
    pub fn oldest_available(&self) -> SequenceNumber {
        self.lock()
            .ring
            .peek_oldest()
            .map(|m| m.sequence_number())
            .unwrap_or(SequenceNumber::NONE)
    }

    /// Sequence number of the newest sequenced message, or the sentinel.
    pub fn newest_sequenced(&self) -> SequenceNumber {
        self.lock()
            .ring
            .peek_newest()
            .map(|m| m.sequence_number())
            .unwrap_or(SequenceNumber::NONE)
    }

    /// The number the next pulled message will receive.
    pub fn next_sequence(&self) -> SequenceNumber {
        self.lock().next_sequence
    }

    /// Sequence number of the next unsent message, or the sentinel when the
    /// send cursor is at the end.
    pub fn next_unsent(&self) -> SequenceNumber {
        self.lock()
            .ring
            .peek()
            .map(|m| m.sequence_number())
            .unwrap_or(SequenceNumber::NONE)
    }

    fn admit(&self, queued: QueuedMessage) {
        let mut inner = self.lock();
        let sequence_number = inner.next_sequence;
        inner.next_sequence = sequence_number.next();

        let message = Message::new(
            sequence_number,
            self.session_id.load(Ordering::Acquire),
            SequenceNumber::new(self.received_watermark.load(Ordering::Acquire)),
            queued.message_type,
            queued.payload,
        );
        if let Some(completer) = queued.completer {
            self.pending_lock().insert(sequence_number.get(), completer);
        }
        inner.ring.insert(message);
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn pending_lock(
        &self,
    ) -> MutexGuard<'_, std::collections::HashMap<u32, tokio::sync::oneshot::Sender<crate::error::ResponseResult>>>
    {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }
}
