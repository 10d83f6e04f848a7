//! Session lifecycle and message dispatch.
//!
//! A session multiplexes sequenced requests and callbacks over one transport
//! connection at a time. When the connection dies the session drops into a
//! resumable state: queued and unacknowledged messages are retained, and a
//! successful resume handshake replays exactly what the server never saw.
//!
//! States move NEW -> STARTING -> RUNNING, bounce RUNNING <-> DROPPED ->
//! RESUMING, and end through TERMINATING -> TERMINATED.

use crate::buffers::{HistoryBuffer, RoundRobinBuffer};
use crate::error::SessionError;
use crate::flowcontrol::{ExponentialRateLimiter, NullRateLimiter, RateLimiter};
use crate::message::{
    new_session_message, resume_request_message, PendingMap, QueuedMessage, ResponseFuture,
};
use crate::timeout::TimeoutTimer;
use crate::transport::{IoStream, Transport};
use crate::writer::SocketWriter;
use bytes::{Bytes, BytesMut};
use fedpro_wire::{
    FrameDecoder, Message, MessageType, NewSessionStatusPayload, ResponsePayload, ResumeStatus,
    ResumeStatusPayload, SequenceNumber, SessionStatus,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt, ReadHalf};
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Session lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Created, never started
    New,
    /// Establishment handshake in progress
    Starting,
    /// Connected and exchanging messages
    Running,
    /// Connection lost; the session can be resumed
    Dropped,
    /// Resumption handshake in progress
    Resuming,
    /// Orderly termination in progress
    Terminating,
    /// Over, by termination or by giving up
    Terminated,
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            State::New => "NEW",
            State::Starting => "STARTING",
            State::Running => "RUNNING",
            State::Dropped => "DROPPED",
            State::Resuming => "RESUMING",
            State::Terminating => "TERMINATING",
            State::Terminated => "TERMINATED",
        };
        f.write_str(name)
    }
}

/// Session tuning knobs.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SessionConfig {
    /// Drop the connection after this long without traffic
    pub session_timeout: Duration,
    /// How long to wait for handshake and termination replies
    pub response_timeout: Duration,
    /// Capacity of the bounded request lane and the replay buffer
    pub queue_capacity: usize,
    /// How many times to try opening the initial connection
    pub connect_attempts: u32,
    /// Pause between initial connection attempts
    pub connect_retry_delay: Duration,
    /// Slow producers down quadratically as the request lane fills
    pub rate_limited: bool,
    /// Tolerate gaps in incoming sequence numbers instead of dropping the
    /// connection
    pub allow_gaps: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_timeout: Duration::from_secs(60),
            response_timeout: Duration::from_secs(30),
            queue_capacity: 2048,
            connect_attempts: 3,
            connect_retry_delay: Duration::from_millis(500),
            rate_limited: false,
            allow_gaps: true,
        }
    }
}

/// Traffic handed to the session's consumer.
#[derive(Debug)]
pub enum SessionEvent {
    /// A sequenced callback from the remote side. Must be answered with
    /// [`Session::send_callback_response`].
    Callback {
        /// Sequence number to respond to
        sequence_number: SequenceNumber,
        /// Opaque callback bytes
        payload: Bytes,
    },
    /// The connection dropped; the session is waiting to be resumed
    ConnectionLost {
        /// What killed the connection
        reason: String,
    },
    /// The session is gone for good and outstanding calls have been failed
    SessionLost {
        /// Why resumption is no longer possible
        reason: String,
    },
}

struct Connection {
    cancel: CancellationToken,
    timer: Arc<TimeoutTimer>,
}

struct Shared {
    config: SessionConfig,
    transport: Arc<dyn Transport>,
    state_tx: watch::Sender<State>,
    session_id: Arc<AtomicU64>,
    received: Arc<AtomicU32>,
    pending: PendingMap,
    queue: Arc<RoundRobinBuffer<QueuedMessage>>,
    history: Arc<HistoryBuffer>,
    events: mpsc::UnboundedSender<SessionEvent>,
    conn: Mutex<Option<Connection>>,
    terminate_tx: Mutex<Option<oneshot::Sender<()>>>,
}

/// A resumable, sequenced client session.
///
/// Cheap to clone; all clones share the same underlying session.
#[derive(Clone)]
pub struct Session {
    shared: Arc<Shared>,
}

impl Session {
    /// Create a session over the given transport.
    ///
    /// The returned receiver delivers callbacks and lifecycle notifications;
    /// dropping it silently discards them.
    pub fn new(
        transport: Arc<dyn Transport>,
        config: SessionConfig,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let limiter: Arc<dyn RateLimiter> = if config.rate_limited {
            Arc::new(ExponentialRateLimiter::new(config.queue_capacity))
        } else {
            Arc::new(NullRateLimiter)
        };
        let queue = Arc::new(RoundRobinBuffer::new(
            config.queue_capacity,
            limiter,
            |m: &QueuedMessage| m.message_type.is_remote_response(),
        ));
        let session_id = Arc::new(AtomicU64::new(fedpro_wire::NO_SESSION_ID));
        let received = Arc::new(AtomicU32::new(SequenceNumber::NONE.get()));
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        // The establishment message takes the first number directly.
        let history = Arc::new(HistoryBuffer::new(
            queue.clone(),
            config.queue_capacity,
            SequenceNumber::INITIAL.next(),
            session_id.clone(),
            received.clone(),
            pending.clone(),
        ));
        let (events, events_rx) = mpsc::unbounded_channel();
        let (state_tx, _) = watch::channel(State::New);

        let session = Self {
            shared: Arc::new(Shared {
                config,
                transport,
                state_tx,
                session_id,
                received,
                pending,
                queue,
                history,
                events,
                conn: Mutex::new(None),
                terminate_tx: Mutex::new(None),
            }),
        };
        (session, events_rx)
    }

    /// Current lifecycle state.
    pub fn state(&self) -> State {
        *self.shared.state_tx.borrow()
    }

    /// Watch lifecycle state changes.
    pub fn state_changes(&self) -> watch::Receiver<State> {
        self.shared.state_tx.subscribe()
    }

    /// The server-assigned session id, or 0 before establishment.
    pub fn session_id(&self) -> u64 {
        self.shared.session_id.load(Ordering::Acquire)
    }

    /// Establish the session: connect, perform the new-session handshake and
    /// start the reader and writer.
    pub async fn start(&self) -> Result<(), SessionError> {
        self.transition(&[State::New], State::Starting, "start")?;
        match self.start_inner().await {
            Ok(()) => {
                if self.try_transition(State::Starting, State::Running) {
                    Ok(())
                } else {
                    // The session was abandoned while the handshake ran.
                    self.shared.teardown_connection();
                    Err(SessionError::AlreadyTerminated)
                }
            }
            Err(e) => {
                self.set_state(State::Terminated);
                Err(e)
            }
        }
    }

    async fn start_inner(&self) -> Result<(), SessionError> {
        let shared = &self.shared;
        let mut stream = self.connect_with_retry().await?;
        stream.write_all(&new_session_message().encode()).await?;

        let mut decoder = FrameDecoder::new();
        let mut buf = BytesMut::new();
        let message = tokio::time::timeout(
            shared.config.response_timeout,
            read_one(&mut stream, &mut decoder, &mut buf),
        )
        .await
        .map_err(|_| SessionError::Timeout("new session status"))??;

        if message.message_type() != MessageType::NewSessionStatus {
            return Err(SessionError::BadMessage(format!(
                "expected new session status, got {}",
                message.message_type()
            )));
        }
        let status = NewSessionStatusPayload::decode(&mut message.payload.clone())?;
        if status.reason != SessionStatus::Success {
            return Err(SessionError::Lost(format!(
                "server refused the session: {:?}",
                status.reason
            )));
        }

        shared
            .session_id
            .store(message.header.session_id, Ordering::Release);
        shared
            .received
            .store(message.sequence_number().get(), Ordering::Release);
        debug!(session_id = message.header.session_id, "session established");

        self.install_connection(stream, decoder, buf, SequenceNumber::INITIAL.next());
        Ok(())
    }

    /// Open the initial connection, retrying transient transport failures a
    /// bounded number of times.
    async fn connect_with_retry(&self) -> Result<IoStream, SessionError> {
        let config = &self.shared.config;
        let mut attempt: u32 = 1;
        loop {
            match self.shared.transport.connect().await {
                Ok(stream) => return Ok(stream),
                Err(e) if attempt < config.connect_attempts => {
                    warn!(attempt, error = %e, "connect failed, retrying");
                    attempt += 1;
                    tokio::time::sleep(config.connect_retry_delay).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Queue a sequenced request, waiting for queue space when full.
    ///
    /// The returned future resolves when the response arrives, which may be
    /// after a connection drop and resume.
    pub async fn request(&self, payload: Bytes) -> Result<ResponseFuture, SessionError> {
        self.ensure_open("request")?;
        let (tx, rx) = oneshot::channel();
        self.shared
            .queue
            .insert(QueuedMessage::call_request(payload, tx))
            .await;
        Ok(ResponseFuture::new(rx))
    }

    /// Queue a sequenced request, failing immediately when the queue is full.
    pub fn try_request(&self, payload: Bytes) -> Result<ResponseFuture, SessionError> {
        self.ensure_open("request")?;
        let (tx, rx) = oneshot::channel();
        self.shared
            .queue
            .try_insert(QueuedMessage::call_request(payload, tx))
            .map_err(|_| SessionError::QueueFull)?;
        Ok(ResponseFuture::new(rx))
    }

    /// Queue a keep-alive probe. The future resolves on the response.
    pub async fn send_heartbeat(&self) -> Result<ResponseFuture, SessionError> {
        self.ensure_open("heartbeat")?;
        let (tx, rx) = oneshot::channel();
        self.shared.queue.insert(QueuedMessage::heartbeat(tx)).await;
        Ok(ResponseFuture::new(rx))
    }

    /// Answer a callback previously delivered through the event channel.
    pub async fn send_callback_response(
        &self,
        responding_to: SequenceNumber,
        blob: Bytes,
    ) -> Result<(), SessionError> {
        self.ensure_open("callback response")?;
        self.shared
            .queue
            .insert(QueuedMessage::callback_response(responding_to, blob))
            .await;
        Ok(())
    }

    /// Terminate the session in an orderly fashion.
    ///
    /// Every queued and in-flight request that has no response yet is failed.
    pub async fn terminate(&self) -> Result<(), SessionError> {
        // A resumption in flight owns the state until it settles one way or
        // the other; wait it out rather than racing it.
        let previous = loop {
            match self.transition(&[State::Running, State::Dropped], State::Terminating, "terminate")
            {
                Ok(previous) => break previous,
                Err(e) => {
                    if self.state() != State::Resuming {
                        return Err(e);
                    }
                    let mut state_rx = self.state_changes();
                    let _ = state_rx.wait_for(|s| *s != State::Resuming).await;
                }
            }
        };

        let result = if previous == State::Running {
            let (tx, rx) = oneshot::channel();
            *lock(&self.shared.terminate_tx) = Some(tx);
            self.shared.queue.insert(QueuedMessage::terminate()).await;
            match tokio::time::timeout(self.shared.config.response_timeout, rx).await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(_)) => Err(SessionError::Lost(
                    "connection lost while terminating".into(),
                )),
                Err(_) => Err(SessionError::Timeout("terminate response")),
            }
        } else {
            // No connection to say goodbye over.
            Err(SessionError::Lost(
                "session dropped before it could terminate cleanly".into(),
            ))
        };

        self.shutdown("session terminated");
        result
    }

    /// Resume a dropped session over a fresh connection.
    ///
    /// Transport and timeout failures leave the session dropped so the call
    /// can be retried; a rejection from the server ends the session and
    /// fails everything outstanding.
    pub async fn resume(&self) -> Result<(), SessionError> {
        self.transition(&[State::Dropped], State::Resuming, "resume")?;
        match self.resume_inner().await {
            Ok(()) => {
                if self.try_transition(State::Resuming, State::Running) {
                    Ok(())
                } else {
                    // The session ended while the handshake ran; a late
                    // success must not bring it back to life.
                    self.shared.teardown_connection();
                    Err(SessionError::AlreadyTerminated)
                }
            }
            Err(e) if is_retryable(&e) => {
                if !self.try_transition(State::Resuming, State::Dropped) {
                    return Err(SessionError::AlreadyTerminated);
                }
                Err(e)
            }
            Err(e) => {
                self.shutdown(&format!("resume failed: {e}"));
                let _ = self.shared.events.send(SessionEvent::SessionLost {
                    reason: e.to_string(),
                });
                Err(e)
            }
        }
    }

    async fn resume_inner(&self) -> Result<(), SessionError> {
        let shared = &self.shared;
        let mut stream = shared.transport.connect().await?;

        let last_received = SequenceNumber::new(shared.received.load(Ordering::Acquire));
        let oldest = shared.history.oldest_available();
        let request = resume_request_message(
            shared.session_id.load(Ordering::Acquire),
            last_received,
            oldest,
        );
        stream.write_all(&request.encode()).await?;

        let mut decoder = FrameDecoder::new();
        let mut buf = BytesMut::new();
        let message = tokio::time::timeout(
            shared.config.response_timeout,
            read_one(&mut stream, &mut decoder, &mut buf),
        )
        .await
        .map_err(|_| SessionError::Timeout("resume status"))??;

        if message.message_type() != MessageType::ResumeStatus {
            return Err(SessionError::BadMessage(format!(
                "expected resume status, got {}",
                message.message_type()
            )));
        }
        let status = ResumeStatusPayload::decode(&mut message.payload.clone())?;
        match status.status {
            ResumeStatus::OkToResume => {}
            ResumeStatus::InvalidSession => {
                return Err(SessionError::Lost(
                    "server rejected resume: invalid session".into(),
                ))
            }
            ResumeStatus::InsufficientHistory => {
                return Err(SessionError::Lost(
                    "server rejected resume: insufficient buffered history".into(),
                ))
            }
            ResumeStatus::Other => {
                return Err(SessionError::Lost("server rejected resume".into()))
            }
        }

        // Replay everything the server never received.
        let newest = shared.history.newest_sequenced();
        if newest.is_valid() && newest != status.last_received {
            let rewound = if status.last_received.is_valid() {
                shared.history.rewind_to_after(status.last_received)
            } else {
                shared.history.rewind_to_first();
                true
            };
            if !rewound {
                return Err(SessionError::Lost(
                    "replay history no longer covers the server's watermark".into(),
                ));
            }
            debug!(
                from = %status.last_received,
                to = %newest,
                "rewound replay buffer for resume"
            );
        }
        let expected_next = match shared.history.next_unsent() {
            n if n.is_valid() => n,
            _ => shared.history.next_sequence(),
        };

        self.install_connection(stream, decoder, buf, expected_next);
        Ok(())
    }

    /// Kill the current connection as if the network had failed.
    ///
    /// Exists for exercising the drop/resume path; production code has no
    /// reason to call it.
    pub fn force_close_connection(&self) {
        self.shared.connection_lost("connection force-closed");
    }

    /// Give up on the session entirely, failing everything outstanding.
    pub fn abandon(&self, reason: &str) {
        let changed = self.shared.state_tx.send_if_modified(|s| {
            if *s == State::Terminated {
                false
            } else {
                *s = State::Terminated;
                true
            }
        });
        if changed {
            warn!(reason, "session abandoned");
            self.shared.teardown_connection();
            self.shared.fail_outstanding(reason);
            let _ = self.shared.events.send(SessionEvent::SessionLost {
                reason: reason.into(),
            });
        }
    }

    fn shutdown(&self, reason: &str) {
        self.set_state(State::Terminated);
        self.shared.teardown_connection();
        self.shared.fail_outstanding(reason);
    }

    fn install_connection(
        &self,
        stream: IoStream,
        decoder: FrameDecoder,
        readbuf: BytesMut,
        expected_next: SequenceNumber,
    ) {
        let shared = self.shared.clone();
        let (read_half, write_half) = tokio::io::split(stream);
        let cancel = CancellationToken::new();

        let timeout_shared = Arc::downgrade(&self.shared);
        let timer = Arc::new(TimeoutTimer::lazy(
            self.shared.config.session_timeout,
            move || {
                if let Some(shared) = timeout_shared.upgrade() {
                    shared.connection_lost("session timed out");
                }
            },
        ));

        let writer = SocketWriter::new(self.shared.history.clone(), expected_next);
        let writer_shared = self.shared.clone();
        let writer_cancel = cancel.clone();
        let writer_timer = timer.clone();
        tokio::spawn(async move {
            if let Err(e) = writer.run(write_half, writer_cancel, writer_timer).await {
                writer_shared.connection_lost(&format!("write failed: {e}"));
            }
        });

        let reader_cancel = cancel.clone();
        let reader_timer = timer.clone();
        tokio::spawn(async move {
            shared
                .read_loop(read_half, decoder, readbuf, reader_cancel, reader_timer)
                .await;
        });

        let previous = lock(&self.shared.conn).replace(Connection { cancel, timer });
        if let Some(previous) = previous {
            previous.cancel.cancel();
            previous.timer.cancel();
        }
    }

    fn ensure_open(&self, operation: &str) -> Result<(), SessionError> {
        match self.state() {
            State::Running | State::Dropped | State::Resuming => Ok(()),
            State::Terminating | State::Terminated => Err(SessionError::AlreadyTerminated),
            state => Err(SessionError::IllegalState(format!(
                "cannot send a {operation} while {state}"
            ))),
        }
    }

    fn transition(
        &self,
        from: &[State],
        to: State,
        operation: &str,
    ) -> Result<State, SessionError> {
        let mut previous = State::New;
        let changed = self.shared.state_tx.send_if_modified(|s| {
            previous = *s;
            if from.contains(s) {
                *s = to;
                true
            } else {
                false
            }
        });
        if changed {
            debug!(from = %previous, to = %to, "session state changed");
            Ok(previous)
        } else {
            match previous {
                State::Terminating | State::Terminated => Err(SessionError::AlreadyTerminated),
                state => Err(SessionError::IllegalState(format!(
                    "cannot {operation} while {state}"
                ))),
            }
        }
    }

    /// Move from exactly `from` to `to`. Returns whether the change took.
    fn try_transition(&self, from: State, to: State) -> bool {
        self.shared.state_tx.send_if_modified(|s| {
            if *s == from {
                debug!(from = %from, to = %to, "session state changed");
                *s = to;
                true
            } else {
                false
            }
        })
    }

    fn set_state(&self, to: State) {
        self.shared.state_tx.send_if_modified(|s| {
            if *s == to {
                false
            } else {
                debug!(from = %*s, to = %to, "session state changed");
                *s = to;
                true
            }
        });
    }
}

impl Shared {
    fn connection_lost(&self, reason: &str) {
        let changed = self.state_tx.send_if_modified(|s| {
            if *s == State::Running {
                *s = State::Dropped;
                true
            } else {
                false
            }
        });
        if changed {
            warn!(reason, "connection lost, session dropped");
            self.teardown_connection();
            let _ = self.events.send(SessionEvent::ConnectionLost {
                reason: reason.into(),
            });
        }
    }

    fn teardown_connection(&self) {
        if let Some(conn) = lock(&self.conn).take() {
            conn.cancel.cancel();
            conn.timer.cancel();
        }
    }

    /// Fail every in-flight and queued request that will never be answered.
    fn fail_outstanding(&self, reason: &str) {
        let senders: Vec<_> = lock(&self.pending).drain().collect();
        for (_, sender) in senders {
            let _ = sender.send(Err(SessionError::Lost(reason.into())));
        }
        for queued in self.queue.drain() {
            queued.abort(SessionError::Lost(reason.into()));
        }
        if let Some(tx) = lock(&self.terminate_tx).take() {
            drop(tx);
        }
    }

    async fn read_loop(
        self: Arc<Self>,
        mut source: ReadHalf<IoStream>,
        mut decoder: FrameDecoder,
        mut buf: BytesMut,
        cancel: CancellationToken,
        timer: Arc<TimeoutTimer>,
    ) {
        loop {
            let message = tokio::select! {
                _ = cancel.cancelled() => return,
                result = read_one(&mut source, &mut decoder, &mut buf) => match result {
                    Ok(message) => message,
                    Err(e) => {
                        self.connection_lost(&format!("read failed: {e}"));
                        return;
                    }
                },
            };
            timer.extend();
            if let Err(e) = self.handle_incoming(message) {
                self.connection_lost(&format!("protocol violation: {e}"));
                return;
            }
        }
    }

    fn handle_incoming(&self, message: Message) -> Result<(), SessionError> {
        let session_id = self.session_id.load(Ordering::Acquire);
        if message.header.session_id != session_id {
            return Err(SessionError::BadMessage(format!(
                "message for session {} on session {}",
                message.header.session_id, session_id
            )));
        }

        let sequence_number = message.sequence_number();
        if sequence_number.is_valid() {
            let previous = SequenceNumber::new(self.received.load(Ordering::Acquire));
            if previous.is_valid() && sequence_number != previous.next() {
                if self.config.allow_gaps {
                    warn!(
                        received = %sequence_number,
                        expected = %previous.next(),
                        "gap in incoming sequence numbers"
                    );
                } else {
                    return Err(SessionError::BadMessage(format!(
                        "expected sequence number {}, got {}",
                        previous.next(),
                        sequence_number
                    )));
                }
            }
            self.received.store(sequence_number.get(), Ordering::Release);
        }

        match message.message_type() {
            MessageType::CallResponse | MessageType::HeartbeatResponse => {
                let response = ResponsePayload::decode(&mut message.payload.clone())?;
                let sender = lock(&self.pending).remove(&response.responding_to.get());
                match sender {
                    Some(sender) => {
                        let _ = sender.send(Ok(response.blob));
                    }
                    None => debug!(
                        responding_to = %response.responding_to,
                        "response without a waiting request"
                    ),
                }
                Ok(())
            }
            MessageType::CallbackRequest => {
                let _ = self.events.send(SessionEvent::Callback {
                    sequence_number,
                    payload: message.payload,
                });
                Ok(())
            }
            MessageType::Terminated => {
                if let Some(tx) = lock(&self.terminate_tx).take() {
                    let _ = tx.send(());
                }
                Ok(())
            }
            // The server does not probe the client; a heartbeat from it is
            // as much a contract breach as any other unexpected type.
            other => Err(SessionError::BadMessage(format!(
                "unexpected message type {other} on an open session"
            ))),
        }
    }
}

fn is_retryable(error: &SessionError) -> bool {
    matches!(error, SessionError::Io(_) | SessionError::Timeout(_))
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

async fn read_one<R>(
    source: &mut R,
    decoder: &mut FrameDecoder,
    buf: &mut BytesMut,
) -> Result<Message, SessionError>
where
    R: AsyncRead + Unpin,
{
    loop {
        if let Some(message) = decoder.decode(buf)? {
            return Ok(message);
        }
        let n = source.read_buf(buf).await?;
        if n == 0 {
            return Err(SessionError::Lost("connection closed by remote".into()));
        }
    }
}
