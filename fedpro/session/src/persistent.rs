//! Self-healing session wrapper.
//!
//! A persistent session keeps the underlying session alive on its own:
//! heartbeats flow while the connection is healthy, and when the connection
//! drops a supervisor task reconnects according to a [`ResumeStrategy`].
//! Only when the strategy gives up is the session abandoned and everything
//! outstanding failed.

use crate::error::SessionError;
use crate::message::ResponseFuture;
use crate::resume::ResumeStrategy;
use crate::session::{Session, SessionConfig, SessionEvent, State};
use crate::timeout::TimeoutTimer;
use crate::transport::Transport;
use bytes::Bytes;
use fedpro_wire::SequenceNumber;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Tuning for a persistent session.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct PersistentConfig {
    /// Underlying session tuning
    pub session: SessionConfig,
    /// How often to probe the server while the connection is idle. Should be
    /// shorter than the server's session timeout.
    pub heartbeat_interval: Duration,
}

impl Default for PersistentConfig {
    fn default() -> Self {
        Self {
            session: SessionConfig::default(),
            heartbeat_interval: Duration::from_secs(20),
        }
    }
}

/// A session that reconnects itself after connection loss.
pub struct PersistentSession {
    session: Session,
    strategy: Arc<dyn ResumeStrategy>,
    heartbeat_interval: Duration,
    cancel: CancellationToken,
}

impl PersistentSession {
    /// Create a persistent session over the given transport.
    pub fn new(
        transport: Arc<dyn Transport>,
        config: PersistentConfig,
        strategy: Arc<dyn ResumeStrategy>,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (session, events) = Session::new(transport, config.session);
        let persistent = Self {
            session,
            strategy,
            heartbeat_interval: config.heartbeat_interval,
            cancel: CancellationToken::new(),
        };
        (persistent, events)
    }

    /// Establish the session and start the heartbeat and resume machinery.
    pub async fn start(&self) -> Result<(), SessionError> {
        self.session.start().await?;

        let heartbeat_session = self.session.clone();
        let heartbeat = Arc::new(TimeoutTimer::eager(self.heartbeat_interval, move || {
            let session = heartbeat_session.clone();
            tokio::spawn(async move {
                // The response is matched and discarded like any other; its
                // arrival is what keeps the connection timer alive.
                if let Err(e) = session.send_heartbeat().await {
                    debug!(error = %e, "heartbeat not sent");
                }
            });
        }));

        let session = self.session.clone();
        let strategy = self.strategy.clone();
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            supervise(session, strategy, heartbeat, cancel).await;
        });
        Ok(())
    }

    /// Queue a sequenced request. See [`Session::request`].
    pub async fn request(&self, payload: Bytes) -> Result<ResponseFuture, SessionError> {
        self.session.request(payload).await
    }

    /// Queue a sequenced request without waiting for queue space.
    pub fn try_request(&self, payload: Bytes) -> Result<ResponseFuture, SessionError> {
        self.session.try_request(payload)
    }

    /// Answer a callback delivered through the event channel.
    pub async fn send_callback_response(
        &self,
        responding_to: SequenceNumber,
        blob: Bytes,
    ) -> Result<(), SessionError> {
        self.session.send_callback_response(responding_to, blob).await
    }

    /// Terminate the session, stopping heartbeats and resume attempts.
    pub async fn terminate(&self) -> Result<(), SessionError> {
        self.cancel.cancel();
        self.session.terminate().await
    }

    /// Current lifecycle state of the underlying session.
    pub fn state(&self) -> State {
        self.session.state()
    }

    /// Watch lifecycle state changes.
    pub fn state_changes(&self) -> watch::Receiver<State> {
        self.session.state_changes()
    }

    /// The server-assigned session id.
    pub fn session_id(&self) -> u64 {
        self.session.session_id()
    }

    /// Kill the current connection as if the network had failed. The
    /// supervisor will notice and start resuming.
    pub fn force_close_connection(&self) {
        self.session.force_close_connection();
    }

    /// The wrapped session, for operations the wrapper does not mirror.
    pub fn session(&self) -> &Session {
        &self.session
    }
}

impl Drop for PersistentSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Watch the session state; reconnect on drops, stop on termination.
async fn supervise(
    session: Session,
    strategy: Arc<dyn ResumeStrategy>,
    heartbeat: Arc<TimeoutTimer>,
    cancel: CancellationToken,
) {
    let mut state_rx = session.state_changes();
    loop {
        let state = *state_rx.borrow_and_update();
        match state {
            State::Dropped => {
                heartbeat.pause();
                if !resume_with_retries(&session, strategy.as_ref(), &cancel).await {
                    return;
                }
                heartbeat.resume();
            }
            State::Terminating | State::Terminated => return,
            _ => {}
        }
        tokio::select! {
            _ = cancel.cancelled() => return,
            changed = state_rx.changed() => {
                if changed.is_err() {
                    return;
                }
            }
        }
    }
}

/// Retry resuming until it works or the strategy gives up. Returns whether
/// the session is running again.
async fn resume_with_retries(
    session: &Session,
    strategy: &dyn ResumeStrategy,
    cancel: &CancellationToken,
) -> bool {
    let dropped_at = tokio::time::Instant::now();
    let mut attempt: u32 = 1;
    loop {
        let Some(delay) = strategy.next_delay(attempt, dropped_at.elapsed()) else {
            session.abandon("gave up resuming the session");
            return false;
        };
        tokio::select! {
            _ = cancel.cancelled() => return false,
            _ = tokio::time::sleep(delay) => {}
        }
        match session.resume().await {
            Ok(()) => {
                info!(attempt, "session resumed");
                return true;
            }
            Err(e) => {
                // A rejection by the server has already ended the session.
                if session.state() != State::Dropped {
                    return false;
                }
                debug!(attempt, error = %e, "resume attempt failed");
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resume::SimpleResumeStrategy;
    use crate::transport::TcpTransport;
    use bytes::BytesMut;
    use fedpro_wire::{
        FrameDecoder, Message, MessageType, NewSessionStatusPayload, ResponsePayload,
        ResumeStatus, ResumeStatusPayload, SessionStatus,
    };
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    async fn read_message(
        stream: &mut TcpStream,
        decoder: &mut FrameDecoder,
        buf: &mut BytesMut,
    ) -> Message {
        loop {
            if let Some(message) = decoder.decode(buf).unwrap() {
                return message;
            }
            let n = stream.read_buf(buf).await.unwrap();
            assert!(n > 0, "peer closed during read");
        }
    }

    async fn establish(listener: &TcpListener, session_id: u64) -> (TcpStream, FrameDecoder, BytesMut) {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut decoder = FrameDecoder::new();
        let mut buf = BytesMut::new();
        let hello = read_message(&mut stream, &mut decoder, &mut buf).await;
        assert_eq!(hello.message_type(), MessageType::NewSession);

        let status = NewSessionStatusPayload {
            reason: SessionStatus::Success,
        };
        let mut payload = BytesMut::with_capacity(NewSessionStatusPayload::SIZE);
        status.encode(&mut payload);
        let reply = Message::new(
            SequenceNumber::INITIAL,
            session_id,
            hello.sequence_number(),
            MessageType::NewSessionStatus,
            payload.freeze(),
        );
        stream.write_all(&reply.encode()).await.unwrap();
        (stream, decoder, buf)
    }

    fn strategy(delay_ms: u64, limit_ms: u64) -> Arc<dyn ResumeStrategy> {
        Arc::new(SimpleResumeStrategy::new(
            Duration::from_millis(delay_ms),
            Duration::from_millis(limit_ms),
        ))
    }

    fn config(heartbeat: Duration) -> PersistentConfig {
        PersistentConfig {
            heartbeat_interval: heartbeat,
            ..PersistentConfig::default()
        }
    }

    #[tokio::test]
    async fn heartbeats_flow_while_idle() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (session, _events) = PersistentSession::new(
            Arc::new(TcpTransport::new(addr)),
            config(Duration::from_millis(300)),
            strategy(100, 10_000),
        );

        let server = tokio::spawn(async move {
            let (mut stream, mut decoder, mut buf) = establish(&listener, 31).await;
            let probe = read_message(&mut stream, &mut decoder, &mut buf).await;
            assert_eq!(probe.message_type(), MessageType::Heartbeat);

            let response = ResponsePayload {
                responding_to: probe.sequence_number(),
                blob: Bytes::new(),
            };
            let mut payload = BytesMut::with_capacity(response.size());
            response.encode(&mut payload);
            let reply = Message::new(
                SequenceNumber::INITIAL.next(),
                31,
                probe.sequence_number(),
                MessageType::HeartbeatResponse,
                payload.freeze(),
            );
            stream.write_all(&reply.encode()).await.unwrap();
        });

        session.start().await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), server)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn dropped_session_resumes_by_itself() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let listener = Arc::new(listener);
        let (session, _events) = PersistentSession::new(
            Arc::new(TcpTransport::new(addr)),
            config(Duration::from_secs(60)),
            strategy(50, 10_000),
        );

        let listener1 = listener.clone();
        let server = tokio::spawn(async move {
            let (_conn, _decoder, _buf) = establish(&listener1, 37).await;

            // Second connection is the resume attempt.
            let (mut stream, _) = listener1.accept().await.unwrap();
            let mut decoder = FrameDecoder::new();
            let mut buf = BytesMut::new();
            let request = read_message(&mut stream, &mut decoder, &mut buf).await;
            assert_eq!(request.message_type(), MessageType::ResumeRequest);
            assert_eq!(request.header.session_id, 37);

            let status = ResumeStatusPayload {
                status: ResumeStatus::OkToResume,
                last_received: SequenceNumber::NONE,
            };
            let mut payload = BytesMut::with_capacity(ResumeStatusPayload::SIZE);
            status.encode(&mut payload);
            let reply = Message::new(
                SequenceNumber::NONE,
                37,
                SequenceNumber::NONE,
                MessageType::ResumeStatus,
                payload.freeze(),
            );
            stream.write_all(&reply.encode()).await.unwrap();
            // Keep the connection alive while the test asserts.
            tokio::time::sleep(Duration::from_secs(2)).await;
        });

        session.start().await.unwrap();
        session.session().force_close_connection();

        let mut state_rx = session.state_changes();
        tokio::time::timeout(
            Duration::from_secs(5),
            state_rx.wait_for(|s| *s == State::Running),
        )
        .await
        .unwrap()
        .unwrap();
        server.abort();
    }

    #[tokio::test]
    async fn exhausted_strategy_abandons_the_session() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (session, mut events) = PersistentSession::new(
            Arc::new(TcpTransport::new(addr)),
            config(Duration::from_secs(60)),
            strategy(50, 200),
        );

        let server = tokio::spawn(async move {
            let conn = establish(&listener, 41).await;
            // Refuse any reconnect by closing the listener.
            drop(listener);
            tokio::time::sleep(Duration::from_secs(1)).await;
            drop(conn);
        });

        session.start().await.unwrap();
        let pending = session.request(Bytes::from_static(b"doomed")).await.unwrap();
        session.session().force_close_connection();

        let mut state_rx = session.state_changes();
        tokio::time::timeout(
            Duration::from_secs(5),
            state_rx.wait_for(|s| *s == State::Terminated),
        )
        .await
        .unwrap()
        .unwrap();
        assert!(matches!(pending.await, Err(SessionError::Lost(_))));

        let mut saw_session_lost = false;
        for _ in 0..4 {
            match tokio::time::timeout(Duration::from_secs(2), events.recv()).await {
                Ok(Some(SessionEvent::SessionLost { .. })) => {
                    saw_session_lost = true;
                    break;
                }
                Ok(Some(_)) => continue,
                _ => break,
            }
        }
        assert!(saw_session_lost);
        server.abort();
    }
}
