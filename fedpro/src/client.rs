//! High-level federate client.
//!
//! Ties a persistent session to a callback dispatcher: calls go out as
//! sequenced requests, callbacks come back through the chosen delivery
//! model, and reconnection happens underneath without the application
//! noticing more than a pause.

use crate::callback::{CallbackDispatcher, CallbackHandler, CallbackMode, CallbackResponder};
use async_trait::async_trait;
use bytes::Bytes;
use fedpro_session::{
    PersistentConfig, PersistentSession, ResponseFuture, ResumeStrategy, SessionError,
    SimpleResumeStrategy, State, Transport,
};
use fedpro_wire::SequenceNumber;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Everything configurable about a client.
#[derive(Clone)]
pub struct ClientSettings {
    /// Session and heartbeat tuning
    pub config: PersistentConfig,
    /// Reconnection pacing after a connection drop
    pub resume_strategy: Arc<dyn ResumeStrategy>,
    /// Callback delivery model
    pub callback_mode: CallbackMode,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            config: PersistentConfig::default(),
            resume_strategy: Arc::new(SimpleResumeStrategy::default()),
            callback_mode: CallbackMode::Dedicated,
        }
    }
}

struct SessionResponder {
    session: Arc<PersistentSession>,
}

#[async_trait]
impl CallbackResponder for SessionResponder {
    async fn respond(
        &self,
        responding_to: SequenceNumber,
        blob: Bytes,
    ) -> Result<(), SessionError> {
        self.session.send_callback_response(responding_to, blob).await
    }
}

/// A connected federate client.
pub struct FederateClient {
    session: Arc<PersistentSession>,
    dispatcher: CallbackDispatcher,
}

impl FederateClient {
    /// Connect to the server and establish a session.
    pub async fn connect(
        transport: Arc<dyn Transport>,
        handler: Arc<dyn CallbackHandler>,
        settings: ClientSettings,
    ) -> Result<Self, SessionError> {
        let (session, events) =
            PersistentSession::new(transport, settings.config, settings.resume_strategy);
        let session = Arc::new(session);
        session.start().await?;

        let responder = Arc::new(SessionResponder {
            session: session.clone(),
        });
        let dispatcher =
            CallbackDispatcher::new(events, handler, responder, settings.callback_mode);
        Ok(Self {
            session,
            dispatcher,
        })
    }

    /// Send a call and wait for its result.
    pub async fn call(&self, payload: Bytes) -> Result<Bytes, SessionError> {
        self.session.request(payload).await?.await
    }

    /// Send a call and get a future for its result, so calls can be
    /// pipelined.
    pub async fn call_async(&self, payload: Bytes) -> Result<ResponseFuture, SessionError> {
        self.session.request(payload).await
    }

    /// Send a call without waiting for queue space.
    pub fn try_call(&self, payload: Bytes) -> Result<ResponseFuture, SessionError> {
        self.session.try_request(payload)
    }

    /// Dispatch one pending callback; see
    /// [`CallbackDispatcher::evoke_callback`].
    pub async fn evoke_callback(&self, wait: Duration) -> bool {
        self.dispatcher.evoke_callback(wait).await
    }

    /// Dispatch pending callbacks for a bounded time; see
    /// [`CallbackDispatcher::evoke_multiple_callbacks`].
    pub async fn evoke_multiple_callbacks(&self, min_time: Duration, max_time: Duration) -> bool {
        self.dispatcher
            .evoke_multiple_callbacks(min_time, max_time)
            .await
    }

    /// Resume callback delivery.
    pub fn enable_callbacks(&self) {
        self.dispatcher.enable_callbacks();
    }

    /// Pause callback delivery, waiting for an in-progress callback unless
    /// called from inside the handler.
    pub async fn disable_callbacks(&self) {
        self.dispatcher.disable_callbacks().await;
    }

    /// Terminate the session and disconnect.
    pub async fn disconnect(&self) -> Result<(), SessionError> {
        self.session.terminate().await
    }

    /// Current session state.
    pub fn state(&self) -> State {
        self.session.state()
    }

    /// Watch session state changes.
    pub fn state_changes(&self) -> watch::Receiver<State> {
        self.session.state_changes()
    }

    /// The server-assigned session id.
    pub fn session_id(&self) -> u64 {
        self.session.session_id()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;
    use fedpro_session::TcpTransport;
    use fedpro_wire::{
        FrameDecoder, Message, MessageType, NewSessionStatusPayload, ResponsePayload,
        SessionStatus,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    struct RecordingHandler {
        callbacks: Mutex<Vec<Bytes>>,
        lost: AtomicUsize,
    }

    impl RecordingHandler {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                callbacks: Mutex::new(Vec::new()),
                lost: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl CallbackHandler for RecordingHandler {
        async fn dispatch_callback(&self, payload: Bytes) -> anyhow::Result<()> {
            self.callbacks.lock().unwrap().push(payload);
            Ok(())
        }

        fn connection_lost(&self, _reason: &str) {
            self.lost.fetch_add(1, Ordering::SeqCst);
        }
    }

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

    struct MockServer {
        stream: TcpStream,
        decoder: FrameDecoder,
        buf: BytesMut,
        next_seq: SequenceNumber,
        session_id: u64,
    }

    impl MockServer {
        async fn establish(listener: &TcpListener, session_id: u64) -> Self {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut decoder = FrameDecoder::new();
            let mut buf = BytesMut::new();
            let hello = read_message(&mut stream, &mut decoder, &mut buf).await;
            assert_eq!(hello.message_type(), MessageType::NewSession);

            let mut server = Self {
                stream,
                decoder,
                buf,
                next_seq: SequenceNumber::INITIAL,
                session_id,
            };
            let status = NewSessionStatusPayload {
                reason: SessionStatus::Success,
            };
            let mut payload = BytesMut::with_capacity(NewSessionStatusPayload::SIZE);
            status.encode(&mut payload);
            server
                .send(hello.sequence_number(), MessageType::NewSessionStatus, payload.freeze())
                .await;
            server
        }

        async fn read(&mut self) -> Message {
            read_message(&mut self.stream, &mut self.decoder, &mut self.buf).await
        }

        async fn send(
            &mut self,
            last_received: SequenceNumber,
            typ: MessageType,
            payload: Bytes,
        ) {
            let seq = self.next_seq;
            self.next_seq = seq.next();
            let message = Message::new(seq, self.session_id, last_received, typ, payload);
            self.stream.write_all(&message.encode()).await.unwrap();
        }

        async fn respond(&mut self, typ: MessageType, responding_to: SequenceNumber, blob: &[u8]) {
            let response = ResponsePayload {
                responding_to,
                blob: Bytes::copy_from_slice(blob),
            };
            let mut payload = BytesMut::with_capacity(response.size());
            response.encode(&mut payload);
            self.send(responding_to, typ, payload.freeze()).await;
        }
    }

    fn settings() -> ClientSettings {
        ClientSettings {
            config: PersistentConfig {
                heartbeat_interval: Duration::from_secs(60),
                ..PersistentConfig::default()
            },
            ..ClientSettings::default()
        }
    }

    #[tokio::test]
    async fn calls_and_callbacks_flow_end_to_end() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handler = RecordingHandler::new();

        let server = tokio::spawn(async move {
            let mut server = MockServer::establish(&listener, 51).await;

            let call = server.read().await;
            assert_eq!(call.message_type(), MessageType::CallRequest);
            assert_eq!(&call.payload[..], b"join");
            server
                .respond(MessageType::CallResponse, call.sequence_number(), b"joined")
                .await;

            // Push a callback and expect the automatic response.
            server
                .send(
                    call.sequence_number(),
                    MessageType::CallbackRequest,
                    Bytes::from_static(b"time advance grant"),
                )
                .await;
            let answer = server.read().await;
            assert_eq!(answer.message_type(), MessageType::CallbackResponse);
            let payload = ResponsePayload::decode(&mut answer.payload.clone()).unwrap();
            assert_eq!(payload.responding_to, SequenceNumber::new(3));

            // Orderly goodbye.
            let terminate = server.read().await;
            assert_eq!(terminate.message_type(), MessageType::Terminate);
            server
                .send(terminate.sequence_number(), MessageType::Terminated, Bytes::new())
                .await;
        });

        let client = FederateClient::connect(
            Arc::new(TcpTransport::new(addr)),
            handler.clone(),
            settings(),
        )
        .await
        .unwrap();
        assert_eq!(client.session_id(), 51);

        let result = client.call(Bytes::from_static(b"join")).await.unwrap();
        assert_eq!(&result[..], b"joined");

        tokio::time::timeout(Duration::from_secs(2), async {
            while handler.callbacks.lock().unwrap().is_empty() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(&handler.callbacks.lock().unwrap()[0][..], b"time advance grant");

        client.disconnect().await.unwrap();
        assert_eq!(client.state(), State::Terminated);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn evoked_clients_pump_their_own_callbacks() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handler = RecordingHandler::new();

        let server = tokio::spawn(async move {
            let mut server = MockServer::establish(&listener, 53).await;
            server
                .send(
                    SequenceNumber::INITIAL,
                    MessageType::CallbackRequest,
                    Bytes::from_static(b"discover"),
                )
                .await;
            let answer = server.read().await;
            assert_eq!(answer.message_type(), MessageType::CallbackResponse);
            tokio::time::sleep(Duration::from_secs(1)).await;
        });

        let client = FederateClient::connect(
            Arc::new(TcpTransport::new(addr)),
            handler.clone(),
            ClientSettings {
                callback_mode: CallbackMode::Evoked,
                ..settings()
            },
        )
        .await
        .unwrap();

        assert!(client.evoke_callback(Duration::from_secs(2)).await);
        assert_eq!(handler.callbacks.lock().unwrap().len(), 1);
        server.abort();
    }
}
