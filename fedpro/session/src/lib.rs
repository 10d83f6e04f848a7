//! Resumable client session layer for the federate protocol.
//!
//! This crate drives one logical session over a sequence of transport
//! connections. Outgoing messages flow through a fair two-lane queue into a
//! replay buffer that assigns sequence numbers lazily, so a connection drop
//! never loses a message: a resumed connection replays everything the server
//! never acknowledged.
//!
//! [`Session`] is the core state machine; [`PersistentSession`] wraps it with
//! automatic heartbeats and reconnection driven by a [`ResumeStrategy`].
//! Transports are pluggable through the [`Transport`] trait, with plain TCP
//! built in and TLS behind the `tls` feature.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod buffers;
pub mod error;
pub mod flowcontrol;
pub mod message;
pub mod persistent;
pub mod resume;
pub mod session;
pub mod timeout;
pub mod transport;

mod writer;

// Re-export main types
pub use error::{ResponseResult, SessionError};
pub use flowcontrol::{ExponentialRateLimiter, NullRateLimiter, RateLimiter};
pub use message::ResponseFuture;
pub use persistent::{PersistentConfig, PersistentSession};
pub use resume::{ProgressiveDelayResumeStrategy, ResumeStrategy, SimpleResumeStrategy};
pub use session::{Session, SessionConfig, SessionEvent, State};
pub use timeout::TimeoutTimer;
pub use transport::{IoStream, TcpTransport, Transport};

#[cfg(feature = "tls")]
pub use transport::tls::{make_client_config, TlsTransport};
