//! Client library for the federate protocol: a resumable, sequenced session
//! over TCP or TLS with request/response calls and server-initiated
//! callbacks.
//!
//! [`FederateClient`] is the entry point for most applications: it couples a
//! self-healing [`PersistentSession`] with a [`CallbackDispatcher`] so that
//! calls, callbacks and reconnection all work out of the box. Applications
//! that need finer control can drive a [`Session`] directly through the
//! `fedpro-session` layer re-exported here.
//!
//! ```no_run
//! use fedpro::{CallbackHandler, ClientSettings, FederateClient, TcpTransport};
//! use async_trait::async_trait;
//! use bytes::Bytes;
//! use std::sync::Arc;
//!
//! struct Printer;
//!
//! #[async_trait]
//! impl CallbackHandler for Printer {
//!     async fn dispatch_callback(&self, payload: Bytes) -> anyhow::Result<()> {
//!         println!("callback: {} bytes", payload.len());
//!         Ok(())
//!     }
//! }
//!
//! # async fn run() -> Result<(), fedpro::SessionError> {
//! let transport = Arc::new(TcpTransport::new("127.0.0.1:15164".parse().unwrap()));
//! let client =
//!     FederateClient::connect(transport, Arc::new(Printer), ClientSettings::default()).await?;
//! let result = client.call(Bytes::from_static(b"...")).await?;
//! client.disconnect().await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod callback;
pub mod client;

// Re-export main types
pub use callback::{CallbackDispatcher, CallbackHandler, CallbackMode, CallbackResponder};
pub use client::{ClientSettings, FederateClient};

pub use fedpro_session::{
    PersistentConfig, PersistentSession, ProgressiveDelayResumeStrategy, ResponseFuture,
    ResumeStrategy, Session, SessionConfig, SessionError, SessionEvent, SimpleResumeStrategy,
    State, TcpTransport, Transport,
};
pub use fedpro_wire::{Message, MessageType, SequenceNumber};

#[cfg(feature = "tls")]
pub use fedpro_session::{make_client_config, TlsTransport};
