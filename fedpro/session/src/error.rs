//! Session error types.

use fedpro_wire::WireError;
use thiserror::Error;

/// Errors surfaced by the session layer
#[derive(Error, Debug)]
pub enum SessionError {
    /// Operation attempted in a state that does not allow it
    #[error("illegal session state: {0}")]
    IllegalState(String),

    /// Operation on a session that has already terminated
    #[error("session already terminated")]
    AlreadyTerminated,

    /// The session cannot continue; outstanding calls will never complete
    #[error("session lost: {0}")]
    Lost(String),

    /// The remote side broke the message contract
    #[error("bad message: {0}")]
    BadMessage(String),

    /// Outgoing message queue is full
    #[error("outgoing message queue full")]
    QueueFull,

    /// A timeout expired while waiting for the remote side
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),

    /// Wire-level encoding or decoding failure
    #[error(transparent)]
    Wire(#[from] WireError),

    /// Transport-level failure
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Outcome delivered to a caller waiting on a sequenced request.
pub type ResponseResult = Result<bytes::Bytes, SessionError>;
