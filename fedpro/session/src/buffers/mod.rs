//! Outgoing message buffering pipeline.
//!
//! Messages flow through three stages on their way to the socket: a two-lane
//! fair queue (bounded, rate-limited lane for local requests; unbounded lane
//! for responses to remote traffic), then the replay buffer that assigns
//! sequence numbers and retains sent messages, then the socket writer.

mod history;
mod rate_limited;
mod ring;
mod round_robin;
mod unbounded;

pub use history::HistoryBuffer;
pub use rate_limited::RateLimitedBuffer;
pub use ring::RingBuffer;
pub use round_robin::RoundRobinBuffer;
pub use unbounded::UnboundedBuffer;
