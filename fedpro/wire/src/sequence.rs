//! Skip-zero cyclic sequence numbers.
//!
//! Sequence numbers are 32-bit counters where the value `0` is reserved as a
//! "no sequence number" sentinel. Arithmetic operates on the remaining
//! 2^32 - 1 values considered cyclically, so incrementing `u32::MAX` yields
//! `1`, never `0`.

use serde::{Deserialize, Serialize};

/// Length of the valid sequence-number cycle (all u32 values except `0`).
const CYCLE: u64 = u32::MAX as u64;

/// A sequence number on the skip-zero cycle.
///
/// `SequenceNumber::NONE` (the wire value `0`) marks the absence of a
/// sequence number, e.g. an empty replay buffer or a header field that does
/// not carry one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SequenceNumber(u32);

impl SequenceNumber {
    /// Reserved sentinel meaning "no sequence number".
    pub const NONE: SequenceNumber = SequenceNumber(0);
    /// First sequence number of a fresh session.
    pub const INITIAL: SequenceNumber = SequenceNumber(1);
    /// Highest value on the cycle.
    pub const MAX: SequenceNumber = SequenceNumber(u32::MAX);

    /// Wrap a raw wire value. `0` becomes the sentinel.
    pub fn new(value: u32) -> Self {
        SequenceNumber(value)
    }

    /// The raw wire value.
    pub fn get(self) -> u32 {
        self.0
    }

    /// Whether this is a real sequence number rather than the sentinel.
    pub fn is_valid(self) -> bool {
        self.0 != 0
    }

    /// The next number on the cycle, skipping `0`.
    pub fn next(self) -> Self {
        debug_assert!(self.is_valid());
        self.add(1)
    }

    /// The previous number on the cycle, skipping `0`.
    pub fn prev(self) -> Self {
        debug_assert!(self.is_valid());
        self.sub(1)
    }

    /// Advance by `n` steps on the cycle.
    pub fn add(self, n: u32) -> Self {
        debug_assert!(self.is_valid());
        let zero_based = (self.0 as u64 - 1 + n as u64) % CYCLE;
        SequenceNumber(zero_based as u32 + 1)
    }

    /// Step back by `n` on the cycle.
    pub fn sub(self, n: u32) -> Self {
        debug_assert!(self.is_valid());
        let zero_based = (self.0 as u64 - 1 + CYCLE - (n as u64 % CYCLE)) % CYCLE;
        SequenceNumber(zero_based as u32 + 1)
    }

    /// Whether `candidate` lies on the inclusive arc from `oldest` forward to
    /// `newest`, wrapping through `u32::MAX -> 1` when `oldest > newest`.
    ///
    /// All three arguments must be valid sequence numbers; the sentinel is
    /// never inside any interval.
    pub fn in_interval(candidate: Self, oldest: Self, newest: Self) -> bool {
        if !candidate.is_valid() || !oldest.is_valid() || !newest.is_valid() {
            return false;
        }
        if oldest.0 <= newest.0 {
            // Linear history.
            oldest.0 <= candidate.0 && candidate.0 <= newest.0
        } else {
            // History wraps around.
            candidate.0 <= newest.0 || oldest.0 <= candidate.0
        }
    }
}

impl std::fmt::Display for SequenceNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_valid() {
            write!(f, "{}", self.0)
        } else {
            write!(f, "<none>")
        }
    }
}

impl From<u32> for SequenceNumber {
    fn from(value: u32) -> Self {
        SequenceNumber(value)
    }
}
