//! Tick identifiers and simulation time.
//!
//! Every tick of every [`LoopedThread`](crate::LoopedThread) is identified by
//! a [`TickId`] drawn from a counter shared by the whole network, so tick ids
//! are unique and totally ordered across threads. Simulated time is tracked
//! per thread as a [`MonotonicTime`] starting at [`MonotonicTime::EPOCH`].

use std::fmt;

pub use tai_time::MonotonicTime;

use crate::loom_exports::sync::atomic::{AtomicU64, Ordering};

/// Identifier of a single tick.
///
/// The default value, [`TickId::NONE`], is never allocated and denotes "no
/// tick yet".
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TickId(u64);

impl TickId {
    /// The tick id of a step or buffer that was never computed.
    pub const NONE: TickId = TickId(0);

    /// Returns the raw counter value.
    pub fn as_u64(self) -> u64 {
        self.0
    }

    pub(crate) fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns `true` unless this is [`TickId::NONE`].
    pub fn is_some(self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for TickId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Allocator of network-unique tick ids.
#[derive(Debug)]
pub(crate) struct TickCounter(AtomicU64);

impl TickCounter {
    pub(crate) fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    /// Allocates a fresh tick id, strictly greater than all previous ones.
    pub(crate) fn next(&self) -> TickId {
        TickId(self.0.fetch_add(1, Ordering::Relaxed) + 1)
    }
}
