//! Sample sources: where raw call-stacks come from.
//!
//! Two producers share one output contract (`RawSample`):
//! - `self_sampler` - SIGPROF-driven capture of this process's own stack
//! - `ring_buffer` / `perf` - decoding of kernel perf records for another process

pub mod perf;
pub mod ring_buffer;
pub mod self_sampler;

pub use perf::{PerfConfig, PerfRunStats, PerfSession};
pub use ring_buffer::{DrainControl, DrainStats, RingBuffer};
pub use self_sampler::{profile_closure, SampleArena, SelfSampler, SelfSamplerConfig};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Instruction pointer captured in a sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address(pub u64);

impl Address {
    /// Lowest value of the reserved range perf uses for context markers
    /// (`PERF_CONTEXT_USER`, `PERF_CONTEXT_KERNEL`, ...)
    pub const SENTINEL_FLOOR: u64 = u64::MAX - 4095;

    /// True for perf context markers, which are not real frames
    pub fn is_sentinel(self) -> bool {
        self.0 >= Self::SENTINEL_FLOOR
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

/// One captured call-stack
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawSample {
    /// Deepest frame first
    pub addresses: Vec<Address>,

    /// Capture time in nanoseconds (monotonic clock)
    pub timestamp: u64,
}

impl RawSample {
    pub fn new(addresses: Vec<Address>, timestamp: u64) -> Self {
        Self {
            addresses,
            timestamp,
        }
    }
}

/// Everything a session collected, plus what it had to drop
#[derive(Debug, Clone, Default)]
pub struct SampleBatch {
    pub samples: Vec<RawSample>,

    /// Samples lost to capacity exhaustion
    pub dropped: u64,
}

/// Bounded collector used by the ring-buffer consumer
///
/// Once `capacity` samples are held, further samples are counted and discarded.
#[derive(Debug)]
pub struct SampleSink {
    samples: Vec<RawSample>,
    capacity: usize,
    dropped: u64,
}

impl SampleSink {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            samples: Vec::new(),
            capacity,
            dropped: 0,
        }
    }

    /// Store a sample; returns false (and counts a drop) when full
    pub fn push(&mut self, sample: RawSample) -> bool {
        if self.samples.len() >= self.capacity {
            self.dropped += 1;
            return false;
        }
        self.samples.push(sample);
        true
    }

    /// Count a sample that was never materialized because the sink is full
    pub fn record_drop(&mut self) {
        self.dropped += 1;
    }

    pub fn is_full(&self) -> bool {
        self.samples.len() >= self.capacity
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn into_batch(self) -> SampleBatch {
        SampleBatch {
            samples: self.samples,
            dropped: self.dropped,
        }
    }
}

/// Read the monotonic clock in nanoseconds
///
/// Only calls `clock_gettime`, so it is safe inside a signal handler.
pub fn monotonic_nanos() -> u64 {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    // SAFETY: `ts` is a valid, writable timespec.
    let rc = unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts) };
    if rc != 0 {
        return 0;
    }
    (ts.tv_sec as u64)
        .wrapping_mul(1_000_000_000)
        .wrapping_add(ts.tv_nsec as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sentinel_range() {
        assert!(Address(u64::MAX).is_sentinel());
        assert!(Address(u64::MAX - 4095).is_sentinel());
        assert!(!Address(u64::MAX - 4096).is_sentinel());
        assert!(!Address(0x4005d0).is_sentinel());
    }

    #[test]
    fn test_sink_counts_overflow() {
        let mut sink = SampleSink::with_capacity(2);
        for i in 0..5 {
            sink.push(RawSample::new(vec![Address(i)], i));
        }
        assert!(sink.is_full());
        assert_eq!(sink.len(), 2);
        assert_eq!(sink.dropped(), 3);

        let batch = sink.into_batch();
        assert_eq!(batch.samples[1].addresses, vec![Address(1)]);
        assert_eq!(batch.dropped, 3);
    }

    #[test]
    fn test_monotonic_clock_advances() {
        let a = monotonic_nanos();
        let b = monotonic_nanos();
        assert!(b >= a);
    }
}
