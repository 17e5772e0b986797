//! Consumer side of the perf shared-memory ring buffer.
//!
//! The kernel appends variable-length records and advances `data_head`; we read
//! them and advance `data_tail`. No locks are involved: correctness rests on
//! loading head with `Acquire` before touching record bytes, and storing tail
//! with `Release` only after every byte up to it has been read.
//!
//! ```text
//!            tail (ours)                 head (kernel's)
//!               |                           |
//!   ... free ...|== rec ==|== rec ==|= rec =|... free ...
//!               \_________ readable ________/
//! ```
//!
//! Offsets are monotonically increasing `u64`s; `offset & mask` is the byte
//! position in the power-of-two data area, which gives wrap-around for free.

use super::{Address, RawSample, SampleSink};
use crate::utils::config::MAX_STACK_DEPTH;
use crate::utils::error::RingError;
use log::{debug, warn};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::time::Instant;

/// `perf_event_header.type` of a lost-records notification
pub const PERF_RECORD_LOST: u32 = 2;

/// `perf_event_header.type` of a sample
pub const PERF_RECORD_SAMPLE: u32 = 9;

/// Size of `struct perf_event_header { u32 type; u16 misc; u16 size; }`
pub const HEADER_SIZE: u64 = 8;

/// `u64 time` + `u64 nr` preceding the callchain in a sample record
const SAMPLE_PREFIX_SIZE: u64 = 16;

/// When a drain loop must give up between records
#[derive(Debug, Default, Clone, Copy)]
pub struct DrainControl<'a> {
    stop: Option<&'a AtomicBool>,
    deadline: Option<Instant>,
}

impl<'a> DrainControl<'a> {
    /// Drain everything that is available
    pub fn unbounded() -> Self {
        Self::default()
    }

    /// Stop as soon as `flag` becomes true
    pub fn with_stop(mut self, flag: &'a AtomicBool) -> Self {
        self.stop = Some(flag);
        self
    }

    /// Stop once `deadline` has passed
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    fn should_stop(&self) -> bool {
        if let Some(flag) = self.stop {
            if flag.load(Ordering::Relaxed) {
                return true;
            }
        }
        matches!(self.deadline, Some(deadline) if Instant::now() >= deadline)
    }
}

/// What one drain pass consumed
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DrainStats {
    /// Records consumed (of any type)
    pub records: u64,

    /// Sample records kept in the sink
    pub samples: u64,

    /// Sample records whose callchain held only sentinels
    pub empty_callchains: u64,

    /// Sample records discarded because the sink was full
    pub dropped: u64,

    /// Samples the kernel reported as lost (`PERF_RECORD_LOST`)
    pub lost: u64,

    /// Bytes released back to the producer
    pub bytes: u64,

    /// The drain stopped early because of its `DrainControl`
    pub interrupted: bool,
}

#[derive(Debug, Clone, Copy)]
struct RecordHeader {
    kind: u32,
    size: u16,
}

/// View over a single-producer/single-consumer perf ring
pub struct RingBuffer<'a> {
    head: &'a AtomicU64,
    tail: &'a AtomicU64,
    data: &'a [AtomicU8],
    mask: u64,
}

impl<'a> RingBuffer<'a> {
    /// Wrap the two cursors and the data area of a ring
    ///
    /// # Errors
    /// * `RingError::InvalidSize` - data length is zero or not a power of two
    pub fn new(
        head: &'a AtomicU64,
        tail: &'a AtomicU64,
        data: &'a [AtomicU8],
    ) -> Result<Self, RingError> {
        if data.is_empty() || !data.len().is_power_of_two() {
            return Err(RingError::InvalidSize(data.len()));
        }
        Ok(Self {
            head,
            tail,
            data,
            mask: data.len() as u64 - 1,
        })
    }

    /// Size of the data area in bytes
    pub fn capacity(&self) -> u64 {
        self.mask + 1
    }

    /// Bytes published by the producer and not yet consumed
    pub fn pending(&self) -> u64 {
        let head = self.head.load(Ordering::Acquire);
        head.saturating_sub(self.tail.load(Ordering::Relaxed))
    }

    /// Decode every complete record between tail and head into `sink`
    ///
    /// Safe to call repeatedly; each call picks up where the previous one
    /// stopped. On a protocol violation the tail is left untouched and the
    /// session should be abandoned.
    ///
    /// # Errors
    /// * `RingError::Desync` - tail is ahead of head
    /// * `RingError::Overrun` - head is more than one buffer ahead of tail
    /// * `RingError::Corrupt` - a record header or body is inconsistent
    pub fn drain(
        &self,
        sink: &mut SampleSink,
        control: &DrainControl<'_>,
    ) -> Result<DrainStats, RingError> {
        // Pairs with the kernel's release of data_head: every record byte
        // below `head` is visible after this load.
        let head = self.head.load(Ordering::Acquire);
        let start = self.tail.load(Ordering::Relaxed);

        if start > head {
            return Err(RingError::Desync { head, tail: start });
        }
        if head - start > self.capacity() {
            return Err(RingError::Overrun {
                head,
                tail: start,
                capacity: self.capacity(),
            });
        }

        let mut stats = DrainStats::default();
        let mut cursor = start;

        while cursor < head {
            if control.should_stop() {
                stats.interrupted = true;
                break;
            }

            if head - cursor < HEADER_SIZE {
                return Err(corrupt(cursor, "truncated record header"));
            }
            let header = self.read_header(cursor);
            let size = u64::from(header.size);
            if size < HEADER_SIZE {
                return Err(corrupt(cursor, format!("record size {size} is smaller than its header")));
            }
            if cursor + size > head {
                return Err(corrupt(
                    cursor,
                    format!("record of {size} bytes extends past head {head}"),
                ));
            }

            match header.kind {
                PERF_RECORD_SAMPLE => self.decode_sample(cursor, size, sink, &mut stats)?,
                PERF_RECORD_LOST if size >= HEADER_SIZE + 16 => {
                    // { u64 id; u64 lost; }
                    stats.lost += self.read_u64(cursor + HEADER_SIZE + 8);
                }
                _ => {}
            }

            stats.records += 1;
            cursor += size;
        }

        stats.bytes = cursor - start;

        // Everything below `cursor` has been copied out; hand it back.
        self.tail.store(cursor, Ordering::Release);

        if stats.lost > 0 {
            warn!("Kernel reported {} lost samples", stats.lost);
        }
        debug!(
            "Drained {} records ({} bytes): {} samples kept, {} dropped",
            stats.records, stats.bytes, stats.samples, stats.dropped
        );

        Ok(stats)
    }

    /// Decode `{ u64 time; u64 nr; u64 ips[nr]; }` following the header
    fn decode_sample(
        &self,
        offset: u64,
        size: u64,
        sink: &mut SampleSink,
        stats: &mut DrainStats,
    ) -> Result<(), RingError> {
        if size < HEADER_SIZE + SAMPLE_PREFIX_SIZE {
            return Err(corrupt(offset, "sample record too short for time and callchain length"));
        }

        let mut pos = offset + HEADER_SIZE;
        let timestamp = self.read_u64(pos);
        pos += 8;
        let nr = self.read_u64(pos);
        pos += 8;

        let needed = nr
            .checked_mul(8)
            .and_then(|ips| ips.checked_add(HEADER_SIZE + SAMPLE_PREFIX_SIZE));
        match needed {
            Some(needed) if needed <= size => {}
            _ => {
                return Err(corrupt(
                    offset,
                    format!("callchain of {nr} entries does not fit in {size} bytes"),
                ))
            }
        }

        if sink.is_full() {
            stats.dropped += 1;
            sink.record_drop();
            return Ok(());
        }

        let mut addresses = Vec::with_capacity((nr as usize).min(MAX_STACK_DEPTH));
        for _ in 0..nr {
            if addresses.len() >= MAX_STACK_DEPTH {
                break;
            }
            let ip = Address(self.read_u64(pos));
            pos += 8;
            if ip.is_sentinel() {
                continue;
            }
            addresses.push(ip);
        }

        if addresses.is_empty() {
            stats.empty_callchains += 1;
            return Ok(());
        }

        sink.push(RawSample::new(addresses, timestamp));
        stats.samples += 1;
        Ok(())
    }

    fn read_header(&self, offset: u64) -> RecordHeader {
        let mut raw = [0u8; HEADER_SIZE as usize];
        self.read_bytes(offset, &mut raw);
        RecordHeader {
            kind: u32::from_ne_bytes([raw[0], raw[1], raw[2], raw[3]]),
            size: u16::from_ne_bytes([raw[6], raw[7]]),
        }
    }

    fn read_u64(&self, offset: u64) -> u64 {
        let mut raw = [0u8; 8];
        self.read_bytes(offset, &mut raw);
        u64::from_ne_bytes(raw)
    }

    /// Byte-wise copy with wrap-around
    fn read_bytes(&self, offset: u64, out: &mut [u8]) {
        for (i, byte) in out.iter_mut().enumerate() {
            let at = ((offset + i as u64) & self.mask) as usize;
            *byte = self.data[at].load(Ordering::Relaxed);
        }
    }
}

fn corrupt(offset: u64, reason: impl Into<String>) -> RingError {
    RingError::Corrupt {
        offset,
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// In-memory stand-in for the kernel side of the ring
    struct Producer {
        head: AtomicU64,
        tail: AtomicU64,
        data: Vec<AtomicU8>,
    }

    impl Producer {
        fn new(size: usize) -> Self {
            Self {
                head: AtomicU64::new(0),
                tail: AtomicU64::new(0),
                data: (0..size).map(|_| AtomicU8::new(0)).collect(),
            }
        }

        fn write(&self, bytes: &[u8]) {
            let head = self.head.load(Ordering::Relaxed);
            let mask = self.data.len() as u64 - 1;
            for (i, b) in bytes.iter().enumerate() {
                self.data[((head + i as u64) & mask) as usize].store(*b, Ordering::Relaxed);
            }
            self.head.store(head + bytes.len() as u64, Ordering::Release);
        }

        fn ring(&self) -> RingBuffer<'_> {
            RingBuffer::new(&self.head, &self.tail, &self.data).unwrap()
        }
    }

    fn sample_record(time: u64, ips: &[u64]) -> Vec<u8> {
        let size = (HEADER_SIZE + SAMPLE_PREFIX_SIZE) as usize + ips.len() * 8;
        let mut out = Vec::with_capacity(size);
        out.extend_from_slice(&PERF_RECORD_SAMPLE.to_ne_bytes());
        out.extend_from_slice(&0u16.to_ne_bytes());
        out.extend_from_slice(&(size as u16).to_ne_bytes());
        out.extend_from_slice(&time.to_ne_bytes());
        out.extend_from_slice(&(ips.len() as u64).to_ne_bytes());
        for ip in ips {
            out.extend_from_slice(&ip.to_ne_bytes());
        }
        out
    }

    #[test]
    fn test_rejects_non_power_of_two() {
        let head = AtomicU64::new(0);
        let tail = AtomicU64::new(0);
        let data: Vec<AtomicU8> = (0..100).map(|_| AtomicU8::new(0)).collect();
        assert_eq!(
            RingBuffer::new(&head, &tail, &data).err(),
            Some(RingError::InvalidSize(100))
        );
    }

    #[test]
    fn test_drains_and_publishes_tail() {
        let producer = Producer::new(256);
        producer.write(&sample_record(7, &[0x30, 0x20, 0x10]));
        producer.write(&sample_record(8, &[0x40]));

        let mut sink = SampleSink::with_capacity(16);
        let stats = producer.ring().drain(&mut sink, &DrainControl::unbounded()).unwrap();

        assert_eq!(stats.samples, 2);
        assert_eq!(producer.tail.load(Ordering::Acquire), producer.head.load(Ordering::Acquire));
        let batch = sink.into_batch();
        assert_eq!(batch.samples[0].timestamp, 7);
        assert_eq!(
            batch.samples[0].addresses,
            vec![Address(0x30), Address(0x20), Address(0x10)]
        );
    }

    #[test]
    fn test_record_wrapping_the_end() {
        let producer = Producer::new(64);
        // Move both cursors close to the end so the next record wraps.
        producer.head.store(56, Ordering::Relaxed);
        producer.tail.store(56, Ordering::Relaxed);
        producer.write(&sample_record(1, &[0xaaaa, 0xbbbb]));

        let mut sink = SampleSink::with_capacity(4);
        producer.ring().drain(&mut sink, &DrainControl::unbounded()).unwrap();

        let batch = sink.into_batch();
        assert_eq!(batch.samples[0].addresses, vec![Address(0xaaaa), Address(0xbbbb)]);
    }

    #[test]
    fn test_sentinels_are_skipped() {
        let producer = Producer::new(128);
        producer.write(&sample_record(1, &[u64::MAX - 511, 0x1234]));
        producer.write(&sample_record(2, &[u64::MAX - 511]));

        let mut sink = SampleSink::with_capacity(4);
        let stats = producer.ring().drain(&mut sink, &DrainControl::unbounded()).unwrap();

        assert_eq!(stats.samples, 1);
        assert_eq!(stats.empty_callchains, 1);
        assert_eq!(sink.into_batch().samples[0].addresses, vec![Address(0x1234)]);
    }

    #[test]
    fn test_full_sink_still_consumes_records() {
        let producer = Producer::new(256);
        for t in 0..3 {
            producer.write(&sample_record(t, &[0x10 + t]));
        }

        let mut sink = SampleSink::with_capacity(1);
        let stats = producer.ring().drain(&mut sink, &DrainControl::unbounded()).unwrap();

        assert_eq!(stats.samples, 1);
        assert_eq!(stats.dropped, 2);
        assert_eq!(producer.ring().pending(), 0);
        assert_eq!(sink.into_batch().dropped, 2);
    }

    #[test]
    fn test_overrun_and_desync_decode_nothing() {
        let producer = Producer::new(64);
        producer.head.store(200, Ordering::Relaxed);
        producer.tail.store(100, Ordering::Relaxed);
        let mut sink = SampleSink::with_capacity(4);
        let err = producer.ring().drain(&mut sink, &DrainControl::unbounded()).unwrap_err();
        assert!(matches!(err, RingError::Overrun { capacity: 64, .. }));

        producer.head.store(10, Ordering::Relaxed);
        let err = producer.ring().drain(&mut sink, &DrainControl::unbounded()).unwrap_err();
        assert_eq!(err, RingError::Desync { head: 10, tail: 100 });
        assert!(sink.is_empty());
    }

    #[test]
    fn test_zero_sized_record_is_corrupt() {
        let producer = Producer::new(64);
        let mut bad = sample_record(1, &[0x1]);
        bad[6] = 0;
        bad[7] = 0;
        producer.write(&bad);

        let mut sink = SampleSink::with_capacity(4);
        let err = producer.ring().drain(&mut sink, &DrainControl::unbounded()).unwrap_err();
        assert!(matches!(err, RingError::Corrupt { offset: 0, .. }));
        assert_eq!(producer.tail.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_stop_flag_interrupts_between_records() {
        let producer = Producer::new(256);
        producer.write(&sample_record(1, &[0x1]));
        producer.write(&sample_record(2, &[0x2]));

        let stop = AtomicBool::new(true);
        let mut sink = SampleSink::with_capacity(4);
        let control = DrainControl::unbounded().with_stop(&stop);
        let stats = producer.ring().drain(&mut sink, &control).unwrap();

        assert!(stats.interrupted);
        assert_eq!(stats.records, 0);
        assert_eq!(producer.tail.load(Ordering::Relaxed), 0);

        stop.store(false, Ordering::Relaxed);
        let stats = producer.ring().drain(&mut sink, &control).unwrap();
        assert_eq!(stats.samples, 2);
    }
}
