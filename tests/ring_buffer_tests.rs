use flamefold::source::{Address, DrainControl, RingBuffer, SampleSink};
use flamefold::utils::RingError;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::time::Instant;

const PERF_RECORD_LOST: u32 = 2;
const PERF_RECORD_SAMPLE: u32 = 9;

/// Plays the kernel side of a perf ring
struct FakeKernel {
    head: AtomicU64,
    tail: AtomicU64,
    data: Vec<AtomicU8>,
}

impl FakeKernel {
    fn new(size: usize) -> Self {
        Self {
            head: AtomicU64::new(0),
            tail: AtomicU64::new(0),
            data: (0..size).map(|_| AtomicU8::new(0)).collect(),
        }
    }

    fn publish(&self, record: &[u8]) {
        let head = self.head.load(Ordering::Relaxed);
        let mask = self.data.len() as u64 - 1;
        for (i, byte) in record.iter().enumerate() {
            self.data[((head + i as u64) & mask) as usize].store(*byte, Ordering::Relaxed);
        }
        self.head.store(head + record.len() as u64, Ordering::Release);
    }

    fn ring(&self) -> RingBuffer<'_> {
        RingBuffer::new(&self.head, &self.tail, &self.data).unwrap()
    }
}

fn header(kind: u32, size: usize) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&kind.to_ne_bytes());
    out.extend_from_slice(&0u16.to_ne_bytes());
    out.extend_from_slice(&(size as u16).to_ne_bytes());
    out
}

fn sample(time: u64, ips: &[u64]) -> Vec<u8> {
    let mut out = header(PERF_RECORD_SAMPLE, 24 + ips.len() * 8);
    out.extend_from_slice(&time.to_ne_bytes());
    out.extend_from_slice(&(ips.len() as u64).to_ne_bytes());
    for ip in ips {
        out.extend_from_slice(&ip.to_ne_bytes());
    }
    out
}

fn lost(count: u64) -> Vec<u8> {
    let mut out = header(PERF_RECORD_LOST, 24);
    out.extend_from_slice(&1u64.to_ne_bytes());
    out.extend_from_slice(&count.to_ne_bytes());
    out
}

#[test]
fn test_incremental_drains() {
    let kernel = FakeKernel::new(512);
    let mut sink = SampleSink::with_capacity(100);

    kernel.publish(&sample(1, &[0x2, 0x1]));
    let first = kernel.ring().drain(&mut sink, &DrainControl::unbounded()).unwrap();
    assert_eq!(first.samples, 1);

    kernel.publish(&lost(5));
    kernel.publish(&sample(2, &[0x3]));
    let second = kernel.ring().drain(&mut sink, &DrainControl::unbounded()).unwrap();
    assert_eq!(second.samples, 1);
    assert_eq!(second.lost, 5);

    assert_eq!(kernel.ring().pending(), 0);
    let batch = sink.into_batch();
    assert_eq!(batch.samples.len(), 2);
    assert_eq!(batch.samples[1].addresses, vec![Address(0x3)]);
}

#[test]
fn test_overrun_decodes_nothing() {
    let kernel = FakeKernel::new(64);
    kernel.head.store(200, Ordering::Release);
    kernel.tail.store(8, Ordering::Release);

    let mut sink = SampleSink::with_capacity(10);
    let err = kernel.ring().drain(&mut sink, &DrainControl::unbounded()).unwrap_err();

    assert!(matches!(err, RingError::Overrun { .. }));
    assert!(sink.is_empty());
    assert_eq!(kernel.tail.load(Ordering::Acquire), 8);
}

#[test]
fn test_cap_consumes_and_counts_drops() {
    let kernel = FakeKernel::new(1024);
    for t in 0..5 {
        kernel.publish(&sample(t, &[0x10 + t]));
    }

    let mut sink = SampleSink::with_capacity(2);
    kernel.ring().drain(&mut sink, &DrainControl::unbounded()).unwrap();

    assert_eq!(kernel.ring().pending(), 0);
    let batch = sink.into_batch();
    assert_eq!(batch.samples.len(), 2);
    assert_eq!(batch.dropped, 3);
}

#[test]
fn test_stop_flag_leaves_records_for_later() {
    let kernel = FakeKernel::new(512);
    kernel.publish(&sample(1, &[0x1]));
    kernel.publish(&sample(2, &[0x2]));

    let stop = AtomicBool::new(true);
    let mut sink = SampleSink::with_capacity(10);
    let stats = kernel
        .ring()
        .drain(&mut sink, &DrainControl::unbounded().with_stop(&stop))
        .unwrap();

    assert!(stats.interrupted);
    assert!(kernel.ring().pending() > 0);
}

#[test]
fn test_elapsed_deadline_leaves_records_for_later() {
    let kernel = FakeKernel::new(512);
    kernel.publish(&sample(1, &[0x1]));
    kernel.publish(&lost(3));
    kernel.publish(&sample(2, &[0x2]));
    let head = kernel.head.load(Ordering::Acquire);

    let past = Instant::now();
    let mut sink = SampleSink::with_capacity(10);
    let stats = kernel
        .ring()
        .drain(&mut sink, &DrainControl::unbounded().with_deadline(past))
        .unwrap();

    assert!(stats.interrupted);
    assert_eq!(stats.records, 0);
    assert!(sink.is_empty());
    assert_eq!(kernel.tail.load(Ordering::Acquire), 0);
    assert_eq!(kernel.ring().pending(), head);

    let rest = kernel.ring().drain(&mut sink, &DrainControl::unbounded()).unwrap();
    assert!(!rest.interrupted);
    assert_eq!(rest.records, 3);
    assert_eq!(rest.samples, 2);
    assert_eq!(rest.lost, 3);
    assert_eq!(kernel.tail.load(Ordering::Acquire), head);
    assert_eq!(sink.into_batch().samples.len(), 2);
}
