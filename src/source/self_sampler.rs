//! SIGPROF-driven sampling of the current process.
//!
//! An `ITIMER_PROF` timer fires `SIGPROF` at a fixed CPU-time rate. The handler
//! walks the interrupted stack straight into a slot of a pre-allocated
//! `SampleArena`, so the signal path never allocates, locks or blocks.

use super::{monotonic_nanos, Address, RawSample, SampleBatch};
use crate::utils::config::{
    DEFAULT_SELF_FREQUENCY_HZ, DEFAULT_SELF_MAX_SAMPLES, MAX_FREQUENCY_HZ, MAX_STACK_DEPTH,
};
use crate::utils::error::SessionError;
use log::{debug, info, warn};
use std::cell::UnsafeCell;
use std::io;
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// Arena the signal handler writes into; null when no session is active
static ACTIVE_ARENA: AtomicPtr<SampleArena> = AtomicPtr::new(ptr::null_mut());

/// Set while some thread is inside the handler
static IN_HANDLER: AtomicBool = AtomicBool::new(false);

/// Ticks that found another thread inside the handler
static CONTENDED_TICKS: AtomicU64 = AtomicU64::new(0);

/// Self-sampling session parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelfSamplerConfig {
    pub frequency_hz: u32,
    pub max_samples: usize,
}

impl Default for SelfSamplerConfig {
    fn default() -> Self {
        Self {
            frequency_hz: DEFAULT_SELF_FREQUENCY_HZ,
            max_samples: DEFAULT_SELF_MAX_SAMPLES,
        }
    }
}

impl SelfSamplerConfig {
    pub fn with_frequency(mut self, hz: u32) -> Self {
        self.frequency_hz = hz;
        self
    }

    pub fn with_max_samples(mut self, max: usize) -> Self {
        self.max_samples = max;
        self
    }

    pub fn validate(&self) -> Result<(), SessionError> {
        if self.frequency_hz == 0 || self.frequency_hz > MAX_FREQUENCY_HZ {
            return Err(SessionError::InvalidConfig(format!(
                "frequency must be in 1..={MAX_FREQUENCY_HZ} Hz, got {}",
                self.frequency_hz
            )));
        }
        if self.max_samples == 0 {
            return Err(SessionError::InvalidConfig(
                "max_samples must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Timer period as an `itimerval` field
    fn interval(&self) -> libc::timeval {
        let micros = 1_000_000u64 / u64::from(self.frequency_hz.max(1));
        libc::timeval {
            tv_sec: (micros / 1_000_000) as libc::time_t,
            tv_usec: (micros % 1_000_000) as libc::suseconds_t,
        }
    }
}

struct Slot {
    ready: AtomicBool,
    depth: UnsafeCell<usize>,
    timestamp: UnsafeCell<u64>,
    frames: UnsafeCell<[u64; MAX_STACK_DEPTH]>,
}

impl Slot {
    fn empty() -> Self {
        Self {
            ready: AtomicBool::new(false),
            depth: UnsafeCell::new(0),
            timestamp: UnsafeCell::new(0),
            frames: UnsafeCell::new([0; MAX_STACK_DEPTH]),
        }
    }
}

/// Fixed-capacity sample storage that is safe to fill from a signal handler
///
/// Each writer claims a distinct slot index with a single `fetch_add`, writes
/// it, then publishes it through the slot's `ready` flag. Once the index runs
/// past capacity the sample is counted as dropped.
pub struct SampleArena {
    slots: Box<[Slot]>,
    claimed: AtomicUsize,
    dropped: AtomicU64,
}

// SAFETY: a slot's cells are written only by the writer that claimed its
// index, and read only after that writer's release store on `ready`.
unsafe impl Sync for SampleArena {}

impl SampleArena {
    /// Pre-allocate `capacity` slots
    pub fn with_capacity(capacity: usize) -> Self {
        let slots = (0..capacity).map(|_| Slot::empty()).collect::<Vec<_>>();
        Self {
            slots: slots.into_boxed_slice(),
            claimed: AtomicUsize::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Samples stored so far
    pub fn len(&self) -> usize {
        self.claimed.load(Ordering::Relaxed).min(self.capacity())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Count samples lost before they could claim a slot
    pub fn add_dropped(&self, count: u64) {
        self.dropped.fetch_add(count, Ordering::Relaxed);
    }

    /// Claim a slot and fill it with `capture`
    ///
    /// `capture` receives the slot's frame array and returns how many entries
    /// it wrote. Returns false when the arena is full.
    pub fn record<F>(&self, timestamp: u64, capture: F) -> bool
    where
        F: FnOnce(&mut [u64; MAX_STACK_DEPTH]) -> usize,
    {
        let index = self.claimed.fetch_add(1, Ordering::Relaxed);
        let Some(slot) = self.slots.get(index) else {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        };

        // SAFETY: `index` was handed out exactly once, so no other writer can
        // touch this slot, and readers wait for `ready`.
        unsafe {
            let frames = &mut *slot.frames.get();
            let depth = capture(frames).min(MAX_STACK_DEPTH);
            *slot.depth.get() = depth;
            *slot.timestamp.get() = timestamp;
        }
        slot.ready.store(true, Ordering::Release);
        true
    }

    /// Copy out every published sample, in claim order
    pub fn collect(&self) -> SampleBatch {
        let mut samples = Vec::with_capacity(self.len());
        for slot in self.slots.iter().take(self.len()) {
            if !slot.ready.load(Ordering::Acquire) {
                continue;
            }
            // SAFETY: the acquire load above pairs with the writer's release.
            let (frames, depth, timestamp) =
                unsafe { (&*slot.frames.get(), *slot.depth.get(), *slot.timestamp.get()) };
            if depth == 0 {
                continue;
            }
            let addresses = frames[..depth].iter().map(|&ip| Address(ip)).collect();
            samples.push(RawSample::new(addresses, timestamp));
        }
        SampleBatch {
            samples,
            dropped: self.dropped(),
        }
    }
}

extern "C" fn sigprof_handler(
    _sig: libc::c_int,
    _info: *mut libc::siginfo_t,
    _context: *mut libc::c_void,
) {
    // One thread at a time; a concurrent tick is counted and lost.
    if IN_HANDLER.swap(true, Ordering::SeqCst) {
        if !ACTIVE_ARENA.load(Ordering::SeqCst).is_null() {
            CONTENDED_TICKS.fetch_add(1, Ordering::Relaxed);
        }
        return;
    }

    let arena = ACTIVE_ARENA.load(Ordering::SeqCst);
    if !arena.is_null() {
        // SAFETY: `stop` clears ACTIVE_ARENA and waits for IN_HANDLER to drop
        // before the arena can be freed.
        let arena = unsafe { &*arena };
        let timestamp = monotonic_nanos();
        arena.record(timestamp, |frames| {
            let mut depth = 0;
            // SAFETY: no other unwinder runs in this handler.
            unsafe {
                backtrace::trace_unsynchronized(|frame| {
                    if depth >= MAX_STACK_DEPTH {
                        return false;
                    }
                    frames[depth] = frame.ip() as u64;
                    depth += 1;
                    true
                });
            }
            depth
        });
    }

    IN_HANDLER.store(false, Ordering::SeqCst);
}

/// A running self-sampling session
///
/// Dropping a running sampler stops it and discards its samples.
pub struct SelfSampler {
    arena: Box<SampleArena>,
    config: SelfSamplerConfig,
    started: Instant,
    running: bool,
}

impl SelfSampler {
    /// **Public** - Start sampling this process
    ///
    /// # Arguments
    /// * `config` - Frequency and arena capacity
    ///
    /// # Errors
    /// * `SessionError::InvalidConfig` - Frequency or capacity out of range
    /// * `SessionError::AlreadyActive` - Another sampler is running
    /// * `SessionError::Signal` - `sigaction` or `setitimer` failed
    ///
    /// # Example
    /// ```ignore
    /// let sampler = SelfSampler::start(SelfSamplerConfig::default())?;
    /// run_workload();
    /// let batch = sampler.stop()?;
    /// ```
    pub fn start(config: SelfSamplerConfig) -> Result<Self, SessionError> {
        config.validate()?;

        let arena = Box::new(SampleArena::with_capacity(config.max_samples));
        let arena_ptr = &*arena as *const SampleArena as *mut SampleArena;

        ACTIVE_ARENA
            .compare_exchange(ptr::null_mut(), arena_ptr, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| SessionError::AlreadyActive)?;
        CONTENDED_TICKS.store(0, Ordering::SeqCst);

        if let Err(e) = install_handler().and_then(|_| arm_timer(&config)) {
            disarm();
            ACTIVE_ARENA.store(ptr::null_mut(), Ordering::SeqCst);
            return Err(SessionError::Signal(e));
        }

        info!(
            "Self-sampling at {} Hz into {} slots",
            config.frequency_hz, config.max_samples
        );

        Ok(Self {
            arena,
            config,
            started: Instant::now(),
            running: true,
        })
    }

    /// Samples captured so far
    pub fn sample_count(&self) -> usize {
        self.arena.len()
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn config(&self) -> &SelfSamplerConfig {
        &self.config
    }

    /// **Public** - Stop sampling and hand back everything captured
    ///
    /// # Returns
    /// All published samples plus the number dropped (arena full, or the
    /// handler was busy on another thread)
    pub fn stop(mut self) -> Result<SampleBatch, SessionError> {
        self.shutdown();
        let batch = self.arena.collect();

        if batch.dropped > 0 {
            warn!(
                "{} samples dropped (arena capacity {})",
                batch.dropped,
                self.arena.capacity()
            );
        }
        info!(
            "Self-sampling stopped after {:.2}s: {} samples",
            self.elapsed().as_secs_f64(),
            batch.samples.len()
        );

        Ok(batch)
    }

    fn shutdown(&mut self) {
        if !self.running {
            return;
        }
        disarm();
        ACTIVE_ARENA.store(ptr::null_mut(), Ordering::SeqCst);
        while IN_HANDLER.load(Ordering::SeqCst) {
            std::hint::spin_loop();
        }
        let contended = CONTENDED_TICKS.swap(0, Ordering::SeqCst);
        if contended > 0 {
            debug!("{} SIGPROF ticks lost to handler contention", contended);
            self.arena.add_dropped(contended);
        }
        self.running = false;
        debug!("SIGPROF handler detached");
    }
}

impl Drop for SelfSampler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// **Public** - Sample the process while `f` runs
///
/// # Returns
/// `f`'s result and the captured batch
pub fn profile_closure<F, R>(
    config: SelfSamplerConfig,
    f: F,
) -> Result<(R, SampleBatch), SessionError>
where
    F: FnOnce() -> R,
{
    let sampler = SelfSampler::start(config)?;
    let result = f();
    let batch = sampler.stop()?;
    Ok((result, batch))
}

fn install_handler() -> io::Result<()> {
    // SAFETY: zeroed sigaction is a valid starting point; the handler only
    // touches atomics, the pre-allocated arena and the unwinder.
    unsafe {
        let mut sa: libc::sigaction = std::mem::zeroed();
        sa.sa_sigaction = sigprof_handler as *const () as usize;
        sa.sa_flags = libc::SA_RESTART | libc::SA_SIGINFO;
        libc::sigemptyset(&mut sa.sa_mask);
        if libc::sigaction(libc::SIGPROF, &sa, ptr::null_mut()) < 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

fn arm_timer(config: &SelfSamplerConfig) -> io::Result<()> {
    let interval = config.interval();
    let timer = libc::itimerval {
        it_interval: interval,
        it_value: interval,
    };
    // SAFETY: `timer` is a valid itimerval.
    if unsafe { libc::setitimer(libc::ITIMER_PROF, &timer, ptr::null_mut()) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Stop the timer and ignore any SIGPROF still in flight
fn disarm() {
    let zero = libc::timeval {
        tv_sec: 0,
        tv_usec: 0,
    };
    let timer = libc::itimerval {
        it_interval: zero,
        it_value: zero,
    };
    // SAFETY: plain syscalls on valid arguments; SIG_IGN keeps a pending
    // SIGPROF from terminating the process.
    unsafe {
        libc::setitimer(libc::ITIMER_PROF, &timer, ptr::null_mut());
        let mut sa: libc::sigaction = std::mem::zeroed();
        sa.sa_sigaction = libc::SIG_IGN;
        libc::sigemptyset(&mut sa.sa_mask);
        libc::sigaction(libc::SIGPROF, &sa, ptr::null_mut());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Sessions share the process-wide handler state
    static SESSION_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn test_arena_drops_past_capacity() {
        let arena = SampleArena::with_capacity(2);
        for i in 0..5u64 {
            arena.record(i, |frames| {
                frames[0] = 0x1000 + i;
                frames[1] = 0x2000;
                2
            });
        }

        assert_eq!(arena.len(), 2);
        assert_eq!(arena.dropped(), 3);

        let batch = arena.collect();
        assert_eq!(batch.samples.len(), 2);
        assert_eq!(batch.dropped, 3);
        assert_eq!(
            batch.samples[1].addresses,
            vec![Address(0x1001), Address(0x2000)]
        );
    }

    #[test]
    fn test_arena_clamps_depth_and_skips_empty() {
        let arena = SampleArena::with_capacity(4);
        arena.record(1, |_| MAX_STACK_DEPTH + 10);
        arena.record(2, |_| 0);

        let batch = arena.collect();
        assert_eq!(batch.samples.len(), 1);
        assert_eq!(batch.samples[0].addresses.len(), MAX_STACK_DEPTH);
    }

    #[test]
    fn test_arena_concurrent_writers() {
        let arena = SampleArena::with_capacity(1000);
        std::thread::scope(|scope| {
            for t in 0..4u64 {
                let arena = &arena;
                scope.spawn(move || {
                    for i in 0..400u64 {
                        arena.record(i, |frames| {
                            frames[0] = t;
                            1
                        });
                    }
                });
            }
        });

        assert_eq!(arena.len(), 1000);
        assert_eq!(arena.dropped(), 600);
        assert_eq!(arena.collect().samples.len(), 1000);
    }

    #[test]
    fn test_config_validation() {
        assert!(SelfSamplerConfig::default().validate().is_ok());
        assert!(SelfSamplerConfig::default().with_frequency(0).validate().is_err());
        assert!(SelfSamplerConfig::default().with_max_samples(0).validate().is_err());

        let interval = SelfSamplerConfig::default().with_frequency(1).interval();
        assert_eq!(interval.tv_sec, 1);
        assert_eq!(interval.tv_usec, 0);
    }

    #[test]
    #[ignore = "installs a process-wide SIGPROF handler"]
    fn test_sampler_captures_busy_loop() {
        let _guard = SESSION_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let config = SelfSamplerConfig::default().with_max_samples(10_000);
        let (_, batch) = profile_closure(config, || {
            let start = Instant::now();
            let mut x = 1.0f64;
            while start.elapsed() < Duration::from_millis(300) {
                x = std::hint::black_box(x * 1.000_000_1 + 0.000_000_1);
            }
            x
        })
        .unwrap();

        assert!(!batch.samples.is_empty());
        assert!(matches!(
            SelfSampler::start(SelfSamplerConfig::default())
                .and_then(|s| SelfSampler::start(SelfSamplerConfig::default()).map(|_| s)),
            Err(SessionError::AlreadyActive)
        ));
    }

    #[test]
    fn test_contended_ticks_count_as_dropped() {
        let _guard = SESSION_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let sampler = SelfSampler::start(SelfSamplerConfig::default().with_frequency(1)).unwrap();

        // Another thread holds the handler; these ticks cannot be recorded
        IN_HANDLER.store(true, Ordering::SeqCst);
        for _ in 0..3 {
            sigprof_handler(libc::SIGPROF, ptr::null_mut(), ptr::null_mut());
        }
        IN_HANDLER.store(false, Ordering::SeqCst);

        let batch = sampler.stop().unwrap();
        assert!(batch.dropped >= 3);
        assert_eq!(CONTENDED_TICKS.load(Ordering::SeqCst), 0);

        // Without a session, a contended tick has nowhere to be counted
        IN_HANDLER.store(true, Ordering::SeqCst);
        sigprof_handler(libc::SIGPROF, ptr::null_mut(), ptr::null_mut());
        IN_HANDLER.store(false, Ordering::SeqCst);
        assert_eq!(CONTENDED_TICKS.load(Ordering::SeqCst), 0);
    }
}
