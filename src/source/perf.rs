//! External-process sampling through `perf_event_open`.
//!
//! One software CPU-clock event is opened for the target pid in frequency
//! mode, recording `TIME | CALLCHAIN` for user-space stacks. Its ring buffer is
//! mapped into our address space and drained by `RingBuffer`.

use super::ring_buffer::{DrainControl, DrainStats, RingBuffer};
use super::{SampleBatch, SampleSink};
use crate::utils::config::{
    DEFAULT_EXTERNAL_FREQUENCY_HZ, DEFAULT_EXTERNAL_MAX_SAMPLES, DEFAULT_MMAP_PAGES,
    MAX_FREQUENCY_HZ,
};
use crate::utils::error::SessionError;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

/// External sampling session parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PerfConfig {
    pub frequency_hz: u32,
    pub max_samples: usize,
    /// Data pages in the ring buffer (power of two)
    pub mmap_pages: usize,
}

impl Default for PerfConfig {
    fn default() -> Self {
        Self {
            frequency_hz: DEFAULT_EXTERNAL_FREQUENCY_HZ,
            max_samples: DEFAULT_EXTERNAL_MAX_SAMPLES,
            mmap_pages: DEFAULT_MMAP_PAGES,
        }
    }
}

impl PerfConfig {
    pub fn with_frequency(mut self, hz: u32) -> Self {
        self.frequency_hz = hz;
        self
    }

    pub fn with_max_samples(mut self, max: usize) -> Self {
        self.max_samples = max;
        self
    }

    pub fn with_mmap_pages(mut self, pages: usize) -> Self {
        self.mmap_pages = pages;
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
        if !self.mmap_pages.is_power_of_two() {
            return Err(SessionError::InvalidConfig(format!(
                "mmap_pages must be a power of two, got {}",
                self.mmap_pages
            )));
        }
        Ok(())
    }
}

/// Totals accumulated over every drain of a session
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PerfRunStats {
    pub drains: u64,
    pub records: u64,
    pub lost: u64,
    pub empty_callchains: u64,
}

impl PerfRunStats {
    fn absorb(&mut self, stats: &DrainStats) {
        self.drains += 1;
        self.records += stats.records;
        self.lost += stats.lost;
        self.empty_callchains += stats.empty_callchains;
    }
}

#[cfg(target_os = "linux")]
pub use linux::PerfSession;

#[cfg(not(target_os = "linux"))]
pub use unsupported::PerfSession;

#[cfg(target_os = "linux")]
mod linux {
    use super::*;
    use crate::utils::config::POLL_INTERVAL_MS;
    use crate::utils::error::RingError;
    use log::{debug, info, warn};
    use std::io;
    use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
    use std::path::Path;
    use std::ptr;
    use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
    use std::time::Instant;

    const PERF_TYPE_SOFTWARE: u32 = 1;
    const PERF_COUNT_SW_CPU_CLOCK: u64 = 0;
    const PERF_SAMPLE_TIME: u64 = 1 << 2;
    const PERF_SAMPLE_CALLCHAIN: u64 = 1 << 5;
    const PERF_ATTR_SIZE_VER5: u32 = 112;

    const ATTR_DISABLED: u64 = 1 << 0;
    const ATTR_EXCLUDE_KERNEL: u64 = 1 << 5;
    const ATTR_EXCLUDE_HV: u64 = 1 << 6;
    const ATTR_FREQ: u64 = 1 << 10;

    const PERF_FLAG_FD_CLOEXEC: libc::c_ulong = 1 << 3;

    const PERF_EVENT_IOC_ENABLE: u64 = 0x2400;
    const PERF_EVENT_IOC_DISABLE: u64 = 0x2401;
    const PERF_EVENT_IOC_RESET: u64 = 0x2403;

    /// Offsets of `data_head` / `data_tail` in `perf_event_mmap_page`
    const DATA_HEAD_OFFSET: usize = 1024;
    const DATA_TAIL_OFFSET: usize = 1032;

    /// `struct perf_event_attr`, ABI version 5
    #[repr(C)]
    #[derive(Debug, Default)]
    struct PerfEventAttr {
        kind: u32,
        size: u32,
        config: u64,
        sample_freq: u64,
        sample_type: u64,
        read_format: u64,
        flags: u64,
        wakeup_events: u32,
        bp_type: u32,
        config1: u64,
        config2: u64,
        branch_sample_type: u64,
        sample_regs_user: u64,
        sample_stack_user: u32,
        clockid: i32,
        sample_regs_intr: u64,
        aux_watermark: u32,
        sample_max_stack: u16,
        reserved: u16,
    }

    impl PerfEventAttr {
        fn cpu_clock_sampler(frequency_hz: u32) -> Self {
            Self {
                kind: PERF_TYPE_SOFTWARE,
                size: PERF_ATTR_SIZE_VER5,
                config: PERF_COUNT_SW_CPU_CLOCK,
                sample_freq: u64::from(frequency_hz),
                sample_type: PERF_SAMPLE_TIME | PERF_SAMPLE_CALLCHAIN,
                flags: ATTR_DISABLED | ATTR_EXCLUDE_KERNEL | ATTR_EXCLUDE_HV | ATTR_FREQ,
                ..Default::default()
            }
        }
    }

    /// An open perf event on another process plus its mapped ring buffer
    pub struct PerfSession {
        pid: i32,
        fd: OwnedFd,
        base: *mut libc::c_void,
        map_len: usize,
        page_size: usize,
        config: PerfConfig,
        stats: PerfRunStats,
    }

    impl PerfSession {
        /// **Public** - Open a sampling event on `pid` and map its ring buffer
        ///
        /// The event starts disabled; `run` enables it.
        ///
        /// # Errors
        /// * `SessionError::ProcessNotFound` - No such pid
        /// * `SessionError::PerfOpen` - Kernel refused the event (permissions, paranoid level)
        /// * `SessionError::Mmap` - Ring buffer could not be mapped
        pub fn open(pid: i32, config: PerfConfig) -> Result<Self, SessionError> {
            config.validate()?;
            if pid <= 0 || !Path::new(&format!("/proc/{pid}")).exists() {
                return Err(SessionError::ProcessNotFound(pid));
            }

            let attr = PerfEventAttr::cpu_clock_sampler(config.frequency_hz);
            // SAFETY: `attr` is a valid, correctly sized perf_event_attr.
            let raw_fd = unsafe {
                libc::syscall(
                    libc::SYS_perf_event_open,
                    &attr as *const PerfEventAttr,
                    pid,
                    -1 as libc::c_int,
                    -1 as libc::c_int,
                    PERF_FLAG_FD_CLOEXEC,
                )
            };
            if raw_fd < 0 {
                return Err(SessionError::PerfOpen(io::Error::last_os_error()));
            }
            // SAFETY: the syscall returned a fresh descriptor we now own.
            let fd = unsafe { OwnedFd::from_raw_fd(raw_fd as libc::c_int) };

            // SAFETY: sysconf has no preconditions.
            let page_size = match unsafe { libc::sysconf(libc::_SC_PAGESIZE) } {
                n if n > 0 => n as usize,
                _ => 4096,
            };
            let map_len = (1 + config.mmap_pages) * page_size;

            // SAFETY: mapping a perf fd read/write is the documented way to
            // obtain its ring buffer; length is 1 + 2^n pages.
            let base = unsafe {
                libc::mmap(
                    ptr::null_mut(),
                    map_len,
                    libc::PROT_READ | libc::PROT_WRITE,
                    libc::MAP_SHARED,
                    fd.as_raw_fd(),
                    0,
                )
            };
            if base == libc::MAP_FAILED {
                return Err(SessionError::Mmap(io::Error::last_os_error()));
            }

            info!(
                "Opened perf event on pid {} at {} Hz ({} KiB ring)",
                pid,
                config.frequency_hz,
                config.mmap_pages * page_size / 1024
            );

            Ok(Self {
                pid,
                fd,
                base,
                map_len,
                page_size,
                config,
                stats: PerfRunStats::default(),
            })
        }

        pub fn pid(&self) -> i32 {
            self.pid
        }

        /// Totals from the drains performed so far
        pub fn stats(&self) -> PerfRunStats {
            self.stats
        }

        /// View the mapped region as a ring buffer
        pub fn ring(&self) -> Result<RingBuffer<'_>, RingError> {
            // SAFETY: the mapping lives as long as `self`; the header page
            // holds naturally aligned u64 cursors at these offsets and the
            // data area follows it for `mmap_pages` pages.
            let (head, tail, data) = unsafe {
                let base = self.base as *const u8;
                let head = &*(base.add(DATA_HEAD_OFFSET) as *const AtomicU64);
                let tail = &*(base.add(DATA_TAIL_OFFSET) as *const AtomicU64);
                let data = std::slice::from_raw_parts(
                    base.add(self.page_size) as *const AtomicU8,
                    self.config.mmap_pages * self.page_size,
                );
                (head, tail, data)
            };
            RingBuffer::new(head, tail, data)
        }

        /// **Public** - Sample for `duration` or until `stop` is set
        ///
        /// # Returns
        /// Decoded samples plus the count dropped at the sample cap
        ///
        /// # Errors
        /// * `SessionError::Ring` - Ring desync, overrun or corrupt record
        pub fn run(
            &mut self,
            duration: Duration,
            stop: &AtomicBool,
        ) -> Result<SampleBatch, SessionError> {
            let mut sink = SampleSink::with_capacity(self.config.max_samples);
            let deadline = Instant::now() + duration;

            self.ioctl(PERF_EVENT_IOC_RESET)?;
            self.ioctl(PERF_EVENT_IOC_ENABLE)?;
            debug!("perf event enabled on pid {}", self.pid);

            let result = self.poll_loop(&mut sink, deadline, stop);

            // Always disable, even when the loop failed.
            let disabled = self.ioctl(PERF_EVENT_IOC_DISABLE);
            result?;
            disabled?;

            let stats = self.ring()?.drain(&mut sink, &DrainControl::unbounded())?;
            self.stats.absorb(&stats);

            if self.stats.lost > 0 {
                warn!(
                    "{} samples lost in the kernel; consider more --mmap-pages",
                    self.stats.lost
                );
            }
            info!(
                "Collected {} samples from pid {} in {} drains",
                sink.len(),
                self.pid,
                self.stats.drains
            );

            Ok(sink.into_batch())
        }

        fn poll_loop(
            &mut self,
            sink: &mut SampleSink,
            deadline: Instant,
            stop: &AtomicBool,
        ) -> Result<(), SessionError> {
            let control = DrainControl::unbounded()
                .with_stop(stop)
                .with_deadline(deadline);

            loop {
                if stop.load(Ordering::Relaxed) {
                    info!("Stop requested; finishing session");
                    return Ok(());
                }
                if Instant::now() >= deadline {
                    return Ok(());
                }

                let mut pfd = libc::pollfd {
                    fd: self.fd.as_raw_fd(),
                    events: libc::POLLIN,
                    revents: 0,
                };
                // SAFETY: one valid pollfd.
                let ready = unsafe { libc::poll(&mut pfd, 1, POLL_INTERVAL_MS) };
                if ready < 0 {
                    let err = io::Error::last_os_error();
                    if err.kind() != io::ErrorKind::Interrupted {
                        warn!("poll on perf fd failed: {}", err);
                    }
                    continue;
                }

                let stats = self.ring()?.drain(sink, &control)?;
                self.stats.absorb(&stats);

                if pfd.revents & libc::POLLHUP != 0 {
                    info!("Process {} exited", self.pid);
                    return Ok(());
                }
            }
        }

        fn ioctl(&self, request: u64) -> Result<(), SessionError> {
            // SAFETY: perf ioctls with a zero argument on our own fd.
            let rc = unsafe { libc::ioctl(self.fd.as_raw_fd(), request as _, 0) };
            if rc < 0 {
                return Err(SessionError::PerfOpen(io::Error::last_os_error()));
            }
            Ok(())
        }
    }

    impl Drop for PerfSession {
        fn drop(&mut self) {
            // SAFETY: `base`/`map_len` come from our successful mmap; the fd
            // is closed afterwards by OwnedFd.
            unsafe {
                libc::munmap(self.base, self.map_len);
            }
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_attr_matches_abi_size() {
            assert_eq!(std::mem::size_of::<PerfEventAttr>(), PERF_ATTR_SIZE_VER5 as usize);
        }

        #[test]
        fn test_missing_process_is_reported() {
            let err = PerfSession::open(i32::MAX, PerfConfig::default()).err();
            assert!(matches!(err, Some(SessionError::ProcessNotFound(_))));
        }
    }
}

#[cfg(not(target_os = "linux"))]
mod unsupported {
    use super::*;

    /// Placeholder on platforms without `perf_event_open`
    pub struct PerfSession;

    impl PerfSession {
        pub fn open(_pid: i32, _config: PerfConfig) -> Result<Self, SessionError> {
            Err(SessionError::Unsupported)
        }

        pub fn pid(&self) -> i32 {
            0
        }

        pub fn stats(&self) -> PerfRunStats {
            PerfRunStats::default()
        }

        pub fn run(
            &mut self,
            _duration: Duration,
            _stop: &AtomicBool,
        ) -> Result<SampleBatch, SessionError> {
            Err(SessionError::Unsupported)
        }
    }
}
