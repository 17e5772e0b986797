//! Profile command implementation.
//!
//! The profile command:
//! 1. Snapshots the target's memory mappings for symbolization
//! 2. Opens a perf CPU-clock sampling session on the pid
//! 3. Drains samples until the duration elapses, the process exits or the
//!    user presses Ctrl+C
//! 4. Resolves, folds and writes outputs
//! 5. Logs the run summary

use super::models::{ProfileArgs, RunSummary};
use super::utils::{flamegraph_config, frame_filter, load_settings, write_outputs};
use crate::aggregator::fold_samples;
use crate::output::generate_text_summary;
use crate::source::{PerfConfig, PerfSession};
use crate::symbols::{ProcessSymbolizer, SymbolCache};
use anyhow::{Context, Result};
use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

/// Set from SIGINT/SIGTERM; polled between ring buffer records
static STOP_REQUESTED: AtomicBool = AtomicBool::new(false);

extern "C" fn request_stop(_signal: libc::c_int) {
    STOP_REQUESTED.store(true, Ordering::SeqCst);
}

/// Route SIGINT and SIGTERM to the stop flag
fn install_stop_handlers() -> std::io::Result<()> {
    STOP_REQUESTED.store(false, Ordering::SeqCst);
    for signal in [libc::SIGINT, libc::SIGTERM] {
        // SAFETY: the handler only stores to an atomic.
        let previous = unsafe { libc::signal(signal, request_stop as libc::sighandler_t) };
        if previous == libc::SIG_ERR {
            return Err(std::io::Error::last_os_error());
        }
    }
    Ok(())
}

fn restore_default_handlers() {
    for signal in [libc::SIGINT, libc::SIGTERM] {
        // SAFETY: restoring the default disposition.
        unsafe {
            libc::signal(signal, libc::SIG_DFL);
        }
    }
}

/// Execute the profile command
///
/// **Public** - main entry point called from main.rs
///
/// # Errors
/// * Target process does not exist or its maps cannot be read
/// * `perf_event_open` is denied (see `kernel.perf_event_paranoid`)
/// * Ring buffer desync or corruption
/// * Output files cannot be written
pub fn execute_profile(args: ProfileArgs) -> Result<RunSummary> {
    let start_time = Instant::now();
    let settings = load_settings(args.render.config.as_deref())?;

    let mut perf_config = PerfConfig::default();
    if let Some(hz) = args.frequency_hz.or(settings.sampling.frequency_hz) {
        perf_config = perf_config.with_frequency(hz);
    }
    if let Some(max) = args.max_samples.or(settings.sampling.max_samples) {
        perf_config = perf_config.with_max_samples(max);
    }
    if let Some(pages) = args.mmap_pages.or(settings.sampling.mmap_pages) {
        perf_config = perf_config.with_mmap_pages(pages);
    }

    info!("Step 1/4: Reading memory mappings of pid {}", args.pid);
    // Snapshot now: the process may exit before we symbolize.
    let mut symbolizer = ProcessSymbolizer::for_pid(args.pid)
        .with_context(|| format!("Failed to read memory mappings of pid {}", args.pid))?;
    debug!("{} executable mappings", symbolizer.mappings().len());

    info!(
        "Step 2/4: Sampling pid {} for up to {:.1}s at {} Hz (Ctrl+C to stop early)",
        args.pid,
        args.duration.as_secs_f64(),
        perf_config.frequency_hz
    );
    let mut session = PerfSession::open(args.pid, perf_config)
        .with_context(|| format!("Failed to start sampling pid {}", args.pid))?;

    if let Err(e) = install_stop_handlers() {
        warn!("Cannot install Ctrl+C handler: {}", e);
    }
    let batch = session.run(args.duration, &STOP_REQUESTED);
    restore_default_handlers();
    let batch = batch.context("Sampling session failed")?;
    let stats = session.stats();

    info!("Step 3/4: Resolving and folding {} samples", batch.samples.len());
    let mut cache = SymbolCache::new();
    let outcome = fold_samples(&batch.samples, &mut symbolizer, &mut cache, &frame_filter(&settings));
    debug!(
        "Symbol cache: {} entries, {} hits, {} misses",
        cache.len(),
        cache.hits(),
        cache.misses()
    );

    info!("Step 4/4: Writing outputs");
    let config = flamegraph_config(&args.render, &settings, &format!("pid {}", args.pid));
    if outcome.stacks.is_empty() {
        warn!("No stacks survived folding; skipping flame graph outputs");
    } else {
        write_outputs(&outcome.stacks, &args.outputs, &config)?;
    }

    if args.print_summary && !outcome.stacks.is_empty() {
        println!("{}", generate_text_summary(&outcome.stacks, 10));
    }

    let summary = RunSummary {
        samples_collected: batch.samples.len() as u64,
        capacity_drops: batch.dropped,
        lost_records: stats.lost,
        empty_stack_drops: outcome.empty_dropped + stats.empty_callchains,
        unique_stacks: outcome.stacks.len(),
        skipped_lines: 0,
    };
    summary.log();
    info!("Profile completed in {:.2}s", start_time.elapsed().as_secs_f64());
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_missing_pid_fails_before_sampling() {
        let args = ProfileArgs {
            pid: i32::MAX,
            duration: Duration::from_millis(10),
            frequency_hz: None,
            max_samples: None,
            mmap_pages: None,
            outputs: Default::default(),
            render: Default::default(),
            print_summary: false,
        };
        let err = execute_profile(args).unwrap_err();
        assert!(format!("{err:#}").contains("pid 2147483647"));
    }
}
