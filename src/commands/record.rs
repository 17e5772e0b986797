//! Record command implementation.
//!
//! The record command:
//! 1. Starts the SIGPROF self-sampler
//! 2. Runs a built-in workload split 70/20/10 across three functions
//! 3. Resolves and folds the captured stacks
//! 4. Writes folded text and flame graph outputs
//! 5. Logs the run summary

use super::models::{RecordArgs, RunSummary};
use super::utils::{flamegraph_config, frame_filter, load_settings, write_outputs};
use crate::aggregator::fold_samples;
use crate::output::generate_text_summary;
use crate::source::{profile_closure, SelfSamplerConfig};
use crate::symbols::{InProcessSymbolizer, SymbolCache};
use anyhow::{Context, Result};
use log::{debug, info};
use std::hint::black_box;
use std::time::{Duration, Instant};

/// One unit of CPU work; the three workload functions call it 7, 2 and 1 times per round
#[inline(never)]
fn spin(seed: u64) -> u64 {
    let mut acc = seed;
    for i in 0..20_000u64 {
        acc = acc.wrapping_mul(6364136223846793005).wrapping_add(i ^ (acc >> 33));
    }
    acc
}

#[inline(never)]
fn compute_hot(seed: u64) -> u64 {
    (0..7).fold(seed, |acc, i| spin(black_box(acc + i)))
}

#[inline(never)]
fn compute_medium(seed: u64) -> u64 {
    (0..2).fold(seed, |acc, i| spin(black_box(acc + i)))
}

#[inline(never)]
fn compute_cold(seed: u64) -> u64 {
    spin(black_box(seed))
}

/// Run the 70/20/10 workload until `duration` elapses
///
/// **Public** - also a convenient target for the `profile` command
#[inline(never)]
pub fn run_workload(duration: Duration) -> u64 {
    let deadline = Instant::now() + duration;
    let mut acc = 1u64;
    let mut rounds = 0u64;
    while Instant::now() < deadline {
        acc ^= compute_hot(acc);
        acc ^= compute_medium(acc);
        acc ^= compute_cold(acc);
        rounds += 1;
    }
    debug!("Workload finished after {} rounds", rounds);
    black_box(acc)
}

/// Execute the record command
///
/// **Public** - main entry point called from main.rs
///
/// # Errors
/// * Settings file cannot be loaded
/// * Self-sampler cannot be installed (bad config, another session active)
/// * Output files cannot be written
pub fn execute_record(args: RecordArgs) -> Result<RunSummary> {
    let start_time = Instant::now();
    let settings = load_settings(args.render.config.as_deref())?;

    let mut sampler_config = SelfSamplerConfig::default();
    if let Some(hz) = args.frequency_hz.or(settings.sampling.frequency_hz) {
        sampler_config = sampler_config.with_frequency(hz);
    }
    if let Some(max) = args.max_samples.or(settings.sampling.max_samples) {
        sampler_config = sampler_config.with_max_samples(max);
    }

    info!(
        "Step 1/3: Sampling built-in workload for {:.1}s at {} Hz",
        args.duration.as_secs_f64(),
        sampler_config.frequency_hz
    );
    let (_, batch) = profile_closure(sampler_config, || run_workload(args.duration))
        .context("Self-sampling failed")?;

    info!("Step 2/3: Resolving and folding {} samples", batch.samples.len());
    let mut symbolizer = InProcessSymbolizer::new();
    let mut cache = SymbolCache::new();
    let outcome = fold_samples(&batch.samples, &mut symbolizer, &mut cache, &frame_filter(&settings));
    debug!(
        "Symbol cache: {} entries, {} hits, {} misses",
        cache.len(),
        cache.hits(),
        cache.misses()
    );

    info!("Step 3/3: Writing outputs");
    let config = flamegraph_config(&args.render, &settings, "flamefold record");
    if outcome.stacks.is_empty() {
        info!("No stacks survived folding; skipping flame graph outputs");
    } else {
        write_outputs(&outcome.stacks, &args.outputs, &config)?;
    }

    if args.print_summary && !outcome.stacks.is_empty() {
        println!("{}", generate_text_summary(&outcome.stacks, 10));
    }

    let summary = RunSummary {
        samples_collected: batch.samples.len() as u64,
        capacity_drops: batch.dropped,
        empty_stack_drops: outcome.empty_dropped,
        unique_stacks: outcome.stacks.len(),
        ..Default::default()
    };
    summary.log();
    info!("Record completed in {:.2}s", start_time.elapsed().as_secs_f64());
    Ok(summary)
}
