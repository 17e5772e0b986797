//! Error types for the entire application.
//!
//! We use `thiserror` for library-style errors with custom types,
//! and `anyhow` for application-level error propagation in main.rs and commands.

use thiserror::Error;

/// Errors raised while draining a perf ring buffer
///
/// Every variant is fatal to the profiling session that hit it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RingError {
    #[error("ring buffer desynchronized: tail {tail} is ahead of head {head}")]
    Desync { head: u64, tail: u64 },

    #[error("ring buffer overrun: head {head} is more than {capacity} bytes past tail {tail}")]
    Overrun { head: u64, tail: u64, capacity: u64 },

    #[error("corrupt record at offset {offset}: {reason}")]
    Corrupt { offset: u64, reason: String },

    #[error("ring buffer data size must be a non-zero power of two, got {0}")]
    InvalidSize(usize),
}

/// Errors that can occur while setting up or running a sampling session
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("process {0} does not exist")]
    ProcessNotFound(i32),

    #[error("perf_event_open failed: {0} (try: sudo sysctl kernel.perf_event_paranoid=-1)")]
    PerfOpen(#[source] std::io::Error),

    #[error("failed to map the perf ring buffer: {0}")]
    Mmap(#[source] std::io::Error),

    #[error("failed to install the sampling signal handler: {0}")]
    Signal(#[source] std::io::Error),

    #[error("a self-sampling session is already active in this process")]
    AlreadyActive,

    #[error("invalid sampling configuration: {0}")]
    InvalidConfig(String),

    #[error("external-process profiling is only supported on Linux")]
    Unsupported,

    #[error(transparent)]
    Ring(#[from] RingError),
}

/// Errors that can occur during flamegraph generation
#[derive(Error, Debug)]
pub enum FlamegraphError {
    /// Zero samples, or every sample was filtered down to an empty stack
    #[error("nothing to render: no samples in input")]
    EmptyInput,

    /// Sample counts sum past `u64::MAX`
    #[error("sample counts overflow: adding {count} to a total of {total}")]
    CountOverflow { total: u64, count: u64 },
}

/// Errors that can occur during file output
#[derive(Error, Debug)]
pub enum OutputError {
    #[error("Failed to write file: {0}")]
    WriteFailed(#[from] std::io::Error),

    #[error("Failed to serialize JSON: {0}")]
    SerializationFailed(#[from] serde_json::Error),

    #[error("Invalid output path: {0}")]
    InvalidPath(String),
}

/// Errors that can occur while loading a settings file
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read settings file: {0}")]
    ReadFailed(#[from] std::io::Error),

    #[error("Settings TOML parse error: {0}")]
    ParseFailed(#[from] toml::de::Error),

    #[error("Invalid setting: {0}")]
    Invalid(String),
}

/// Errors that can occur while loading symbols for one mapped module
///
/// These never escape a `Symbolizer`; a module that fails to load simply
/// resolves to `[unknown]`.
#[derive(Error, Debug)]
pub enum SymbolError {
    #[error("Failed to read module: {0}")]
    ReadFailed(#[from] std::io::Error),

    #[error("Failed to parse object file: {0}")]
    ParseFailed(#[from] object::read::Error),

    #[error("Failed to load DWARF: {0}")]
    DwarfFailed(#[from] gimli::Error),
}
