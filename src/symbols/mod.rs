//! Address to function-name resolution.
//!
//! A `Symbolizer` turns an `Address` into a display name and never fails:
//! anything it cannot name comes back as one of the bracketed markers below.
//! Lookups are memoised in a `SymbolCache` owned by the caller, so each
//! session decides how long resolved names live.

pub mod in_process;
pub mod proc_maps;
pub mod process;

pub use in_process::InProcessSymbolizer;
pub use proc_maps::MemoryMapping;
pub use process::ProcessSymbolizer;

use crate::source::Address;
use std::collections::HashMap;

/// Name for an address no symbol covers
pub const UNKNOWN_FRAME: &str = "[unknown]";

/// Name for a kernel-space address (never looked up)
pub const KERNEL_FRAME: &str = "[kernel]";

/// Name for address zero
pub const NULL_FRAME: &str = "[null]";

/// Start of the kernel half of the address space on 64-bit targets
pub const KERNEL_ADDRESS_FLOOR: u64 = 0xffff_0000_0000_0000;

/// Resolves instruction pointers to function names
pub trait Symbolizer {
    /// Name for `addr`, or one of the bracketed markers
    fn resolve(&mut self, addr: Address) -> String;
}

/// Marker for addresses that need no lookup at all
pub fn classify(addr: Address) -> Option<&'static str> {
    match addr.0 {
        0 => Some(NULL_FRAME),
        a if a >= KERNEL_ADDRESS_FLOOR => Some(KERNEL_FRAME),
        _ => None,
    }
}

/// True for the markers a symbolizer returns instead of a real name
pub fn is_unresolved(name: &str) -> bool {
    name == UNKNOWN_FRAME || name == KERNEL_FRAME || name == NULL_FRAME
}

/// Per-session memo of resolved names
#[derive(Debug, Default)]
pub struct SymbolCache {
    names: HashMap<Address, String>,
    hits: u64,
    misses: u64,
}

impl SymbolCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached name for `addr`, asking `symbolizer` on a miss
    pub fn resolve(&mut self, addr: Address, symbolizer: &mut dyn Symbolizer) -> String {
        if let Some(name) = self.names.get(&addr) {
            self.hits += 1;
            return name.clone();
        }
        self.misses += 1;
        let name = symbolizer.resolve(addr);
        self.names.insert(addr, name.clone());
        name
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }

    pub fn clear(&mut self) {
        self.names.clear();
        self.hits = 0;
        self.misses = 0;
    }
}

/// Symbolizer backed by a fixed address table
///
/// Useful for replaying recorded samples and in tests.
#[derive(Debug, Clone, Default)]
pub struct TableSymbolizer {
    names: HashMap<u64, String>,
}

impl TableSymbolizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, addr: u64, name: impl Into<String>) -> Self {
        self.names.insert(addr, name.into());
        self
    }
}

impl Symbolizer for TableSymbolizer {
    fn resolve(&mut self, addr: Address) -> String {
        if let Some(marker) = classify(addr) {
            return marker.to_string();
        }
        self.names
            .get(&addr.0)
            .cloned()
            .unwrap_or_else(|| UNKNOWN_FRAME.to_string())
    }
}
