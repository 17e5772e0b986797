//! Symbolization of addresses captured inside this process.

use super::{classify, Symbolizer, UNKNOWN_FRAME};
use crate::source::Address;

/// Resolves this process's own addresses through `backtrace::resolve`
#[derive(Debug, Default, Clone, Copy)]
pub struct InProcessSymbolizer;

impl InProcessSymbolizer {
    pub fn new() -> Self {
        Self
    }
}

impl Symbolizer for InProcessSymbolizer {
    fn resolve(&mut self, addr: Address) -> String {
        if let Some(marker) = classify(addr) {
            return marker.to_string();
        }

        let mut name = None;
        backtrace::resolve(addr.0 as usize as *mut std::ffi::c_void, |symbol| {
            // Inlined frames come first; keep the innermost named one.
            if name.is_none() {
                name = symbol.name().map(|n| format!("{n:#}"));
            }
        });
        name.unwrap_or_else(|| UNKNOWN_FRAME.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[inline(never)]
    fn resolve_target_fn() -> u32 {
        std::hint::black_box(7)
    }

    #[test]
    fn test_resolves_function_pointer() {
        std::hint::black_box(resolve_target_fn());
        let addr = Address(resolve_target_fn as *const () as u64);
        let name = InProcessSymbolizer::new().resolve(addr);
        assert!(name.contains("resolve_target_fn"), "resolved to {name}");
    }

    #[test]
    fn test_null_address() {
        assert_eq!(InProcessSymbolizer::new().resolve(Address(0)), "[null]");
    }
}
