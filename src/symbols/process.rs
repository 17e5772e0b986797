//! Symbolization of another process's addresses.
//!
//! Address → mapping (from `/proc/<pid>/maps`) → file offset → ELF virtual
//! address → DWARF function name. Modules load lazily the first time one of
//! their addresses is seen. Binaries without debug info fall back to their
//! ELF symbol tables.

use super::proc_maps::{self, find_mapping, MemoryMapping};
use super::{classify, Symbolizer, UNKNOWN_FRAME};
use crate::source::Address;
use crate::utils::error::SymbolError;
use addr2line::Context;
use gimli::{EndianRcSlice, RunTimeEndian};
use log::{debug, warn};
use object::{Object, ObjectSection, ObjectSegment, ObjectSymbol, SymbolKind};
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::rc::Rc;

type DwarfContext = Context<EndianRcSlice<RunTimeEndian>>;

/// Symbols of one ELF file
struct ModuleSymbols {
    dwarf: Option<DwarfContext>,
    /// `(file_offset, file_size, vaddr)` of each loadable segment
    segments: Vec<(u64, u64, u64)>,
    /// `(address, size, demangled name)`, sorted by address
    symtab: Vec<(u64, u64, String)>,
}

impl ModuleSymbols {
    fn load(path: &Path) -> Result<Self, SymbolError> {
        let data = fs::read(path)?;
        let obj = object::File::parse(&*data)?;

        let segments = obj
            .segments()
            .map(|seg| {
                let (offset, size) = seg.file_range();
                (offset, size, seg.address())
            })
            .collect();

        let dwarf = match load_dwarf(&obj) {
            Ok(ctx) => Some(ctx),
            Err(e) => {
                debug!("{}: no usable DWARF ({})", path.display(), e);
                None
            }
        };

        let mut symtab: Vec<(u64, u64, String)> = obj
            .symbols()
            .chain(obj.dynamic_symbols())
            .filter(|sym| sym.kind() == SymbolKind::Text && sym.address() != 0)
            .filter_map(|sym| {
                let name = sym.name().ok()?;
                Some((sym.address(), sym.size(), demangle(name)))
            })
            .collect();
        symtab.sort_by_key(|entry| entry.0);
        symtab.dedup_by_key(|entry| entry.0);

        debug!(
            "Loaded {}: dwarf={}, {} symbols",
            path.display(),
            dwarf.is_some(),
            symtab.len()
        );

        Ok(Self {
            dwarf,
            segments,
            symtab,
        })
    }

    /// Virtual address that file offset `offset` is linked at
    fn vaddr_for_offset(&self, offset: u64) -> Option<u64> {
        self.segments
            .iter()
            .find(|(start, size, _)| offset >= *start && offset < start + size)
            .map(|(start, _, vaddr)| offset - start + vaddr)
    }

    fn lookup(&self, vaddr: u64) -> Option<String> {
        self.lookup_dwarf(vaddr).or_else(|| self.lookup_symtab(vaddr))
    }

    fn lookup_dwarf(&self, vaddr: u64) -> Option<String> {
        let ctx = self.dwarf.as_ref()?;
        let mut frames = ctx.find_frames(vaddr).skip_all_loads().ok()?;
        // Innermost frame first; that is the function actually executing.
        while let Ok(Some(frame)) = frames.next() {
            if let Some(name) = frame
                .function
                .and_then(|f| f.demangle().ok().map(|s| s.to_string()))
            {
                return Some(name);
            }
        }
        None
    }

    fn lookup_symtab(&self, vaddr: u64) -> Option<String> {
        let idx = self.symtab.partition_point(|(addr, _, _)| *addr <= vaddr);
        let (addr, size, name) = self.symtab.get(idx.checked_sub(1)?)?;
        // Size-less symbols (common in hand-written asm) cover up to the next one.
        (*size == 0 || vaddr < addr + size).then(|| name.clone())
    }
}

fn load_dwarf(obj: &object::File<'_>) -> Result<DwarfContext, SymbolError> {
    let endian = if obj.is_little_endian() {
        RunTimeEndian::Little
    } else {
        RunTimeEndian::Big
    };

    let load_section = |id: gimli::SectionId| -> Result<EndianRcSlice<RunTimeEndian>, gimli::Error> {
        let data = obj
            .section_by_name(id.name())
            .and_then(|section| section.uncompressed_data().ok())
            .unwrap_or(std::borrow::Cow::Borrowed(&[][..]));
        Ok(EndianRcSlice::new(Rc::from(&*data), endian))
    };

    let dwarf = gimli::Dwarf::load(&load_section)?;
    Ok(Context::from_dwarf(dwarf)?)
}

fn demangle(name: &str) -> String {
    format!("{:#}", rustc_demangle::demangle(name))
}

/// Symbolizer for a running process identified by pid
pub struct ProcessSymbolizer {
    mappings: Vec<MemoryMapping>,
    /// `None` marks a module that failed to load; it is not retried
    modules: HashMap<PathBuf, Option<ModuleSymbols>>,
}

impl ProcessSymbolizer {
    /// **Public** - Snapshot the executable mappings of `pid`
    ///
    /// Call this while the process is still alive; the mapping table is
    /// read once and reused for every lookup.
    ///
    /// # Errors
    /// Returns an error if `/proc/<pid>/maps` cannot be read
    pub fn for_pid(pid: i32) -> io::Result<Self> {
        Ok(Self::from_mappings(proc_maps::read_process_maps(pid)?))
    }

    pub fn from_mappings(mut mappings: Vec<MemoryMapping>) -> Self {
        mappings.sort_by_key(|m| m.start);
        Self {
            mappings,
            modules: HashMap::new(),
        }
    }

    pub fn mappings(&self) -> &[MemoryMapping] {
        &self.mappings
    }

    fn module(&mut self, path: &Path) -> Option<&ModuleSymbols> {
        self.modules
            .entry(path.to_path_buf())
            .or_insert_with(|| match ModuleSymbols::load(path) {
                Ok(module) => Some(module),
                Err(e) => {
                    warn!("Cannot load symbols from {}: {}", path.display(), e);
                    None
                }
            })
            .as_ref()
    }
}

impl Symbolizer for ProcessSymbolizer {
    fn resolve(&mut self, addr: Address) -> String {
        if let Some(marker) = classify(addr) {
            return marker.to_string();
        }

        let Some(mapping) = find_mapping(&self.mappings, addr.0) else {
            return UNKNOWN_FRAME.to_string();
        };
        let offset = mapping.file_offset(addr.0);
        let path = mapping.path.clone();

        self.module(&path)
            .and_then(|module| {
                let vaddr = module.vaddr_for_offset(offset).unwrap_or(offset);
                module.lookup(vaddr)
            })
            .unwrap_or_else(|| UNKNOWN_FRAME.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbols::{KERNEL_FRAME, NULL_FRAME};

    #[inline(never)]
    fn lookup_target_fn() -> usize {
        std::hint::black_box(42)
    }

    #[test]
    fn test_markers_skip_lookup() {
        let mut symbolizer = ProcessSymbolizer::from_mappings(Vec::new());
        assert_eq!(symbolizer.resolve(Address(0)), NULL_FRAME);
        assert_eq!(symbolizer.resolve(Address(0xffff_ffff_a000_0000)), KERNEL_FRAME);
        assert_eq!(symbolizer.resolve(Address(0x1234)), UNKNOWN_FRAME);
    }

    #[test]
    fn test_unreadable_module_is_unknown() {
        let mut symbolizer = ProcessSymbolizer::from_mappings(vec![MemoryMapping {
            start: 0x1000,
            end: 0x2000,
            offset: 0,
            path: PathBuf::from("/nonexistent/module.so"),
        }]);
        assert_eq!(symbolizer.resolve(Address(0x1800)), UNKNOWN_FRAME);
        assert_eq!(symbolizer.resolve(Address(0x1900)), UNKNOWN_FRAME);
        assert_eq!(symbolizer.modules.len(), 1);
    }

    #[test]
    fn test_resolves_own_function() {
        std::hint::black_box(lookup_target_fn());
        let addr = lookup_target_fn as *const () as u64;

        let mut symbolizer = ProcessSymbolizer::for_pid(std::process::id() as i32).unwrap();
        let name = symbolizer.resolve(Address(addr));
        assert!(name.contains("lookup_target_fn"), "resolved to {name}");
    }
}
