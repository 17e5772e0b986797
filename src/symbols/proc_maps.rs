//! `/proc/<pid>/maps` parsing.
//!
//! Only executable, file-backed mappings matter for symbolization; the
//! table is kept sorted by start address for binary search.

use log::debug;
use std::fs;
use std::io;
use std::path::PathBuf;

/// One executable mapping of a file into the process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryMapping {
    pub start: u64,
    pub end: u64,
    /// Offset of `start` within the file
    pub offset: u64,
    pub path: PathBuf,
}

impl MemoryMapping {
    #[must_use]
    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.start && addr < self.end
    }

    /// Offset within the backing file that `addr` was loaded from
    #[must_use]
    pub fn file_offset(&self, addr: u64) -> u64 {
        addr - self.start + self.offset
    }
}

/// Parse the text of a maps file
///
/// Lines are `start-end perms offset dev inode [pathname]`. Non-executable,
/// anonymous and pseudo (`[vdso]`, `[stack]`) mappings are skipped, as are
/// lines that do not parse.
pub fn parse_maps(contents: &str) -> Vec<MemoryMapping> {
    let mut mappings: Vec<MemoryMapping> = contents.lines().filter_map(parse_line).collect();
    mappings.sort_by_key(|m| m.start);
    mappings
}

fn parse_line(line: &str) -> Option<MemoryMapping> {
    let mut fields = line.split_whitespace();
    let range = fields.next()?;
    let perms = fields.next()?;
    let offset = fields.next()?;
    let _dev = fields.next()?;
    let _inode = fields.next()?;
    // Paths may contain spaces; take the rest of the line.
    let path = fields.collect::<Vec<_>>().join(" ");

    if perms.as_bytes().get(2) != Some(&b'x') || !path.starts_with('/') {
        return None;
    }

    let (start, end) = range.split_once('-')?;
    Some(MemoryMapping {
        start: u64::from_str_radix(start, 16).ok()?,
        end: u64::from_str_radix(end, 16).ok()?,
        offset: u64::from_str_radix(offset, 16).ok()?,
        path: PathBuf::from(path),
    })
}

/// Read and parse the maps of a live process
///
/// # Errors
/// Returns an error if `/proc/<pid>/maps` cannot be read
pub fn read_process_maps(pid: i32) -> io::Result<Vec<MemoryMapping>> {
    let contents = fs::read_to_string(format!("/proc/{pid}/maps"))?;
    let mappings = parse_maps(&contents);
    debug!("pid {}: {} executable mappings", pid, mappings.len());
    Ok(mappings)
}

/// Mapping containing `addr`, if any
pub fn find_mapping(mappings: &[MemoryMapping], addr: u64) -> Option<&MemoryMapping> {
    let idx = mappings.partition_point(|m| m.start <= addr);
    let candidate = mappings.get(idx.checked_sub(1)?)?;
    candidate.contains(addr).then_some(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAPS: &str = "\
55d0c0a00000-55d0c0a02000 r--p 00000000 fd:01 1312 /usr/bin/worker
55d0c0a02000-55d0c0a09000 r-xp 00002000 fd:01 1312 /usr/bin/worker
55d0c0c00000-55d0c0c21000 rw-p 00000000 00:00 0 [heap]
7f1a2b000000-7f1a2b195000 r-xp 00028000 fd:01 77 /usr/lib/libc.so.6
7ffd4c9f2000-7ffd4c9f4000 r-xp 00000000 00:00 0 [vdso]
7f1a2c000000-7f1a2c001000 r-xp 00001000 fd:01 90 /opt/my app/lib tool.so
";

    #[test]
    fn test_keeps_executable_file_mappings() {
        let mappings = parse_maps(MAPS);
        let paths: Vec<_> = mappings.iter().map(|m| m.path.to_string_lossy().to_string()).collect();
        assert_eq!(
            paths,
            vec!["/usr/bin/worker", "/usr/lib/libc.so.6", "/opt/my app/lib tool.so"]
        );
    }

    #[test]
    fn test_file_offset_translation() {
        let mappings = parse_maps(MAPS);
        let m = find_mapping(&mappings, 0x55d0c0a02100).unwrap();
        assert_eq!(m.file_offset(0x55d0c0a02100), 0x2100);

        assert!(find_mapping(&mappings, 0x55d0c0a01000).is_none());
        assert!(find_mapping(&mappings, 0x10).is_none());
    }

    #[test]
    fn test_mapping_contains_is_half_open() {
        let m = MemoryMapping {
            start: 0x1000,
            end: 0x2000,
            offset: 0,
            path: PathBuf::from("/bin/true"),
        };
        assert!(m.contains(0x1000));
        assert!(m.contains(0x1fff));
        assert!(!m.contains(0x2000));
    }

    #[test]
    fn test_reads_own_maps() {
        let mappings = read_process_maps(std::process::id() as i32).unwrap();
        assert!(!mappings.is_empty());
    }
}
