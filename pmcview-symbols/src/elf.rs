//! ELF-level helpers on top of the `object` crate: the preferred load
//! address used to compute mapping offsets, the function-symbol table used
//! for symbol-only resolution, and GNU debug-link handling.

use std::fs::File;
use std::path::{Path, PathBuf};

use object::{Object, ObjectSection, ObjectSegment, ObjectSymbol, SegmentFlags, SymbolKind};

use crate::error::Error;
use crate::intern::{intern, InternedString};
use crate::range_map::RangeMap;

pub(crate) struct MappedFile {
    mmap: memmap2::Mmap,
}

impl MappedFile {
    pub fn open(path: &Path) -> Result<Self, Error> {
        let file = File::open(path)
            .map_err(|e| Error::OpenImage(path.display().to_string(), e))?;
        let mmap = unsafe { memmap2::Mmap::map(&file) }
            .map_err(|e| Error::MapImage(path.display().to_string(), e))?;
        Ok(MappedFile { mmap })
    }

    pub fn data(&self) -> &[u8] {
        &self.mmap
    }

    pub fn parse(&self) -> Result<object::File<'_>, object::read::Error> {
        object::File::parse(self.data())
    }
}

/// The address the first executable `PT_LOAD` segment asks to be loaded at,
/// masked down to its alignment. 0 when the file is unreadable or has no
/// such segment.
pub fn preferred_load_address(path: &Path) -> u64 {
    let mapped = match MappedFile::open(path) {
        Ok(mapped) => mapped,
        Err(_) => return 0,
    };
    let obj = match mapped.parse() {
        Ok(obj) => obj,
        Err(_) => return 0,
    };

    for segment in obj.segments() {
        if segment.size() == 0 {
            continue;
        }
        let executable = match segment.flags() {
            SegmentFlags::Elf { p_flags } => p_flags & object::elf::PF_X != 0,
            _ => false,
        };
        if !executable {
            continue;
        }
        let align = segment.align();
        if align > 1 {
            return segment.address() & !(align - 1);
        }
        return segment.address();
    }

    0
}

/// Collect every defined `STT_FUNC` symbol from the symbol tables, keyed by
/// its value. Static and dynamic tables both contribute.
pub(crate) fn function_symbols(obj: &object::File) -> RangeMap<InternedString> {
    let mut symbols = RangeMap::new();
    for symbol in obj.symbols().chain(obj.dynamic_symbols()) {
        if symbol.kind() != SymbolKind::Text || symbol.is_undefined() {
            continue;
        }
        if let Ok(name) = symbol.name() {
            symbols.insert(symbol.address(), intern(name));
        }
    }
    symbols
}

/// The file name carried in a `.gnu_debuglink` section, if present. The
/// payload is a NUL-terminated name followed by a CRC, which is ignored.
pub(crate) fn debuglink_name(obj: &object::File) -> Option<String> {
    let section = obj.section_by_name(".gnu_debuglink")?;
    let data = section.data().ok()?;
    let len = memchr::memchr(0, data)?;
    let name = std::str::from_utf8(&data[..len]).ok()?;
    if name.is_empty() {
        return None;
    }
    Some(name.to_string())
}

/// Probe the standard locations for a debug-link file next to `image_path`:
/// the image's directory, its `.debug` subdirectory, and the mirror of the
/// image's directory under `/usr/lib/debug`.
pub(crate) fn find_debug_file(image_path: &Path, link_name: &str) -> Option<PathBuf> {
    let image_dir = image_path.parent()?;

    let candidates = [
        image_dir.join(link_name),
        image_dir.join(".debug").join(link_name),
        Path::new("/usr/lib/debug")
            .join(image_dir.strip_prefix("/").unwrap_or(image_dir))
            .join(link_name),
    ];

    candidates
        .into_iter()
        .find(|candidate| File::open(candidate).is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_has_no_preferred_address() {
        assert_eq!(
            preferred_load_address(Path::new("/nonexistent/no-such-image")),
            0
        );
    }

    #[test]
    fn debuglink_probe_misses_cleanly() {
        assert_eq!(
            find_debug_file(Path::new("/nonexistent/no-such-image"), "a.debug"),
            None
        );
    }
}
