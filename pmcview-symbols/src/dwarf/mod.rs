//! Resolution of raw callframes against one image's ELF and DWARF data.
//!
//! The resolver is constructed when an image first needs symbolication and
//! dropped before `Image::map_all` returns, so file handles never outlive
//! the resolution pass. Failure is never fatal: an unreadable or malformed
//! image leaves every frame unmapped, a bad compile unit only loses that
//! unit's frames, and an image without DWARF falls back to its ELF symbol
//! table.

mod lines;
mod location;
mod subprogram;
mod unit;

use std::borrow::Cow;
use std::path::Path;
use std::rc::Rc;

use elsa::sync::FrozenVec;
use gimli::{EndianSlice, Reader, RunTimeEndian};
use object::{Object, ObjectSection};

use crate::elf::{self, MappedFile};
use crate::error::Error;
use crate::frame::{Callframe, UNMAPPED_FUNCTION_NAME};
use crate::intern::{intern, InternedString};
use crate::range_map::RangeMap;

use self::lines::LineTable;
use self::location::LocationList;

pub(crate) struct DwarfResolver<'a> {
    image_path: &'a InternedString,
    include_templates: bool,
}

/// One coverage entry of a compile unit, with the raw frames assigned to it.
struct CuCoverage {
    high: u64,
    unit_index: usize,
    pending: Vec<u64>,
}

/// One coverage entry of a subprogram. Entries for a subprogram with
/// several ranges share the underlying record.
struct SubprogramEntry<T> {
    high: u64,
    sub: Rc<SubprogramRec<T>>,
    pending: Vec<u64>,
}

struct SubprogramRec<T> {
    offset: gimli::UnitOffset<T>,
    ranges: Vec<(u64, u64)>,
}

/// Backing storage for decompressed debug sections, alive for the duration
/// of one resolution pass.
struct SectionStorage {
    uncompressed: FrozenVec<Vec<u8>>,
}

impl SectionStorage {
    fn new() -> Self {
        SectionStorage {
            uncompressed: FrozenVec::new(),
        }
    }

    fn sect<'data, 'ctx, O>(
        &'ctx self,
        obj: &O,
        id: gimli::SectionId,
        endian: RunTimeEndian,
    ) -> EndianSlice<'ctx, RunTimeEndian>
    where
        'data: 'ctx,
        O: Object<'data>,
    {
        let data: &'ctx [u8] = match obj.section_by_name(id.name()) {
            Some(section) => match section.uncompressed_data() {
                Ok(Cow::Borrowed(data)) => data,
                Ok(Cow::Owned(data)) => self.uncompressed.push_get(data),
                Err(_) => &[],
            },
            None => &[],
        };
        EndianSlice::new(data, endian)
    }
}

impl<'a> DwarfResolver<'a> {
    pub fn new(image_path: &'a InternedString, include_templates: bool) -> Self {
        DwarfResolver {
            image_path,
            include_templates,
        }
    }

    /// Fill in every raw frame in `frames`. Frames that cannot be
    /// symbolicated transition to the unmapped state.
    pub fn resolve(&self, frames: &mut RangeMap<Callframe>) {
        if !self.image_path.is_empty() {
            if let Err(err) = self.try_resolve(frames) {
                log::warn!("cannot symbolicate {}: {}", self.image_path, err);
            }
        }
        for frame in frames.values_mut() {
            if frame.is_raw() {
                frame.set_unmapped();
            }
        }
    }

    fn try_resolve(&self, frames: &mut RangeMap<Callframe>) -> Result<(), Error> {
        let image_path = Path::new(self.image_path.as_str());
        let mapped = MappedFile::open(image_path)?;
        let obj = mapped
            .parse()
            .map_err(|e| Error::ObjectParse(self.image_path.to_string(), e))?;

        let symbols = elf::function_symbols(&obj);

        // A .gnu_debuglink section redirects the DWARF lookup to a
        // supplementary file; the symbol table above still comes from the
        // image itself.
        let debug_mapped = elf::debuglink_name(&obj)
            .and_then(|name| elf::find_debug_file(image_path, &name))
            .and_then(|path| MappedFile::open(&path).ok());
        let dwarf_data: &[u8] = match &debug_mapped {
            Some(debug) if debug.parse().is_ok() => debug.data(),
            _ => mapped.data(),
        };
        let parsed_dwarf_obj = object::File::parse(dwarf_data)
            .map_err(|e| Error::ObjectParse(self.image_path.to_string(), e))?;
        let dwarf_obj = &parsed_dwarf_obj;

        let endian = if dwarf_obj.is_little_endian() {
            RunTimeEndian::Little
        } else {
            RunTimeEndian::Big
        };
        let storage = SectionStorage::new();
        let dwarf =
            gimli::Dwarf::load(|id| Ok::<_, gimli::Error>(storage.sect(dwarf_obj, id, endian)))?;

        let mut units = Vec::new();
        let mut headers = dwarf.units();
        loop {
            match headers.next() {
                Ok(Some(header)) => match dwarf.unit(header) {
                    Ok(unit) => units.push(unit),
                    Err(err) => log::debug!("{}: skipping unit: {}", self.image_path, err),
                },
                Ok(None) => break,
                Err(err) => {
                    log::debug!("{}: unit enumeration stopped: {}", self.image_path, err);
                    break;
                }
            }
        }

        if units.is_empty() {
            self.resolve_elf(frames, &symbols);
            return Ok(());
        }

        let mut cu_map: RangeMap<CuCoverage> = RangeMap::new();
        for (unit_index, unit) in units.iter().enumerate() {
            match unit::unit_coverage(&dwarf, unit) {
                Ok(coverage) => {
                    for (low, high) in coverage {
                        cu_map.insert(
                            low,
                            CuCoverage {
                                high,
                                unit_index,
                                pending: Vec::new(),
                            },
                        );
                    }
                }
                Err(err) => log::debug!("{}: unit coverage failed: {}", self.image_path, err),
            }
        }

        let raw_offsets: Vec<u64> = frames
            .iter()
            .filter(|(_, frame)| frame.is_raw())
            .map(|(offset, _)| *offset)
            .collect();
        for offset in raw_offsets {
            match cu_map.lookup_le_mut(offset) {
                Some((_, coverage)) if offset < coverage.high => coverage.pending.push(offset),
                _ => {
                    if let Some(frame) = frames.get_mut(offset) {
                        frame.set_unmapped();
                    }
                }
            }
        }

        for (_, coverage) in cu_map.iter() {
            if coverage.pending.is_empty() {
                continue;
            }
            let unit = &units[coverage.unit_index];
            if let Err(err) =
                self.map_cu_frames(&dwarf, unit, &coverage.pending, frames, &symbols)
            {
                log::debug!("{}: compile unit abandoned: {}", self.image_path, err);
                for offset in &coverage.pending {
                    if let Some(frame) = frames.get_mut(*offset) {
                        if frame.is_raw() {
                            frame.set_unmapped();
                        }
                    }
                }
            }
        }

        Ok(())
    }

    fn map_cu_frames<R: Reader>(
        &self,
        dwarf: &gimli::Dwarf<R>,
        unit: &gimli::Unit<R>,
        pending: &[u64],
        frames: &mut RangeMap<Callframe>,
        symbols: &RangeMap<InternedString>,
    ) -> Result<(), gimli::Error> {
        let line_table = lines::decode(dwarf, unit, self.image_path)?;

        let cu_die_offset = {
            let mut entries = unit.entries();
            match entries.next_dfs()? {
                Some((_, root)) => subprogram::die_global_offset(unit, root),
                None => 0,
            }
        };

        let mut subprograms: RangeMap<SubprogramEntry<R::Offset>> = RangeMap::new();
        {
            let mut tree = unit.entries_tree(None)?;
            collect_subprograms(dwarf, unit, tree.root()?, &mut subprograms)?;
        }

        let mut assembly = Vec::new();
        for &offset in pending {
            match subprograms.lookup_le_mut(offset) {
                Some((_, entry)) if offset < entry.high => entry.pending.push(offset),
                _ => assembly.push(offset),
            }
        }

        for (_, entry) in subprograms.iter() {
            if entry.pending.is_empty() {
                continue;
            }
            let list =
                self.build_location_list(dwarf, unit, &entry.sub, &line_table, cu_die_offset)?;
            for &offset in &entry.pending {
                if let Some(frame) = frames.get_mut(offset) {
                    location::map_frame(frame, &list, self.include_templates);
                }
            }
        }

        for offset in assembly {
            if let Some(frame) = frames.get_mut(offset) {
                self.map_assembly(frame, &line_table, symbols, cu_die_offset);
            }
        }

        Ok(())
    }

    fn build_location_list<R: Reader>(
        &self,
        dwarf: &gimli::Dwarf<R>,
        unit: &gimli::Unit<R>,
        sub: &SubprogramRec<R::Offset>,
        line_table: &LineTable,
        cu_die_offset: u64,
    ) -> Result<LocationList, gimli::Error> {
        let entry = unit.entry(sub.offset)?;
        let (name, decl_line) = subprogram::subprogram_name(dwarf, unit, &entry)?;
        let die_offset = subprogram::die_global_offset(unit, &entry);

        let mut list = LocationList::new();
        for &(low, high) in &sub.ranges {
            location::add_function_range(&mut list, low, high, name.clone(), decl_line, die_offset);
        }

        let mut tree = unit.entries_tree(Some(sub.offset))?;
        self.fill_inline_locations(dwarf, unit, tree.root()?, line_table, &mut list)?;

        for &(low, high) in &sub.ranges {
            let start = line_table.rows.partition_point(|row| row.addr < low);
            for index in start..line_table.rows.len() {
                let row = &line_table.rows[index];
                if row.addr >= high {
                    break;
                }
                if row.end_sequence {
                    continue;
                }
                let next_addr = line_table
                    .rows
                    .get(index + 1)
                    .map(|next| next.addr)
                    .unwrap_or(0);
                // Zero-length rows are compiler artifacts.
                if next_addr == row.addr {
                    continue;
                }
                location::add_call_site(
                    &mut list,
                    row.addr,
                    next_addr,
                    row.file.clone(),
                    row.line,
                    InternedString::empty(),
                    -1,
                    cu_die_offset,
                );
            }
        }

        Ok(list)
    }

    fn fill_inline_locations<R: Reader>(
        &self,
        dwarf: &gimli::Dwarf<R>,
        unit: &gimli::Unit<R>,
        node: gimli::EntriesTreeNode<R>,
        line_table: &LineTable,
        list: &mut LocationList,
    ) -> Result<(), gimli::Error> {
        let mut children = node.children();
        while let Some(child) = children.next()? {
            let tag = child.entry().tag();
            // A nested subprogram's code is not part of this function.
            if tag == gimli::DW_TAG_subprogram {
                continue;
            }
            if tag == gimli::DW_TAG_inlined_subroutine {
                let ranges = subprogram::die_range_vec(dwarf, unit, child.entry())?;
                if !ranges.is_empty() {
                    let (name, decl_line) = subprogram::subprogram_name(dwarf, unit, child.entry())?;
                    let (call_file, call_line) =
                        subprogram::call_site(child.entry(), line_table, self.image_path);
                    let die_offset = subprogram::die_global_offset(unit, child.entry());
                    for (low, high) in ranges {
                        location::add_call_site(
                            list,
                            low,
                            high,
                            call_file.clone(),
                            call_line,
                            name.clone(),
                            decl_line,
                            die_offset,
                        );
                    }
                }
            }
            self.fill_inline_locations(dwarf, unit, child, line_table, list)?;
        }
        Ok(())
    }

    /// A frame inside CU coverage but outside every subprogram: use the
    /// line table for the position and the ELF symbol table for the name.
    fn map_assembly(
        &self,
        frame: &mut Callframe,
        line_table: &LineTable,
        symbols: &RangeMap<InternedString>,
        cu_die_offset: u64,
    ) {
        let Some(row) = line_table.last_row_le(frame.offset()) else {
            frame.set_unmapped();
            return;
        };
        let func = match symbols.lookup_le(frame.offset()) {
            Some((_, name)) => name.clone(),
            None => intern(UNMAPPED_FUNCTION_NAME),
        };
        let demangled = crate::demangle::demangle(&func, self.include_templates);
        frame.add_frame(
            row.file.clone(),
            func,
            demangled,
            row.line,
            row.line,
            cu_die_offset,
        );
    }

    /// No DWARF at all: map each frame to the nearest preceding ELF
    /// function symbol.
    fn resolve_elf(&self, frames: &mut RangeMap<Callframe>, symbols: &RangeMap<InternedString>) {
        for (offset, frame) in frames.iter_mut() {
            if !frame.is_raw() {
                continue;
            }
            match symbols.lookup_le(*offset) {
                Some((_, name)) => {
                    let func = name.clone();
                    let demangled = crate::demangle::demangle(&func, self.include_templates);
                    frame.add_frame(self.image_path.clone(), func, demangled, -1, -1, 0);
                }
                None => frame.set_unmapped(),
            }
        }
    }
}

fn collect_subprograms<R: Reader>(
    dwarf: &gimli::Dwarf<R>,
    unit: &gimli::Unit<R>,
    node: gimli::EntriesTreeNode<R>,
    out: &mut RangeMap<SubprogramEntry<R::Offset>>,
) -> Result<(), gimli::Error> {
    let mut children = node.children();
    while let Some(child) = children.next()? {
        let tag = child.entry().tag();
        if tag == gimli::DW_TAG_namespace {
            collect_subprograms(dwarf, unit, child, out)?;
        } else if tag == gimli::DW_TAG_subprogram {
            let ranges = subprogram::die_range_vec(dwarf, unit, child.entry())?;
            if !ranges.is_empty() {
                let sub = Rc::new(SubprogramRec {
                    offset: child.entry().offset(),
                    ranges: ranges.clone(),
                });
                for (low, high) in ranges {
                    out.insert(
                        low,
                        SubprogramEntry {
                            high,
                            sub: Rc::clone(&sub),
                            pending: Vec::new(),
                        },
                    );
                }
            }
        }
    }
    Ok(())
}
