//! DIE-level helpers: address coverage, function identity, and inline call
//! sites. Function names follow the `DW_AT_abstract_origin` /
//! `DW_AT_specification` chain to the defining declaration, preferring the
//! linkage name over the plain name.

use gimli::{Reader, ReaderOffset};

use super::lines::LineTable;
use crate::intern::{intern, InternedString};

type Die<'abbrev, 'unit, R> = gimli::DebuggingInformationEntry<'abbrev, 'unit, R>;

/// The address ranges a DIE covers, empty when it covers no code.
pub(crate) fn die_range_vec<R: Reader>(
    dwarf: &gimli::Dwarf<R>,
    unit: &gimli::Unit<R>,
    entry: &Die<R>,
) -> Result<Vec<(u64, u64)>, gimli::Error> {
    let mut out = Vec::new();
    let mut ranges = dwarf.die_ranges(unit, entry)?;
    while let Some(range) = ranges.next()? {
        if range.begin < range.end {
            out.push((range.begin, range.end));
        }
    }
    Ok(out)
}

/// The DIE's offset within `.debug_info`, for diagnostics and
/// deduplication. 0 when the offset cannot be expressed.
pub(crate) fn die_global_offset<R: Reader>(unit: &gimli::Unit<R>, entry: &Die<R>) -> u64 {
    match entry.offset().to_debug_info_offset(&unit.header) {
        Some(offset) => offset.0.into_u64(),
        None => 0,
    }
}

/// Resolve the function name and declaration line for a subprogram or
/// inlined-subroutine DIE.
pub(crate) fn subprogram_name<R: Reader>(
    dwarf: &gimli::Dwarf<R>,
    unit: &gimli::Unit<R>,
    entry: &Die<R>,
) -> Result<(InternedString, i64), gimli::Error> {
    if let Some(attr) = entry.attr_value(gimli::DW_AT_abstract_origin)? {
        if let Some(offset) = resolve_unit_ref(unit, &attr) {
            let origin = unit.entry(offset)?;
            return name_from_specification(dwarf, unit, &origin);
        }
        return local_name(dwarf, unit, entry);
    }
    name_from_specification(dwarf, unit, entry)
}

fn name_from_specification<R: Reader>(
    dwarf: &gimli::Dwarf<R>,
    unit: &gimli::Unit<R>,
    entry: &Die<R>,
) -> Result<(InternedString, i64), gimli::Error> {
    if let Some(attr) = entry.attr_value(gimli::DW_AT_specification)? {
        if let Some(offset) = resolve_unit_ref(unit, &attr) {
            let specification = unit.entry(offset)?;
            return local_name(dwarf, unit, &specification);
        }
    }
    local_name(dwarf, unit, entry)
}

fn local_name<R: Reader>(
    dwarf: &gimli::Dwarf<R>,
    unit: &gimli::Unit<R>,
    entry: &Die<R>,
) -> Result<(InternedString, i64), gimli::Error> {
    let line = match entry.attr_value(gimli::DW_AT_decl_line)? {
        Some(value) => attr_udata(&value).map(|line| line as i64).unwrap_or(-1),
        None => -1,
    };

    for name_attr in [gimli::DW_AT_MIPS_linkage_name, gimli::DW_AT_name] {
        if let Some(value) = entry.attr_value(name_attr)? {
            if let Ok(reader) = dwarf.attr_string(unit, value) {
                if let Ok(name) = reader.to_string_lossy() {
                    return Ok((intern(&name), line));
                }
            }
        }
    }

    Ok((InternedString::empty(), line))
}

/// The call file and line of an inlined-subroutine DIE. Falls back to the
/// image path and line -1 when the attributes are absent.
pub(crate) fn call_site<R: Reader>(
    entry: &Die<R>,
    line_table: &LineTable,
    image_path: &InternedString,
) -> (InternedString, i64) {
    let line = entry
        .attr_value(gimli::DW_AT_call_line)
        .ok()
        .flatten()
        .and_then(|value| attr_udata(&value))
        .map(|line| line as i64)
        .unwrap_or(-1);
    let file = entry
        .attr_value(gimli::DW_AT_call_file)
        .ok()
        .flatten()
        .and_then(|value| attr_udata(&value))
        .and_then(|index| line_table.file(index))
        .unwrap_or_else(|| image_path.clone());
    (file, line)
}

fn resolve_unit_ref<R: Reader>(
    unit: &gimli::Unit<R>,
    attr: &gimli::AttributeValue<R>,
) -> Option<gimli::UnitOffset<R::Offset>> {
    match *attr {
        gimli::AttributeValue::UnitRef(offset) => Some(offset),
        gimli::AttributeValue::DebugInfoRef(offset) => offset.to_unit_offset(&unit.header),
        _ => None,
    }
}

fn attr_udata<R: Reader>(value: &gimli::AttributeValue<R>) -> Option<u64> {
    match *value {
        gimli::AttributeValue::FileIndex(index) => Some(index),
        ref other => other.udata_value(),
    }
}
