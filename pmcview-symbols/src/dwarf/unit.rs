//! Compile-unit address coverage.

use gimli::Reader;

use super::{lines, subprogram};

/// The address ranges a CU covers: its range list or low/high pc when
/// present, otherwise the extent of its statement-line program. Some
/// compilers describe a CU only through its line table.
pub(crate) fn unit_coverage<R: Reader>(
    dwarf: &gimli::Dwarf<R>,
    unit: &gimli::Unit<R>,
) -> Result<Vec<(u64, u64)>, gimli::Error> {
    let mut entries = unit.entries();
    let Some((_, root)) = entries.next_dfs()? else {
        return Ok(Vec::new());
    };

    let mut coverage = subprogram::die_range_vec(dwarf, unit, root)?;
    if coverage.is_empty() {
        if let Some(extent) = lines::extent(unit)? {
            coverage.push(extent);
        }
    }
    Ok(coverage)
}
