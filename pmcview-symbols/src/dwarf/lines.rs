//! Statement-line program decoding. The resolver needs the line table in
//! three places: leaf locations inside subprograms, the assembly residual
//! lookup, and compile-unit extent when a CU describes itself only through
//! its line program. Rows are decoded once per compile unit into a sorted
//! vector of `(address, file, line)` triples.

use gimli::Reader;

use crate::intern::{intern, InternedString};

#[derive(Debug)]
pub(crate) struct LineRow {
    pub addr: u64,
    pub file: InternedString,
    pub line: i64,
    pub end_sequence: bool,
}

#[derive(Debug)]
pub(crate) struct LineTable {
    pub rows: Vec<LineRow>,
    files: Vec<InternedString>,
}

impl LineTable {
    pub fn empty() -> Self {
        LineTable {
            rows: Vec::new(),
            files: Vec::new(),
        }
    }

    /// Resolve a raw file index from this CU's file table.
    pub fn file(&self, index: u64) -> Option<InternedString> {
        self.files.get(index as usize).cloned()
    }

    /// The last statement row at or before `addr`, skipping end-of-sequence
    /// markers.
    pub fn last_row_le(&self, addr: u64) -> Option<&LineRow> {
        let end = self.rows.partition_point(|row| row.addr <= addr);
        self.rows[..end]
            .iter()
            .rev()
            .find(|row| !row.end_sequence)
    }
}

pub(crate) fn decode<R: Reader>(
    dwarf: &gimli::Dwarf<R>,
    unit: &gimli::Unit<R>,
    image_name: &InternedString,
) -> Result<LineTable, gimli::Error> {
    let mut table = LineTable::empty();
    let Some(program) = unit.line_program.clone() else {
        return Ok(table);
    };

    table.files = resolve_files(dwarf, unit, program.header(), image_name);

    let mut rows_iter = program.rows();
    while let Some((_, row)) = rows_iter.next_row()? {
        if row.end_sequence() {
            table.rows.push(LineRow {
                addr: row.address(),
                file: image_name.clone(),
                line: -1,
                end_sequence: true,
            });
            continue;
        }
        let line = row.line().map(|line| line.get() as i64).unwrap_or(-1);
        let file = table
            .files
            .get(row.file_index() as usize)
            .cloned()
            .unwrap_or_else(|| image_name.clone());
        table.rows.push(LineRow {
            addr: row.address(),
            file,
            line,
            end_sequence: false,
        });
    }

    // Sequences arrive in emission order; sort by address, with sequence
    // ends sorting before any statement row at the same address.
    table
        .rows
        .sort_by(|a, b| {
            a.addr
                .cmp(&b.addr)
                .then_with(|| b.end_sequence.cmp(&a.end_sequence))
        });

    Ok(table)
}

/// The smallest and largest address touched by the CU's line program.
pub(crate) fn extent<R: Reader>(unit: &gimli::Unit<R>) -> Result<Option<(u64, u64)>, gimli::Error> {
    let Some(program) = unit.line_program.clone() else {
        return Ok(None);
    };
    let mut low = u64::MAX;
    let mut high = 0;
    let mut rows_iter = program.rows();
    while let Some((_, row)) = rows_iter.next_row()? {
        let addr = row.address();
        low = low.min(addr);
        high = high.max(addr);
    }
    if low == u64::MAX {
        Ok(None)
    } else {
        Ok(Some((low, high)))
    }
}

fn resolve_files<R: Reader>(
    dwarf: &gimli::Dwarf<R>,
    unit: &gimli::Unit<R>,
    header: &gimli::LineProgramHeader<R>,
    image_name: &InternedString,
) -> Vec<InternedString> {
    let comp_dir = reader_string(unit.comp_dir.as_ref());
    let mut files = Vec::with_capacity(header.file_names().len() + 1);

    if header.encoding().version <= 4 {
        // Index 0 names the compilation's primary source file.
        files.push(match unit.name.as_ref() {
            Some(name) => intern(&join_path(&comp_dir, "", &reader_string(Some(name)))),
            None => image_name.clone(),
        });
    }

    for file in header.file_names() {
        let name = match dwarf.attr_string(unit, file.path_name()) {
            Ok(reader) => reader_string(Some(&reader)),
            Err(_) => {
                files.push(image_name.clone());
                continue;
            }
        };
        let dir = file
            .directory(header)
            .and_then(|dir| dwarf.attr_string(unit, dir).ok())
            .map(|reader| reader_string(Some(&reader)))
            .unwrap_or_default();
        files.push(intern(&join_path(&comp_dir, &dir, &name)));
    }

    files
}

fn reader_string<R: Reader>(reader: Option<&R>) -> String {
    reader
        .and_then(|r| r.to_string_lossy().ok())
        .map(|s| s.into_owned())
        .unwrap_or_default()
}

fn join_path(comp_dir: &str, dir: &str, name: &str) -> String {
    if name.starts_with('/') || (dir.is_empty() && comp_dir.is_empty()) {
        return name.to_string();
    }
    let base = if dir.starts_with('/') {
        dir.to_string()
    } else if dir.is_empty() {
        comp_dir.to_string()
    } else if comp_dir.is_empty() {
        dir.to_string()
    } else {
        format!("{comp_dir}/{dir}")
    };
    if base.is_empty() {
        name.to_string()
    } else {
        format!("{base}/{name}")
    }
}
