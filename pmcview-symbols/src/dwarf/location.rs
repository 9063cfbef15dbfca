//! The per-subprogram location list.
//!
//! A location describes one contiguous stretch of code and knows which
//! function's body it belongs to (its caller chain) and which function call
//! it represents (its callee). Three layers populate the list, in order:
//! the subprogram's own ranges, every inlined-subroutine instance inside it,
//! and finally the statement-line rows, which become the leaves. Walking a
//! leaf's caller chain outward yields the inline frames for any address the
//! leaf covers.

use std::rc::Rc;

use crate::demangle::demangle;
use crate::frame::Callframe;
use crate::intern::InternedString;
use crate::range_map::RangeMap;

#[derive(Debug)]
pub(crate) struct DwarfLocation {
    pub end: u64,
    /// Source file of the code covered by this location.
    pub file: InternedString,
    /// Line executing within this location.
    pub code_line: i64,
    /// The function whose call this location represents.
    pub callee: InternedString,
    /// Declaration line of `callee`.
    pub callee_line: i64,
    pub die_offset: u64,
    pub caller: Option<Rc<DwarfLocation>>,
}

pub(crate) type LocationList = RangeMap<Rc<DwarfLocation>>;

/// Insert one range of the subprogram skeleton. Skeleton locations have no
/// caller; they terminate every chain stacked on top of them.
pub(crate) fn add_function_range(
    list: &mut LocationList,
    low: u64,
    high: u64,
    name: InternedString,
    decl_line: i64,
    die_offset: u64,
) {
    list.insert_if_absent(
        low,
        Rc::new(DwarfLocation {
            end: high,
            file: InternedString::empty(),
            code_line: -1,
            callee: name,
            callee_line: decl_line,
            die_offset,
            caller: None,
        }),
    );
}

/// Stack a location over `[low, high)`. The location currently covering
/// `low` becomes the new location's caller; if the new location ends before
/// the covering one, the covering location is re-inserted at `high` so its
/// tail keeps resolving. A `high` of 0 means "to the end of the enclosing
/// location".
#[allow(clippy::too_many_arguments)]
pub(crate) fn add_call_site(
    list: &mut LocationList,
    low: u64,
    high: u64,
    file: InternedString,
    code_line: i64,
    callee: InternedString,
    callee_line: i64,
    die_offset: u64,
) {
    let Some((_, current)) = list.lookup_le(low) else {
        return;
    };
    let current = Rc::clone(current);
    let location = Rc::new(DwarfLocation {
        end: high,
        file,
        code_line,
        callee,
        callee_line,
        die_offset,
        caller: Some(Rc::clone(&current)),
    });
    list.insert(low, location);
    if high != 0 && current.end > high {
        list.insert_if_absent(high, current);
    }
}

/// Resolve `frame` against the finished location list.
///
/// The innermost location covering the frame's offset starts the chain; a
/// covering location without a caller is a gap between ranges (padding), so
/// the search backs up until it finds real coverage. Each step outward
/// emits one inline frame: code position from the inner location, function
/// identity from its caller's callee. The caller-less terminal location
/// names the physical function.
pub(crate) fn map_frame(frame: &mut Callframe, list: &LocationList, include_templates: bool) {
    let mut innermost = None;
    for (_, location) in list.range_le(frame.offset()).rev() {
        if location.caller.is_some() {
            innermost = Some(Rc::clone(location));
            break;
        }
    }

    let Some(mut location) = innermost else {
        frame.set_unmapped();
        return;
    };

    while let Some(caller) = location.caller.clone() {
        let func = caller.callee.clone();
        let demangled = demangle(&func, include_templates);
        frame.add_frame(
            location.file.clone(),
            func,
            demangled,
            location.code_line,
            caller.callee_line,
            location.die_offset,
        );
        location = caller;
    }
}
