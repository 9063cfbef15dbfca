//! Consumers of the resolved model. Each printer renders the ordered
//! aggregation list in one of the supported output styles.

pub mod callchain;
pub mod flamegraph;
pub mod flat;

use std::collections::{BTreeSet, HashMap};
use std::io::{self, Write};

use pmcview_symbols::{ImageCache, InlineFrame, InternedString};

use crate::aggregation::SampleAggregation;
use crate::callchain::Callchain;
use crate::profiler::Profile;

pub trait ProfilePrinter {
    fn print(&self, profile: &Profile, out: &mut dyn Write) -> io::Result<()>;
}

/// Which end of the call chains a profile is organized around.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    LeafUp,
    RootDown,
}

/// Samples aggregated by (file, function), ranked by count.
pub(crate) struct FunctionLocation<'a> {
    frame: &'a InlineFrame,
    count: u64,
    kernel: bool,
    line_locations: BTreeSet<i64>,
}

impl<'a> FunctionLocation<'a> {
    fn new(frame: &'a InlineFrame, chain: &Callchain) -> Self {
        let mut line_locations = BTreeSet::new();
        line_locations.insert(frame.code_line());
        FunctionLocation {
            frame,
            count: chain.sample_count(),
            kernel: chain.is_kernel(),
            line_locations,
        }
    }

    fn merge(&mut self, frame: &InlineFrame, count: u64) {
        self.count += count;
        self.line_locations.insert(frame.code_line());
    }

    pub fn frame(&self) -> &'a InlineFrame {
        self.frame
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn is_kernel(&self) -> bool {
        self.kernel
    }

    pub fn line_locations(&self) -> impl Iterator<Item = i64> + '_ {
        self.line_locations.iter().copied()
    }
}

#[derive(Clone, PartialEq, Eq, Hash)]
struct FuncLocKey {
    file: InternedString,
    func: InternedString,
}

type FuncLocMap<'a> = HashMap<FuncLocKey, FunctionLocation<'a>>;

/// A chain of demangled names, leading from a profile root toward its
/// callers; the key of the caller-tree map.
pub(crate) type StringChain = Vec<InternedString>;
pub(crate) type StringChainMap<'a> = HashMap<StringChain, FuncLocMap<'a>>;

fn insert_func_loc<'a>(map: &mut FuncLocMap<'a>, frame: &'a InlineFrame, chain: &Callchain) {
    let key = FuncLocKey {
        file: frame.file().clone(),
        func: frame.func().clone(),
    };
    map.entry(key)
        .and_modify(|loc| loc.merge(frame, chain.sample_count()))
        .or_insert_with(|| FunctionLocation::new(frame, chain));
}

/// The chain's inline frames in traversal order for `direction`.
///
/// Leaf-up profiles walk the flattened frames as recorded. Root-down
/// profiles reverse them, skip unmapped frames at the root end, and finish
/// with the synthetic `[self]` leaf.
pub(crate) fn collect_frames<'a>(
    chain: &'a Callchain,
    images: &'a ImageCache,
    direction: Direction,
) -> Vec<&'a InlineFrame> {
    let mut frames = Vec::new();
    match direction {
        Direction::LeafUp => chain.flatten(images, &mut frames),
        Direction::RootDown => {
            if let Some(self_frame) = chain.self_frame(images) {
                frames.push(self_frame);
            }
            chain.flatten(images, &mut frames);
            frames.reverse();
            match frames.iter().position(|frame| !frame.is_unmapped()) {
                Some(first_mapped) => {
                    frames.drain(..first_mapped);
                }
                None => frames.clear(),
            }
        }
    }
    frames
}

/// Aggregate an aggregation's chains into ranked function locations.
/// When `chain_map` is given, it also accumulates the caller tree: for
/// every name-chain prefix, the (file, function) buckets that follow it.
pub(crate) fn function_locations<'a>(
    agg: &'a SampleAggregation,
    images: &'a ImageCache,
    direction: Direction,
    mut chain_map: Option<&mut StringChainMap<'a>>,
) -> Vec<FunctionLocation<'a>> {
    let mut loc_map = FuncLocMap::new();

    for chain in agg.callchains() {
        let frames = collect_frames(chain, images, direction);
        let mut frames = frames.into_iter();
        let Some(first) = frames.next() else {
            continue;
        };
        insert_func_loc(&mut loc_map, first, chain);

        if let Some(chain_map) = chain_map.as_deref_mut() {
            let mut name_chain: StringChain = vec![first.demangled().clone()];
            for frame in frames {
                let bucket = chain_map.entry(name_chain.clone()).or_default();
                insert_func_loc(bucket, frame, chain);
                name_chain.push(frame.demangled().clone());
            }
        }
    }

    let mut list: Vec<FunctionLocation<'a>> = loc_map.into_values().collect();
    sort_by_count(&mut list);
    list
}

fn sort_by_count(list: &mut [FunctionLocation<'_>]) {
    list.sort_by(|a, b| {
        b.count
            .cmp(&a.count)
            .then_with(|| a.frame.demangled().as_str().cmp(b.frame.demangled().as_str()))
    });
}

/// The callers one step beyond `chain`, ranked, plus their total count.
pub(crate) fn callers<'m, 'a>(
    map: &'m StringChainMap<'a>,
    chain: &StringChain,
) -> (Vec<&'m FunctionLocation<'a>>, u64) {
    let Some(bucket) = map.get(chain) else {
        return (Vec::new(), 0);
    };
    let mut functions: Vec<&FunctionLocation> = bucket.values().collect();
    let total = functions.iter().map(|loc| loc.count).sum();
    functions.sort_by(|a, b| {
        b.count
            .cmp(&a.count)
            .then_with(|| a.frame.demangled().as_str().cmp(b.frame.demangled().as_str()))
    });
    (functions, total)
}

pub(crate) fn write_line_numbers(
    out: &mut dyn Write,
    show_lines: bool,
    loc: &FunctionLocation<'_>,
) -> io::Result<()> {
    if show_lines {
        write!(out, " lines:")?;
        for line in loc.line_locations() {
            write!(out, " {line}")?;
        }
    }
    Ok(())
}

pub(crate) fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

pub(crate) fn percent(count: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        count as f64 * 100.0 / total as f64
    }
}
