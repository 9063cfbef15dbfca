//! Samples grouped by process identity.

use std::cell::OnceCell;
use std::collections::hash_map::Entry;
use std::collections::HashMap;

use pmcview_symbols::{intern, ImageCache, InternedString};

use crate::address_space::AddressSpace;
use crate::callchain::Callchain;
use crate::sample::Sample;

pub struct SampleAggregation {
    pid: i32,
    executable_name: InternedString,
    base_name: OnceCell<String>,
    display_name: OnceCell<String>,
    sample_count: u64,
    userland_sample_count: u64,
    chains: HashMap<Sample, Callchain>,
}

impl SampleAggregation {
    fn new(pid: i32, executable_name: InternedString) -> Self {
        SampleAggregation {
            pid,
            executable_name,
            base_name: OnceCell::new(),
            display_name: OnceCell::new(),
            sample_count: 0,
            userland_sample_count: 0,
            chains: HashMap::new(),
        }
    }

    /// Deposit one sample: a chain shape seen before bumps its counter, a
    /// new shape creates a callchain through the address space.
    pub fn add_sample(&mut self, space: &mut AddressSpace, images: &mut ImageCache, sample: Sample) {
        self.sample_count += 1;
        if !sample.is_kernel() {
            self.userland_sample_count += 1;
        }
        match self.chains.entry(sample) {
            Entry::Occupied(entry) => entry.into_mut().add_sample(),
            Entry::Vacant(entry) => {
                let chain = Callchain::new(space, images, entry.key());
                entry.insert(chain);
            }
        }
    }

    pub fn pid(&self) -> i32 {
        self.pid
    }

    pub fn executable_name(&self) -> &InternedString {
        &self.executable_name
    }

    pub fn sample_count(&self) -> u64 {
        self.sample_count
    }

    pub fn userland_sample_count(&self) -> u64 {
        self.userland_sample_count
    }

    pub fn callchains(&self) -> impl Iterator<Item = &Callchain> {
        self.chains.values()
    }

    /// The executable's path tail, with fallbacks for nameless
    /// aggregations.
    pub fn base_name(&self) -> &str {
        self.base_name.get_or_init(|| {
            if !self.executable_name.is_empty() {
                match self.executable_name.rsplit('/').next() {
                    Some(tail) if !tail.is_empty() => tail.to_string(),
                    _ => self.executable_name.to_string(),
                }
            } else if self.userland_sample_count == 0 {
                "kernel".to_string()
            } else {
                "unknown_file".to_string()
            }
        })
    }

    /// `"<exec> (<pid>)"`, with `kproc` / `<unknown>` fallbacks for
    /// nameless aggregations.
    pub fn display_name(&self) -> &str {
        self.display_name.get_or_init(|| {
            let name = if !self.executable_name.is_empty() {
                self.executable_name.as_str()
            } else if self.userland_sample_count == 0 {
                "kproc"
            } else {
                "<unknown>"
            };
            format!("{} ({})", name, self.pid)
        })
    }
}

/// Owns every aggregation in insertion order and routes events to the one
/// currently registered for each pid. An exec registers a fresh
/// aggregation; the replaced one stays in the owner list so its samples
/// still print.
pub struct AggregationRegistry {
    by_pid: HashMap<i32, usize>,
    list: Vec<SampleAggregation>,
}

impl AggregationRegistry {
    pub fn new() -> Self {
        AggregationRegistry {
            by_pid: HashMap::new(),
            list: Vec::new(),
        }
    }

    fn add(&mut self, pid: i32, name: &str) -> usize {
        let index = self.list.len();
        self.list.push(SampleAggregation::new(pid, intern(name)));
        self.by_pid.insert(pid, index);
        index
    }

    /// The first map-in for an unknown pid names its aggregation.
    pub fn process_map_in(&mut self, pid: i32, path: &str) {
        if !self.by_pid.contains_key(&pid) {
            self.add(pid, path);
        }
    }

    /// An exec always starts a new aggregation under the new name.
    pub fn process_exec(&mut self, pid: i32, path: &str) {
        self.add(pid, path);
    }

    /// The aggregation currently registered for `pid`, inventing a
    /// nameless one when no map-in or exec was ever seen.
    pub fn aggregation_for_sample(&mut self, pid: i32) -> &mut SampleAggregation {
        let index = match self.by_pid.get(&pid) {
            Some(&index) => index,
            None => self.add(pid, ""),
        };
        &mut self.list[index]
    }

    /// Non-empty aggregations, sorted descending by sample count; equal
    /// counts keep insertion order.
    pub fn sorted(&self) -> Vec<&SampleAggregation> {
        let mut list: Vec<&SampleAggregation> = self
            .list
            .iter()
            .filter(|agg| agg.sample_count() > 0)
            .collect();
        list.sort_by(|a, b| b.sample_count().cmp(&a.sample_count()));
        list
    }
}

impl Default for AggregationRegistry {
    fn default() -> Self {
        Self::new()
    }
}
