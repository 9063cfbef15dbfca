//! Applies the event stream to the model, in order.

use std::collections::{HashMap, HashSet};

use pmcview_symbols::ImageCache;

use crate::address_space::AddressSpace;
use crate::aggregation::AggregationRegistry;
use crate::event_log::{Event, KERNEL_PID};
use crate::sample::Sample;

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("unable to find kernel module {0}")]
    MissingKernelModule(String),
}

pub struct EventDispatcher {
    images: ImageCache,
    registry: AggregationRegistry,
    spaces: HashMap<i32, AddressSpace>,
    kernel_space: AddressSpace,
    module_path: Vec<String>,
    pid_filter: HashSet<i32>,
    quit_on_error: bool,
    sample_count: u64,
}

impl EventDispatcher {
    pub fn new(
        module_path: Vec<String>,
        pid_filter: HashSet<i32>,
        include_templates: bool,
        quit_on_error: bool,
    ) -> Self {
        EventDispatcher {
            images: ImageCache::new(include_templates),
            registry: AggregationRegistry::new(),
            spaces: HashMap::new(),
            kernel_space: AddressSpace::new(),
            module_path,
            pid_filter,
            quit_on_error,
            sample_count: 0,
        }
    }

    pub fn dispatch(&mut self, event: Event) -> Result<(), DispatchError> {
        match event {
            Event::MapIn { pid, start, path } => self.process_map_in(pid, start, &path),
            Event::Exec { pid, path, .. } => {
                self.process_exec(pid, &path);
                Ok(())
            }
            Event::Sample { kernel, pid, pcs } => {
                self.process_sample(kernel, pid, &pcs);
                Ok(())
            }
            Event::Unhandled { kind } => {
                log::debug!("skipping event of unhandled kind {kind}");
                Ok(())
            }
        }
    }

    fn process_map_in(&mut self, pid: i32, start: u64, path: &str) -> Result<(), DispatchError> {
        if pid == KERNEL_PID {
            let found =
                self.kernel_space
                    .find_and_map(&mut self.images, start, &self.module_path, path);
            if !found {
                log::warn!("unable to find kernel module {path}");
                if self.quit_on_error {
                    return Err(DispatchError::MissingKernelModule(path.to_string()));
                }
            }
        } else {
            self.spaces
                .entry(pid)
                .or_default()
                .map_in(&mut self.images, start, path);
        }
        self.registry.process_map_in(pid, path);
        Ok(())
    }

    /// An exec replaces the process identity: new aggregation, fresh
    /// address space with the new executable mapped at its preferred base.
    fn process_exec(&mut self, pid: i32, path: &str) {
        self.registry.process_exec(pid, path);
        let mut space = AddressSpace::new();
        space.process_exec(&mut self.images, path);
        self.spaces.insert(pid, space);
    }

    fn process_sample(&mut self, kernel: bool, pid: i32, pcs: &[u64]) {
        if !self.pid_filter.is_empty() && !self.pid_filter.contains(&pid) {
            return;
        }
        if pcs.is_empty() {
            return;
        }
        let sample = Sample::new(kernel, pid, pcs);
        let space = if kernel {
            &mut self.kernel_space
        } else {
            self.spaces.entry(pid).or_default()
        };
        self.registry
            .aggregation_for_sample(pid)
            .add_sample(space, &mut self.images, sample);
        self.sample_count += 1;
    }

    /// End of stream: run symbolication and hand the model over.
    pub fn into_parts(mut self) -> (ImageCache, AggregationRegistry, u64) {
        self.images.map_all();
        (self.images, self.registry, self.sample_count)
    }
}
