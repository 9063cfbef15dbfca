use std::io::{self, Write};

use super::{
    basename, function_locations, percent, write_line_numbers, Direction, ProfilePrinter,
};
use crate::aggregation::SampleAggregation;
use crate::callchain::Callchain;
use crate::profiler::Profile;

/// Two sections: a global ranking of every distinct call chain, then a
/// per-process ranking of functions.
pub struct FlatProfilePrinter;

impl ProfilePrinter for FlatProfilePrinter {
    fn print(&self, profile: &Profile, out: &mut dyn Write) -> io::Result<()> {
        writeln!(out, "Events processed: {}", profile.sample_count)?;
        writeln!(out)?;

        let aggregations = profile.aggregations();

        let mut chains: Vec<(&SampleAggregation, &Callchain)> = Vec::new();
        for &agg in &aggregations {
            for chain in agg.callchains() {
                chains.push((agg, chain));
            }
        }
        chains.sort_by(|a, b| {
            b.1.sample_count()
                .cmp(&a.1.sample_count())
                .then_with(|| a.1.address().cmp(&b.1.address()))
        });

        let mut cumulative = 0;
        for (agg, chain) in &chains {
            let Some(leaf) = chain.leaf_frame(&profile.images) else {
                continue;
            };
            cumulative += chain.sample_count();
            writeln!(
                out,
                "{:6.2}% {:6.2}% {}, {:6}, {:>10}, {:6}, 0x{:08x}, {}, {}, {}:{} {} 0x{:x}",
                percent(chain.sample_count(), profile.sample_count),
                percent(cumulative, profile.sample_count),
                if chain.is_kernel() { "kern" } else { "user" },
                agg.pid(),
                basename(chain.executable_name()),
                chain.sample_count(),
                chain.address(),
                if chain.is_mapped(&profile.images) {
                    "mapped  "
                } else {
                    "unmapped"
                },
                chain.executable_name(),
                leaf.file(),
                leaf.code_line(),
                leaf.demangled(),
                leaf.offset(),
            )?;
        }

        for agg in &aggregations {
            writeln!(out)?;
            writeln!(
                out,
                "Process: {:6}, {}, total: {} ({:6.2}%)",
                agg.pid(),
                agg.executable_name(),
                agg.sample_count(),
                percent(agg.sample_count(), profile.sample_count),
            )?;

            let list = function_locations(agg, &profile.images, Direction::LeafUp, None);
            writeln!(
                out,
                "       time   time-t   samples   env  file / library, line number, function"
            )?;
            let mut cumulative = 0;
            for loc in &list {
                cumulative += loc.count();
                write!(
                    out,
                    "    {:6.2}%, {:6.2}%, {:8}, {}, {}:{}, {}",
                    percent(loc.count(), agg.sample_count()),
                    percent(cumulative, agg.sample_count()),
                    loc.count(),
                    if loc.is_kernel() { "kern" } else { "user" },
                    loc.frame().file(),
                    loc.frame().func_line(),
                    loc.frame().demangled(),
                )?;
                write_line_numbers(out, profile.show_lines, loc)?;
                writeln!(out)?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::FlatProfilePrinter;
    use crate::dispatch::EventDispatcher;
    use crate::event_log::Event;
    use crate::printers::ProfilePrinter;
    use crate::profiler::Profile;
    use std::collections::HashSet;

    fn unmapped_profile() -> Profile {
        let mut dispatcher = EventDispatcher::new(Vec::new(), HashSet::new(), false, false);
        let events = vec![
            Event::MapIn {
                pid: 1,
                start: 0,
                path: "/bin/a".to_string(),
            },
            Event::Sample {
                kernel: false,
                pid: 1,
                pcs: vec![0x80, 0x40],
            },
            Event::Sample {
                kernel: false,
                pid: 1,
                pcs: vec![0x80, 0x40],
            },
            Event::Sample {
                kernel: false,
                pid: 1,
                pcs: vec![0x90],
            },
        ];
        for event in events {
            dispatcher.dispatch(event).unwrap();
        }
        let (images, registry, sample_count) = dispatcher.into_parts();
        Profile {
            images,
            registry,
            sample_count,
            show_lines: false,
        }
    }

    #[test]
    fn prints_chain_ranking_and_process_section() {
        let profile = unmapped_profile();
        let mut out = Vec::new();
        FlatProfilePrinter.print(&profile, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();

        assert!(text.starts_with("Events processed: 3\n"));
        assert!(text.contains("Process:      1, /bin/a, total: 3 (100.00%)"));
        // The deduplicated two-frame chain ranks first with 2 samples.
        assert!(text.contains(" 66.67%"));
        assert!(text.contains("[unmapped_function]"));
    }
}
