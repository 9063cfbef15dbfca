use std::io::{self, Write};

use super::{
    callers, function_locations, percent, write_line_numbers, Direction, FunctionLocation,
    ProfilePrinter, StringChain, StringChainMap,
};
use crate::aggregation::SampleAggregation;
use crate::profiler::Profile;

/// Per-process caller trees: leaf-up shows who each hot function was
/// called from, root-down shows where each process spent its time from
/// the entry points downward.
pub struct CallchainProfilePrinter {
    pub direction: Direction,
    pub threshold: f64,
    pub max_depth: u32,
    /// When false, chains with a single caller all the way down are not
    /// expanded.
    pub print_boring: bool,
}

impl ProfilePrinter for CallchainProfilePrinter {
    fn print(&self, profile: &Profile, out: &mut dyn Write) -> io::Result<()> {
        writeln!(out, "Events processed: {}", profile.sample_count)?;

        for agg in profile.aggregations() {
            let mut chain_map = StringChainMap::new();
            let list =
                function_locations(agg, &profile.images, self.direction, Some(&mut chain_map));

            writeln!(out)?;
            writeln!(
                out,
                "Process: {:6}, {}, total: {} ({:6.2}%)",
                agg.pid(),
                agg.executable_name(),
                agg.sample_count(),
                percent(agg.sample_count(), profile.sample_count),
            )?;

            for loc in &list {
                let pct = percent(loc.count(), agg.sample_count());
                if pct < self.threshold {
                    continue;
                }
                self.print_frame(out, profile, agg, 0, pct, pct, loc)?;
                let mut name_chain: StringChain = vec![loc.frame().demangled().clone()];
                self.print_call_chain(out, profile, agg, &chain_map, &mut name_chain, 1)?;
            }
        }

        Ok(())
    }
}

impl CallchainProfilePrinter {
    #[allow(clippy::too_many_arguments)]
    fn print_frame(
        &self,
        out: &mut dyn Write,
        profile: &Profile,
        agg: &SampleAggregation,
        depth: u32,
        parent_pct: f64,
        process_pct: f64,
        loc: &FunctionLocation<'_>,
    ) -> io::Result<()> {
        for _ in 0..depth {
            write!(out, "  ")?;
        }
        write!(
            out,
            "[{}] {:.2}% {:.2}%({}/{}) {} {} {:x}",
            depth,
            parent_pct,
            process_pct,
            loc.count(),
            agg.sample_count(),
            loc.frame().demangled(),
            loc.frame().image_name(),
            loc.frame().offset(),
        )?;
        write_line_numbers(out, profile.show_lines, loc)?;
        writeln!(out)
    }

    fn print_call_chain(
        &self,
        out: &mut dyn Write,
        profile: &Profile,
        agg: &SampleAggregation,
        chain_map: &StringChainMap<'_>,
        name_chain: &mut StringChain,
        depth: u32,
    ) -> io::Result<()> {
        if depth > self.max_depth {
            return Ok(());
        }
        let (functions, total) = callers(chain_map, name_chain);
        let boring =
            !self.print_boring && functions.len() == 1 && self.chain_is_boring(chain_map, name_chain);

        for loc in functions {
            let parent_pct = percent(loc.count(), total);
            let process_pct = percent(loc.count(), agg.sample_count());
            if process_pct < self.threshold {
                continue;
            }
            self.print_frame(out, profile, agg, depth, parent_pct, process_pct, loc)?;
            if !boring {
                name_chain.push(loc.frame().demangled().clone());
                self.print_call_chain(out, profile, agg, chain_map, name_chain, depth + 1)?;
                name_chain.pop();
            }
        }
        Ok(())
    }

    /// A chain is boring when every remaining step has exactly one caller.
    fn chain_is_boring(&self, chain_map: &StringChainMap<'_>, name_chain: &mut StringChain) -> bool {
        let (functions, _) = callers(chain_map, name_chain);
        match functions.len() {
            0 => true,
            1 => {
                let next = functions[0].frame().demangled().clone();
                name_chain.push(next);
                let boring = self.chain_is_boring(chain_map, name_chain);
                name_chain.pop();
                boring
            }
            _ => false,
        }
    }
}
