use std::collections::HashMap;
use std::io::{self, Write};

use super::{collect_frames, Direction, ProfilePrinter};
use crate::callchain::SELF_FUNCTION_NAME;
use crate::profiler::Profile;

/// Collapsed-stack output: one line per distinct root-to-leaf name chain,
/// semicolon separated, followed by its sample count. Flame-graph tooling
/// consumes this directly.
pub struct FlameGraphPrinter;

impl ProfilePrinter for FlameGraphPrinter {
    fn print(&self, profile: &Profile, out: &mut dyn Write) -> io::Result<()> {
        let mut order: Vec<String> = Vec::new();
        let mut counts: HashMap<String, u64> = HashMap::new();

        for agg in profile.aggregations() {
            for chain in agg.callchains() {
                let frames = collect_frames(chain, &profile.images, Direction::RootDown);
                let names: Vec<&str> = frames
                    .iter()
                    .filter(|frame| frame.func().as_str() != SELF_FUNCTION_NAME)
                    .map(|frame| frame.demangled().as_str())
                    .collect();
                if names.is_empty() {
                    continue;
                }
                let stack = names.join(";");
                match counts.get_mut(&stack) {
                    Some(count) => *count += chain.sample_count(),
                    None => {
                        counts.insert(stack.clone(), chain.sample_count());
                        order.push(stack);
                    }
                }
            }
        }

        for stack in &order {
            writeln!(out, "{} {}", stack, counts[stack])?;
        }
        Ok(())
    }
}
