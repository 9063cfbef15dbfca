use std::collections::HashSet;
use std::path::PathBuf;

use clap::Parser;

use crate::profiler::Config;

#[derive(Debug, Parser)]
#[command(
    name = "pmcview",
    version,
    about = r#"
pmcview turns a recorded sampling-profiler event log into textual profiles.

EXAMPLES:
    # Flat profile of a recorded log on stdout:
    pmcview -f samples.out

    # Leaf-up callchain profile for one process, pruned below 1%:
    pmcview -f samples.out -p 712 -t 1 -G -

    # Collapsed stacks for flame graph tooling:
    pmcview -f samples.out -F stacks.folded
"#
)]
pub struct Opt {
    /// Path to the recorded sample log.
    #[arg(short = 'f', long, default_value = "/tmp/samples.out")]
    pub data_file: PathBuf,

    /// Write a flat profile to this file (- for stdout).
    #[arg(short = 'o', long = "flat")]
    pub flat: Option<String>,

    /// Write a leaf-up callchain profile to this file (- for stdout).
    #[arg(short = 'G', long = "leaf")]
    pub leaf: Option<String>,

    /// Write a root-down callchain profile to this file (- for stdout).
    #[arg(short = 'r', long = "root")]
    pub root: Option<String>,

    /// Write collapsed flame-graph stacks to this file (- for stdout).
    #[arg(short = 'F', long = "flamegraph")]
    pub flamegraph: Option<String>,

    /// Show source line numbers in profile entries.
    #[arg(short = 'l', long)]
    pub show_lines: bool,

    /// Treat a missing kernel module as a fatal error.
    #[arg(short = 'q', long)]
    pub quit_on_error: bool,

    /// Only include samples for this pid (repeatable).
    #[arg(short = 'p', long = "pid")]
    pub pids: Vec<i32>,

    /// Print only callchain entries above this percentage.
    #[arg(short = 't', long, default_value_t = 0.0)]
    pub threshold: f64,

    /// Maximum depth printed in callchain profiles.
    #[arg(short = 'd', long, default_value_t = 32)]
    pub max_depth: u32,

    /// Kernel module search directories, colon or semicolon separated.
    #[arg(short = 'm', long)]
    pub module_path: Option<String>,

    /// Keep template arguments in demangled C++ names.
    #[arg(short = 'T', long)]
    pub include_templates: bool,

    /// Collapse call frames with a single caller in leaf-up profiles.
    #[arg(short = 'b', long)]
    pub hide_boring: bool,
}

impl Opt {
    pub fn config(&self) -> Config {
        Config {
            data_file: self.data_file.clone(),
            show_lines: self.show_lines,
            module_path: self
                .module_path
                .as_deref()
                .map(parse_module_path)
                .unwrap_or_default(),
            pid_filter: self.pids.iter().copied().collect::<HashSet<i32>>(),
            include_templates: self.include_templates,
            quit_on_error: self.quit_on_error,
        }
    }
}

pub fn parse_module_path(list: &str) -> Vec<String> {
    list.split([':', ';'])
        .filter(|component| !component.is_empty())
        .map(str::to_string)
        .collect()
}
