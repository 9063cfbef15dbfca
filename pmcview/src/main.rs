mod address_space;
mod aggregation;
mod callchain;
mod cli;
mod dispatch;
mod event_log;
mod printers;
mod profiler;
mod sample;

use std::io::Write;

use clap::Parser;

use printers::callchain::CallchainProfilePrinter;
use printers::flamegraph::FlameGraphPrinter;
use printers::flat::FlatProfilePrinter;
use printers::{Direction, ProfilePrinter};

fn main() {
    env_logger::init();

    let opt = cli::Opt::parse();
    if !(0.0..=100.0).contains(&opt.threshold) {
        eprintln!("threshold must be between 0 and 100");
        std::process::exit(1);
    }

    let mut printers: Vec<(Box<dyn ProfilePrinter>, Box<dyn Write>)> = Vec::new();
    if let Some(path) = &opt.flat {
        printers.push((Box::new(FlatProfilePrinter), open_output(path)));
    }
    if let Some(path) = &opt.leaf {
        printers.push((
            Box::new(CallchainProfilePrinter {
                direction: Direction::LeafUp,
                threshold: opt.threshold,
                max_depth: opt.max_depth,
                print_boring: !opt.hide_boring,
            }),
            open_output(path),
        ));
    }
    if let Some(path) = &opt.root {
        printers.push((
            Box::new(CallchainProfilePrinter {
                direction: Direction::RootDown,
                threshold: opt.threshold,
                max_depth: opt.max_depth,
                print_boring: true,
            }),
            open_output(path),
        ));
    }
    if let Some(path) = &opt.flamegraph {
        printers.push((Box::new(FlameGraphPrinter), open_output(path)));
    }
    if printers.is_empty() {
        printers.push((Box::new(FlatProfilePrinter), open_output("-")));
    }

    let config = opt.config();
    let profile = match profiler::run(&config) {
        Ok(profile) => profile,
        Err(err) => {
            eprintln!("{err}");
            std::process::exit(1);
        }
    };

    for (printer, mut out) in printers {
        let result = printer
            .print(&profile, out.as_mut())
            .and_then(|()| out.flush());
        if let Err(err) = result {
            eprintln!("could not write profile: {err}");
            std::process::exit(1);
        }
    }
}

fn open_output(path: &str) -> Box<dyn Write> {
    if path == "-" {
        return Box::new(std::io::stdout().lock());
    }
    match std::fs::File::create(path) {
        Ok(file) => Box::new(std::io::BufWriter::new(file)),
        Err(err) => {
            eprintln!("Could not open {path} for writing: {err}");
            std::process::exit(1);
        }
    }
}
