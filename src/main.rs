mod cli;
mod compare;
mod display;
mod engine;
mod models;
mod recorder;
mod script;
mod session;
mod stats;
mod stopwatch;
mod strip;
mod verdict;

use clap::Parser;
use log::LevelFilter;

use crate::cli::Cli;

fn main() {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        _ => LevelFilter::Debug,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();

    cli::run(cli);
}
