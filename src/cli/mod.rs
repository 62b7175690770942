mod give_up;
mod init;
mod list;
mod play;
mod show;
mod stats;
mod strip_cmd;
mod test;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use log::debug;

use crate::models::challenge;
use crate::models::config::{self, UserConfig};
use crate::recorder::store::default_path;
use crate::recorder::{JsonFileStore, MemoryStore, Recorder};
use crate::script::Limits;

#[derive(Parser)]
#[command(name = "codegate")]
#[command(about = "Timed coding challenges checked in a sandbox", long_about = None)]
pub struct Cli {
    /// Raise log verbosity (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Completion store file, overriding the configured location
    #[arg(long, global = true)]
    pub store: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show the current or given challenge
    Show { index: Option<usize> },
    /// List all challenges with progress markers
    List,
    /// Write the starter file and start the clock
    Init { index: Option<usize> },
    /// Run the attempt's source against the challenge tests
    Test { file: Option<PathBuf> },
    /// Abandon the current attempt without recording a time
    GiveUp {
        #[arg(long)]
        yes: bool,
    },
    /// Interactive timed session
    Play {
        #[arg(long)]
        dir: Option<PathBuf>,
    },
    /// Print the source with type annotations blanked out
    Strip { file: PathBuf },
    /// Completion-time distribution for a challenge
    Stats {
        index: Option<usize>,
        #[arg(long)]
        json: bool,
    },
}

pub fn run(cli: Cli) {
    let store = cli.store;
    match cli.command {
        None => show::show_challenge(None),
        Some(Commands::Show { index }) => show::show_challenge(index),
        Some(Commands::List) => list::list_challenges(),
        Some(Commands::Init { index }) => init::init_attempt(index),
        Some(Commands::Test { file }) => test::test_solution(file, store),
        Some(Commands::GiveUp { yes }) => give_up::give_up(yes),
        Some(Commands::Play { dir }) => play::play(dir, store),
        Some(Commands::Strip { file }) => strip_cmd::strip_file(&file),
        Some(Commands::Stats { index, json }) => stats::show_stats(index, json, store),
    }
}

/// Maps a 1-based CLI index (or the configured current challenge) to a
/// catalog index, exiting on anything out of range.
fn resolve_index(arg: Option<usize>, user_config: &UserConfig) -> usize {
    let count = challenge::count();
    let index = match arg {
        Some(0) => {
            eprintln!("Challenges are numbered from 1.");
            std::process::exit(1);
        }
        Some(n) => n - 1,
        None => user_config.current_challenge,
    };
    if index >= count {
        eprintln!("Challenge {} does not exist (there are {}).", index + 1, count);
        std::process::exit(1);
    }
    index
}

fn limits(user_config: &UserConfig) -> Limits {
    Limits {
        step_budget: user_config.step_budget,
        ..Limits::default()
    }
}

/// File-backed recorder; falls back to memory when no data directory exists.
fn open_recorder(store: Option<PathBuf>, user_config: &UserConfig) -> Recorder {
    let count = challenge::count();
    match store.or_else(|| user_config.store_path.clone()).or_else(default_path) {
        Some(path) => {
            debug!("completion store at {}", path.display());
            Recorder::new(Arc::new(JsonFileStore::new(path)), count)
        }
        None => {
            debug!("no data directory, completions kept in memory");
            Recorder::new(Arc::new(MemoryStore::new()), count)
        }
    }
}

fn save_or_exit(user_config: &UserConfig) {
    if let Err(e) = config::save_config(user_config) {
        eprintln!("Failed to save progress: {}", e);
        std::process::exit(1);
    }
}
