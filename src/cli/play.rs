use std::env;
use std::fs;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use dialoguer::{theme::ColorfulTheme, Confirm};
use log::warn;

use crate::display::{
    display_challenge, display_end_of_sequence, display_histogram, display_progress, render_syntax_error,
};
use crate::models::{challenge, config};
use crate::script::parser::check_candidate;
use crate::session::{Advance, AttemptState, Session, SessionError, SystemClock};
use crate::stats::Histogram;
use crate::stopwatch::format_elapsed;
use crate::strip::strip;

use super::{limits, open_recorder, save_or_exit};

const POLL: Duration = Duration::from_millis(100);

pub fn play(dir: Option<PathBuf>, store: Option<PathBuf>) {
    let mut user_config = config::load_config();
    let count = challenge::count();
    if user_config.current_challenge >= count {
        display_end_of_sequence(user_config.completed.len(), count);
        return;
    }

    let dir = dir.unwrap_or_else(|| {
        env::current_dir().unwrap_or_else(|e| {
            eprintln!("Failed to get current directory: {}", e);
            std::process::exit(1);
        })
    });

    let recorder = open_recorder(store, &user_config);
    let mut session = Session::new(recorder, Arc::new(SystemClock), limits(&user_config))
        .with_advance_delay(Duration::from_millis(user_config.advance_delay_ms));

    if let Err(e) = session.present(user_config.current_challenge) {
        eprintln!("Failed to load challenge: {}", e);
        std::process::exit(1);
    }
    let mut file = begin(&session, &dir, &user_config);

    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        print!("[{}] > ", format_elapsed(session.elapsed_seconds()));
        let _ = io::stdout().flush();

        let line = match lines.next() {
            Some(Ok(line)) => line,
            Some(Err(e)) => {
                eprintln!("Failed to read input: {}", e);
                return;
            }
            None => return,
        };

        let finished = match line.trim() {
            "run" | "r" => run(&mut session, &file),
            "time" | "t" => {
                println!("TIME ELAPSED: {}", format_elapsed(session.elapsed_seconds()));
                false
            }
            "give-up" => give_up(&mut session),
            "quit" | "q" | "exit" => return,
            "" => false,
            other => {
                println!("Unknown command '{}'. Try run, time, give-up or quit.", other);
                false
            }
        };
        if !finished {
            continue;
        }

        let index = session.attempt().challenge_index;
        if let AttemptState::Passed { .. } = session.attempt().state {
            user_config.mark_completed(index);
        }
        if user_config.current_challenge <= index {
            user_config.current_challenge = index + 1;
        }
        save_or_exit(&user_config);

        match session.advance() {
            Ok(Advance::Next(_)) => file = begin(&session, &dir, &user_config),
            Ok(Advance::EndOfSequence) => {
                display_end_of_sequence(user_config.completed.len(), count);
                return;
            }
            Err(e) => {
                eprintln!("Failed to advance: {}", e);
                std::process::exit(1);
            }
        }
    }
}

/// Writes the starter source for the presented challenge and shows it.
fn begin(session: &Session, dir: &Path, user_config: &config::UserConfig) -> PathBuf {
    let challenge = match session.challenge() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load challenge: {}", e);
            std::process::exit(1);
        }
    };
    let index = session.attempt().challenge_index;
    let path = dir.join(challenge.file_name());
    if let Err(e) = fs::write(&path, &session.attempt().source) {
        eprintln!("Failed to write '{}': {}", path.display(), e);
        std::process::exit(1);
    }

    display_challenge(challenge, index, challenge::count());
    display_progress(user_config, challenge::count());
    println!();
    println!("Edit {} and type `run`. Other commands: time, give-up, quit.", path.display());
    path
}

/// Returns true when the attempt passed.
fn run(session: &mut Session, file: &Path) -> bool {
    let source = match fs::read_to_string(file) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Failed to read '{}': {}", file.display(), e);
            return false;
        }
    };
    if let Err(e) = session.edit(source.clone()) {
        eprintln!("{}", e);
        return false;
    }
    match session.start_run() {
        Ok(()) => {}
        Err(SessionError::RunInFlight) => {
            println!("A run is already in progress.");
            return false;
        }
        Err(e) => {
            eprintln!("Failed to start run: {}", e);
            return false;
        }
    }

    while !session.run_finished() {
        thread::sleep(POLL);
    }
    let report = match session.finish_run() {
        Ok(r) => r,
        Err(e) => {
            eprintln!("{}", e);
            return false;
        }
    };

    if report.verdict.compile_error.is_some() {
        if let Err(e) = check_candidate(&strip(&source)) {
            eprint!("{}", render_syntax_error(&file.display().to_string(), &source, &e));
        }
    }
    println!("{}", report.verdict);

    let Some(seconds) = report.completion_seconds else {
        return false;
    };
    println!();
    println!("COMPLETION TIME: {}", format_elapsed(seconds));
    session.wait_for_submission();
    let index = session.attempt().challenge_index;
    let times = open_times(session, index);
    display_histogram(Histogram::build(&times, Some(seconds as f64)).as_ref(), Some(seconds as f64));
    true
}

fn open_times(session: &Session, index: usize) -> Vec<f64> {
    session.recorder().list(index).unwrap_or_else(|e| {
        warn!("could not load completion times: {}", e);
        Vec::new()
    })
}

/// Returns true when the attempt was abandoned.
fn give_up(session: &mut Session) -> bool {
    let confirmed = Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt("Give up on this challenge? Your time will not be recorded.")
        .default(false)
        .interact()
        .unwrap_or(false);
    match session.give_up(confirmed) {
        Ok(true) => {
            println!("Attempt abandoned. No time recorded.");
            true
        }
        Ok(false) => false,
        Err(e) => {
            eprintln!("{}", e);
            false
        }
    }
}
