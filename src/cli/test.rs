use std::env;
use std::fs;
use std::path::PathBuf;

use chrono::Local;
use log::{debug, warn};
use serde_json::json;

use crate::display::{display_end_of_sequence, display_histogram, render_syntax_error};
use crate::engine;
use crate::models::{challenge, config, project};
use crate::recorder::api;
use crate::script::parser::check_candidate;
use crate::stats::Histogram;
use crate::strip::strip;
use crate::verdict::Verdict;

use super::{limits, open_recorder, save_or_exit};

pub fn test_solution(file: Option<PathBuf>, store: Option<PathBuf>) {
    let current_dir = env::current_dir().unwrap_or_else(|e| {
        eprintln!("Failed to get current directory: {}", e);
        std::process::exit(1);
    });

    let metadata = match project::load(&current_dir) {
        Ok(m) => m,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    };

    let challenge = match challenge::get(metadata.challenge_index) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load challenge: {}", e);
            std::process::exit(1);
        }
    };

    let path = file.unwrap_or_else(|| current_dir.join(&metadata.file_name));
    let source = match fs::read_to_string(&path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Failed to read '{}': {}", path.display(), e);
            std::process::exit(1);
        }
    };

    let stripped = strip(&source);
    if let Err(e) = check_candidate(&stripped) {
        // Stripping keeps offsets, so the report points into the user's file.
        eprint!("{}", render_syntax_error(&path.display().to_string(), &source, &e));
        println!("{}", Verdict::compile_failure(e.to_string()));
        std::process::exit(1);
    }

    let mut user_config = config::load_config();
    let verdict = match engine::run(&stripped, &challenge.tests, limits(&user_config)) {
        Ok(v) => v,
        Err(e) => {
            eprintln!("Failed to start the engine: {}", e);
            std::process::exit(1);
        }
    };
    println!("{}", verdict);

    if !verdict.all_passed {
        std::process::exit(1);
    }

    let seconds = metadata.elapsed_seconds(Local::now());
    let recorder = open_recorder(store, &user_config);
    // The process is about to exit, so the write happens inline.
    let body = json!({ "challenge_index": metadata.challenge_index, "completion_time": seconds });
    let response = api::submit(&recorder, &body.to_string());
    if !response.body.success {
        warn!(
            "could not record completion time ({}): {}",
            response.status,
            response.body.error.unwrap_or_default()
        );
    }

    user_config.mark_completed(metadata.challenge_index);
    let next = metadata.challenge_index + 1;
    if user_config.current_challenge <= metadata.challenge_index {
        user_config.current_challenge = next;
    }
    save_or_exit(&user_config);

    if let Err(e) = project::remove(&current_dir) {
        debug!("{}", e);
    }

    println!();
    println!("COMPLETION TIME: {}s", seconds);
    println!();
    let times = recorder.list(metadata.challenge_index).unwrap_or_default();
    display_histogram(Histogram::build(&times, Some(seconds as f64)).as_ref(), Some(seconds as f64));

    let count = challenge::count();
    if next < count {
        println!();
        println!("Next up: CHALLENGE {} OF {}. Run `codegate init` to continue.", next + 1, count);
    } else {
        display_end_of_sequence(user_config.completed.len(), count);
    }
}
