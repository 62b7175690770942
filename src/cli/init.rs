use std::env;
use std::fs;

use chrono::Local;
use log::info;

use crate::models::{challenge, config, project, AttemptMetadata};

use super::resolve_index;

pub fn init_attempt(index: Option<usize>) {
    let user_config = config::load_config();
    let index = resolve_index(index, &user_config);

    let challenge = match challenge::get(index) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load challenge: {}", e);
            std::process::exit(1);
        }
    };

    let current_dir = env::current_dir().unwrap_or_else(|e| {
        eprintln!("Failed to get current directory: {}", e);
        std::process::exit(1);
    });

    if project::exists(&current_dir) {
        eprintln!("An attempt is already in progress here. Finish it or run `codegate give-up` first.");
        std::process::exit(1);
    }

    let file_name = challenge.file_name();
    let path = current_dir.join(&file_name);
    if path.exists() {
        eprintln!(
            "File '{}' already exists. Remove it first or use a different location.",
            file_name
        );
        std::process::exit(1);
    }

    if let Err(e) = fs::write(&path, &challenge.starter_code) {
        eprintln!("Failed to write '{}': {}", file_name, e);
        std::process::exit(1);
    }

    let metadata = AttemptMetadata::new(index, file_name.clone(), Local::now());
    if let Err(e) = project::save(&current_dir, &metadata) {
        eprintln!("{}", e);
        std::process::exit(1);
    }
    info!("attempt on challenge {} started at {}", index + 1, metadata.started_at);

    println!("Initialized '{}' in ./{}", challenge.title, file_name);
    println!("The clock is running.");
    println!();
    println!("  Edit {} then run `codegate test`", file_name);
}
