use std::env;

use dialoguer::{theme::ColorfulTheme, Confirm};
use log::info;

use crate::display::display_end_of_sequence;
use crate::models::{challenge, config, project};

use super::save_or_exit;

pub fn give_up(yes: bool) {
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

    let confirmed = yes || confirm();
    if !confirmed {
        println!("Still going. The clock keeps running.");
        return;
    }

    let mut user_config = config::load_config();
    let next = metadata.challenge_index + 1;
    if user_config.current_challenge <= metadata.challenge_index {
        user_config.current_challenge = next;
    }
    save_or_exit(&user_config);

    if let Err(e) = project::remove(&current_dir) {
        eprintln!("{}", e);
        std::process::exit(1);
    }
    info!("gave up on challenge {}", metadata.challenge_index + 1);

    println!("Attempt abandoned. No time recorded.");
    let count = challenge::count();
    if next < count {
        println!("Next up: CHALLENGE {} OF {}. Run `codegate init` to continue.", next + 1, count);
    } else {
        display_end_of_sequence(user_config.completed.len(), count);
    }
}

fn confirm() -> bool {
    Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt("Give up on this challenge? Your time will not be recorded.")
        .default(false)
        .interact()
        .unwrap_or_else(|e| {
            eprintln!("Failed to read confirmation: {}", e);
            false
        })
}
