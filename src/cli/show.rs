use crate::display::{display_challenge, display_end_of_sequence, display_progress};
use crate::models::{challenge, config};

use super::resolve_index;

pub fn show_challenge(index: Option<usize>) {
    let user_config = config::load_config();
    let count = challenge::count();

    if index.is_none() && user_config.current_challenge >= count {
        display_end_of_sequence(user_config.completed.len(), count);
        return;
    }

    let index = resolve_index(index, &user_config);
    match challenge::get(index) {
        Ok(challenge) => {
            display_challenge(challenge, index, count);
            display_progress(&user_config, count);
        }
        Err(e) => {
            eprintln!("Failed to load challenge: {}", e);
            std::process::exit(1);
        }
    }
}
