use crate::display::progress_marker;
use crate::models::{challenge, config};

pub fn list_challenges() {
    let user_config = config::load_config();
    let challenges = match challenge::catalog() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load challenges: {}", e);
            std::process::exit(1);
        }
    };

    for (i, challenge) in challenges.iter().enumerate() {
        println!(
            "{} {}. {} ({} tests)",
            progress_marker(&user_config, i),
            i + 1,
            challenge.title,
            challenge.tests.len()
        );
    }

    println!();
    println!("Completed {}/{}", user_config.completed.len(), challenges.len());
}
