use std::path::PathBuf;

use crate::display::display_histogram;
use crate::models::{challenge, config};
use crate::recorder::api;
use crate::stats::Histogram;

use super::{open_recorder, resolve_index};

pub fn show_stats(index: Option<usize>, json: bool, store: Option<PathBuf>) {
    let user_config = config::load_config();
    let index = resolve_index(index, &user_config);
    let recorder = open_recorder(store, &user_config);

    let response = api::list(&recorder, &format!("challenge_index={}", index));
    if json {
        println!("{}", response.to_json());
        if !response.body.success {
            std::process::exit(1);
        }
        return;
    }

    if !response.body.success {
        eprintln!(
            "Failed to load completion times: {}",
            response.body.error.unwrap_or_default()
        );
        std::process::exit(1);
    }

    let times: Vec<f64> = response
        .body
        .data
        .as_ref()
        .and_then(|d| d.as_array())
        .map(|rows| {
            rows.iter()
                .filter_map(|row| row.get("completion_time").and_then(|t| t.as_f64()))
                .collect()
        })
        .unwrap_or_default();

    if let Ok(challenge) = challenge::get(index) {
        println!("{} (CHALLENGE {} OF {})", challenge.title, index + 1, challenge::count());
        println!();
    }
    display_histogram(Histogram::build(&times, None).as_ref(), None);
}
