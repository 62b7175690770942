use std::fs;
use std::path::Path;

use crate::strip::strip;

pub fn strip_file(file: &Path) {
    match fs::read_to_string(file) {
        Ok(source) => print!("{}", strip(&source)),
        Err(e) => {
            eprintln!("Failed to read '{}': {}", file.display(), e);
            std::process::exit(1);
        }
    }
}
