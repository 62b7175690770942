use std::fs;
use std::path::Path;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

const METADATA_FILE: &str = ".codegate.json";

/// Attempt state persisted next to the candidate file between one-shot commands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptMetadata {
    pub challenge_index: usize,
    pub file_name: String,
    pub started_at: DateTime<Local>,
}

impl AttemptMetadata {
    pub fn new(challenge_index: usize, file_name: String, started_at: DateTime<Local>) -> Self {
        Self {
            challenge_index,
            file_name,
            started_at,
        }
    }

    /// Whole seconds since the attempt started, never negative.
    pub fn elapsed_seconds(&self, now: DateTime<Local>) -> u64 {
        (now - self.started_at).num_seconds().max(0) as u64
    }
}

pub fn exists(dir: &Path) -> bool {
    dir.join(METADATA_FILE).exists()
}

pub fn load(dir: &Path) -> Result<AttemptMetadata, String> {
    let path = dir.join(METADATA_FILE);
    if !path.exists() {
        return Err(format!(
            "No {} found. Run `codegate init` to start an attempt here.",
            METADATA_FILE
        ));
    }

    let content =
        fs::read_to_string(&path).map_err(|e| format!("Failed to read {}: {}", METADATA_FILE, e))?;

    serde_json::from_str(&content).map_err(|e| format!("Failed to parse {}: {}", METADATA_FILE, e))
}

pub fn save(dir: &Path, metadata: &AttemptMetadata) -> Result<(), String> {
    let path = dir.join(METADATA_FILE);
    let content = serde_json::to_string_pretty(metadata)
        .map_err(|e| format!("Failed to serialize metadata: {}", e))?;

    fs::write(&path, content).map_err(|e| format!("Failed to write {}: {}", METADATA_FILE, e))
}

pub fn remove(dir: &Path) -> Result<(), String> {
    let path = dir.join(METADATA_FILE);
    if !path.exists() {
        return Ok(());
    }
    fs::remove_file(&path).map_err(|e| format!("Failed to remove {}: {}", METADATA_FILE, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let started = Local::now();
        let metadata = AttemptMetadata::new(1, "binary_search.ts".into(), started);
        save(dir.path(), &metadata).unwrap();
        assert!(exists(dir.path()));
        assert_eq!(load(dir.path()).unwrap(), metadata);
        remove(dir.path()).unwrap();
        assert!(load(dir.path()).unwrap_err().contains("codegate init"));
    }

    #[test]
    fn test_elapsed_seconds_floors_and_clamps() {
        let started = Local::now();
        let metadata = AttemptMetadata::new(0, "a.ts".into(), started);
        assert_eq!(metadata.elapsed_seconds(started + Duration::milliseconds(1999)), 1);
        assert_eq!(metadata.elapsed_seconds(started - Duration::seconds(5)), 0);
    }
}
