use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::warn;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserConfig {
    pub current_challenge: usize,
    pub completed: Vec<usize>,
    pub step_budget: u64,
    pub advance_delay_ms: u64,
    pub store_path: Option<PathBuf>,
}

impl Default for UserConfig {
    fn default() -> Self {
        Self {
            current_challenge: 0,
            completed: Vec::new(),
            step_budget: 5_000_000,
            advance_delay_ms: 2000,
            store_path: None,
        }
    }
}

impl UserConfig {
    pub fn is_completed(&self, index: usize) -> bool {
        self.completed.contains(&index)
    }

    pub fn mark_completed(&mut self, index: usize) {
        if !self.is_completed(index) {
            self.completed.push(index);
            self.completed.sort_unstable();
        }
    }
}

pub fn get_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".config").join("codegate").join("config.json"))
}

pub fn load_config() -> UserConfig {
    match get_config_path() {
        Some(path) => load_from(&path),
        None => UserConfig::default(),
    }
}

pub fn load_from(path: &Path) -> UserConfig {
    if !path.exists() {
        return UserConfig::default();
    }

    match fs::read_to_string(path) {
        Ok(contents) => serde_json::from_str(&contents).unwrap_or_else(|e| {
            warn!("ignoring unreadable config {}: {}", path.display(), e);
            UserConfig::default()
        }),
        Err(_) => UserConfig::default(),
    }
}

pub fn save_config(config: &UserConfig) -> Result<(), io::Error> {
    let path = get_config_path()
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "Could not determine home directory"))?;
    save_to(&path, config)
}

pub fn save_to(path: &Path, config: &UserConfig) -> Result<(), io::Error> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let contents = serde_json::to_string_pretty(config)?;
    fs::write(path, contents)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_and_corrupt_fall_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        assert_eq!(load_from(&path), UserConfig::default());

        fs::write(&path, "{ not json").unwrap();
        assert_eq!(load_from(&path), UserConfig::default());
    }

    #[test]
    fn test_partial_config_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{ "current_challenge": 2 }"#).unwrap();
        let config = load_from(&path);
        assert_eq!(config.current_challenge, 2);
        assert_eq!(config.advance_delay_ms, 2000);
    }

    #[test]
    fn test_round_trip_through_nested_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let mut config = UserConfig::default();
        config.mark_completed(1);
        config.mark_completed(0);
        config.mark_completed(1);
        save_to(&path, &config).unwrap();
        assert_eq!(load_from(&path).completed, vec![0, 1]);
    }
}
