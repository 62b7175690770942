use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::Utc;
use tempfile::NamedTempFile;

use super::{CompletionRecord, CompletionStore, RecorderError};

/// `~/.local/share/codegate/completions.json` or the platform equivalent.
pub fn default_path() -> Option<PathBuf> {
    dirs::data_dir().map(|dir| dir.join("codegate").join("completions.json"))
}

/// Records kept as a JSON array in one file, rewritten on every append.
///
/// Writes are staged in a uniquely named sibling file and renamed over the
/// target, so a crash never leaves a torn file. The read-modify-write cycle is
/// only serialized within this process; two processes appending at once can
/// drop one another's record.
pub struct JsonFileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    fn read(&self) -> Result<Vec<CompletionRecord>, RecorderError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let contents = fs::read_to_string(&self.path)
            .map_err(|e| RecorderError::Storage(format!("Failed to read {}: {}", self.path.display(), e)))?;
        if contents.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(&contents)
            .map_err(|e| RecorderError::Storage(format!("Failed to parse {}: {}", self.path.display(), e)))
    }

    fn write(&self, records: &[CompletionRecord]) -> Result<(), RecorderError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| RecorderError::Storage(format!("Failed to create {}: {}", parent.display(), e)))?;
        }
        let contents = serde_json::to_string_pretty(records)
            .map_err(|e| RecorderError::Storage(format!("Failed to serialize records: {}", e)))?;
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let mut staging = NamedTempFile::new_in(&dir)
            .map_err(|e| RecorderError::Storage(format!("Failed to stage in {}: {}", dir.display(), e)))?;
        staging
            .write_all(contents.as_bytes())
            .map_err(|e| RecorderError::Storage(format!("Failed to write {}: {}", staging.path().display(), e)))?;
        staging
            .persist(&self.path)
            .map(|_| ())
            .map_err(|e| RecorderError::Storage(format!("Failed to replace {}: {}", self.path.display(), e.error)))
    }
}

fn next_record(records: &[CompletionRecord], challenge_index: usize, completion_time: f64) -> CompletionRecord {
    CompletionRecord {
        id: records.iter().map(|r| r.id).max().unwrap_or(0) + 1,
        challenge_index,
        completion_time,
        created_at: Utc::now(),
    }
}

impl CompletionStore for JsonFileStore {
    fn submit(&self, challenge_index: usize, completion_time: f64) -> Result<CompletionRecord, RecorderError> {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| RecorderError::Storage("store lock poisoned".into()))?;
        let mut records = self.read()?;
        let record = next_record(&records, challenge_index, completion_time);
        records.push(record.clone());
        self.write(&records)?;
        Ok(record)
    }

    fn list(&self, challenge_index: usize) -> Result<Vec<f64>, RecorderError> {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| RecorderError::Storage("store lock poisoned".into()))?;
        Ok(self
            .read()?
            .into_iter()
            .filter(|r| r.challenge_index == challenge_index)
            .map(|r| r.completion_time)
            .collect())
    }
}

#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<Vec<CompletionRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn records(&self) -> Vec<CompletionRecord> {
        self.records.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

impl CompletionStore for MemoryStore {
    fn submit(&self, challenge_index: usize, completion_time: f64) -> Result<CompletionRecord, RecorderError> {
        let mut records = self
            .records
            .lock()
            .map_err(|_| RecorderError::Storage("store lock poisoned".into()))?;
        let record = next_record(&records, challenge_index, completion_time);
        records.push(record.clone());
        Ok(record)
    }

    fn list(&self, challenge_index: usize) -> Result<Vec<f64>, RecorderError> {
        let records = self
            .records
            .lock()
            .map_err(|_| RecorderError::Storage("store lock poisoned".into()))?;
        Ok(records
            .iter()
            .filter(|r| r.challenge_index == challenge_index)
            .map(|r| r.completion_time)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_store_appends_and_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data").join("completions.json");
        let store = JsonFileStore::new(&path);
        assert_eq!(store.list(0).unwrap(), Vec::<f64>::new());

        let first = store.submit(0, 30.0).unwrap();
        let second = store.submit(0, 30.0).unwrap();
        assert_eq!((first.id, second.id), (1, 2));

        let reopened = JsonFileStore::new(&path);
        assert_eq!(reopened.list(0).unwrap(), vec![30.0, 30.0]);
        assert!(reopened.list(1).unwrap().is_empty());
    }

    #[test]
    fn test_stores_sharing_a_file_leave_no_staging_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("completions.json");
        let a = JsonFileStore::new(&path);
        let b = JsonFileStore::new(&path);
        a.submit(0, 10.0).unwrap();
        b.submit(0, 20.0).unwrap();
        assert_eq!(a.submit(1, 5.0).unwrap().id, 3);
        assert_eq!(b.list(0).unwrap(), vec![10.0, 20.0]);

        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(names, vec!["completions.json"]);
    }

    #[test]
    fn test_corrupt_file_is_a_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("completions.json");
        fs::write(&path, "[{").unwrap();
        let store = JsonFileStore::new(&path);
        assert_eq!(store.submit(0, 1.0).unwrap_err().status(), 500);
    }

    #[test]
    fn test_memory_store_keeps_rows() {
        let store = MemoryStore::new();
        store.submit(2, 9.0).unwrap();
        let rows = store.records();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].challenge_index, 2);
    }
}
