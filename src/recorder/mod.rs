//! Completion-time persistence and lookup.
//!
//! `Recorder` validates submissions and forwards them to a `CompletionStore`.
//! The session only ever submits in a fire-and-forget way: failures are
//! logged and never reach the user.

pub mod api;
pub mod store;

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use store::{JsonFileStore, MemoryStore};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRecord {
    pub id: u64,
    pub challenge_index: usize,
    pub completion_time: f64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RecorderError {
    #[error("invalid submission: {0}")]
    Validation(String),
    #[error("storage failure: {0}")]
    Storage(String),
}

impl RecorderError {
    /// HTTP-style status carried in API responses.
    pub fn status(&self) -> u16 {
        match self {
            RecorderError::Validation(_) => 400,
            RecorderError::Storage(_) => 500,
        }
    }
}

/// Append-only backing store for completion records.
pub trait CompletionStore: Send + Sync {
    fn submit(&self, challenge_index: usize, completion_time: f64) -> Result<CompletionRecord, RecorderError>;

    /// Completion times for one challenge, in any order.
    fn list(&self, challenge_index: usize) -> Result<Vec<f64>, RecorderError>;
}

#[derive(Clone)]
pub struct Recorder {
    store: Arc<dyn CompletionStore>,
    challenge_count: usize,
}

impl Recorder {
    pub fn new(store: Arc<dyn CompletionStore>, challenge_count: usize) -> Self {
        Self { store, challenge_count }
    }

    pub fn challenge_count(&self) -> usize {
        self.challenge_count
    }

    pub fn validate(&self, challenge_index: usize, completion_time: f64) -> Result<(), RecorderError> {
        if challenge_index >= self.challenge_count {
            return Err(RecorderError::Validation(format!(
                "challenge_index must be below {}",
                self.challenge_count
            )));
        }
        if !completion_time.is_finite() || completion_time < 0.0 {
            return Err(RecorderError::Validation(
                "completion_time must be a non-negative number".into(),
            ));
        }
        Ok(())
    }

    pub fn submit(&self, challenge_index: usize, completion_time: f64) -> Result<CompletionRecord, RecorderError> {
        self.validate(challenge_index, completion_time)?;
        let record = self.store.submit(challenge_index, completion_time)?;
        debug!(
            "recorded {}s for challenge {} (id {})",
            record.completion_time, record.challenge_index, record.id
        );
        Ok(record)
    }

    /// Completion times ascending; empty when nobody has finished yet.
    pub fn list(&self, challenge_index: usize) -> Result<Vec<f64>, RecorderError> {
        if challenge_index >= self.challenge_count {
            return Err(RecorderError::Validation(format!(
                "challenge_index must be below {}",
                self.challenge_count
            )));
        }
        let mut times = self.store.list(challenge_index)?;
        times.sort_by(f64::total_cmp);
        Ok(times)
    }

    /// Submits on a background thread; failures are only logged.
    pub fn submit_detached(&self, challenge_index: usize, completion_time: f64) -> Option<JoinHandle<()>> {
        let recorder = self.clone();
        let spawned = thread::Builder::new()
            .name("codegate-recorder".into())
            .spawn(move || {
                if let Err(e) = recorder.submit(challenge_index, completion_time) {
                    warn!("could not record completion time: {}", e);
                }
            });
        match spawned {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!("could not start recorder thread: {}", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingStore;

    impl CompletionStore for FailingStore {
        fn submit(&self, _: usize, _: f64) -> Result<CompletionRecord, RecorderError> {
            Err(RecorderError::Storage("disk on fire".into()))
        }

        fn list(&self, _: usize) -> Result<Vec<f64>, RecorderError> {
            Err(RecorderError::Storage("disk on fire".into()))
        }
    }

    #[test]
    fn test_validation() {
        let recorder = Recorder::new(Arc::new(MemoryStore::new()), 3);
        assert_eq!(recorder.submit(3, 10.0).unwrap_err().status(), 400);
        assert_eq!(recorder.submit(0, -1.0).unwrap_err().status(), 400);
        assert_eq!(recorder.submit(0, f64::NAN).unwrap_err().status(), 400);
        assert!(recorder.submit(2, 0.0).is_ok());
    }

    #[test]
    fn test_list_is_ascending_and_per_challenge() {
        let recorder = Recorder::new(Arc::new(MemoryStore::new()), 3);
        for (index, time) in [(0, 42.0), (1, 5.0), (0, 7.0), (0, 19.0)] {
            recorder.submit(index, time).unwrap();
        }
        assert_eq!(recorder.list(0).unwrap(), vec![7.0, 19.0, 42.0]);
        assert_eq!(recorder.list(2).unwrap(), Vec::<f64>::new());
    }

    #[test]
    fn test_detached_failure_is_swallowed() {
        let recorder = Recorder::new(Arc::new(FailingStore), 3);
        let handle = recorder.submit_detached(0, 12.0).unwrap();
        assert!(handle.join().is_ok());
    }

    #[test]
    fn test_detached_submit_lands() {
        let store = Arc::new(MemoryStore::new());
        let recorder = Recorder::new(store.clone(), 3);
        recorder.submit_detached(1, 30.0).unwrap().join().unwrap();
        assert_eq!(store.list(1).unwrap(), vec![30.0]);
    }
}
