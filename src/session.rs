//! Attempt lifecycle: present → edit/run → passed or abandoned → advance.

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use thiserror::Error;

use crate::engine::{self, PendingRun};
use crate::models::challenge::{self, Challenge};
use crate::models::RegistryError;
use crate::recorder::Recorder;
use crate::script::Limits;
use crate::stopwatch::Stopwatch;
use crate::strip::strip;
use crate::verdict::Verdict;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptState {
    Idle,
    InProgress,
    Passed { seconds: u64 },
    Abandoned,
}

#[derive(Debug, Clone)]
pub struct Attempt {
    pub challenge_index: usize,
    pub source: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub state: AttemptState,
}

impl Attempt {
    pub fn idle() -> Self {
        Self {
            challenge_index: 0,
            source: String::new(),
            started_at: Utc::now(),
            completed_at: None,
            state: AttemptState::Idle,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
    Next(usize),
    EndOfSequence,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("a run is already in progress")]
    RunInFlight,
    #[error("no attempt is in progress")]
    NotInProgress,
    #[error("no run has been started")]
    NoRunPending,
    #[error("the attempt has not finished yet")]
    NotFinished,
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("could not start the engine: {0}")]
    Spawn(#[from] io::Error),
}

/// Outcome of a collected run.
#[derive(Debug)]
pub struct RunReport {
    pub verdict: Verdict,
    /// Set when this run completed the attempt.
    pub completion_seconds: Option<u64>,
}

pub struct Session {
    recorder: Recorder,
    clock: Arc<dyn Clock>,
    limits: Limits,
    advance_delay: Duration,
    tick: Duration,
    attempt: Attempt,
    stopwatch: Stopwatch,
    pending: Option<PendingRun>,
    last_submission: Option<JoinHandle<()>>,
}

impl Session {
    pub fn new(recorder: Recorder, clock: Arc<dyn Clock>, limits: Limits) -> Self {
        Self {
            recorder,
            clock,
            limits,
            advance_delay: Duration::from_millis(2000),
            tick: Duration::from_secs(1),
            attempt: Attempt::idle(),
            stopwatch: Stopwatch::stopped(),
            pending: None,
            last_submission: None,
        }
    }

    pub fn with_advance_delay(mut self, delay: Duration) -> Self {
        self.advance_delay = delay;
        self
    }

    #[cfg(test)]
    fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    pub fn recorder(&self) -> &Recorder {
        &self.recorder
    }

    pub fn attempt(&self) -> &Attempt {
        &self.attempt
    }

    pub fn challenge(&self) -> Result<&'static Challenge, SessionError> {
        Ok(challenge::get(self.attempt.challenge_index)?)
    }

    /// Starts a fresh attempt on `index` with the starter source.
    pub fn present(&mut self, index: usize) -> Result<&'static Challenge, SessionError> {
        let challenge = challenge::get(index)?;
        if self.pending.take().is_some() {
            debug!("discarding an unfinished run");
        }
        self.stopwatch.freeze();
        self.attempt = Attempt {
            challenge_index: index,
            source: challenge.starter_code.clone(),
            started_at: self.clock.now(),
            completed_at: None,
            state: AttemptState::InProgress,
        };
        self.stopwatch = Stopwatch::with_tick(self.tick);
        info!("presenting challenge {} ({})", index + 1, challenge.title);
        Ok(challenge)
    }

    pub fn edit(&mut self, source: impl Into<String>) -> Result<(), SessionError> {
        self.require_in_progress()?;
        self.attempt.source = source.into();
        Ok(())
    }

    /// Strips and submits the current source to the engine thread.
    pub fn start_run(&mut self) -> Result<(), SessionError> {
        self.require_in_progress()?;
        if self.pending.is_some() {
            return Err(SessionError::RunInFlight);
        }
        let challenge = self.challenge()?;
        let source = strip(&self.attempt.source);
        self.pending = Some(engine::spawn_run(source, challenge.tests.clone(), self.limits)?);
        Ok(())
    }

    pub fn run_finished(&self) -> bool {
        self.pending.as_ref().is_some_and(PendingRun::is_finished)
    }

    /// Waits for the pending verdict and completes the attempt on all-pass.
    pub fn finish_run(&mut self) -> Result<RunReport, SessionError> {
        let pending = self.pending.take().ok_or(SessionError::NoRunPending)?;
        let verdict = pending.wait();
        debug!(
            "run finished: {}/{} passed",
            verdict.passed_count(),
            verdict.results.len()
        );

        let mut completion_seconds = None;
        if verdict.all_passed && self.attempt.state == AttemptState::InProgress {
            let now = self.clock.now();
            let elapsed_ms = (now - self.attempt.started_at).num_milliseconds().max(0);
            let seconds = (elapsed_ms / 1000) as u64;
            self.stopwatch.freeze();
            self.attempt.completed_at = Some(now);
            self.attempt.state = AttemptState::Passed { seconds };
            self.last_submission = self
                .recorder
                .submit_detached(self.attempt.challenge_index, seconds as f64);
            info!(
                "challenge {} passed in {}s",
                self.attempt.challenge_index + 1,
                seconds
            );
            completion_seconds = Some(seconds);
        }
        Ok(RunReport {
            verdict,
            completion_seconds,
        })
    }

    /// Abandons the attempt once confirmed. Nothing is recorded.
    pub fn give_up(&mut self, confirmed: bool) -> Result<bool, SessionError> {
        self.require_in_progress()?;
        if !confirmed {
            return Ok(false);
        }
        self.stopwatch.freeze();
        self.attempt.state = AttemptState::Abandoned;
        info!("challenge {} abandoned", self.attempt.challenge_index + 1);
        Ok(true)
    }

    /// After the display delay, presents the next challenge or ends the sequence.
    pub fn advance(&mut self) -> Result<Advance, SessionError> {
        match self.attempt.state {
            AttemptState::Passed { .. } | AttemptState::Abandoned => {}
            _ => return Err(SessionError::NotFinished),
        }
        thread::sleep(self.advance_delay);
        let next = self.attempt.challenge_index + 1;
        if next < self.recorder.challenge_count() {
            self.present(next)?;
            Ok(Advance::Next(next))
        } else {
            Ok(Advance::EndOfSequence)
        }
    }

    /// Seconds shown on the ticking counter.
    pub fn elapsed_seconds(&self) -> u64 {
        self.stopwatch.seconds()
    }

    /// Blocks until the last fire-and-forget submission is done.
    pub fn wait_for_submission(&mut self) {
        if let Some(handle) = self.last_submission.take() {
            if handle.join().is_err() {
                warn!("recorder thread panicked");
            }
        }
    }

    fn require_in_progress(&self) -> Result<(), SessionError> {
        if self.attempt.state == AttemptState::InProgress {
            Ok(())
        } else {
            Err(SessionError::NotInProgress)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recorder::{CompletionRecord, CompletionStore, MemoryStore, RecorderError};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Clock that only moves when told to.
    struct ManualClock {
        now: Mutex<DateTime<Utc>>,
    }

    impl ManualClock {
        fn new(start: DateTime<Utc>) -> Self {
            Self { now: Mutex::new(start) }
        }

        fn advance(&self, by: chrono::Duration) {
            if let Ok(mut now) = self.now.lock() {
                *now += by;
            }
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            self.now.lock().map(|now| *now).unwrap_or_else(|_| Utc::now())
        }
    }

    const DEDUPE: &str = "function dedupe(arr: number[]): number[] {\n  return [...new Set(arr)];\n}\n";

    #[derive(Default)]
    struct CountingStore {
        submits: AtomicUsize,
    }

    impl CompletionStore for CountingStore {
        fn submit(&self, challenge_index: usize, completion_time: f64) -> Result<CompletionRecord, RecorderError> {
            self.submits.fetch_add(1, Ordering::SeqCst);
            Ok(CompletionRecord {
                id: 1,
                challenge_index,
                completion_time,
                created_at: Utc::now(),
            })
        }

        fn list(&self, _: usize) -> Result<Vec<f64>, RecorderError> {
            Ok(Vec::new())
        }
    }

    fn session(store: Arc<dyn CompletionStore>, clock: Arc<ManualClock>) -> Session {
        Session::new(Recorder::new(store, challenge::count()), clock, Limits::default())
            .with_advance_delay(Duration::ZERO)
            .with_tick(Duration::from_secs(3600))
    }

    fn clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(Utc::now()))
    }

    #[test]
    fn test_present_resets_to_starter() {
        let mut s = session(Arc::new(MemoryStore::new()), clock());
        s.present(0).unwrap();
        s.edit("anything").unwrap();
        s.present(0).unwrap();
        assert_eq!(s.attempt().source, challenge::get(0).unwrap().starter_code);
        assert_eq!(s.attempt().state, AttemptState::InProgress);
        assert!(matches!(s.present(99), Err(SessionError::Registry(_))));
    }

    #[test]
    fn test_failing_run_stays_in_progress() {
        let mut s = session(Arc::new(MemoryStore::new()), clock());
        s.present(0).unwrap();
        s.start_run().unwrap();
        assert!(matches!(s.start_run(), Err(SessionError::RunInFlight)));
        let report = s.finish_run().unwrap();
        assert!(!report.verdict.all_passed);
        assert_eq!(report.completion_seconds, None);
        assert_eq!(s.attempt().state, AttemptState::InProgress);
        assert!(matches!(s.finish_run(), Err(SessionError::NoRunPending)));
        assert!(matches!(s.advance(), Err(SessionError::NotFinished)));
    }

    #[test]
    fn test_completion_time_tracks_clock() {
        let store = Arc::new(MemoryStore::new());
        let clock = clock();
        let mut s = session(store.clone(), clock.clone());
        s.present(0).unwrap();

        clock.advance(chrono::Duration::milliseconds(12_400));
        s.start_run().unwrap();
        assert_eq!(s.finish_run().unwrap().completion_seconds, None);

        s.edit(DEDUPE).unwrap();
        clock.advance(chrono::Duration::milliseconds(49_900));
        s.start_run().unwrap();
        let report = s.finish_run().unwrap();
        assert!(report.verdict.all_passed, "{}", report.verdict);
        assert_eq!(report.completion_seconds, Some(62));
        assert_eq!(s.attempt().state, AttemptState::Passed { seconds: 62 });

        s.wait_for_submission();
        assert_eq!(store.list(0).unwrap(), vec![62.0]);

        assert!(matches!(s.edit("late"), Err(SessionError::NotInProgress)));
        assert_eq!(s.advance().unwrap(), Advance::Next(1));
        assert_eq!(s.attempt().challenge_index, 1);
    }

    #[test]
    fn test_abandon_records_nothing() {
        let store = Arc::new(CountingStore::default());
        let mut s = session(store.clone(), clock());
        s.present(0).unwrap();
        assert!(!s.give_up(false).unwrap());
        assert_eq!(s.attempt().state, AttemptState::InProgress);
        assert!(s.give_up(true).unwrap());
        assert_eq!(s.attempt().state, AttemptState::Abandoned);
        s.wait_for_submission();
        assert_eq!(store.submits.load(Ordering::SeqCst), 0);
        assert_eq!(s.advance().unwrap(), Advance::Next(1));
    }

    #[test]
    fn test_last_challenge_ends_sequence() {
        let mut s = session(Arc::new(MemoryStore::new()), clock());
        let last = challenge::count() - 1;
        s.present(last).unwrap();
        s.give_up(true).unwrap();
        assert_eq!(s.advance().unwrap(), Advance::EndOfSequence);
    }

    #[test]
    fn test_frozen_counter_after_give_up() {
        let mut s = session(Arc::new(MemoryStore::new()), clock()).with_tick(Duration::from_millis(5));
        s.present(0).unwrap();
        thread::sleep(Duration::from_millis(40));
        s.give_up(true).unwrap();
        let frozen = s.elapsed_seconds();
        thread::sleep(Duration::from_millis(30));
        assert_eq!(s.elapsed_seconds(), frozen);
    }
}
