//! Per-second elapsed counter shown while an attempt is in progress.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::warn;

pub struct Stopwatch {
    seconds: Arc<AtomicU64>,
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Stopwatch {
    /// Adds one to the counter every `tick`; the session passes one second.
    pub fn with_tick(tick: Duration) -> Self {
        let seconds = Arc::new(AtomicU64::new(0));
        let (stop, stopped) = mpsc::channel::<()>();

        let counter = Arc::clone(&seconds);
        let spawned = thread::Builder::new()
            .name("codegate-stopwatch".into())
            .spawn(move || loop {
                match stopped.recv_timeout(tick) {
                    Err(RecvTimeoutError::Timeout) => {
                        counter.fetch_add(1, Ordering::Relaxed);
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            });

        let handle = match spawned {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!("stopwatch thread unavailable: {}", e);
                None
            }
        };

        Self {
            seconds,
            stop: Some(stop),
            handle,
        }
    }

    /// A stopwatch that never ticks; used for idle and finished attempts.
    pub fn stopped() -> Self {
        Self {
            seconds: Arc::new(AtomicU64::new(0)),
            stop: None,
            handle: None,
        }
    }

    pub fn seconds(&self) -> u64 {
        self.seconds.load(Ordering::Relaxed)
    }

    #[cfg(test)]
    fn is_frozen(&self) -> bool {
        self.stop.is_none()
    }

    /// Stops ticking and keeps the last displayed value.
    pub fn freeze(&mut self) -> u64 {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("stopwatch thread panicked");
            }
        }
        self.seconds()
    }
}

impl Drop for Stopwatch {
    fn drop(&mut self) {
        self.freeze();
    }
}

/// `mm:ss`; minutes keep growing past 99.
pub fn format_elapsed(total_seconds: u64) -> String {
    format!("{:02}:{:02}", total_seconds / 60, total_seconds % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_elapsed() {
        assert_eq!(format_elapsed(0), "00:00");
        assert_eq!(format_elapsed(75), "01:15");
        assert_eq!(format_elapsed(6000), "100:00");
    }

    #[test]
    fn test_ticks_then_freezes() {
        let mut watch = Stopwatch::with_tick(Duration::from_millis(5));
        thread::sleep(Duration::from_millis(60));
        let frozen_at = watch.freeze();
        assert!(frozen_at >= 1);
        assert!(watch.is_frozen());
        thread::sleep(Duration::from_millis(30));
        assert_eq!(watch.seconds(), frozen_at);
    }

    #[test]
    fn test_stopped_never_ticks() {
        let watch = Stopwatch::stopped();
        assert!(watch.is_frozen());
        assert_eq!(watch.seconds(), 0);
    }
}
