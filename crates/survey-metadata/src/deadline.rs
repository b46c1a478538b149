//! Per-file deadlines and cooperative cancellation for worker pools

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DeadlineError {
    #[error("exceeded the {0:?} per-file deadline")]
    TimedOut(Duration),
    #[error("worker thread panicked")]
    Panicked,
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Run `work` on its own thread and wait at most `deadline` for the result.
///
/// A unit that overruns is abandoned: its thread is detached and finishes (or
/// hangs) on its own, while the caller moves on to the next file.
pub fn run_with_deadline<T, F>(deadline: Duration, work: F) -> Result<T, DeadlineError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let (tx, rx) = mpsc::sync_channel(1);
    thread::Builder::new()
        .name("survey-file-worker".to_string())
        .spawn(move || {
            let _ = tx.send(work());
        })?;

    match rx.recv_timeout(deadline) {
        Ok(value) => Ok(value),
        Err(RecvTimeoutError::Timeout) => Err(DeadlineError::TimedOut(deadline)),
        Err(RecvTimeoutError::Disconnected) => Err(DeadlineError::Panicked),
    }
}

/// Shared cancellation flag checked by workers before each unit of work
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}
