use std::future::Future;
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::watch;
use tokio::time::{self, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PollError {
    #[error("condition not met within {}ms ({attempts} attempts)", .timeout.as_millis())]
    Timeout { timeout: Duration, attempts: usize },
    #[error("polling was cancelled")]
    Cancelled,
}

/// Budget for a bounded poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    pub timeout_ms: u64,
    pub interval_ms: u64,
}

impl PollConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        PollConfig { timeout_ms: 10_000, interval_ms: 1_000 }
    }
}

/// Repeatedly calls `check` until it yields `Some`, sleeping `interval`
/// between attempts, for at most `timeout` of wall-clock time.
///
/// A check that is still running when the deadline passes is dropped. The
/// sleep after the final failed check is clamped to the deadline.
pub async fn await_condition<T, F, Fut>(
    timeout: Duration,
    interval: Duration,
    mut check: F,
) -> Result<T, PollError>
    where F: FnMut() -> Fut, Fut: Future<Output = Option<T>>
{
    let deadline = Instant::now() + timeout;
    let mut attempts = 0;
    while Instant::now() < deadline {
        attempts += 1;
        match time::timeout_at(deadline, check()).await {
            Ok(Some(value)) => return Ok(value),
            Ok(None) => time::sleep_until((Instant::now() + interval).min(deadline)).await,
            Err(_) => break,
        }
    }

    Err(PollError::Timeout { timeout, attempts })
}

/// Like [`await_condition()`], but gives up with [`PollError::Cancelled`] as
/// soon as `cancel` fires.
pub async fn await_condition_or_cancel<T, F, Fut>(
    timeout: Duration,
    interval: Duration,
    cancel: &Cancel,
    check: F,
) -> Result<T, PollError>
    where F: FnMut() -> Fut, Fut: Future<Output = Option<T>>
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(PollError::Cancelled),
        result = await_condition(timeout, interval, check) => result,
    }
}

/// The receiving half of a build-wide cancellation signal.
#[derive(Debug, Clone)]
pub struct Cancel(watch::Receiver<bool>);

/// The sending half of a build-wide cancellation signal.
#[derive(Debug)]
pub struct CancelHandle(watch::Sender<bool>);

impl Cancel {
    pub fn pair() -> (CancelHandle, Cancel) {
        let (tx, rx) = watch::channel(false);
        (CancelHandle(tx), Cancel(rx))
    }

    /// A signal that never fires.
    pub fn never() -> Cancel {
        Cancel::pair().1
    }

    pub fn is_cancelled(&self) -> bool {
        *self.0.borrow()
    }

    /// Completes once the signal fires. Never completes if the handle was
    /// dropped without cancelling.
    pub async fn cancelled(&self) {
        let mut rx = self.0.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }

            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.send_replace(true);
    }
}
