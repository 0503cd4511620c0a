//! Cancellable fixed-interval polling with a wall-clock deadline.
//!
//! The health gate and the endpoint resolver share this primitive: both
//! poll the control plane at a fixed interval until they settle, their
//! deadline passes, or the run is cancelled. Cancellation is a one-way
//! `watch` channel carrying `true`; the poller returns immediately without
//! leaking a task.

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

/// What the caller should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// Perform one poll now.
    Poll,
    /// The deadline passed before the poll settled.
    DeadlineExpired,
    /// The run was cancelled.
    Cancelled,
}

/// Interval/deadline/cancellation ticker.
///
/// The first tick fires immediately; later ticks wait one interval. A tick
/// is never issued past the deadline.
#[derive(Debug)]
pub struct Poller {
    interval: Duration,
    deadline: Duration,
    started: Instant,
    cancel: watch::Receiver<bool>,
    cancel_closed: bool,
    first: bool,
}

impl Poller {
    pub fn new(interval: Duration, deadline: Duration, cancel: watch::Receiver<bool>) -> Self {
        Self {
            interval,
            deadline,
            started: Instant::now(),
            cancel,
            cancel_closed: false,
            first: true,
        }
    }

    /// A receiver whose sender is kept alive for the process lifetime,
    /// for callers with no cancellation source.
    pub fn never_cancelled() -> watch::Receiver<bool> {
        static CHANNEL: std::sync::OnceLock<watch::Sender<bool>> = std::sync::OnceLock::new();
        CHANNEL.get_or_init(|| watch::channel(false).0).subscribe()
    }

    /// Wait for the next tick.
    pub async fn tick(&mut self) -> Tick {
        if *self.cancel.borrow() {
            return Tick::Cancelled;
        }
        if self.first {
            self.first = false;
            return Tick::Poll;
        }
        loop {
            let elapsed = self.started.elapsed();
            if elapsed >= self.deadline {
                return Tick::DeadlineExpired;
            }
            // Never sleep past the deadline.
            let wait = self.interval.min(self.deadline - elapsed);

            if self.cancel_closed {
                tokio::time::sleep(wait).await;
            } else {
                tokio::select! {
                    _ = tokio::time::sleep(wait) => {}
                    changed = self.cancel.changed() => {
                        match changed {
                            Ok(()) => {
                                if *self.cancel.borrow() {
                                    return Tick::Cancelled;
                                }
                                continue;
                            }
                            Err(_) => {
                                // Sender dropped: cancellation can no longer arrive.
                                self.cancel_closed = true;
                                continue;
                            }
                        }
                    }
                }
            }

            if self.started.elapsed() >= self.deadline {
                return Tick::DeadlineExpired;
            }
            return Tick::Poll;
        }
    }
}
