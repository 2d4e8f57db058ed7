// SPDX-FileCopyrightText: 2026 Vigil Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Trailing-edge debounce for refresh triggers.
//!
//! Every [`Coalescer::trigger`] pushes the deadline to `window` after that
//! call. The action runs once when a deadline passes with no newer trigger.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::trace;

type Action = Box<dyn Fn() + Send + 'static>;

/// A debounced action backed by a timer task.
pub struct Coalescer {
    name: &'static str,
    window: Duration,
    tx: mpsc::UnboundedSender<Instant>,
    /// `None` once cancelled. The timer task runs the action while holding
    /// this lock, so `cancel` waits out an in-flight run.
    action: Arc<Mutex<Option<Action>>>,
    cancel: CancellationToken,
}

impl Coalescer {
    /// Spawn the timer task. Must be called inside a tokio runtime.
    pub fn new<F>(name: &'static str, window: Duration, action: F) -> Self
    where
        F: Fn() + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let action: Arc<Mutex<Option<Action>>> = Arc::new(Mutex::new(Some(Box::new(action))));
        let cancel = CancellationToken::new();

        tokio::spawn(run(name, window, rx, Arc::clone(&action), cancel.clone()));

        Self {
            name,
            window,
            tx,
            action,
            cancel,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Schedule the action `window` from now, replacing any pending deadline.
    pub fn trigger(&self) {
        if self.cancel.is_cancelled() {
            return;
        }
        let _ = self.tx.send(Instant::now());
    }

    /// Stop the timer. The action never runs after this returns.
    pub fn cancel(&self) {
        self.cancel.cancel();
        self.action
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        trace!(coalescer = self.name, "cancelled");
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Drop for Coalescer {
    fn drop(&mut self) {
        self.cancel();
    }
}

async fn run(
    name: &'static str,
    window: Duration,
    mut rx: mpsc::UnboundedReceiver<Instant>,
    action: Arc<Mutex<Option<Action>>>,
    cancel: CancellationToken,
) {
    let mut deadline: Option<Instant> = None;
    let mut burst = 0usize;

    loop {
        let sleep_until = deadline;
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            called_at = rx.recv() => match called_at {
                Some(at) => {
                    burst += 1;
                    // Triggers can queue; the latest call sets the deadline.
                    let next = at + window;
                    deadline = Some(deadline.map_or(next, |d| d.max(next)));
                }
                None => break,
            },
            _ = async move {
                match sleep_until {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending().await,
                }
            } => {
                deadline = None;
                let guard = action.lock().unwrap_or_else(PoisonError::into_inner);
                if let Some(f) = guard.as_ref() {
                    trace!(coalescer = name, burst, "firing");
                    f();
                }
                burst = 0;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn recording(window: Duration) -> (Coalescer, Arc<Mutex<Vec<Instant>>>) {
        let fired = Arc::new(Mutex::new(Vec::new()));
        let f = Arc::clone(&fired);
        let c = Coalescer::new("test", window, move || {
            f.lock().unwrap().push(Instant::now())
        });
        (c, fired)
    }

    #[tokio::test(start_paused = true)]
    async fn burst_collapses_to_one_trailing_call() {
        let (c, fired) = recording(Duration::from_millis(500));

        let mut last = Instant::now();
        for _ in 0..10 {
            last = Instant::now();
            c.trigger();
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        tokio::time::sleep(Duration::from_secs(2)).await;

        let fired = fired.lock().unwrap();
        assert_eq!(fired.len(), 1);
        assert!(fired[0] - last >= Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn separate_bursts_fire_separately() {
        let (c, fired) = recording(Duration::from_millis(100));
        c.trigger();
        tokio::time::sleep(Duration::from_millis(300)).await;
        c.trigger();
        c.trigger();
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(fired.lock().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn nothing_fires_before_the_window() {
        let (c, fired) = recording(Duration::from_millis(500));
        c.trigger();
        tokio::time::sleep(Duration::from_millis(499)).await;
        assert!(fired.lock().unwrap().is_empty());
        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(fired.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_prevents_pending_run() {
        let count = Arc::new(AtomicUsize::new(0));
        let c2 = Arc::clone(&count);
        let c = Coalescer::new("test", Duration::from_millis(100), move || {
            c2.fetch_add(1, Ordering::SeqCst);
        });
        c.trigger();
        tokio::time::sleep(Duration::from_millis(50)).await;
        c.cancel();
        c.trigger();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert!(c.is_cancelled());
    }
}
