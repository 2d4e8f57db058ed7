// SPDX-FileCopyrightText: 2026 Vigil Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Event-independent periodic refresh.
//!
//! The change stream may lose events or disconnect silently. The poller
//! forces a full refresh every interval regardless, which bounds how stale a
//! view can get.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

type Tick = Arc<dyn Fn() + Send + Sync>;

/// Runs `on_tick` every `interval` until stopped.
pub struct PollingFallback {
    interval: Duration,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl PollingFallback {
    /// Start polling. The first tick fires one full interval after start.
    pub fn start<F>(interval: Duration, on_tick: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        let cancel = CancellationToken::new();
        let on_tick: Tick = Arc::new(on_tick);
        let token = cancel.clone();

        let task = tokio::spawn(async move {
            let start = tokio::time::Instant::now() + interval;
            let mut ticker = tokio::time::interval_at(start, interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        trace!("polling fallback tick");
                        on_tick();
                    }
                }
            }
            debug!("polling fallback stopped");
        });

        Self {
            interval,
            cancel,
            task: Mutex::new(Some(task)),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Stop polling. No tick fires after this returns.
    pub fn stop(&self) {
        self.cancel.cancel();
        if let Some(task) = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }
    }

    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled()
    }
}

impl Drop for PollingFallback {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn ticks_once_per_interval() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let poller = PollingFallback::start(Duration::from_secs(60), move || {
            c.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_secs(59)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);

        poller.stop();
        assert!(!poller.is_running());
        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }
}
