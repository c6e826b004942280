use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

/// Whole seconds since the call left idle
///
/// Starts at 0 and ticks once a second. A second `start` while running is
/// ignored; `stop` freezes the count.
pub struct ElapsedTimer {
    secs: Arc<AtomicU64>,
    started: AtomicBool,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ElapsedTimer {
    pub fn new() -> Self {
        Self {
            secs: Arc::new(AtomicU64::new(0)),
            started: AtomicBool::new(false),
            task: Mutex::new(None),
        }
    }

    pub fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            debug!("Elapsed timer already running");
            return;
        }

        self.secs.store(0, Ordering::SeqCst);
        let secs = Arc::clone(&self.secs);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(1));
            // First tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                secs.fetch_add(1, Ordering::SeqCst);
            }
        });

        if let Ok(mut task) = self.task.lock() {
            *task = Some(handle);
        }
    }

    pub fn stop(&self) {
        if let Ok(mut task) = self.task.lock() {
            if let Some(handle) = task.take() {
                handle.abort();
                debug!("Elapsed timer stopped at {}s", self.elapsed_secs());
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .map(|t| t.as_ref().is_some_and(|h| !h.is_finished()))
            .unwrap_or(false)
    }

    pub fn elapsed_secs(&self) -> u64 {
        self.secs.load(Ordering::SeqCst)
    }
}

impl Default for ElapsedTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ElapsedTimer {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_counts_whole_seconds() {
        let timer = ElapsedTimer::new();
        timer.start();
        tokio::time::sleep(Duration::from_millis(3500)).await;
        assert_eq!(timer.elapsed_secs(), 3);

        timer.stop();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(timer.elapsed_secs(), 3);
        assert!(!timer.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_start_is_ignored() {
        let timer = ElapsedTimer::new();
        timer.start();
        tokio::time::sleep(Duration::from_millis(2500)).await;
        timer.start();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(timer.elapsed_secs(), 3);
    }
}
