//! Serialized execution scope.
//!
//! All state transitions of the engine, its transports, the manager and the
//! namespace sockets run on a single-consumer job queue, and so do the
//! user-facing event callbacks. I/O tasks never touch a state machine
//! directly: they post a job here instead. This removes the need for
//! per-field locking discipline on the state machines themselves.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

type Job = Box<dyn FnOnce() + Send>;

/// Handle to a serialized job queue. Cloning shares the same queue.
#[derive(Clone)]
pub struct Scope {
    tx: mpsc::UnboundedSender<Job>,
}

impl Scope {
    /// Spawn the consumer task and return a handle to the queue.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new() -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                job();
            }
        });
        Scope { tx }
    }

    /// Enqueue a job. Jobs run in submission order, one at a time.
    pub fn post(&self, f: impl FnOnce() + Send + 'static) {
        // a closed queue means the process is shutting down, dropping the
        // job is fine then
        self.tx.send(Box::new(f)).ok();
    }

    /// Enqueue a job after `delay`. The returned handle cancels the timer;
    /// a cancelled timer never runs its job, even when the race is lost
    /// after the sleep already completed.
    pub fn post_delayed(&self, delay: Duration, f: impl FnOnce() + Send + 'static) -> TimerHandle {
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = cancelled.clone();
        let tx = self.tx.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if flag.load(Ordering::SeqCst) {
                return;
            }
            let guard = flag.clone();
            tx.send(Box::new(move || {
                if !guard.load(Ordering::SeqCst) {
                    f();
                }
            }))
            .ok();
        });
        TimerHandle { handle, cancelled }
    }
}

impl Default for Scope {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Scope")
    }
}

/// A cancellable scheduled job.
#[derive(Debug)]
pub struct TimerHandle {
    handle: JoinHandle<()>,
    cancelled: Arc<AtomicBool>,
}

impl TimerHandle {
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.handle.abort();
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn jobs_run_in_submission_order() {
        let scope = Scope::new();
        let log = Arc::new(std::sync::Mutex::new(Vec::new()));
        for i in 0..10 {
            let log = log.clone();
            scope.post(move || log.lock().unwrap().push(i));
        }
        settle().await;
        assert_eq!(*log.lock().unwrap(), (0..10).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn delayed_job_fires() {
        let scope = Scope::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let timer = scope.post_delayed(Duration::from_millis(10), move || {
            h.fetch_add(1, Ordering::SeqCst);
        });
        settle().await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        drop(timer);
    }

    #[tokio::test]
    async fn cancelled_timer_never_fires() {
        let scope = Scope::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let timer = scope.post_delayed(Duration::from_millis(10), move || {
            h.fetch_add(1, Ordering::SeqCst);
        });
        timer.cancel();
        settle().await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn dropping_the_handle_cancels() {
        let scope = Scope::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        drop(scope.post_delayed(Duration::from_millis(10), move || {
            h.fetch_add(1, Ordering::SeqCst);
        }));
        settle().await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }
}
