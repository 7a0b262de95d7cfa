//! Acknowledgement callbacks.
//!
//! An emit may carry a response callback bound to a unique integer id. The
//! plain form just waits; [`AckWithTimeout`] additionally arms a timer
//! that, on fire, removes the pending entry from the socket's ack table
//! and send buffer before reporting the timeout. Completion is exactly
//! once: whichever of response and timeout comes first wins.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use switchio_engine::scope::{Scope, TimerHandle};

use crate::payload::Data;

/// A response callback for an emitted event.
pub trait Ack: Send + Sync + 'static {
    fn call(&self, args: &[Data]);
}

impl<F: Fn(&[Data]) + Send + Sync + 'static> Ack for F {
    fn call(&self, args: &[Data]) {
        self(args)
    }
}

struct AckTimeoutInner {
    timeout: Duration,
    completed: AtomicBool,
    timer: Mutex<Option<TimerHandle>>,
    on_success: Box<dyn Fn(&[Data]) + Send + Sync>,
    on_timeout: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

/// An acknowledgement with a deadline.
///
/// Cloning shares the same completion state; the library keeps one clone
/// in the ack table while the timer holds another.
#[derive(Clone)]
pub struct AckWithTimeout {
    inner: Arc<AckTimeoutInner>,
}

impl AckWithTimeout {
    pub fn new(
        timeout: Duration,
        on_success: impl Fn(&[Data]) + Send + Sync + 'static,
        on_timeout: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            inner: Arc::new(AckTimeoutInner {
                timeout,
                completed: AtomicBool::new(false),
                timer: Mutex::new(None),
                on_success: Box::new(on_success),
                on_timeout: Mutex::new(Some(Box::new(on_timeout))),
            }),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.inner.timeout
    }

    /// Deliver the server response. Cancels the pending timer; a second
    /// call (or one after the timeout fired) is dropped.
    pub(crate) fn call(&self, args: &[Data]) {
        self.inner.timer.lock().unwrap().take();
        if !self.inner.completed.swap(true, Ordering::SeqCst) {
            (self.inner.on_success)(args);
        }
    }

    /// Arm the timer. `cleanup` runs right before `on_timeout` and removes
    /// the entry from the ack table and the send buffer. Re-arming while a
    /// timer is active is a no-op.
    pub(crate) fn schedule(&self, scope: &Scope, cleanup: impl FnOnce() + Send + 'static) {
        let mut timer = self.inner.timer.lock().unwrap();
        if timer.is_some() {
            return;
        }
        let inner = self.inner.clone();
        *timer = Some(scope.post_delayed(self.inner.timeout, move || {
            if inner.completed.swap(true, Ordering::SeqCst) {
                return;
            }
            cleanup();
            if let Some(on_timeout) = inner.on_timeout.lock().unwrap().take() {
                on_timeout();
            }
        }));
    }

    /// Force the timeout path, used when the socket closes with the ack
    /// still pending.
    pub(crate) fn fire_timeout(&self) {
        self.inner.timer.lock().unwrap().take();
        if self.inner.completed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(on_timeout) = self.inner.on_timeout.lock().unwrap().take() {
            on_timeout();
        }
    }
}

impl std::fmt::Debug for AckWithTimeout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AckWithTimeout")
            .field("timeout", &self.inner.timeout)
            .field("completed", &self.inner.completed.load(Ordering::SeqCst))
            .finish()
    }
}

/// A pending entry of the ack table.
pub enum AckHandler {
    Callback(Arc<dyn Ack>),
    WithTimeout(AckWithTimeout),
}

impl AckHandler {
    pub fn from_fn(f: impl Fn(&[Data]) + Send + Sync + 'static) -> Self {
        AckHandler::Callback(Arc::new(f))
    }

    pub(crate) fn call(&self, args: &[Data]) {
        match self {
            AckHandler::Callback(ack) => ack.call(args),
            AckHandler::WithTimeout(ack) => ack.call(args),
        }
    }
}

impl From<AckWithTimeout> for AckHandler {
    fn from(ack: AckWithTimeout) -> Self {
        AckHandler::WithTimeout(ack)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counters() -> (Arc<AtomicUsize>, Arc<AtomicUsize>) {
        (Arc::new(AtomicUsize::new(0)), Arc::new(AtomicUsize::new(0)))
    }

    fn ack_with(
        timeout: Duration,
        successes: &Arc<AtomicUsize>,
        timeouts: &Arc<AtomicUsize>,
    ) -> AckWithTimeout {
        let s = successes.clone();
        let t = timeouts.clone();
        AckWithTimeout::new(
            timeout,
            move |_| {
                s.fetch_add(1, Ordering::SeqCst);
            },
            move || {
                t.fetch_add(1, Ordering::SeqCst);
            },
        )
    }

    #[tokio::test]
    async fn response_before_deadline_wins() {
        let scope = Scope::new();
        let (successes, timeouts) = counters();
        let ack = ack_with(Duration::from_millis(20), &successes, &timeouts);
        ack.schedule(&scope, || {});
        ack.call(&[]);
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(successes.load(Ordering::SeqCst), 1);
        assert_eq!(timeouts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn timeout_fires_once_and_runs_cleanup() {
        let scope = Scope::new();
        let (successes, timeouts) = counters();
        let cleanups = Arc::new(AtomicUsize::new(0));
        let ack = ack_with(Duration::from_millis(10), &successes, &timeouts);
        let c = cleanups.clone();
        ack.schedule(&scope, move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        // a late response is dropped
        ack.call(&[]);
        assert_eq!(successes.load(Ordering::SeqCst), 0);
        assert_eq!(timeouts.load(Ordering::SeqCst), 1);
        assert_eq!(cleanups.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn rescheduling_is_a_noop() {
        let scope = Scope::new();
        let (successes, timeouts) = counters();
        let ack = ack_with(Duration::from_millis(10), &successes, &timeouts);
        ack.schedule(&scope, || {});
        ack.schedule(&scope, || panic!("second schedule must not arm"));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(timeouts.load(Ordering::SeqCst), 1);
    }
}
