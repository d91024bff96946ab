//! Counted shutdown for background workers.
//!
//! Each worker holds a [`CloserGuard`]. [`Closer::signal`] disconnects the
//! stop channel, which wakes every worker blocked on it;
//! [`Closer::signal_and_wait`] additionally blocks until every guard has been
//! dropped.

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use crossbeam::sync::WaitGroup;
use parking_lot::Mutex;
use std::time::Duration;

pub struct Closer {
    stop_tx: Mutex<Option<Sender<()>>>,
    stop_rx: Receiver<()>,
    wg: Mutex<Option<WaitGroup>>,
}

impl Default for Closer {
    fn default() -> Self {
        Self::new()
    }
}

impl Closer {
    pub fn new() -> Self {
        let (tx, rx) = channel::bounded(0);
        Self {
            stop_tx: Mutex::new(Some(tx)),
            stop_rx: rx,
            wg: Mutex::new(Some(WaitGroup::new())),
        }
    }

    /// Registers one worker. The count drops when the guard is dropped.
    ///
    /// A guard handed out after [`signal_and_wait`](Closer::signal_and_wait)
    /// is already signalled and not counted.
    pub fn worker(&self) -> CloserGuard {
        let wg = self.wg.lock().as_ref().map(WaitGroup::clone);
        CloserGuard {
            stop_rx: self.stop_rx.clone(),
            _wg: wg,
        }
    }

    /// Wakes every worker. Idempotent.
    pub fn signal(&self) {
        self.stop_tx.lock().take();
    }

    /// Signals, then blocks until every counted guard is gone.
    pub fn signal_and_wait(&self) {
        self.signal();
        let wg = self.wg.lock().take();
        if let Some(wg) = wg {
            wg.wait();
        }
    }

    #[must_use]
    pub fn is_signalled(&self) -> bool {
        self.stop_tx.lock().is_none()
    }
}

/// A worker's handle on its [`Closer`].
pub struct CloserGuard {
    stop_rx: Receiver<()>,
    _wg: Option<WaitGroup>,
}

impl CloserGuard {
    /// Sleeps for up to `timeout`; returns `true` as soon as shutdown is
    /// signalled.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        match self.stop_rx.recv_timeout(timeout) {
            Err(RecvTimeoutError::Timeout) => false,
            Ok(()) | Err(RecvTimeoutError::Disconnected) => true,
        }
    }

    /// Non-blocking check for shutdown.
    #[must_use]
    pub fn is_signalled(&self) -> bool {
        matches!(self.stop_rx.try_recv(), Err(TryRecvError::Disconnected))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn signal_and_wait_joins_all_workers() {
        let closer = Closer::new();
        let exited = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let guard = closer.worker();
            let exited = Arc::clone(&exited);
            thread::spawn(move || {
                while !guard.wait_timeout(Duration::from_millis(5)) {}
                exited.fetch_add(1, Ordering::SeqCst);
            });
        }

        closer.signal_and_wait();
        assert_eq!(exited.load(Ordering::SeqCst), 3);
        assert!(closer.is_signalled());
    }

    #[test]
    fn guard_sees_signal_without_blocking() {
        let closer = Closer::new();
        let guard = closer.worker();
        assert!(!guard.is_signalled());
        closer.signal();
        assert!(guard.is_signalled());
        assert!(guard.wait_timeout(Duration::from_secs(5)));
        drop(guard);
        closer.signal_and_wait();
    }

    #[test]
    fn late_worker_is_already_signalled() {
        let closer = Closer::new();
        closer.signal_and_wait();
        let guard = closer.worker();
        assert!(guard.is_signalled());
    }

    #[test]
    fn wait_with_no_workers_returns() {
        Closer::new().signal_and_wait();
    }
}
