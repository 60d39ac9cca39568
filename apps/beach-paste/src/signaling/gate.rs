use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Notify;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("timed out after {waited:?} waiting for {signal}")]
pub struct WaitTimeout {
    pub signal: &'static str,
    pub waited: Duration,
}

/// One-shot signal: once set it stays set and releases every waiter,
/// including ones that start waiting afterwards.
#[derive(Debug)]
pub struct Latch {
    name: &'static str,
    fired: AtomicBool,
    notify: Notify,
}

impl Latch {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            fired: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_set(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }

    /// Returns true for the call that actually fired the latch.
    pub fn set(&self) -> bool {
        let first = !self.fired.swap(true, Ordering::AcqRel);
        if first {
            tracing::trace!(target = "beach_paste::signaling::gate", latch = self.name, "latch fired");
            self.notify.notify_waiters();
        }
        first
    }

    pub async fn wait(&self) {
        loop {
            // Register interest before checking the flag: a set() landing between the
            // check and the await still finds this waiter.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_set() {
                return;
            }
            notified.await;
        }
    }

    pub async fn wait_timeout(&self, limit: Option<Duration>) -> Result<(), WaitTimeout> {
        match limit {
            None => {
                self.wait().await;
                Ok(())
            }
            Some(limit) => tokio::time::timeout(limit, self.wait())
                .await
                .map_err(|_| WaitTimeout {
                    signal: self.name,
                    waited: limit,
                }),
        }
    }
}

/// Readiness signals shared between engine callbacks and the session flow.
#[derive(Debug)]
pub struct ReadinessGate {
    pub first_candidate: Latch,
    pub gathering_complete: Latch,
    pub relay_open: Latch,
    pub data_open: Latch,
}

impl ReadinessGate {
    pub fn new() -> Self {
        Self {
            first_candidate: Latch::new("first_candidate"),
            gathering_complete: Latch::new("gathering_complete"),
            relay_open: Latch::new("relay_open"),
            data_open: Latch::new("data_open"),
        }
    }
}

impl Default for ReadinessGate {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test_timeout::tokio_timeout_test(10)]
    async fn wait_returns_immediately_when_already_set() {
        let latch = Latch::new("test");
        assert!(latch.set());
        latch.wait().await;
        latch.wait().await;
    }

    #[test_timeout::timeout(5)]
    fn set_is_idempotent() {
        let latch = Latch::new("test");
        assert!(!latch.is_set());
        assert!(latch.set());
        assert!(!latch.set());
        assert!(latch.is_set());
    }

    #[test_timeout::tokio_timeout_test(10)]
    async fn set_releases_every_pending_waiter() {
        let latch = Arc::new(Latch::new("data_open"));
        let mut waiters = Vec::new();
        for _ in 0..4 {
            let latch = latch.clone();
            waiters.push(tokio::spawn(async move { latch.wait().await }));
        }
        tokio::task::yield_now().await;
        assert!(waiters.iter().all(|handle| !handle.is_finished()));

        latch.set();
        for waiter in waiters {
            waiter.await.expect("waiter task");
        }
        // late waiters pass straight through
        latch.wait().await;
    }

    #[test_timeout::tokio_timeout_test(30)]
    async fn concurrent_set_never_loses_wakeup() {
        for _ in 0..500 {
            let latch = Arc::new(Latch::new("first_candidate"));
            let setter = {
                let latch = latch.clone();
                thread::spawn(move || {
                    latch.set();
                })
            };
            latch.wait().await;
            setter.join().expect("setter thread");
        }
    }

    #[test_timeout::tokio_timeout_test(10)]
    async fn wait_timeout_reports_signal_name() {
        let latch = Latch::new("gathering_complete");
        let err = latch
            .wait_timeout(Some(Duration::from_millis(20)))
            .await
            .unwrap_err();
        assert_eq!(err.signal, "gathering_complete");

        latch.set();
        latch
            .wait_timeout(Some(Duration::from_millis(20)))
            .await
            .expect("set latch passes");
        latch.wait_timeout(None).await.expect("unbounded wait");
    }

    #[test]
    fn gate_latches_are_independent() {
        let gate = ReadinessGate::new();
        gate.relay_open.set();
        assert!(gate.relay_open.is_set());
        assert!(!gate.first_candidate.is_set());
        assert!(!gate.gathering_complete.is_set());
        assert!(!gate.data_open.is_set());
    }
}
