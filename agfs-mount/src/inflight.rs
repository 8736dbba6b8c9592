//! In-flight operation tracking for unmount draining.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::Notify;

/// Counts operations routed to one mount entry.
///
/// `retire` and `enter` both use sequentially consistent ordering, so a
/// dispatcher that loaded a stale snapshot either sees the retirement and
/// backs off, or is counted before the drain starts waiting.
#[derive(Debug, Default)]
pub(crate) struct InFlight {
    count: AtomicUsize,
    retired: AtomicBool,
    notify: Notify,
}

impl InFlight {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Registers an operation. Returns `None` once the entry is retired.
    pub(crate) fn enter(self: &Arc<Self>) -> Option<InFlightGuard> {
        self.count.fetch_add(1, Ordering::SeqCst);
        let guard = InFlightGuard {
            inflight: Arc::clone(self),
        };
        if self.retired.load(Ordering::SeqCst) {
            return None;
        }
        Some(guard)
    }

    pub(crate) fn retire(&self) {
        self.retired.store(true, Ordering::SeqCst);
    }

    pub(crate) fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    /// Resolves once no operation is in flight.
    pub(crate) async fn drained(&self) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.count() == 0 {
                return;
            }
            notified.await;
        }
    }
}

pub(crate) struct InFlightGuard {
    inflight: Arc<InFlight>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.inflight.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.inflight.notify.notify_waiters();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn drained_when_idle() {
        let inflight = InFlight::new();
        tokio::time::timeout(Duration::from_millis(100), inflight.drained())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn drained_waits_for_guards() {
        let inflight = Arc::new(InFlight::new());
        let worker = {
            let inflight = Arc::clone(&inflight);
            tokio::spawn(async move {
                let _guard = inflight.enter().unwrap();
                tokio::time::sleep(Duration::from_millis(50)).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(inflight.count(), 1);
        tokio::time::timeout(Duration::from_secs(2), inflight.drained())
            .await
            .unwrap();
        worker.await.unwrap();
        assert_eq!(inflight.count(), 0);
    }

    #[test]
    fn retired_refuses_entry() {
        let inflight = Arc::new(InFlight::new());
        inflight.retire();
        assert!(inflight.enter().is_none());
        assert_eq!(inflight.count(), 0);
    }
}
