//! Per-exporter admission control
//!
//! Bounds the number of exports of one exporter that may be in flight at
//! the same time. A limit of zero or less disables the gate.

use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Counting semaphore around the I/O of one exporter
#[derive(Debug, Clone)]
pub struct ConcurrencyGate {
    semaphore: Option<Arc<Semaphore>>,
}

/// Slot held while an export runs; dropping it frees the slot
#[derive(Debug)]
pub struct GatePermit {
    _permit: Option<OwnedSemaphorePermit>,
}

impl ConcurrencyGate {
    pub fn new(limit: i32) -> Self {
        let semaphore = (limit > 0).then(|| Arc::new(Semaphore::new(limit as usize)));
        Self { semaphore }
    }

    /// Wait for a free slot
    pub async fn get(&self) -> GatePermit {
        let permit = match &self.semaphore {
            // The semaphore is never closed, so acquiring only fails on shutdown
            Some(semaphore) => Arc::clone(semaphore).acquire_owned().await.ok(),
            None => None,
        };
        GatePermit { _permit: permit }
    }

    pub fn is_bounded(&self) -> bool {
        self.semaphore.is_some()
    }

    /// Free slots, `None` when unbounded
    pub fn available(&self) -> Option<usize> {
        self.semaphore.as_ref().map(|s| s.available_permits())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unbounded_gate() {
        let gate = ConcurrencyGate::new(0);
        assert!(!gate.is_bounded());
        let _a = gate.get().await;
        let _b = gate.get().await;
        assert_eq!(gate.available(), None);

        assert!(!ConcurrencyGate::new(-3).is_bounded());
    }

    #[tokio::test]
    async fn test_permit_released_on_drop() {
        let gate = ConcurrencyGate::new(2);
        let first = gate.get().await;
        let _second = gate.get().await;
        assert_eq!(gate.available(), Some(0));

        drop(first);
        assert_eq!(gate.available(), Some(1));
    }

    #[tokio::test]
    async fn test_get_waits_for_slot() {
        let gate = ConcurrencyGate::new(1);
        let held = gate.get().await;

        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move {
                let _permit = gate.get().await;
            })
        };
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(held);
        waiter.await.unwrap();
    }
}
