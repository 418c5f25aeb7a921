//! One run per session at a time

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard, watch};

struct Slot {
    lock: Arc<Mutex<()>>,
    abort: watch::Sender<bool>,
}

impl Slot {
    fn new() -> Self {
        Self {
            lock: Arc::default(),
            abort: watch::channel(false).0,
        }
    }
}

/// Per-session-id locks. The guard is owned so it can travel with a response
/// stream and is released when that stream ends or is dropped.
#[derive(Clone, Default)]
pub struct SessionLocks {
    inner: Arc<Mutex<HashMap<String, Slot>>>,
}

/// Exclusive hold on a session, with the abort signal for its holder
pub struct SessionGuard {
    _held: OwnedMutexGuard<()>,
    abort: watch::Receiver<bool>,
}

impl SessionGuard {
    /// Resolves once someone asks this holder to stop
    pub async fn aborted(&mut self) {
        let closed = self.abort.wait_for(|stop| *stop).await.is_err();
        if closed {
            std::future::pending::<()>().await;
        }
    }
}

impl SessionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// `None` while another holder has the session
    pub async fn try_acquire(&self, session_id: &str) -> Option<SessionGuard> {
        let mut locks = self.inner.lock().await;
        // held guards keep a second reference alive
        locks.retain(|_, slot| Arc::strong_count(&slot.lock) > 1);
        let slot = locks.entry(session_id.to_string()).or_insert_with(Slot::new);
        let held = slot.lock.clone().try_lock_owned().ok()?;

        let (abort, signal) = watch::channel(false);
        slot.abort = abort;
        Some(SessionGuard {
            _held: held,
            abort: signal,
        })
    }

    pub async fn is_busy(&self, session_id: &str) -> bool {
        self.inner
            .lock()
            .await
            .get(session_id)
            .is_some_and(|slot| slot.lock.try_lock().is_err())
    }

    /// Signal the current holder to stop. `false` when the session is idle.
    pub async fn abort(&self, session_id: &str) -> bool {
        self.inner
            .lock()
            .await
            .get(session_id)
            .is_some_and(|slot| slot.lock.try_lock().is_err() && slot.abort.send(true).is_ok())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn test_second_acquire_fails_until_release() {
        let locks = SessionLocks::new();
        let guard = locks.try_acquire("ses_1").await.unwrap();
        assert!(locks.try_acquire("ses_1").await.is_none());
        assert!(locks.is_busy("ses_1").await);
        assert!(locks.try_acquire("ses_2").await.is_some());

        drop(guard);
        assert!(!locks.is_busy("ses_1").await);
        assert!(locks.try_acquire("ses_1").await.is_some());
    }

    #[tokio::test]
    async fn test_released_entries_are_pruned() {
        let locks = SessionLocks::new();
        drop(locks.try_acquire("a").await);
        let _held = locks.try_acquire("b").await.unwrap();
        assert_eq!(locks.inner.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn test_abort_reaches_the_holder() {
        let locks = SessionLocks::new();
        assert!(!locks.abort("ses_1").await);

        let mut guard = locks.try_acquire("ses_1").await.unwrap();
        assert!(locks.abort("ses_1").await);
        tokio::time::timeout(Duration::from_secs(1), guard.aborted())
            .await
            .unwrap();
        drop(guard);

        // the next holder starts with a clear signal
        let mut guard = locks.try_acquire("ses_1").await.unwrap();
        let pending = tokio::time::timeout(Duration::from_millis(20), guard.aborted()).await;
        assert!(pending.is_err());
    }
}
