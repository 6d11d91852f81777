// src/sync.rs

//! Small concurrency helpers shared by the graph, the jobs and the workspace.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio_util::sync::CancellationToken;

/// Boxed, sendable future used at the trait seams (connectors, job bodies).
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Lock a mutex, recovering the guard if a previous holder panicked.
///
/// Graph state stays consistent across a panic in an unrelated callback, so
/// poisoning is not treated as fatal.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Shutdown signal propagated from a workspace into its running jobs.
///
/// Triggering it asks every running job to kill its process. A forced
/// trigger selects the harsher signal and also reaches jobs that are
/// already waiting for their process after a soft trigger.
#[derive(Debug, Clone, Default)]
pub struct KillSwitch {
    soft: CancellationToken,
    forced: CancellationToken,
}

impl KillSwitch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self, force: bool) {
        if force {
            self.forced.cancel();
        }
        self.soft.cancel();
    }

    pub fn is_triggered(&self) -> bool {
        self.soft.is_cancelled()
    }

    pub fn is_forced(&self) -> bool {
        self.forced.is_cancelled()
    }

    /// Resolves once [`KillSwitch::trigger`] has been called.
    pub async fn triggered(&self) {
        self.soft.cancelled().await
    }

    /// Resolves once a forced trigger happened.
    pub async fn forced(&self) {
        self.forced.cancelled().await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[tokio::test]
    async fn kill_switch_records_force_flag() {
        let switch = KillSwitch::new();
        assert!(!switch.is_triggered());

        let waiter = {
            let switch = switch.clone();
            tokio::spawn(async move { switch.triggered().await })
        };

        switch.trigger(true);
        waiter.await.expect("waiter task panicked");

        assert!(switch.is_triggered());
        assert!(switch.is_forced());
    }

    #[tokio::test]
    async fn soft_then_forced_trigger() {
        let switch = KillSwitch::new();
        switch.trigger(false);
        assert!(switch.is_triggered());
        assert!(!switch.is_forced());

        let escalation = {
            let switch = switch.clone();
            tokio::spawn(async move { switch.forced().await })
        };
        tokio::task::yield_now().await;
        assert!(!escalation.is_finished());

        switch.trigger(true);
        escalation.await.expect("escalation task panicked");
        assert!(switch.is_forced());
    }

    #[test]
    fn lock_recovers_from_poison() {
        let mutex = Arc::new(Mutex::new(1));
        let poisoner = Arc::clone(&mutex);
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.lock().unwrap();
            panic!("poison the mutex");
        })
        .join();

        assert!(mutex.is_poisoned());
        assert_eq!(*lock(&mutex), 1);
    }
}
