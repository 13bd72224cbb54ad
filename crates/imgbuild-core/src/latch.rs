//! First-failure-wins bookkeeping shared by every part of a build

use crate::BuildError;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;

#[derive(Debug, Default)]
struct LatchState {
    error: Option<BuildError>,
    /// The progress feed ended cleanly and the reader has been closed
    completed: bool,
    settled: bool,
}

/// Records the first failure of a build.
///
/// Failures inside the pipeline report through [`trip`](Self::trip), caller
/// aborts through [`trip_external`](Self::trip_external). Only the first
/// report is kept; later ones are no-ops. Once the orchestrator has settled the build,
/// no failure can be recorded anymore.
#[derive(Debug, Default)]
pub(crate) struct FailureLatch {
    state: Mutex<LatchState>,
    notify: Notify,
}

impl FailureLatch {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, LatchState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record `error` unless a failure was already recorded or the build has
    /// settled. Returns true only for the call that recorded its error.
    pub(crate) fn trip(&self, error: BuildError) -> bool {
        self.record(error, false)
    }

    /// Record an abort requested from outside the pipeline.
    ///
    /// Also refused once the pipeline has completed, so a reader that already
    /// saw a clean end never belongs to a destroyed build.
    pub(crate) fn trip_external(&self, error: BuildError) -> bool {
        self.record(error, true)
    }

    fn record(&self, error: BuildError, external: bool) -> bool {
        {
            let mut state = self.state();
            if state.settled || state.error.is_some() || (external && state.completed) {
                tracing::debug!("Ignoring later build failure: {}", error);
                return false;
            }
            state.error = Some(error);
        }
        self.notify.notify_waiters();
        true
    }

    /// Mark the pipeline as completed, returning any failure recorded first
    pub(crate) fn complete(&self) -> Option<BuildError> {
        let mut state = self.state();
        if state.error.is_none() {
            state.completed = true;
        }
        state.error.clone()
    }

    /// The recorded failure, if any
    pub(crate) fn error(&self) -> Option<BuildError> {
        self.state().error.clone()
    }

    /// Freeze the outcome and return the failure that decides it
    pub(crate) fn settle(&self) -> Option<BuildError> {
        let mut state = self.state();
        state.settled = true;
        state.error.clone()
    }

    pub(crate) fn is_settled(&self) -> bool {
        self.state().settled
    }

    /// Wait until a failure is recorded
    pub(crate) async fn tripped(&self) -> BuildError {
        loop {
            let notified = self.notify.notified();
            if let Some(error) = self.error() {
                return error;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_first_failure_wins() {
        let latch = FailureLatch::new();
        assert!(latch.trip(BuildError::Daemon("first".into())));
        assert!(!latch.trip(BuildError::Destroyed("second".into())));
        assert!(!latch.trip(BuildError::OutputClosed));

        assert_eq!(latch.error(), Some(BuildError::Daemon("first".into())));
    }

    #[test]
    fn test_no_failure_after_settle() {
        let latch = FailureLatch::new();
        assert_eq!(latch.settle(), None);
        assert!(latch.is_settled());
        assert!(!latch.trip(BuildError::Destroyed("too late".into())));
        assert_eq!(latch.error(), None);
    }

    #[test]
    fn test_settle_returns_recorded_failure() {
        let latch = FailureLatch::new();
        latch.trip(BuildError::OutputClosed);
        assert_eq!(latch.settle(), Some(BuildError::OutputClosed));
    }

    #[test]
    fn test_external_abort_refused_after_completion() {
        let latch = FailureLatch::new();
        assert_eq!(latch.complete(), None);
        assert!(!latch.trip_external(BuildError::Destroyed("late".into())));
        assert_eq!(latch.error(), None);

        // Hook failures still count until the build settles
        assert!(latch.trip(BuildError::Hook("consumer".into())));
    }

    #[test]
    fn test_complete_reports_earlier_failure() {
        let latch = FailureLatch::new();
        assert!(latch.trip_external(BuildError::Destroyed("first".into())));
        assert_eq!(latch.complete(), Some(BuildError::Destroyed("first".into())));
    }

    #[tokio::test]
    async fn test_tripped_resolves_immediately_when_already_failed() {
        let latch = FailureLatch::new();
        latch.trip(BuildError::Hook("boom".into()));
        assert_eq!(latch.tripped().await, BuildError::Hook("boom".into()));
    }

    #[tokio::test]
    async fn test_tripped_wakes_waiter() {
        let latch = Arc::new(FailureLatch::new());
        let waiter = {
            let latch = latch.clone();
            tokio::spawn(async move { latch.tripped().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        latch.trip(BuildError::Transport("reset".into()));

        let error = tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .expect("waiter should wake")
            .unwrap();
        assert_eq!(error, BuildError::Transport("reset".into()));
    }

    #[tokio::test]
    async fn test_concurrent_trips_record_exactly_one() {
        let latch = Arc::new(FailureLatch::new());
        let handles: Vec<_> = (0..16)
            .map(|i| {
                let latch = latch.clone();
                tokio::spawn(async move { latch.trip(BuildError::Destroyed(i.to_string())) })
            })
            .collect();

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
        assert!(latch.error().is_some());
    }
}
