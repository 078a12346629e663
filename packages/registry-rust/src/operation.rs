//! Shared handle to one tracked operation.
//!
//! Identity fields are immutable and live behind an `Arc`. Progress fields
//! have a single writer (the owning worker) and sit behind a per-operation
//! `RwLock`, which also gives readers on other threads a happens-before edge
//! with the last completed update. The cancel and finish flags are atomics
//! flipped by compare-and-set so each transition happens exactly once.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use longops_core::{OperationId, OperationSnapshot, OperationTiming, Principal};
use parking_lot::RwLock;

use crate::error::{RegistryError, Result, StateViolation};
use crate::security::SecurityCallback;

/// Outcome of [`Operation::mark_canceled`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CancelTransition {
    /// This call set the flag.
    Canceled,
    /// An earlier call set the flag.
    AlreadyCanceled,
    /// The operation completed first; the flag stays unset.
    Finished,
}

#[derive(Debug, Clone, Copy)]
struct Progress {
    completed: u64,
    last_update_time: u64,
    estimated_end_time: Option<u64>,
}

struct OperationInner {
    id: OperationId,
    code: String,
    description: String,
    owner: Option<Principal>,
    total_units_of_work: Option<u64>,
    start_time: u64,
    security: Arc<dyn SecurityCallback>,
    canceled: AtomicBool,
    finished: AtomicBool,
    progress: RwLock<Progress>,
}

/// Handle to a tracked operation.
///
/// Cloning is cheap and every clone observes the same state. A handle stays
/// readable after the operation completes; it then reports the terminal state.
#[derive(Clone)]
pub struct Operation {
    inner: Arc<OperationInner>,
}

pub(crate) struct NewOperation {
    pub id: OperationId,
    pub code: String,
    pub description: String,
    pub owner: Option<Principal>,
    pub total_units_of_work: Option<u64>,
    pub start_time: u64,
    pub security: Arc<dyn SecurityCallback>,
}

impl Operation {
    pub(crate) fn new(params: NewOperation) -> Self {
        Self {
            inner: Arc::new(OperationInner {
                id: params.id,
                code: params.code,
                description: params.description,
                owner: params.owner,
                total_units_of_work: params.total_units_of_work,
                start_time: params.start_time,
                security: params.security,
                canceled: AtomicBool::new(false),
                finished: AtomicBool::new(false),
                progress: RwLock::new(Progress {
                    completed: 0,
                    last_update_time: params.start_time,
                    estimated_end_time: None,
                }),
            }),
        }
    }

    #[must_use]
    pub fn identifier(&self) -> OperationId {
        self.inner.id
    }

    #[must_use]
    pub fn code(&self) -> &str {
        &self.inner.code
    }

    #[must_use]
    pub fn description(&self) -> &str {
        &self.inner.description
    }

    /// The initiating principal, `None` for system-initiated work.
    #[must_use]
    pub fn owner(&self) -> Option<&Principal> {
        self.inner.owner.as_ref()
    }

    /// `None` when the amount of work was unknown at registration.
    #[must_use]
    pub fn total_units_of_work(&self) -> Option<u64> {
        self.inner.total_units_of_work
    }

    #[must_use]
    pub fn completed_units_of_work(&self) -> u64 {
        self.inner.progress.read().completed
    }

    /// Workers poll this between units of work and stop once it turns `true`.
    #[must_use]
    pub fn is_canceled(&self) -> bool {
        self.inner.canceled.load(Ordering::Acquire)
    }

    /// `true` once the operation has been completed and left the active set.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.inner.finished.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn start_time(&self) -> u64 {
        self.inner.start_time
    }

    #[must_use]
    pub fn last_update_time(&self) -> u64 {
        self.inner.progress.read().last_update_time
    }

    #[must_use]
    pub fn estimated_end_time(&self) -> Option<u64> {
        self.inner.progress.read().estimated_end_time
    }

    /// Copies the current state into a plain value.
    #[must_use]
    pub fn snapshot(&self) -> OperationSnapshot {
        let progress = *self.inner.progress.read();
        OperationSnapshot {
            identifier: self.inner.id,
            code: self.inner.code.clone(),
            description: self.inner.description.clone(),
            owner: self.inner.owner.clone(),
            total_units_of_work: self.inner.total_units_of_work,
            completed_units_of_work: progress.completed,
            canceled: self.is_canceled(),
            finished: self.is_finished(),
            start_time: self.inner.start_time,
            last_update_time: progress.last_update_time,
            estimated_end_time: progress.estimated_end_time,
        }
    }

    pub(crate) fn security(&self) -> &Arc<dyn SecurityCallback> {
        &self.inner.security
    }

    /// Returns `true` if both handles refer to the same registration.
    #[must_use]
    pub fn same_as(&self, other: &Operation) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Records a progress report from the owning worker.
    ///
    /// The whole check-and-update runs under the progress write lock, so a
    /// rejected report leaves every field untouched.
    pub(crate) fn apply_progress(
        &self,
        completed: u64,
        estimated_end_time: Option<u64>,
        now: u64,
    ) -> Result<()> {
        let mut progress = self.inner.progress.write();

        if self.is_finished() {
            return Err(self.violation(StateViolation::Finished));
        }
        if self.is_canceled() {
            return Err(self.violation(StateViolation::Canceled));
        }
        if completed < progress.completed {
            return Err(self.violation(StateViolation::ProgressRegressed {
                current: progress.completed,
                requested: completed,
            }));
        }
        if let Some(total) = self.inner.total_units_of_work {
            if completed > total {
                return Err(self.violation(StateViolation::ExceedsTotal {
                    total,
                    requested: completed,
                }));
            }
        }

        let now = now.max(self.inner.start_time);
        progress.completed = completed;
        progress.last_update_time = now;
        progress.estimated_end_time = estimated_end_time
            .or_else(|| self.extrapolate_end(completed, now))
            .or(progress.estimated_end_time);
        Ok(())
    }

    /// Flips the cancel flag unless the operation has already completed.
    ///
    /// Runs under the progress write lock, the same lock
    /// [`mark_finished`](Self::mark_finished) takes, so cancel and completion
    /// are totally ordered: an operation is never canceled after it finished.
    pub(crate) fn mark_canceled(&self, now: u64) -> CancelTransition {
        let mut progress = self.inner.progress.write();
        if self.is_finished() {
            return CancelTransition::Finished;
        }
        if self
            .inner
            .canceled
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return CancelTransition::AlreadyCanceled;
        }
        progress.last_update_time = progress.last_update_time.max(now);
        CancelTransition::Canceled
    }

    /// Flips the finished flag. Returns `false` if it was already set.
    pub(crate) fn mark_finished(&self) -> bool {
        // Taken under the progress lock so no report can interleave with
        // the transition.
        let _progress = self.inner.progress.write();
        self.inner
            .finished
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Linear extrapolation from the time spent so far.
    fn extrapolate_end(&self, completed: u64, now: u64) -> Option<u64> {
        let total = self.inner.total_units_of_work?;
        if completed == 0 {
            return None;
        }
        let start = self.inner.start_time;
        let elapsed = u128::from(now.saturating_sub(start));
        let projected = elapsed * u128::from(total) / u128::from(completed);
        Some(start.saturating_add(u64::try_from(projected).unwrap_or(u64::MAX)))
    }

    fn violation(&self, violation: StateViolation) -> RegistryError {
        RegistryError::InvalidState {
            id: self.inner.id,
            violation,
        }
    }
}

impl fmt::Debug for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let progress = *self.inner.progress.read();
        f.debug_struct("Operation")
            .field("id", &self.inner.id)
            .field("code", &self.inner.code)
            .field("owner", &self.inner.owner.as_ref().map(|p| p.id.as_str()))
            .field("completed", &progress.completed)
            .field("total", &self.inner.total_units_of_work)
            .field("canceled", &self.is_canceled())
            .field("finished", &self.is_finished())
            .finish_non_exhaustive()
    }
}

impl OperationTiming for Operation {
    fn identifier(&self) -> OperationId {
        self.inner.id
    }

    fn start_time(&self) -> u64 {
        self.inner.start_time
    }

    fn estimated_end_time(&self) -> Option<u64> {
        Operation::estimated_end_time(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::AllowAll;

    fn make_op(total: Option<u64>) -> Operation {
        Operation::new(NewOperation {
            id: OperationId::new(1),
            code: "batch.import".to_string(),
            description: "Import".to_string(),
            owner: Some(Principal::new("alice")),
            total_units_of_work: total,
            start_time: 1_000,
            security: Arc::new(AllowAll),
        })
    }

    #[test]
    fn new_operation_initial_state() {
        let op = make_op(Some(10));
        assert_eq!(op.completed_units_of_work(), 0);
        assert!(!op.is_canceled());
        assert!(!op.is_finished());
        assert_eq!(op.start_time(), 1_000);
        assert_eq!(op.last_update_time(), 1_000);
        assert_eq!(op.estimated_end_time(), None);
    }

    #[test]
    fn progress_extrapolates_end_time() {
        let op = make_op(Some(3));
        op.apply_progress(1, None, 3_000).unwrap();
        // 2s for one unit of three: 6s in total.
        assert_eq!(op.estimated_end_time(), Some(7_000));
        assert_eq!(op.last_update_time(), 3_000);
    }

    #[test]
    fn explicit_estimate_wins_over_extrapolation() {
        let op = make_op(Some(3));
        op.apply_progress(1, Some(42_000), 3_000).unwrap();
        assert_eq!(op.estimated_end_time(), Some(42_000));
    }

    #[test]
    fn unknown_total_keeps_previous_estimate() {
        let op = make_op(None);
        op.apply_progress(1, None, 2_000).unwrap();
        assert_eq!(op.estimated_end_time(), None);
        op.apply_progress(2, Some(9_000), 3_000).unwrap();
        op.apply_progress(3, None, 4_000).unwrap();
        assert_eq!(op.estimated_end_time(), Some(9_000));
    }

    #[test]
    fn regression_rejected_without_side_effects() {
        let op = make_op(Some(10));
        op.apply_progress(5, None, 2_000).unwrap();
        let err = op.apply_progress(3, None, 3_000).unwrap_err();
        assert_eq!(
            err.state_violation(),
            Some(StateViolation::ProgressRegressed {
                current: 5,
                requested: 3
            })
        );
        assert_eq!(op.completed_units_of_work(), 5);
        assert_eq!(op.last_update_time(), 2_000);
    }

    #[test]
    fn exceeding_total_rejected() {
        let op = make_op(Some(2));
        let err = op.apply_progress(3, None, 2_000).unwrap_err();
        assert_eq!(
            err.state_violation(),
            Some(StateViolation::ExceedsTotal {
                total: 2,
                requested: 3
            })
        );
    }

    #[test]
    fn clock_going_backwards_keeps_last_update_after_start() {
        let op = make_op(None);
        op.apply_progress(1, None, 10).unwrap();
        assert_eq!(op.last_update_time(), 1_000);
    }

    #[test]
    fn cancel_flag_flips_once() {
        let op = make_op(None);
        assert_eq!(op.mark_canceled(2_000), CancelTransition::Canceled);
        assert_eq!(op.mark_canceled(3_000), CancelTransition::AlreadyCanceled);
        assert!(op.is_canceled());
        assert_eq!(op.last_update_time(), 2_000);

        let err = op.apply_progress(1, None, 4_000).unwrap_err();
        assert_eq!(err.state_violation(), Some(StateViolation::Canceled));
    }

    #[test]
    fn finished_rejects_progress() {
        let op = make_op(None);
        assert!(op.mark_finished());
        assert!(!op.mark_finished());
        let err = op.apply_progress(1, None, 2_000).unwrap_err();
        assert_eq!(err.state_violation(), Some(StateViolation::Finished));
    }

    #[test]
    fn finished_operation_cannot_be_canceled() {
        let op = make_op(None);
        assert!(op.mark_finished());
        assert_eq!(op.mark_canceled(2_000), CancelTransition::Finished);
        assert!(!op.is_canceled());
        assert_eq!(op.last_update_time(), 1_000);
    }

    #[test]
    fn snapshot_reflects_state() {
        let op = make_op(Some(4));
        op.apply_progress(2, None, 1_500).unwrap();
        op.mark_canceled(1_600);
        let snap = op.snapshot();
        assert_eq!(snap.identifier, OperationId::new(1));
        assert_eq!(snap.completed_units_of_work, 2);
        assert!(snap.canceled);
        assert!(!snap.finished);
        assert_eq!(snap.last_update_time, 1_600);
        assert_eq!(snap.estimated_end_time, Some(2_000));
    }

    #[test]
    fn clones_share_state() {
        let op = make_op(None);
        let other = op.clone();
        op.apply_progress(7, None, 2_000).unwrap();
        assert_eq!(other.completed_units_of_work(), 7);
        assert!(other.same_as(&op));
        assert!(!make_op(None).same_as(&op));
    }
}
