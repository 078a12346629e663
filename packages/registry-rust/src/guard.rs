use std::ops::Deref;

use tracing::warn;

use crate::error::Result;
use crate::operation::Operation;
use crate::registry::OperationRegistry;

/// RAII handle for a registered operation.
///
/// Completes the operation when dropped, so a worker that returns early or
/// unwinds still leaves the active set. Created by
/// [`OperationRegistry::register_guarded`].
#[must_use = "dropping the guard completes the operation immediately"]
pub struct OperationGuard<'a> {
    registry: &'a OperationRegistry,
    operation: Operation,
}

impl<'a> OperationGuard<'a> {
    pub(crate) fn new(registry: &'a OperationRegistry, operation: Operation) -> Self {
        Self {
            registry,
            operation,
        }
    }

    #[must_use]
    pub fn operation(&self) -> &Operation {
        &self.operation
    }

    /// See [`OperationRegistry::report_progress`].
    ///
    /// # Errors
    ///
    /// Same as [`OperationRegistry::report_progress`].
    pub fn report_progress(&self, completed_units_of_work: u64, estimated_end_time: Option<u64>) -> Result<()> {
        self.registry
            .report_progress(&self.operation, completed_units_of_work, estimated_end_time)
    }

    /// Completes the operation now instead of at drop.
    ///
    /// # Errors
    ///
    /// Same as [`OperationRegistry::complete`].
    pub fn complete(self) -> Result<()> {
        self.registry.complete(&self.operation)
    }
}

impl Deref for OperationGuard<'_> {
    type Target = Operation;

    fn deref(&self) -> &Operation {
        &self.operation
    }
}

impl Drop for OperationGuard<'_> {
    fn drop(&mut self) {
        if self.operation.is_finished() {
            return;
        }
        if let Err(err) = self.registry.complete(&self.operation) {
            warn!(operation = %self.operation.identifier(), error = %err, "failed to complete guarded operation");
        }
    }
}

impl std::fmt::Debug for OperationGuard<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationGuard")
            .field("operation", &self.operation)
            .finish_non_exhaustive()
    }
}
