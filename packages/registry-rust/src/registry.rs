//! Process-wide registry of long-running operations.
//!
//! Lock discipline:
//! - The operation table (active set plus the recently-finished ring) is the
//!   only coarse-locked structure. It is held just long enough to insert,
//!   remove or clone handles.
//! - Security callbacks and listeners always run with no registry lock held,
//!   so either may call back into the registry.
//! - Per-operation progress has its own lock; the cancel flag is a CAS.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use longops_core::{
    sort_operations, ClockSource, EventType, EventTypes, OperationId, OperationSnapshot,
    Principal, SystemClock,
};
use parking_lot::RwLock;
use tracing::{debug, info};

use crate::config::RegistryConfig;
use crate::error::{RegistryError, Result};
use crate::guard::OperationGuard;
use crate::listener::{ListenerBus, OperationListener};
use crate::operation::{CancelTransition, NewOperation, Operation};
use crate::security::SecurityCallback;

// ---------------------------------------------------------------------------
// Filters
// ---------------------------------------------------------------------------

/// Owner criterion for active-operation queries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum OwnerFilter {
    /// Any owner, including system-initiated work.
    #[default]
    Any,
    /// Only system-initiated work (no owner).
    System,
    /// Only work initiated by this principal.
    Principal(Principal),
}

impl OwnerFilter {
    fn matches(&self, owner: Option<&Principal>) -> bool {
        match self {
            OwnerFilter::Any => true,
            OwnerFilter::System => owner.is_none(),
            OwnerFilter::Principal(p) => owner == Some(p),
        }
    }
}

impl From<Option<Principal>> for OwnerFilter {
    /// `None` selects system-initiated work.
    fn from(owner: Option<Principal>) -> Self {
        owner.map_or(OwnerFilter::System, OwnerFilter::Principal)
    }
}

/// Criteria for [`OperationRegistry::find_active`]. Both are optional.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OperationFilter {
    /// Operations whose code starts with this prefix.
    pub code_prefix: Option<String>,
    pub owner: OwnerFilter,
}

impl OperationFilter {
    /// Matches every operation.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_code_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.code_prefix = Some(prefix.into());
        self
    }

    #[must_use]
    pub fn with_owner(mut self, owner: impl Into<OwnerFilter>) -> Self {
        self.owner = owner.into();
        self
    }

    fn matches(&self, operation: &Operation) -> bool {
        self.code_prefix
            .as_deref()
            .is_none_or(|prefix| operation.code().starts_with(prefix))
            && self.owner.matches(operation.owner())
    }
}

// ---------------------------------------------------------------------------
// OperationTable
// ---------------------------------------------------------------------------

#[derive(Default)]
struct OperationTable {
    active: BTreeMap<OperationId, Operation>,
    recently_finished: VecDeque<Operation>,
}

impl OperationTable {
    fn contains(&self, operation: &Operation) -> bool {
        self.active
            .get(&operation.identifier())
            .is_some_and(|op| op.same_as(operation))
    }

    fn lookup(&self, id: OperationId) -> Option<Operation> {
        self.active.get(&id).cloned().or_else(|| {
            self.recently_finished
                .iter()
                .find(|op| op.identifier() == id)
                .cloned()
        })
    }

    fn retire(&mut self, operation: Operation, capacity: usize) {
        if capacity == 0 {
            return;
        }
        while self.recently_finished.len() >= capacity {
            self.recently_finished.pop_front();
        }
        self.recently_finished.push_back(operation);
    }
}

// ---------------------------------------------------------------------------
// OperationRegistry
// ---------------------------------------------------------------------------

/// Registry of in-flight background work.
///
/// Workers [`register`](Self::register) an operation, report progress on it
/// and [`complete`](Self::complete) it. Request handlers query and cancel
/// operations on behalf of a requestor, subject to each operation's
/// [`SecurityCallback`]. Every transition is published on the listener bus.
pub struct OperationRegistry {
    config: RegistryConfig,
    default_security: Arc<dyn SecurityCallback>,
    clock: Arc<dyn ClockSource>,
    next_id: AtomicU64,
    table: RwLock<OperationTable>,
    listeners: ListenerBus,
}

impl OperationRegistry {
    /// Creates a registry reading the system clock.
    #[must_use]
    pub fn new(config: RegistryConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Creates a registry reading timestamps from `clock`.
    #[must_use]
    pub fn with_clock(config: RegistryConfig, clock: Arc<dyn ClockSource>) -> Self {
        let default_security = config.default_policy.build();
        Self {
            config,
            default_security,
            clock,
            next_id: AtomicU64::new(1),
            table: RwLock::new(OperationTable::default()),
            listeners: ListenerBus::new(),
        }
    }

    /// Replaces the callback used for registrations that bring none,
    /// overriding `default_policy` from the config.
    #[must_use]
    pub fn with_default_security(mut self, callback: Arc<dyn SecurityCallback>) -> Self {
        self.default_security = callback;
        self
    }

    #[must_use]
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Number of operations in the active set.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.table.read().active.len()
    }

    // -- producer side ------------------------------------------------------

    /// Registers a new operation and publishes `REGISTERED`.
    ///
    /// `total_units_of_work` is `None` when the amount of work is unknown.
    /// `security` falls back to the registry default when `None`.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if `code` or `description` is blank, or `code` is
    /// longer than `max_code_len`.
    pub fn register(
        &self,
        code: &str,
        description: &str,
        owner: Option<Principal>,
        total_units_of_work: Option<u64>,
        security: Option<Arc<dyn SecurityCallback>>,
    ) -> Result<Operation> {
        if code.trim().is_empty() {
            return Err(RegistryError::invalid_argument("code may not be empty"));
        }
        if code.len() > self.config.max_code_len {
            return Err(RegistryError::invalid_argument(format!(
                "code is {} bytes, limit is {}",
                code.len(),
                self.config.max_code_len
            )));
        }
        if description.trim().is_empty() {
            return Err(RegistryError::invalid_argument("description may not be empty"));
        }

        let id = OperationId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        let now = self.clock.now();
        let operation = Operation::new(NewOperation {
            id,
            code: code.to_string(),
            description: description.to_string(),
            owner,
            total_units_of_work,
            start_time: now,
            security: security.unwrap_or_else(|| Arc::clone(&self.default_security)),
        });

        self.table.write().active.insert(id, operation.clone());
        debug!(
            operation = %id,
            code,
            owner = operation.owner().map(|p| p.id.as_str()),
            total = ?total_units_of_work,
            "operation registered"
        );

        self.listeners.dispatch(EventType::Registered, &operation, now);
        Ok(operation)
    }

    /// Like [`register`](Self::register), but returns a guard that completes
    /// the operation when dropped.
    ///
    /// # Errors
    ///
    /// Same as [`register`](Self::register).
    pub fn register_guarded(
        &self,
        code: &str,
        description: &str,
        owner: Option<Principal>,
        total_units_of_work: Option<u64>,
        security: Option<Arc<dyn SecurityCallback>>,
    ) -> Result<OperationGuard<'_>> {
        let operation = self.register(code, description, owner, total_units_of_work, security)?;
        Ok(OperationGuard::new(self, operation))
    }

    /// Records progress from the owning worker and publishes `PROGRESS`.
    ///
    /// Not authorization-checked. When `estimated_end_time` is `None` and
    /// the total is known, the end time is extrapolated from the rate so far.
    ///
    /// # Errors
    ///
    /// - `InvalidState` if the counter would move backwards or past the
    ///   total, or the operation was completed or canceled.
    /// - `InvalidArgument` if the operation was never registered here.
    pub fn report_progress(
        &self,
        operation: &Operation,
        completed_units_of_work: u64,
        estimated_end_time: Option<u64>,
    ) -> Result<()> {
        if !operation.is_finished() && !self.table.read().contains(operation) {
            return Err(RegistryError::unknown_operation(operation.identifier()));
        }
        let now = self.clock.now();
        operation.apply_progress(completed_units_of_work, estimated_end_time, now)?;
        self.listeners.dispatch(EventType::Progress, operation, now);
        Ok(())
    }

    /// Removes the operation from the active set and publishes `COMPLETED`.
    ///
    /// Also used to acknowledge a cancellation. Completing an operation
    /// twice is a no-op.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if the operation was never registered here.
    pub fn complete(&self, operation: &Operation) -> Result<()> {
        {
            let mut table = self.table.write();
            if !table.contains(operation) {
                return if operation.is_finished() {
                    Ok(())
                } else {
                    Err(RegistryError::unknown_operation(operation.identifier()))
                };
            }
            table.active.remove(&operation.identifier());
            operation.mark_finished();
            table.retire(operation.clone(), self.config.recently_finished_capacity);
        }

        debug!(
            operation = %operation.identifier(),
            code = operation.code(),
            canceled = operation.is_canceled(),
            completed = operation.completed_units_of_work(),
            "operation completed"
        );
        self.listeners
            .dispatch(EventType::Completed, operation, self.clock.now());
        Ok(())
    }

    // -- requestor side -----------------------------------------------------

    /// Requests cooperative cancellation on behalf of `requestor`.
    ///
    /// Only sets the flag; the worker observes it and stops. The first
    /// successful call publishes `CANCELLED`, later calls are no-ops.
    ///
    /// # Errors
    ///
    /// - `InvalidArgument` if the operation is not active, including when it
    ///   completes while the security callback is deciding.
    /// - `Authorization` if the operation's callback refuses `requestor`.
    pub fn cancel(&self, operation: &Operation, requestor: Option<&Principal>) -> Result<()> {
        if !self.table.read().contains(operation) {
            return Err(RegistryError::unknown_operation(operation.identifier()));
        }
        if !operation.security().can_cancel(operation, requestor) {
            return Err(authorization_error(operation, "cancel", requestor));
        }

        let now = self.clock.now();
        match operation.mark_canceled(now) {
            CancelTransition::Canceled => {
                info!(
                    operation = %operation.identifier(),
                    code = operation.code(),
                    requestor = requestor_name(requestor),
                    "operation canceled"
                );
                self.listeners.dispatch(EventType::Cancelled, operation, now);
                Ok(())
            }
            CancelTransition::AlreadyCanceled => {
                debug!(operation = %operation.identifier(), "operation already canceled");
                Ok(())
            }
            // Completed while the callback ran.
            CancelTransition::Finished => Err(RegistryError::unknown_operation(operation.identifier())),
        }
    }

    /// Resolves `identifier` and cancels it, checking view then cancel
    /// permission.
    ///
    /// # Errors
    ///
    /// Errors of [`get_operation`](Self::get_operation) and
    /// [`cancel`](Self::cancel).
    pub fn cancel_by_id(&self, identifier: &str, requestor: Option<&Principal>) -> Result<Operation> {
        let operation = self.get_operation(identifier, requestor)?;
        self.cancel(&operation, requestor)?;
        Ok(operation)
    }

    /// Looks up an active or recently completed operation.
    ///
    /// # Errors
    ///
    /// - `InvalidArgument` if `identifier` is malformed or unknown.
    /// - `Authorization` if the operation's callback refuses `requestor`.
    pub fn get_operation(&self, identifier: &str, requestor: Option<&Principal>) -> Result<Operation> {
        let id: OperationId = identifier
            .parse()
            .map_err(|_| RegistryError::unknown_operation(identifier))?;
        let operation = self
            .table
            .read()
            .lookup(id)
            .ok_or_else(|| RegistryError::unknown_operation(id))?;

        if operation.security().can_view(&operation, requestor) {
            Ok(operation)
        } else {
            Err(authorization_error(&operation, "view", requestor))
        }
    }

    /// Active operations matching `filter` that `requestor` may view, in
    /// identifier order. Operations the requestor may not view are omitted.
    #[must_use]
    pub fn find_active(&self, filter: &OperationFilter, requestor: Option<&Principal>) -> Vec<Operation> {
        let candidates: Vec<Operation> = self
            .table
            .read()
            .active
            .values()
            .filter(|op| filter.matches(op))
            .cloned()
            .collect();

        candidates
            .into_iter()
            .filter(|op| op.security().can_view(op, requestor))
            .collect()
    }

    /// Every active operation `requestor` may view.
    #[must_use]
    pub fn active_operations(&self, requestor: Option<&Principal>) -> Vec<Operation> {
        self.find_active(&OperationFilter::all(), requestor)
    }

    /// Active operations whose code starts with `code_prefix`.
    #[must_use]
    pub fn active_operations_by_code(
        &self,
        code_prefix: &str,
        requestor: Option<&Principal>,
    ) -> Vec<Operation> {
        self.find_active(&OperationFilter::all().with_code_prefix(code_prefix), requestor)
    }

    /// Active operations initiated by `owner`; `None` selects system work.
    #[must_use]
    pub fn active_operations_by_owner(
        &self,
        owner: Option<&Principal>,
        requestor: Option<&Principal>,
    ) -> Vec<Operation> {
        self.find_active(&OperationFilter::all().with_owner(owner.cloned()), requestor)
    }

    /// Active operations matching both a code prefix and an owner.
    #[must_use]
    pub fn active_operations_by_code_and_owner(
        &self,
        code_prefix: &str,
        owner: Option<&Principal>,
        requestor: Option<&Principal>,
    ) -> Vec<Operation> {
        let filter = OperationFilter::all()
            .with_code_prefix(code_prefix)
            .with_owner(owner.cloned());
        self.find_active(&filter, requestor)
    }

    /// Snapshots of [`find_active`](Self::find_active) in display order.
    #[must_use]
    pub fn sorted_active_operations(
        &self,
        filter: &OperationFilter,
        requestor: Option<&Principal>,
    ) -> Vec<OperationSnapshot> {
        let snapshots: Vec<OperationSnapshot> = self
            .find_active(filter, requestor)
            .iter()
            .map(Operation::snapshot)
            .collect();
        sort_operations(&snapshots)
    }

    // -- listeners ----------------------------------------------------------

    /// Subscribes `listener`; see [`ListenerBus::subscribe`].
    ///
    /// Per-operation events are ordered per raising thread only; see the
    /// [`listener`](crate::listener) module docs.
    pub fn add_listener(
        &self,
        listener: Arc<dyn OperationListener>,
        event_types: impl Into<EventTypes>,
        code_prefix: impl Into<String>,
    ) {
        self.listeners.subscribe(listener, event_types, code_prefix);
    }

    /// Unsubscribes `listener`. Returns `false` if it was not subscribed.
    pub fn remove_listener(&self, listener: &Arc<dyn OperationListener>) -> bool {
        self.listeners.unsubscribe(listener)
    }
}

impl std::fmt::Debug for OperationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let table = self.table.read();
        f.debug_struct("OperationRegistry")
            .field("active", &table.active.len())
            .field("recently_finished", &table.recently_finished.len())
            .field("listeners", &self.listeners)
            .finish_non_exhaustive()
    }
}

fn requestor_name(requestor: Option<&Principal>) -> &str {
    requestor.map_or("anonymous", |p| p.id.as_str())
}

fn authorization_error(
    operation: &Operation,
    action: &'static str,
    requestor: Option<&Principal>,
) -> RegistryError {
    RegistryError::Authorization {
        id: operation.identifier(),
        action,
        requestor: requestor_name(requestor).to_string(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
