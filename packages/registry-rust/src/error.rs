use longops_core::OperationId;

/// Invariant a worker-side call would have broken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateViolation {
    /// The completed-units counter would move backwards.
    ProgressRegressed { current: u64, requested: u64 },
    /// The completed-units counter would pass the registered total.
    ExceedsTotal { total: u64, requested: u64 },
    /// The operation has already been completed.
    Finished,
    /// The operation has been canceled; the worker should stop and complete it.
    Canceled,
}

impl std::fmt::Display for StateViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StateViolation::ProgressRegressed { current, requested } => {
                write!(f, "progress cannot move backwards ({current} -> {requested})")
            }
            StateViolation::ExceedsTotal { total, requested } => {
                write!(f, "progress {requested} exceeds total units of work {total}")
            }
            StateViolation::Finished => f.write_str("operation has already completed"),
            StateViolation::Canceled => f.write_str("operation has been canceled"),
        }
    }
}

/// Errors returned by [`OperationRegistry`](crate::OperationRegistry) calls.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// Unknown identifier or malformed registration parameters.
    #[error("invalid argument: {message}")]
    InvalidArgument { message: String },
    /// The requestor may not view or cancel the operation.
    #[error("{requestor} is not authorized to {action} operation #{id}")]
    Authorization {
        id: OperationId,
        action: &'static str,
        requestor: String,
    },
    /// A producer-side call broke an operation invariant.
    #[error("operation #{id}: {violation}")]
    InvalidState {
        id: OperationId,
        violation: StateViolation,
    },
}

impl RegistryError {
    pub(crate) fn invalid_argument(message: impl Into<String>) -> Self {
        RegistryError::InvalidArgument {
            message: message.into(),
        }
    }

    pub(crate) fn unknown_operation(id: impl std::fmt::Display) -> Self {
        RegistryError::invalid_argument(format!("invalid operation #{id}"))
    }

    /// Maps to an access-denied response at the transport layer.
    #[must_use]
    pub fn is_authorization(&self) -> bool {
        matches!(self, RegistryError::Authorization { .. })
    }

    /// Maps to a bad-request response at the transport layer.
    #[must_use]
    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, RegistryError::InvalidArgument { .. })
    }

    /// Returns the violated invariant for `InvalidState` errors.
    #[must_use]
    pub fn state_violation(&self) -> Option<StateViolation> {
        match self {
            RegistryError::InvalidState { violation, .. } => Some(*violation),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, RegistryError>;
