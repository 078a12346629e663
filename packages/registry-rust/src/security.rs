//! Per-operation authorization policies.
//!
//! A [`SecurityCallback`] is supplied when an operation is registered and
//! consulted whenever a requestor tries to view or cancel it. The registry
//! never holds its table lock while calling into a policy, so
//! implementations are free to query the registry or an external identity
//! service.

use std::sync::Arc;

use longops_core::Principal;
use serde::Deserialize;

use crate::operation::Operation;

/// Authorization policy for one operation.
///
/// `requestor` is `None` for anonymous requests.
pub trait SecurityCallback: Send + Sync {
    /// Whether `requestor` may see the operation and its progress.
    fn can_view(&self, operation: &Operation, requestor: Option<&Principal>) -> bool;

    /// Whether `requestor` may request cancellation.
    fn can_cancel(&self, operation: &Operation, requestor: Option<&Principal>) -> bool;
}

/// Everyone may view and cancel.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl SecurityCallback for AllowAll {
    fn can_view(&self, _operation: &Operation, _requestor: Option<&Principal>) -> bool {
        true
    }

    fn can_cancel(&self, _operation: &Operation, _requestor: Option<&Principal>) -> bool {
        true
    }
}

/// The initiating principal, or anyone holding `role`, may view and cancel.
///
/// System-initiated operations (no owner) are visible only to the role.
#[derive(Debug, Clone)]
pub struct OwnerOrRole {
    role: String,
}

impl OwnerOrRole {
    #[must_use]
    pub fn new(role: impl Into<String>) -> Self {
        Self { role: role.into() }
    }

    fn permits(&self, operation: &Operation, requestor: Option<&Principal>) -> bool {
        let Some(requestor) = requestor else {
            return false;
        };
        requestor.has_role(&self.role) || operation.owner() == Some(requestor)
    }
}

impl SecurityCallback for OwnerOrRole {
    fn can_view(&self, operation: &Operation, requestor: Option<&Principal>) -> bool {
        self.permits(operation, requestor)
    }

    fn can_cancel(&self, operation: &Operation, requestor: Option<&Principal>) -> bool {
        self.permits(operation, requestor)
    }
}

/// Wraps another policy for operations that must not be interrupted.
#[derive(Debug, Clone)]
pub struct ViewOnly<P> {
    inner: P,
}

impl<P: SecurityCallback> ViewOnly<P> {
    #[must_use]
    pub fn new(inner: P) -> Self {
        Self { inner }
    }
}

impl<P: SecurityCallback> SecurityCallback for ViewOnly<P> {
    fn can_view(&self, operation: &Operation, requestor: Option<&Principal>) -> bool {
        self.inner.can_view(operation, requestor)
    }

    fn can_cancel(&self, _operation: &Operation, _requestor: Option<&Principal>) -> bool {
        false
    }
}

/// Policy used for registrations that do not supply their own callback.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DefaultPolicy {
    #[default]
    AllowAll,
    OwnerOrRole { role: String },
}

impl DefaultPolicy {
    /// Builds the callback this policy describes.
    #[must_use]
    pub fn build(&self) -> Arc<dyn SecurityCallback> {
        match self {
            DefaultPolicy::AllowAll => Arc::new(AllowAll),
            DefaultPolicy::OwnerOrRole { role } => Arc::new(OwnerOrRole::new(role.clone())),
        }
    }
}
