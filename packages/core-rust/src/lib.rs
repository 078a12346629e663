//! `longops` core: operation snapshots, principals, the lifecycle event
//! vocabulary, and display ordering. Pure data, no locking.

pub mod clock;
pub mod events;
pub mod ordering;
pub mod snapshot;
pub mod types;

pub use clock::{ClockSource, ManualClock, SystemClock};
pub use events::{EventType, EventTypes, OperationEvent, ParseEventTypeError};
pub use ordering::{display_order, sort_operations, OperationTiming};
pub use snapshot::OperationSnapshot;
pub use types::{OperationId, ParseOperationIdError, Principal};

#[cfg(test)]
mod tests {
    #[test]
    fn crate_loads() {
        // Empty body: if this test runs, the crate compiles and loads.
    }
}
