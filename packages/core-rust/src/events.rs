//! Operation lifecycle event vocabulary.
//!
//! Listeners subscribe to a set of [`EventType`]s plus a code prefix and
//! receive [`OperationEvent`]s carrying a snapshot read when the event is
//! dispatched. The snapshot includes the event's own transition and may
//! also include later ones made concurrently by other threads.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::snapshot::OperationSnapshot;

/// Kind of state transition an [`OperationEvent`] reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    /// A new operation entered the active set.
    Registered,
    /// The owning worker reported progress.
    Progress,
    /// An authorized requestor canceled the operation.
    Cancelled,
    /// The worker completed the operation and it left the active set.
    Completed,
}

impl EventType {
    /// Every event type, in lifecycle order.
    pub const ALL: [EventType; 4] = [
        EventType::Registered,
        EventType::Progress,
        EventType::Cancelled,
        EventType::Completed,
    ];

    /// Upper-case name used in configuration and logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            EventType::Registered => "REGISTERED",
            EventType::Progress => "PROGRESS",
            EventType::Cancelled => "CANCELLED",
            EventType::Completed => "COMPLETED",
        }
    }

    const fn bit(self) -> u8 {
        match self {
            EventType::Registered => 1,
            EventType::Progress => 1 << 1,
            EventType::Cancelled => 1 << 2,
            EventType::Completed => 1 << 3,
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown event type name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown event type: {0:?}")]
pub struct ParseEventTypeError(pub String);

impl FromStr for EventType {
    type Err = ParseEventTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventType::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ParseEventTypeError(s.to_string()))
    }
}

/// Compact set of [`EventType`]s.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct EventTypes(u8);

impl EventTypes {
    /// The empty set.
    pub const NONE: EventTypes = EventTypes(0);
    /// Every event type.
    pub const ALL: EventTypes = EventTypes(0b1111);

    /// Set containing exactly one type.
    #[must_use]
    pub const fn only(event_type: EventType) -> Self {
        EventTypes(event_type.bit())
    }

    /// Returns the set with `event_type` added.
    #[must_use]
    pub const fn with(self, event_type: EventType) -> Self {
        EventTypes(self.0 | event_type.bit())
    }

    #[must_use]
    pub const fn contains(self, event_type: EventType) -> bool {
        self.0 & event_type.bit() != 0
    }

    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Iterates the contained types in lifecycle order.
    pub fn iter(self) -> impl Iterator<Item = EventType> {
        EventType::ALL.into_iter().filter(move |t| self.contains(*t))
    }
}

impl FromIterator<EventType> for EventTypes {
    fn from_iter<I: IntoIterator<Item = EventType>>(iter: I) -> Self {
        iter.into_iter().fold(EventTypes::NONE, EventTypes::with)
    }
}

impl From<EventType> for EventTypes {
    fn from(event_type: EventType) -> Self {
        EventTypes::only(event_type)
    }
}

impl<const N: usize> From<[EventType; N]> for EventTypes {
    fn from(types: [EventType; N]) -> Self {
        types.into_iter().collect()
    }
}

impl fmt::Debug for EventTypes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

/// Parses a comma-separated list such as `"REGISTERED,CANCELLED"`.
/// `"*"` selects every type and an empty string selects none.
impl FromStr for EventTypes {
    type Err = ParseEventTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s == "*" {
            return Ok(EventTypes::ALL);
        }
        s.split(',')
            .filter(|part| !part.trim().is_empty())
            .map(str::parse::<EventType>)
            .collect()
    }
}

/// A state transition delivered to listeners.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationEvent {
    pub event_type: EventType,
    /// Operation state right after the transition.
    pub operation: OperationSnapshot,
    /// Registry clock reading when the event was raised.
    pub occurred_at: u64,
}
