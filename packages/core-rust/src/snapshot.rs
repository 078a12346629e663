use serde::{Deserialize, Serialize};

use crate::types::{OperationId, Principal};

/// Point-in-time copy of a tracked operation.
///
/// This is the value handed to listeners and to whatever serializes
/// operation lists for clients. All timestamps are milliseconds since the
/// Unix epoch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationSnapshot {
    pub identifier: OperationId,
    pub code: String,
    pub description: String,
    /// `None` for system-initiated work.
    pub owner: Option<Principal>,
    /// `None` when the amount of work was unknown at registration; `-1` on
    /// the wire.
    #[serde(with = "unknown_total")]
    pub total_units_of_work: Option<u64>,
    pub completed_units_of_work: u64,
    pub canceled: bool,
    /// Set once the worker has completed (unregistered) the operation.
    pub finished: bool,
    pub start_time: u64,
    pub last_update_time: u64,
    pub estimated_end_time: Option<u64>,
}

impl OperationSnapshot {
    /// Fraction of work done in `[0.0, 1.0]`, or `None` when the total is
    /// unknown. A zero total counts as fully done.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn progress_ratio(&self) -> Option<f64> {
        self.total_units_of_work.map(|total| {
            if total == 0 {
                1.0
            } else {
                (self.completed_units_of_work as f64 / total as f64).min(1.0)
            }
        })
    }
}

/// Wire encoding for an optional total: a known total is written as-is and
/// an unknown one as `-1`. `null` is also accepted as unknown on input.
mod unknown_total {
    use std::fmt;

    use serde::de::{self, Visitor};
    use serde::{Deserializer, Serializer};

    const UNKNOWN: i64 = -1;

    #[allow(clippy::ref_option, clippy::trivially_copy_pass_by_ref)]
    pub fn serialize<S: Serializer>(total: &Option<u64>, serializer: S) -> Result<S::Ok, S::Error> {
        match total {
            Some(total) => serializer.serialize_u64(*total),
            None => serializer.serialize_i64(UNKNOWN),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u64>, D::Error> {
        deserializer.deserialize_any(TotalVisitor)
    }

    struct TotalVisitor;

    impl<'de> Visitor<'de> for TotalVisitor {
        type Value = Option<u64>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a non-negative total or -1 for unknown")
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
            Ok(Some(v))
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
            if v == UNKNOWN {
                return Ok(None);
            }
            u64::try_from(v)
                .map(Some)
                .map_err(|_| E::invalid_value(de::Unexpected::Signed(v), &self))
        }

        fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }
    }
}
