//! Display ordering for operation lists.
//!
//! Operations with an estimated end time come first, soonest to finish
//! first. Operations whose duration is unknown follow, longest running
//! first. Ties inside either group fall back to the identifier, so the
//! output is fully deterministic.

use std::cmp::Ordering;

use crate::snapshot::OperationSnapshot;
use crate::types::OperationId;

/// Timing fields the display order is computed from.
pub trait OperationTiming {
    fn identifier(&self) -> OperationId;
    fn start_time(&self) -> u64;
    fn estimated_end_time(&self) -> Option<u64>;
}

impl OperationTiming for OperationSnapshot {
    fn identifier(&self) -> OperationId {
        self.identifier
    }

    fn start_time(&self) -> u64 {
        self.start_time
    }

    fn estimated_end_time(&self) -> Option<u64> {
        self.estimated_end_time
    }
}

impl<T: OperationTiming + ?Sized> OperationTiming for &T {
    fn identifier(&self) -> OperationId {
        (**self).identifier()
    }

    fn start_time(&self) -> u64 {
        (**self).start_time()
    }

    fn estimated_end_time(&self) -> Option<u64> {
        (**self).estimated_end_time()
    }
}

/// Total order used by [`sort_operations`].
pub fn display_order<T: OperationTiming + ?Sized>(a: &T, b: &T) -> Ordering {
    match (a.estimated_end_time(), b.estimated_end_time()) {
        (Some(end_a), Some(end_b)) => end_a.cmp(&end_b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.start_time().cmp(&b.start_time()),
    }
    .then_with(|| a.identifier().cmp(&b.identifier()))
}

/// Returns the operations in display order. The input is left untouched.
#[must_use]
pub fn sort_operations<T: OperationTiming + Clone>(operations: &[T]) -> Vec<T> {
    let mut sorted = operations.to_vec();
    sorted.sort_by(|a, b| display_order(a, b));
    sorted
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn op(id: u64, start: u64, end: Option<u64>) -> OperationSnapshot {
        OperationSnapshot {
            identifier: OperationId::new(id),
            code: "job".to_string(),
            description: format!("job {id}"),
            owner: None,
            total_units_of_work: None,
            completed_units_of_work: 0,
            canceled: false,
            finished: false,
            start_time: start,
            last_update_time: start,
            estimated_end_time: end,
        }
    }

    fn ids(ops: &[OperationSnapshot]) -> Vec<u64> {
        ops.iter().map(|o| o.identifier.get()).collect()
    }

    #[test]
    fn estimated_first_then_oldest_unknown() {
        let input = vec![
            op(1, 100, None),
            op(2, 200, Some(700)),
            op(3, 300, None),
            op(4, 400, Some(500)),
        ];
        let sorted = sort_operations(&input);
        assert_eq!(ids(&sorted), vec![4, 2, 1, 3]);
        // Input untouched.
        assert_eq!(ids(&input), vec![1, 2, 3, 4]);
    }

    #[test]
    fn ties_break_by_identifier() {
        let input = vec![
            op(9, 100, Some(500)),
            op(3, 100, Some(500)),
            op(7, 50, None),
            op(5, 50, None),
        ];
        assert_eq!(ids(&sort_operations(&input)), vec![3, 9, 5, 7]);
    }

    #[test]
    fn empty_input() {
        let empty: Vec<OperationSnapshot> = Vec::new();
        assert!(sort_operations(&empty).is_empty());
    }

    #[test]
    fn works_over_references() {
        let a = op(1, 10, None);
        let b = op(2, 20, Some(30));
        let sorted = sort_operations(&[&a, &b]);
        assert_eq!(sorted[0].identifier, OperationId::new(2));
    }

    fn arb_op() -> impl Strategy<Value = OperationSnapshot> {
        (0u64..1_000, 0u64..1_000, proptest::option::of(0u64..1_000))
            .prop_map(|(id, start, end)| op(id, start, end))
    }

    proptest! {
        #[test]
        fn output_is_permutation_and_groups_are_ordered(
            input in proptest::collection::vec(arb_op(), 0..40)
        ) {
            let sorted = sort_operations(&input);
            prop_assert_eq!(sorted.len(), input.len());

            let mut a = ids(&input);
            let mut b = ids(&sorted);
            a.sort_unstable();
            b.sort_unstable();
            prop_assert_eq!(a, b);

            let split = sorted
                .iter()
                .position(|o| o.estimated_end_time.is_none())
                .unwrap_or(sorted.len());
            prop_assert!(sorted[split..].iter().all(|o| o.estimated_end_time.is_none()));

            for pair in sorted.windows(2) {
                prop_assert_ne!(display_order(&pair[0], &pair[1]), Ordering::Greater);
            }
        }

        #[test]
        fn sorting_is_idempotent(input in proptest::collection::vec(arb_op(), 0..40)) {
            let once = sort_operations(&input);
            let twice = sort_operations(&once);
            prop_assert_eq!(once, twice);
        }
    }
}
