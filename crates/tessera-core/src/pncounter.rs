//! Counter fields.
//!
//! Every counter delta carries an increment. The field value is the sum of
//! all increments merged so far. Because each delta hash is merged exactly
//! once, summation gives the same result in every arrival order.
//!
//! `PCounter` only accepts non-negative increments, `PNCounter` accepts both.
//! Integer counters wrap on overflow. Float addition does not associate, so
//! float increments are kept by delta hash and re-summed in hash order.

use crate::error::CrdtError;
use crate::lattice::{FieldCrdt, FieldState, FieldUpdate, Priority};
use crate::value::FieldValue;

/// Merge logic for counter fields.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Counter {
    allow_decrement: bool,
}

impl Counter {
    /// Grow-only counter.
    pub const fn grow_only() -> Self {
        Counter {
            allow_decrement: false,
        }
    }

    /// Counter that also accepts negative increments.
    pub const fn positive_negative() -> Self {
        Counter { allow_decrement: true }
    }

    fn kind_name(&self) -> &'static str {
        if self.allow_decrement {
            "pn-counter"
        } else {
            "p-counter"
        }
    }
}

fn max_priority(a: Option<Priority>, b: Priority) -> Priority {
    match a {
        Some(a) => a.max(b),
        None => b,
    }
}

impl FieldCrdt for Counter {
    fn merge(&self, local: &FieldState, remote: &FieldUpdate<'_>) -> Result<FieldState, CrdtError> {
        self.validate(remote.value)?;
        let winner = Some(max_priority(local.winner, remote.priority));
        match (&local.value, remote.value) {
            (FieldValue::Null, FieldValue::Int(n)) => Ok(FieldState {
                value: FieldValue::Int(*n),
                winner,
                ..FieldState::default()
            }),
            (FieldValue::Int(a), FieldValue::Int(b)) => Ok(FieldState {
                value: FieldValue::Int(a.wrapping_add(*b)),
                winner,
                ..FieldState::default()
            }),
            (FieldValue::Null | FieldValue::Float(_), FieldValue::Float(x)) => {
                let mut increments = local.increments.clone();
                increments.insert(remote.priority.hash, *x);
                Ok(FieldState {
                    value: FieldValue::Float(increments.values().sum()),
                    winner,
                    increments,
                })
            }
            (existing, incoming) => Err(CrdtError::CounterTypeMismatch {
                existing: existing.type_name(),
                incoming: incoming.type_name(),
            }),
        }
    }

    fn validate(&self, value: &FieldValue) -> Result<(), CrdtError> {
        let negative = match value {
            FieldValue::Int(n) => *n < 0,
            FieldValue::Float(x) if x.is_finite() => *x < 0.0,
            other => {
                return Err(CrdtError::InvalidValue {
                    kind: self.kind_name(),
                    found: other.type_name(),
                })
            }
        };
        if negative && !self.allow_decrement {
            return Err(CrdtError::NegativeIncrement);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::ContentHash;
    use crate::lattice::fold;

    #[test]
    fn test_increments_sum() {
        let values = [FieldValue::Int(10), FieldValue::Int(5), FieldValue::Int(-3)];
        let updates = values
            .iter()
            .enumerate()
            .map(|(i, v)| FieldUpdate::new(v, i as u64 + 1, ContentHash::digest(&[i as u8])));

        let state = fold(&Counter::positive_negative(), updates).unwrap();
        assert_eq!(state.value, FieldValue::Int(12));
        assert_eq!(state.winner.unwrap().height, 3);
    }

    #[test]
    fn test_float_sum_ignores_arrival_order() {
        let values = [FieldValue::Float(0.1), FieldValue::Float(0.2), FieldValue::Float(0.3)];
        let updates: Vec<_> = values
            .iter()
            .enumerate()
            .map(|(i, v)| FieldUpdate::new(v, 1, ContentHash::digest(&[i as u8])))
            .collect();

        let forward = fold(&Counter::positive_negative(), updates.iter().copied()).unwrap();
        let backward = fold(&Counter::positive_negative(), updates.iter().rev().copied()).unwrap();
        assert_eq!(forward, backward);
        assert_eq!(forward.increments.len(), 3);
    }

    #[test]
    fn test_grow_only_rejects_negative() {
        let counter = Counter::grow_only();
        assert_eq!(counter.validate(&FieldValue::Int(-1)), Err(CrdtError::NegativeIncrement));
        assert!(counter.validate(&FieldValue::Int(0)).is_ok());
    }

    #[test]
    fn test_type_mismatch() {
        let counter = Counter::positive_negative();
        let float = FieldValue::Float(1.5);
        let int = FieldValue::Int(1);
        let state = counter
            .merge(&FieldState::default(), &FieldUpdate::new(&float, 1, ContentHash::digest(b"a")))
            .unwrap();
        let err = counter
            .merge(&state, &FieldUpdate::new(&int, 2, ContentHash::digest(b"b")))
            .unwrap_err();
        assert!(matches!(err, CrdtError::CounterTypeMismatch { .. }));
    }

    #[test]
    fn test_non_numeric_rejected() {
        assert!(Counter::grow_only().validate(&FieldValue::from("ten")).is_err());
        assert!(Counter::grow_only().validate(&FieldValue::Null).is_err());
    }
}
