//! Field merge capability shared by every field CRDT.
//!
//! A field's state is whatever survives merging all of its deltas. Merge
//! functions must be commutative, associative and idempotent over the set of
//! deltas applied so that every replica converges regardless of arrival order.
//! Idempotence across redelivery is guaranteed one layer up: a delta hash is
//! only ever merged once per replica.

use crate::error::CrdtError;
use crate::hash::ContentHash;
use crate::value::FieldValue;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Total order over deltas used for tie-breaking: height first, then hash bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Priority {
    pub height: u64,
    pub hash: ContentHash,
}

impl Priority {
    pub fn new(height: u64, hash: ContentHash) -> Self {
        Priority { height, hash }
    }
}

/// Materialized state of one field.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Default)]
pub struct FieldState {
    pub value: FieldValue,
    /// Highest-priority delta merged so far, `None` before the first merge.
    pub winner: Option<Priority>,
    /// Float counter increments by delta hash. Empty for every other kind.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub increments: BTreeMap<ContentHash, f64>,
}

/// A remote field delta reduced to what merge functions need.
#[derive(Clone, Copy, Debug)]
pub struct FieldUpdate<'a> {
    pub value: &'a FieldValue,
    pub priority: Priority,
}

impl<'a> FieldUpdate<'a> {
    pub fn new(value: &'a FieldValue, height: u64, hash: ContentHash) -> Self {
        FieldUpdate {
            value,
            priority: Priority::new(height, hash),
        }
    }
}

/// The capability every field CRDT provides.
pub trait FieldCrdt {
    /// State of a field no delta has touched.
    fn initial_value(&self) -> FieldState {
        FieldState::default()
    }

    /// Merge one delta into the local state.
    fn merge(&self, local: &FieldState, remote: &FieldUpdate<'_>) -> Result<FieldState, CrdtError>;

    /// Reject values this kind can never hold before a delta is created.
    fn validate(&self, _value: &FieldValue) -> Result<(), CrdtError> {
        Ok(())
    }
}

/// Fold a sequence of updates into a state starting from `initial_value`.
pub fn fold<'a, C, I>(crdt: &C, updates: I) -> Result<FieldState, CrdtError>
where
    C: FieldCrdt + ?Sized,
    I: IntoIterator<Item = FieldUpdate<'a>>,
{
    updates
        .into_iter()
        .try_fold(crdt.initial_value(), |state, update| crdt.merge(&state, &update))
}
