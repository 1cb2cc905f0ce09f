//! Field kinds and merge dispatch.

use crate::error::CrdtError;
use crate::lattice::{FieldCrdt, FieldState, FieldUpdate};
use crate::lwwreg::LwwRegister;
use crate::pncounter::Counter;
use crate::value::FieldValue;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The CRDT a field merges with. Chosen per field in a collection definition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum FieldKind {
    #[default]
    LwwRegister,
    PCounter,
    PNCounter,
}

impl FieldKind {
    pub fn is_counter(&self) -> bool {
        matches!(self, FieldKind::PCounter | FieldKind::PNCounter)
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldKind::LwwRegister => f.write_str("lww"),
            FieldKind::PCounter => f.write_str("p-counter"),
            FieldKind::PNCounter => f.write_str("pn-counter"),
        }
    }
}

impl FieldCrdt for FieldKind {
    fn initial_value(&self) -> FieldState {
        match self {
            FieldKind::LwwRegister => LwwRegister.initial_value(),
            FieldKind::PCounter => Counter::grow_only().initial_value(),
            FieldKind::PNCounter => Counter::positive_negative().initial_value(),
        }
    }

    fn merge(&self, local: &FieldState, remote: &FieldUpdate<'_>) -> Result<FieldState, CrdtError> {
        match self {
            FieldKind::LwwRegister => LwwRegister.merge(local, remote),
            FieldKind::PCounter => Counter::grow_only().merge(local, remote),
            FieldKind::PNCounter => Counter::positive_negative().merge(local, remote),
        }
    }

    fn validate(&self, value: &FieldValue) -> Result<(), CrdtError> {
        match self {
            FieldKind::LwwRegister => LwwRegister.validate(value),
            FieldKind::PCounter => Counter::grow_only().validate(value),
            FieldKind::PNCounter => Counter::positive_negative().validate(value),
        }
    }
}
