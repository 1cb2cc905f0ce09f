//! Last-Write-Wins (LWW) register field.
//!
//! The register keeps the value of the delta with the greatest height. Equal
//! heights are concurrent writes; the delta whose content hash is
//! lexicographically greatest wins, so every replica picks the same survivor.

use crate::error::CrdtError;
use crate::lattice::{FieldCrdt, FieldState, FieldUpdate, Priority};
use crate::value::FieldValue;

/// Stateless merge logic for LWW fields.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LwwRegister;

impl LwwRegister {
    /// Pick the surviving priority of two deltas.
    pub fn survivor(a: Priority, b: Priority) -> Priority {
        a.max(b)
    }
}

impl FieldCrdt for LwwRegister {
    fn merge(&self, local: &FieldState, remote: &FieldUpdate<'_>) -> Result<FieldState, CrdtError> {
        match local.winner {
            Some(current) if LwwRegister::survivor(current, remote.priority) == current => Ok(local.clone()),
            _ => Ok(FieldState {
                value: remote.value.clone(),
                winner: Some(remote.priority),
                ..FieldState::default()
            }),
        }
    }

    fn validate(&self, value: &FieldValue) -> Result<(), CrdtError> {
        if value.is_well_formed() {
            Ok(())
        } else {
            Err(CrdtError::InvalidValue {
                kind: "lww",
                found: value.type_name(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::ContentHash;

    fn hash_with_first_byte(b: u8) -> ContentHash {
        let mut bytes = [0u8; 32];
        bytes[0] = b;
        ContentHash::from_bytes(bytes)
    }

    #[test]
    fn test_higher_height_wins() {
        let old = FieldValue::Int(21);
        let new = FieldValue::Int(45);
        let state = LwwRegister
            .merge(&FieldState::default(), &FieldUpdate::new(&old, 1, hash_with_first_byte(0xff)))
            .unwrap();
        let state = LwwRegister
            .merge(&state, &FieldUpdate::new(&new, 2, hash_with_first_byte(0x01)))
            .unwrap();
        assert_eq!(state.value, FieldValue::Int(45));
        assert_eq!(state.winner.unwrap().height, 2);
    }

    #[test]
    fn test_lower_height_never_overwrites() {
        let a = FieldValue::Int(60);
        let b = FieldValue::Int(21);
        let state = LwwRegister
            .merge(&FieldState::default(), &FieldUpdate::new(&a, 3, hash_with_first_byte(0x00)))
            .unwrap();
        let state = LwwRegister
            .merge(&state, &FieldUpdate::new(&b, 2, hash_with_first_byte(0xff)))
            .unwrap();
        assert_eq!(state.value, FieldValue::Int(60));
    }

    #[test]
    fn test_tie_breaks_on_greatest_hash() {
        let low = FieldValue::Int(45);
        let high = FieldValue::Int(60);
        let low_update = FieldUpdate::new(&low, 2, hash_with_first_byte(0x10));
        let high_update = FieldUpdate::new(&high, 2, hash_with_first_byte(0x20));

        let one_way = LwwRegister
            .merge(&LwwRegister.merge(&FieldState::default(), &low_update).unwrap(), &high_update)
            .unwrap();
        let other_way = LwwRegister
            .merge(&LwwRegister.merge(&FieldState::default(), &high_update).unwrap(), &low_update)
            .unwrap();

        assert_eq!(one_way, other_way);
        assert_eq!(one_way.value, FieldValue::Int(60));
    }

    #[test]
    fn test_non_finite_float_rejected() {
        assert!(LwwRegister.validate(&FieldValue::Float(f64::NAN)).is_err());
        assert!(LwwRegister.validate(&FieldValue::Float(1.5)).is_ok());
    }
}
