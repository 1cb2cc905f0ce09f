//! # tessera-core
//!
//! Content-addressed building blocks of the Tessera document store:
//!
//! - [`ContentHash`]: SHA-256 identifiers for encoded deltas
//! - [`Delta`]: immutable field or composite change records
//! - [`codec`]: canonical, deterministic delta encoding
//! - [`FieldCrdt`]: per-field merge capability, dispatched through [`FieldKind`]

pub mod codec;
pub mod delta;
pub mod docid;
pub mod error;
pub mod hash;
pub mod kind;
pub mod lattice;
pub mod lwwreg;
pub mod pncounter;
pub mod value;

pub use codec::{AnySchema, EncodedDelta, SchemaRegistry};
pub use delta::{Delta, DeltaBuilder, DeltaTarget, DocStatus, FieldLink};
pub use docid::DocumentId;
pub use error::{CodecError, CrdtError};
pub use hash::{ContentHash, InvalidHash};
pub use kind::FieldKind;
pub use lattice::{FieldCrdt, FieldState, FieldUpdate, Priority};
pub use lwwreg::LwwRegister;
pub use pncounter::Counter;
pub use value::FieldValue;
