//! Canonical delta encoding.
//!
//! Bytes are a one byte codec version followed by the postcard encoding of a
//! normalized [`Delta`]. Identical logical deltas always encode to identical
//! bytes, so the SHA-256 of the bytes is a stable identifier.

use crate::delta::{Delta, DocStatus};
use crate::error::CodecError;
use crate::hash::ContentHash;
use crate::value::FieldValue;
use std::borrow::Cow;
use std::collections::HashSet;

pub const CODEC_VERSION: u8 = 1;

/// Answers whether a schema version tag is known locally.
pub trait SchemaRegistry {
    fn knows_version(&self, version: &str) -> bool;
}

/// Registry that accepts every version.
#[derive(Clone, Copy, Debug, Default)]
pub struct AnySchema;

impl SchemaRegistry for AnySchema {
    fn knows_version(&self, _version: &str) -> bool {
        true
    }
}

impl SchemaRegistry for HashSet<String> {
    fn knows_version(&self, version: &str) -> bool {
        self.contains(version)
    }
}

impl<R: SchemaRegistry + ?Sized> SchemaRegistry for &R {
    fn knows_version(&self, version: &str) -> bool {
        (**self).knows_version(version)
    }
}

/// An encoded delta together with its identifier.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncodedDelta {
    pub bytes: Vec<u8>,
    pub hash: ContentHash,
}

/// Encode a delta canonically and compute its hash.
pub fn encode(delta: &Delta) -> Result<EncodedDelta, CodecError> {
    let canonical = if delta.is_normalized() {
        Cow::Borrowed(delta)
    } else {
        let mut owned = delta.clone();
        owned.normalize();
        Cow::Owned(owned)
    };

    let body = postcard::to_stdvec(canonical.as_ref()).map_err(|e| CodecError::Encode(e.to_string()))?;
    let hash = ContentHash::of_block(CODEC_VERSION, &body);
    let mut bytes = Vec::with_capacity(1 + body.len());
    bytes.push(CODEC_VERSION);
    bytes.extend(body);
    Ok(EncodedDelta { bytes, hash })
}

/// Decode bytes into a delta.
///
/// Rejects anything that does not re-encode to exactly the same bytes.
pub fn decode(bytes: &[u8], schemas: impl SchemaRegistry) -> Result<Delta, CodecError> {
    let (version, body) = bytes
        .split_first()
        .ok_or_else(|| CodecError::Decode("empty input".to_string()))?;
    if *version != CODEC_VERSION {
        return Err(CodecError::Decode(format!("unsupported codec version {}", version)));
    }

    let delta: Delta = postcard::from_bytes(body)?;
    if !delta.is_normalized() {
        return Err(CodecError::Decode("references are not in canonical order".to_string()));
    }
    if delta.height == 0 {
        return Err(CodecError::Decode("height must be at least 1".to_string()));
    }
    let reencoded = encode(&delta)?;
    if reencoded.bytes != bytes {
        return Err(CodecError::Decode("non-canonical encoding".to_string()));
    }

    if !schemas.knows_version(&delta.schema_version) {
        return Err(CodecError::SchemaMismatch {
            version: delta.schema_version,
        });
    }
    Ok(delta)
}

/// Decode bytes that were requested under a known hash.
pub fn decode_verified(
    bytes: &[u8],
    expected: &ContentHash,
    schemas: impl SchemaRegistry,
) -> Result<Delta, CodecError> {
    let actual = ContentHash::digest(bytes);
    if actual != *expected {
        return Err(CodecError::HashMismatch {
            expected: *expected,
            actual,
        });
    }
    decode(bytes, schemas)
}

pub fn encode_value(value: &FieldValue) -> Result<Vec<u8>, CodecError> {
    postcard::to_stdvec(value).map_err(|e| CodecError::Encode(e.to_string()))
}

pub fn decode_value(bytes: &[u8]) -> Result<FieldValue, CodecError> {
    Ok(postcard::from_bytes(bytes)?)
}

pub fn encode_status(status: DocStatus) -> Result<Vec<u8>, CodecError> {
    postcard::to_stdvec(&status).map_err(|e| CodecError::Encode(e.to_string()))
}

pub fn decode_status(bytes: &[u8]) -> Result<DocStatus, CodecError> {
    Ok(postcard::from_bytes(bytes)?)
}
