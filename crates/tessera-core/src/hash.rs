//! Block identifiers.
//!
//! A block is named by the SHA-256 of its full encoded form, codec version
//! byte included, so the same delta under two codec versions never shares a
//! name. Human-readable formats (JSON messages, persisted keys) carry the
//! lowercase hex form; binary formats carry the raw 32 bytes.

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

const LEN: usize = 32;

/// Name of an encoded block. Byte order is the LWW tie-break order.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentHash([u8; LEN]);

impl ContentHash {
    pub const fn from_bytes(bytes: [u8; LEN]) -> Self {
        ContentHash(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; LEN] {
        &self.0
    }

    /// Digest of an arbitrary byte string.
    pub fn digest(data: &[u8]) -> Self {
        ContentHash(Sha256::digest(data).into())
    }

    /// Digest of a block stored as `version` followed by `body`.
    ///
    /// Equal to `digest` over the concatenated bytes.
    pub fn of_block(version: u8, body: &[u8]) -> Self {
        let mut sha = Sha256::new();
        sha.update([version]);
        sha.update(body);
        ContentHash(sha.finalize().into())
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Option<Self> {
        let mut bytes = [0u8; LEN];
        hex::decode_to_slice(s, &mut bytes).ok()?;
        Some(ContentHash(bytes))
    }

    /// First four bytes in hex, for logs.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.short())
    }
}

impl FromStr for ContentHash {
    type Err = InvalidHash;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ContentHash::from_hex(s).ok_or_else(|| InvalidHash(s.to_string()))
    }
}

/// Returned when a string is not a 64 character hex digest.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("invalid content hash: {0:?}")]
pub struct InvalidHash(pub String);

impl Serialize for ContentHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(&self.to_hex())
        } else {
            serializer.serialize_bytes(&self.0)
        }
    }
}

impl<'de> Deserialize<'de> for ContentHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            deserializer.deserialize_str(HashVisitor)
        } else {
            deserializer.deserialize_bytes(HashVisitor)
        }
    }
}

struct HashVisitor;

impl<'de> Visitor<'de> for HashVisitor {
    type Value = ContentHash;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a 32 byte content hash")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<ContentHash, E> {
        ContentHash::from_hex(v).ok_or_else(|| E::invalid_value(de::Unexpected::Str(v), &self))
    }

    fn visit_bytes<E: de::Error>(self, v: &[u8]) -> Result<ContentHash, E> {
        let bytes: [u8; LEN] = v.try_into().map_err(|_| E::invalid_length(v.len(), &self))?;
        Ok(ContentHash(bytes))
    }

    fn visit_seq<A: de::SeqAccess<'de>>(self, mut seq: A) -> Result<ContentHash, A::Error> {
        let mut bytes = [0u8; LEN];
        for (i, slot) in bytes.iter_mut().enumerate() {
            *slot = seq.next_element()?.ok_or_else(|| de::Error::invalid_length(i, &self))?;
        }
        Ok(ContentHash(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_hash_covers_version_byte() {
        let body = b"delta body";
        let v1 = ContentHash::of_block(1, body);
        assert_eq!(v1, ContentHash::digest(b"\x01delta body"));
        assert_ne!(v1, ContentHash::of_block(2, body));
    }

    #[test]
    fn test_hex_form() {
        let hash = ContentHash::digest(b"test data");
        let parsed: ContentHash = hash.to_string().parse().unwrap();
        assert_eq!(parsed, hash);
        assert_eq!(hash.short(), hash.to_hex()[..8]);
        assert!(ContentHash::from_hex("abcd").is_none());
        assert!("zz".repeat(32).parse::<ContentHash>().is_err());
    }

    #[test]
    fn test_json_carries_hex_and_postcard_carries_bytes() {
        let hash = ContentHash::digest(b"x");
        let json = serde_json::to_string(&hash).unwrap();
        assert_eq!(json, format!("\"{}\"", hash.to_hex()));
        assert_eq!(serde_json::from_str::<ContentHash>(&json).unwrap(), hash);

        let packed = postcard::to_stdvec(&hash).unwrap();
        assert_eq!(packed.len(), 1 + LEN);
        assert_eq!(postcard::from_bytes::<ContentHash>(&packed).unwrap(), hash);
    }

    #[test]
    fn test_ordering_is_byte_order() {
        let mut low = [0u8; LEN];
        let mut high = [0u8; LEN];
        low[0] = 0x01;
        high[0] = 0xff;
        assert!(ContentHash::from_bytes(high) > ContentHash::from_bytes(low));
    }
}
