//! Core protocol types shared by the coordinator and server nodes

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

/// Stable numeric object id. Ids start at 1; 0 is never allocated.
pub type ObjectId = u64;

/// Identity of a server node.
///
/// Over HTTP this is the node's callback base URL; the in-process
/// transport accepts any unique name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServerId(String);

impl ServerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into().trim_end_matches('/').to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ServerId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// A node's local accessibility level for an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockGrade {
    None,
    Read,
    Write,
}

impl LockGrade {
    /// Is this grade enough to perform an access needing `required`?
    pub fn satisfies(self, required: LockGrade) -> bool {
        self >= required
    }
}

impl fmt::Display for LockGrade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockGrade::None => write!(f, "none"),
            LockGrade::Read => write!(f, "read"),
            LockGrade::Write => write!(f, "write"),
        }
    }
}

/// Opaque shared-object state.
///
/// Encoded as base64 in human-readable formats and as raw bytes otherwise.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Payload(Bytes);

impl Payload {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Lossy UTF-8 view, handy for logs and the demo console.
    pub fn to_text(&self) -> String {
        String::from_utf8_lossy(&self.0).into_owned()
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Payload({} bytes)", self.0.len())
    }
}

impl From<&str> for Payload {
    fn from(s: &str) -> Self {
        Self(Bytes::copy_from_slice(s.as_bytes()))
    }
}

impl From<String> for Payload {
    fn from(s: String) -> Self {
        Self(Bytes::from(s))
    }
}

impl From<Vec<u8>> for Payload {
    fn from(v: Vec<u8>) -> Self {
        Self(Bytes::from(v))
    }
}

impl Serialize for Payload {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(&BASE64.encode(&self.0))
        } else {
            serializer.serialize_bytes(&self.0)
        }
    }
}

impl<'de> Deserialize<'de> for Payload {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct PayloadVisitor;

        impl<'de> Visitor<'de> for PayloadVisitor {
            type Value = Payload;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a base64 string or a byte array")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Payload, E> {
                BASE64.decode(v).map(Payload::from).map_err(E::custom)
            }

            fn visit_bytes<E: de::Error>(self, v: &[u8]) -> Result<Payload, E> {
                Ok(Payload(Bytes::copy_from_slice(v)))
            }

            fn visit_byte_buf<E: de::Error>(self, v: Vec<u8>) -> Result<Payload, E> {
                Ok(Payload::from(v))
            }

            fn visit_seq<A: de::SeqAccess<'de>>(self, mut seq: A) -> Result<Payload, A::Error> {
                let mut out = Vec::with_capacity(seq.size_hint().unwrap_or(0));
                while let Some(b) = seq.next_element::<u8>()? {
                    out.push(b);
                }
                Ok(Payload::from(out))
            }
        }

        if deserializer.is_human_readable() {
            deserializer.deserialize_str(PayloadVisitor)
        } else {
            deserializer.deserialize_byte_buf(PayloadVisitor)
        }
    }
}

/// A lock grant returned by the coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grant {
    pub object: ObjectId,
    pub grade: LockGrade,
    /// Per-object grant sequence number; invalidations refer to it.
    pub epoch: u64,
    pub payload: Payload,
}

/// Coordinator -> node revocation of the grant issued with `epoch`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invalidation {
    pub object: ObjectId,
    pub epoch: u64,
}

/// Result of a successful name lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectRef {
    pub id: ObjectId,
    pub name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_json_is_base64() {
        let payload = Payload::from("hello");
        let json = serde_json::to_string(&payload).unwrap();
        assert_eq!(json, "\"aGVsbG8=\"");
        let back: Payload = serde_json::from_str(&json).unwrap();
        assert_eq!(back, payload);
    }

    #[test]
    fn test_payload_bincode_is_raw() {
        let payload = Payload::from(vec![0u8, 1, 2, 255]);
        let encoded = bincode::serialize(&payload).unwrap();
        // u64 length prefix + raw bytes
        assert_eq!(encoded.len(), 8 + 4);
        let back: Payload = bincode::deserialize(&encoded).unwrap();
        assert_eq!(back, payload);
    }

    #[test]
    fn test_grade_ordering() {
        assert!(LockGrade::Write.satisfies(LockGrade::Read));
        assert!(LockGrade::Read.satisfies(LockGrade::Read));
        assert!(!LockGrade::Read.satisfies(LockGrade::Write));
        assert!(!LockGrade::None.satisfies(LockGrade::Read));
    }

    #[test]
    fn test_server_id_trims_trailing_slash() {
        let a = ServerId::new("http://127.0.0.1:7100/");
        let b = ServerId::new("http://127.0.0.1:7100");
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "http://127.0.0.1:7100");
    }
}
