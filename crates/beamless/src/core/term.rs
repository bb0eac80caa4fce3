//! Opaque message payloads.
//!
//! The runtime never looks inside user data. Anything `Serialize +
//! DeserializeOwned` is a [`Term`]; once encoded it travels as a
//! [`RawTerm`], an immutable byte buffer that is cheap to clone and can be
//! handed to a transport unchanged.
//!
//! ```
//! use beamless::{RawTerm, Term};
//!
//! let raw = ("counter".to_string(), 3u32).encode().unwrap();
//! let (name, n): (String, u32) = raw.decode().unwrap();
//! assert_eq!(name, "counter");
//! assert_eq!(n, 3);
//! ```

use serde::de::{self, DeserializeOwned, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Failure converting between a value and its encoded form.
#[derive(Debug, Error)]
pub enum TermError {
    /// The value could not be serialized.
    #[error("failed to encode term: {0}")]
    Encode(#[source] postcard::Error),

    /// The bytes do not hold a value of the requested type.
    #[error("failed to decode term: {0}")]
    Decode(#[source] postcard::Error),
}

/// A value that can be sent between processes.
///
/// Implemented for every `Serialize + DeserializeOwned + Send + 'static` type.
pub trait Term: Sized + Send + 'static {
    /// Encodes this value.
    fn encode(&self) -> Result<RawTerm, TermError>;

    /// Decodes a value of this type from `raw`.
    fn decode(raw: &RawTerm) -> Result<Self, TermError>;
}

impl<T> Term for T
where
    T: Serialize + DeserializeOwned + Send + 'static,
{
    fn encode(&self) -> Result<RawTerm, TermError> {
        postcard::to_allocvec(self)
            .map(RawTerm::from)
            .map_err(TermError::Encode)
    }

    fn decode(raw: &RawTerm) -> Result<Self, TermError> {
        postcard::from_bytes(raw.as_bytes()).map_err(TermError::Decode)
    }
}

/// An encoded term whose type is not known to the runtime.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct RawTerm(Arc<[u8]>);

impl RawTerm {
    /// Wraps already-encoded bytes.
    pub fn from_bytes(bytes: impl Into<Arc<[u8]>>) -> Self {
        Self(bytes.into())
    }

    /// The encoded bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Decodes into `T`.
    pub fn decode<T: Term>(&self) -> Result<T, TermError> {
        T::decode(self)
    }

    /// Decodes into `T`, returning `None` when the bytes hold something else.
    pub fn downcast<T: Term>(&self) -> Option<T> {
        T::decode(self).ok()
    }

    /// Length of the encoding in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the encoding is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u8>> for RawTerm {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes.into())
    }
}

impl fmt::Debug for RawTerm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RawTerm({} bytes)", self.0.len())
    }
}

impl Serialize for RawTerm {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(&self.0)
    }
}

impl<'de> Deserialize<'de> for RawTerm {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct BytesVisitor;

        impl<'de> Visitor<'de> for BytesVisitor {
            type Value = RawTerm;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("encoded term bytes")
            }

            fn visit_bytes<E: de::Error>(self, v: &[u8]) -> Result<RawTerm, E> {
                Ok(RawTerm::from_bytes(v))
            }

            fn visit_byte_buf<E: de::Error>(self, v: Vec<u8>) -> Result<RawTerm, E> {
                Ok(RawTerm::from(v))
            }

            fn visit_seq<A: de::SeqAccess<'de>>(self, mut seq: A) -> Result<RawTerm, A::Error> {
                let mut bytes = Vec::with_capacity(seq.size_hint().unwrap_or(0));
                while let Some(b) = seq.next_element::<u8>()? {
                    bytes.push(b);
                }
                Ok(RawTerm::from(bytes))
            }
        }

        deserializer.deserialize_bytes(BytesVisitor)
    }
}
