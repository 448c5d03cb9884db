//! The encrypted form of a document revision.
//!
//! Remote replicas only ever hold envelopes. The envelope is opaque to them:
//! producing and opening it is the job of the crypto codec in `ensync_core`.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Encryption scheme tag carried by every envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnvelopeScheme {
    /// AES-256-GCM with a per-document HKDF key, authenticated again with
    /// HMAC-SHA256 over the document id, revision, nonce and ciphertext.
    Aes256GcmHmacSha256,
}

impl EnvelopeScheme {
    /// Stable numeric code, mixed into the MAC input.
    pub fn code(self) -> u8 {
        match self {
            EnvelopeScheme::Aes256GcmHmacSha256 => 1,
        }
    }
}

/// Ciphertext of one document revision plus the material needed to verify it.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedEnvelope {
    /// Scheme used to produce this envelope.
    pub scheme: EnvelopeScheme,
    /// AEAD nonce.
    #[serde(with = "byte_buf")]
    pub nonce: Vec<u8>,
    /// Ciphertext with the AEAD tag appended.
    #[serde(with = "byte_buf")]
    pub ciphertext: Vec<u8>,
    /// Outer MAC over the envelope and its document binding.
    #[serde(with = "byte_buf")]
    pub mac: Vec<u8>,
}

impl fmt::Debug for EncryptedEnvelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptedEnvelope")
            .field("scheme", &self.scheme)
            .field("ciphertext_len", &self.ciphertext.len())
            .finish()
    }
}

/// Serializes `Vec<u8>` as a CBOR byte string instead of an array of integers.
pub(crate) mod byte_buf {
    use serde::de::{self, SeqAccess, Visitor};
    use serde::{Deserializer, Serializer};
    use std::fmt;

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(bytes)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        deserializer.deserialize_byte_buf(ByteBufVisitor)
    }

    struct ByteBufVisitor;

    impl<'de> Visitor<'de> for ByteBufVisitor {
        type Value = Vec<u8>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a byte string")
        }

        fn visit_bytes<E: de::Error>(self, v: &[u8]) -> Result<Self::Value, E> {
            Ok(v.to_vec())
        }

        fn visit_byte_buf<E: de::Error>(self, v: Vec<u8>) -> Result<Self::Value, E> {
            Ok(v)
        }

        fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
            let mut out = Vec::with_capacity(seq.size_hint().unwrap_or(0));
            while let Some(byte) = seq.next_element::<u8>()? {
                out.push(byte);
            }
            Ok(out)
        }
    }
}
