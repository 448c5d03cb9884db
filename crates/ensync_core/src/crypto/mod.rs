//! Document encryption for remote replicas.
//!
//! Local replicas hold plaintext; everything that leaves the device is
//! an [`EncryptedEnvelope`](ensync_protocol::EncryptedEnvelope).
//!
//! ## Security Model
//!
//! - AES-256-GCM with a key derived per document via HKDF-SHA256
//! - Random 96-bit nonce per encryption
//! - Document id and revision bound as associated data
//! - HMAC-SHA256 over the envelope, verified before any decryption
//! - Keys are zeroized on drop and never printed
//!
//! ## Usage
//!
//! ```ignore
//! use ensync_core::crypto::{CryptoCodec, KeyMaterial};
//!
//! let codec = CryptoCodec::new(KeyMaterial::generate());
//! let envelope = codec.encrypt(&doc_id, &revision, &content)?;
//! let plaintext = codec.decrypt(&doc_id, &revision, &envelope)?;
//! ```

mod codec;
mod keys;

pub use codec::{CryptoCodec, NONCE_SIZE, TAG_SIZE};
pub use keys::{KeyMaterial, RevisionKey, KEY_SIZE};
