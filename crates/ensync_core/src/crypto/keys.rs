//! Key material for the crypto codec.

use crate::error::{CoreError, CoreResult};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

const REVISION_DOMAIN: &[u8] = b"ensync-revision-v1";

/// Size of each key in bytes.
pub const KEY_SIZE: usize = 32;

/// Encryption and MAC keys of one user.
///
/// Both keys are zeroized when dropped.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct KeyMaterial {
    encryption_key: [u8; KEY_SIZE],
    mac_key: [u8; KEY_SIZE],
}

impl KeyMaterial {
    /// Serialized size: encryption key followed by MAC key.
    pub const SERIALIZED_SIZE: usize = 2 * KEY_SIZE;

    /// Generates new random keys.
    #[must_use]
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let mut keys = Self {
            encryption_key: [0u8; KEY_SIZE],
            mac_key: [0u8; KEY_SIZE],
        };
        rng.fill_bytes(&mut keys.encryption_key);
        rng.fill_bytes(&mut keys.mac_key);
        keys
    }

    /// Creates key material from its serialized form.
    ///
    /// # Errors
    ///
    /// Returns an error if `bytes` is not exactly 64 bytes long.
    pub fn from_bytes(bytes: &[u8]) -> CoreResult<Self> {
        if bytes.len() != Self::SERIALIZED_SIZE {
            return Err(CoreError::invalid_key_size(
                bytes.len(),
                Self::SERIALIZED_SIZE,
            ));
        }
        let mut keys = Self {
            encryption_key: [0u8; KEY_SIZE],
            mac_key: [0u8; KEY_SIZE],
        };
        keys.encryption_key.copy_from_slice(&bytes[..KEY_SIZE]);
        keys.mac_key.copy_from_slice(&bytes[KEY_SIZE..]);
        Ok(keys)
    }

    /// Returns the serialized form. The buffer is wiped when dropped.
    #[must_use]
    pub fn to_bytes(&self) -> Zeroizing<Vec<u8>> {
        let mut out = Zeroizing::new(Vec::with_capacity(Self::SERIALIZED_SIZE));
        out.extend_from_slice(&self.encryption_key);
        out.extend_from_slice(&self.mac_key);
        out
    }

    /// Derives both keys from a high-entropy secret using HKDF-SHA256.
    ///
    /// HKDF is not a password hash; `secret` must already carry enough
    /// entropy (for example a key handed out by a key server).
    pub fn derive_from_secret(secret: &[u8], salt: &[u8]) -> CoreResult<Self> {
        let hk = Hkdf::<Sha256>::new(Some(salt), secret);
        let mut keys = Self {
            encryption_key: [0u8; KEY_SIZE],
            mac_key: [0u8; KEY_SIZE],
        };
        hk.expand(b"ensync-encryption-key-v1", &mut keys.encryption_key)
            .map_err(|_| CoreError::encryption_failed("HKDF expand failed"))?;
        hk.expand(b"ensync-mac-key-v1", &mut keys.mac_key)
            .map_err(|_| CoreError::encryption_failed("HKDF expand failed"))?;
        Ok(keys)
    }

    pub(crate) fn encryption_key(&self) -> &[u8; KEY_SIZE] {
        &self.encryption_key
    }

    pub(crate) fn mac_key(&self) -> &[u8; KEY_SIZE] {
        &self.mac_key
    }

    /// Returns the key that keys content digests in revision hashes.
    ///
    /// Replicas sharing this key mint identical revisions for identical
    /// edits; a server without it cannot confirm guesses about content from
    /// the revisions it stores.
    #[must_use]
    pub fn revision_key(&self) -> RevisionKey {
        RevisionKey(self.mac_key)
    }
}

/// Key for the content digests mixed into revision hashes.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct RevisionKey([u8; KEY_SIZE]);

impl RevisionKey {
    /// HMAC-SHA256 of `bytes`, separated from envelope MACs by a domain tag.
    pub fn digest(&self, bytes: &[u8]) -> CoreResult<[u8; 32]> {
        let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(&self.0)
            .map_err(|_| CoreError::encryption_failed("invalid revision key"))?;
        mac.update(REVISION_DOMAIN);
        mac.update(bytes);
        Ok(mac.finalize().into_bytes().into())
    }
}

impl std::fmt::Debug for RevisionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("RevisionKey([REDACTED])")
    }
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("encryption_key", &"[REDACTED]")
            .field("mac_key", &"[REDACTED]")
            .finish()
    }
}
