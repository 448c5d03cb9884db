//! Envelope encryption using AES-256-GCM plus HMAC-SHA256.

use super::keys::{KeyMaterial, KEY_SIZE};
use crate::document::Content;
use crate::error::{CoreError, CoreResult};
use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use ensync_protocol::{DocId, EncryptedEnvelope, EnvelopeScheme, Revision};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use zeroize::Zeroizing;

type HmacSha256 = Hmac<Sha256>;

/// Size of the GCM nonce in bytes.
pub const NONCE_SIZE: usize = 12;
/// Size of the GCM authentication tag in bytes.
pub const TAG_SIZE: usize = 16;

const DOCUMENT_KEY_SALT: &[u8] = b"ensync-document-key-v1";
const MAC_DOMAIN: &[u8] = b"ensync-envelope-v1";

/// Turns plaintext documents into envelopes and back.
///
/// An envelope is bound to its document id and revision: presenting it
/// under any other id or revision fails verification.
pub struct CryptoCodec {
    keys: KeyMaterial,
}

impl CryptoCodec {
    /// Creates a codec for the given keys.
    #[must_use]
    pub fn new(keys: KeyMaterial) -> Self {
        Self { keys }
    }

    /// Encrypts one revision of a document.
    pub fn encrypt(
        &self,
        doc_id: &DocId,
        revision: &Revision,
        content: &Content,
    ) -> CoreResult<EncryptedEnvelope> {
        let plaintext = Zeroizing::new(serde_json::to_vec(content)?);
        let binding = binding(doc_id, revision);

        let mut nonce = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce);

        let ciphertext = self
            .document_cipher(doc_id)?
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: &plaintext,
                    aad: &binding,
                },
            )
            .map_err(|_| CoreError::encryption_failed("AES-GCM encryption failed"))?;

        let scheme = EnvelopeScheme::Aes256GcmHmacSha256;
        let mac = self
            .envelope_mac(scheme, &binding, &nonce, &ciphertext)?
            .finalize()
            .into_bytes()
            .to_vec();

        Ok(EncryptedEnvelope {
            scheme,
            nonce: nonce.to_vec(),
            ciphertext,
            mac,
        })
    }

    /// Verifies and decrypts an envelope.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Integrity`] if the MAC or the GCM tag does not
    /// verify, which covers tampering, the wrong keys and an envelope
    /// presented under a different document id or revision.
    pub fn decrypt(
        &self,
        doc_id: &DocId,
        revision: &Revision,
        envelope: &EncryptedEnvelope,
    ) -> CoreResult<Content> {
        if envelope.nonce.len() != NONCE_SIZE {
            return Err(CoreError::integrity(doc_id, "malformed nonce"));
        }
        if envelope.ciphertext.len() < TAG_SIZE {
            return Err(CoreError::integrity(doc_id, "ciphertext too short"));
        }

        let binding = binding(doc_id, revision);
        self.envelope_mac(envelope.scheme, &binding, &envelope.nonce, &envelope.ciphertext)?
            .verify_slice(&envelope.mac)
            .map_err(|_| CoreError::integrity(doc_id, "envelope MAC mismatch"))?;

        let plaintext = Zeroizing::new(
            self.document_cipher(doc_id)?
                .decrypt(
                    Nonce::from_slice(&envelope.nonce),
                    Payload {
                        msg: &envelope.ciphertext,
                        aad: &binding,
                    },
                )
                .map_err(|_| CoreError::integrity(doc_id, "authentication tag mismatch"))?,
        );

        serde_json::from_slice(&plaintext)
            .map_err(|e| CoreError::integrity(doc_id, format!("plaintext is not JSON: {e}")))
    }

    fn document_cipher(&self, doc_id: &DocId) -> CoreResult<Aes256Gcm> {
        let hk = Hkdf::<Sha256>::new(Some(DOCUMENT_KEY_SALT), self.keys.encryption_key());
        let mut key = Zeroizing::new([0u8; KEY_SIZE]);
        hk.expand(doc_id.as_str().as_bytes(), &mut key[..])
            .map_err(|_| CoreError::encryption_failed("HKDF expand failed"))?;
        Aes256Gcm::new_from_slice(&key[..])
            .map_err(|_| CoreError::encryption_failed("invalid document key"))
    }

    fn envelope_mac(
        &self,
        scheme: EnvelopeScheme,
        binding: &[u8],
        nonce: &[u8],
        ciphertext: &[u8],
    ) -> CoreResult<HmacSha256> {
        let mut mac = <HmacSha256 as Mac>::new_from_slice(self.keys.mac_key())
            .map_err(|_| CoreError::encryption_failed("invalid MAC key"))?;
        mac.update(MAC_DOMAIN);
        mac.update(&[scheme.code()]);
        mac.update(binding);
        mac.update(nonce);
        mac.update(ciphertext);
        Ok(mac)
    }
}

impl std::fmt::Debug for CryptoCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CryptoCodec")
            .field("scheme", &EnvelopeScheme::Aes256GcmHmacSha256)
            .finish()
    }
}

/// Associated data tying an envelope to one revision of one document.
fn binding(doc_id: &DocId, revision: &Revision) -> Vec<u8> {
    let id = doc_id.as_str().as_bytes();
    let mut out = Vec::with_capacity(4 + id.len() + 8 + 32);
    out.extend_from_slice(&(id.len() as u32).to_be_bytes());
    out.extend_from_slice(id);
    out.extend_from_slice(&revision.depth.to_be_bytes());
    out.extend_from_slice(&revision.hash);
    out
}
