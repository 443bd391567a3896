//! Authenticated encryption for cache payloads.
//!
//! AES-256-GCM with a 32-byte process-wide key. Every call to
//! [`CryptoUnit::encrypt`] draws a fresh 12-byte nonce from the OS RNG; callers
//! cannot supply their own. The 16-byte tag is kept detached from the
//! ciphertext so an entry stores the three values side by side.

use aes_gcm::aead::{self, AeadCore, AeadInPlace, KeyInit, OsRng};
use aes_gcm::Aes256Gcm;
use base64::{engine::general_purpose, Engine as _};
use rand::RngCore;
use std::fmt;
use zeroize::Zeroizing;

use crate::error::{CacheError, Result};

pub const KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 12;
pub const TAG_LEN: usize = 16;

/// Symmetric key material. Zeroized on drop and never printed.
#[derive(Clone)]
pub struct CipherKey(Zeroizing<[u8; KEY_LEN]>);

impl CipherKey {
    pub fn generate() -> Self {
        let mut key = Zeroizing::new([0u8; KEY_LEN]);
        OsRng.fill_bytes(&mut key[..]);
        Self(key)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != KEY_LEN {
            return Err(CacheError::InvalidKey(format!(
                "expected {KEY_LEN} bytes, got {}",
                bytes.len()
            )));
        }
        let mut key = Zeroizing::new([0u8; KEY_LEN]);
        key.copy_from_slice(bytes);
        Ok(Self(key))
    }

    pub fn from_base64(encoded: &str) -> Result<Self> {
        let decoded = Zeroizing::new(
            general_purpose::STANDARD
                .decode(encoded.trim())
                .map_err(|e| CacheError::InvalidKey(format!("base64: {e}")))?,
        );
        Self::from_bytes(&decoded)
    }

    pub fn to_base64(&self) -> Zeroizing<String> {
        Zeroizing::new(general_purpose::STANDARD.encode(&self.0[..]))
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl fmt::Debug for CipherKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CipherKey(<redacted>)")
    }
}

/// Output of a single encryption call. The three fields are only ever
/// produced together and must be passed back together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sealed {
    pub ciphertext: Vec<u8>,
    pub nonce: [u8; NONCE_LEN],
    pub tag: [u8; TAG_LEN],
}

pub struct CryptoUnit {
    cipher: Aes256Gcm,
}

impl CryptoUnit {
    pub fn new(key: &CipherKey) -> Self {
        let cipher = Aes256Gcm::new(aead::Key::<Aes256Gcm>::from_slice(key.as_bytes()));
        Self { cipher }
    }

    /// Encrypt `plaintext`, authenticating `aad` alongside it.
    pub fn encrypt(&self, plaintext: &[u8], aad: &[u8]) -> Result<Sealed> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let mut buffer = plaintext.to_vec();
        let tag = self
            .cipher
            .encrypt_in_place_detached(&nonce, aad, &mut buffer)
            .map_err(|_| CacheError::Encryption)?;

        let mut nonce_bytes = [0u8; NONCE_LEN];
        nonce_bytes.copy_from_slice(nonce.as_slice());
        let mut tag_bytes = [0u8; TAG_LEN];
        tag_bytes.copy_from_slice(tag.as_slice());
        Ok(Sealed {
            ciphertext: buffer,
            nonce: nonce_bytes,
            tag: tag_bytes,
        })
    }

    /// Verify and decrypt. A tag mismatch (tampering, wrong key, wrong `aad`)
    /// yields [`CacheError::AuthenticationFailure`] and no plaintext.
    pub fn decrypt(&self, sealed: &Sealed, aad: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        let mut buffer = Zeroizing::new(sealed.ciphertext.clone());
        self.cipher
            .decrypt_in_place_detached(
                aead::Nonce::<Aes256Gcm>::from_slice(&sealed.nonce),
                aad,
                buffer.as_mut_slice(),
                aead::Tag::<Aes256Gcm>::from_slice(&sealed.tag),
            )
            .map_err(|_| CacheError::AuthenticationFailure)?;
        Ok(buffer)
    }
}
