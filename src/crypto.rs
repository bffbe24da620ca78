//! AEAD primitive behind the binding engine.
//!
//! The engine only needs one operation pair: authenticated encrypt/decrypt
//! of a payload in place, with the tag detached (it lives in the image
//! header, not appended to the ciphertext). Devices route this to their
//! crypto engine; [`Aes256GcmCipher`] is the software implementation used
//! on hosts, in emulation and in tests.

use aes_gcm::aead::AeadInPlace;
use aes_gcm::{Aes256Gcm, KeyInit, Nonce, Tag};

/// AES-256 key bytes.
pub const KEY_SIZE: usize = 32;
/// GCM nonce bytes.
pub const IV_SIZE: usize = 12;
/// GCM authentication tag bytes.
pub const TAG_SIZE: usize = 16;

/// Opaque AEAD failure: bad tag, bad parameter size, engine fault.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[error("aead operation failed")]
pub struct CryptoError;

/// In-place authenticated cipher over image payloads.
///
/// `key` is [`KEY_SIZE`] bytes, `iv` is [`IV_SIZE`] bytes, tags are
/// [`TAG_SIZE`] bytes. Implementations take `&mut self` so stateful
/// hardware engines fit.
pub trait ImageCipher {
    fn encrypt(
        &mut self,
        key: &[u8],
        iv: &[u8],
        data: &mut [u8],
        tag: &mut [u8],
    ) -> Result<(), CryptoError>;

    fn decrypt(
        &mut self,
        key: &[u8],
        iv: &[u8],
        data: &mut [u8],
        tag: &[u8],
    ) -> Result<(), CryptoError>;
}

/// Software AES-256-GCM.
#[derive(Clone, Copy, Debug, Default)]
pub struct Aes256GcmCipher;

impl ImageCipher for Aes256GcmCipher {
    fn encrypt(
        &mut self,
        key: &[u8],
        iv: &[u8],
        data: &mut [u8],
        tag: &mut [u8],
    ) -> Result<(), CryptoError> {
        if iv.len() != IV_SIZE || tag.len() != TAG_SIZE {
            return Err(CryptoError);
        }
        let aead = Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError)?;
        let computed = aead
            .encrypt_in_place_detached(Nonce::from_slice(iv), &[], data)
            .map_err(|_| CryptoError)?;
        tag.copy_from_slice(&computed);
        Ok(())
    }

    fn decrypt(
        &mut self,
        key: &[u8],
        iv: &[u8],
        data: &mut [u8],
        tag: &[u8],
    ) -> Result<(), CryptoError> {
        if iv.len() != IV_SIZE || tag.len() != TAG_SIZE {
            return Err(CryptoError);
        }
        let aead = Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError)?;
        aead.decrypt_in_place_detached(Nonce::from_slice(iv), &[], data, Tag::from_slice(tag))
            .map_err(|_| CryptoError)
    }
}
