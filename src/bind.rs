//! Re-binding a staged FIP to this device.
//!
//! Firmware leaves the signing tooling encrypted under a shared bring-up
//! key (SSK). Before it is committed to flash it is re-encrypted, image by
//! image and in place, under the device-unique storage key (BSSK), with a
//! fresh IV drawn from the hardware TRNG for each image. Slots without the
//! encryption magic pass through untouched. The walk stops at the first
//! failure; key material only exists inside a wiped scope.

use log::{error, trace};

use crate::crypto::{ImageCipher, IV_SIZE, KEY_SIZE, TAG_SIZE};
use crate::fip::{self, EncFlags, EncHeader, TocEntry, ENC_ALGO_AES_GCM, ENC_IV_MAX, ENC_TAG_MAX};
use crate::platform::{BindingKey, Keystore, Trng};
use crate::secret::Secret;

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Fip(#[from] fip::Error),
    #[error("Failed to obtain SSK key")]
    SskUnavailable,
    #[error("Failed to obtain BSSK key")]
    BsskUnavailable,
    #[error("Failed to decrypt FIP image")]
    DecryptFailed,
    #[error("Failed to encrypt FIP image")]
    EncryptFailed,
}

/// Re-bind every encrypted image in `image` from the shared key to the
/// device-unique key, in place. `key` is borrowed scratch for key
/// material; it is wiped after each use.
pub fn rebind_fip(
    image: &mut [u8],
    keystore: &mut dyn Keystore,
    cipher: &mut dyn ImageCipher,
    trng: &mut dyn Trng,
    key: &mut Secret<KEY_SIZE>,
) -> Result<(), Error> {
    let entries = fip::entries(image)?;
    trace!("re-binding FIP, {} images", entries.len());
    for entry in &entries {
        unbind_entry(image, entry, keystore, cipher, key)?;
        rebind_entry(image, entry, keystore, cipher, trng, key)?;
    }
    Ok(())
}

fn entry_bytes<'i>(image: &'i mut [u8], entry: &TocEntry) -> &'i mut [u8] {
    // In range: fip::entries() bounds-checked every entry.
    &mut image[entry.offset as usize..(entry.offset + entry.size) as usize]
}

/// Strip the inbound encryption from one slot, leaving plaintext after the
/// (stale) header. Slots without the magic, or too short to hold a full
/// header, pass through.
fn unbind_entry(
    image: &mut [u8],
    entry: &TocEntry,
    keystore: &mut dyn Keystore,
    cipher: &mut dyn ImageCipher,
    key: &mut Secret<KEY_SIZE>,
) -> Result<(), Error> {
    let slot = entry_bytes(image, entry);
    if !EncHeader::sniff(slot) {
        return Ok(());
    }
    let Ok((_, header)) = EncHeader::parse(slot) else {
        return Ok(());
    };
    let iv_len = header.iv_len as usize;
    let tag_len = header.tag_len as usize;
    if header.dec_algo != ENC_ALGO_AES_GCM || iv_len > ENC_IV_MAX || tag_len > ENC_TAG_MAX {
        error!("Unusable encryption header at {:#x}", entry.offset);
        return Err(Error::DecryptFailed);
    }

    let mut key = key.scope();
    keystore
        .binding_key(BindingKey::Shared, &mut key)
        .map_err(|_| Error::SskUnavailable)?;

    let (_, payload) = slot.split_at_mut(EncHeader::SIZE);
    cipher
        .decrypt(&*key, &header.iv[..iv_len], payload, &header.tag[..tag_len])
        .map_err(|_| Error::DecryptFailed)?;
    trace!("image at {:#x} decrypted", entry.offset);
    Ok(())
}

/// Encrypt one slot under the device-unique key with a fresh IV and
/// rewrite its header in place.
fn rebind_entry(
    image: &mut [u8],
    entry: &TocEntry,
    keystore: &mut dyn Keystore,
    cipher: &mut dyn ImageCipher,
    trng: &mut dyn Trng,
    key: &mut Secret<KEY_SIZE>,
) -> Result<(), Error> {
    let slot = entry_bytes(image, entry);
    if !EncHeader::sniff(slot) {
        return Ok(());
    }
    let Ok((_, mut header)) = EncHeader::parse(slot) else {
        return Ok(());
    };

    let mut key = key.scope();
    keystore
        .binding_key(BindingKey::DeviceUnique, &mut key)
        .map_err(|_| Error::BsskUnavailable)?;

    // IVs never repeat across re-binds: every encryption draws its own.
    let mut iv = [0u8; IV_SIZE];
    for word in iv.chunks_exact_mut(4) {
        word.copy_from_slice(&trng.read_word().to_le_bytes());
    }

    let (header_bytes, payload) = slot.split_at_mut(EncHeader::SIZE);
    let mut tag = [0u8; TAG_SIZE];
    cipher
        .encrypt(&*key, &iv, payload, &mut tag)
        .map_err(|_| Error::EncryptFailed)?;

    header.dec_algo = ENC_ALGO_AES_GCM;
    // Keep whatever else was in the flags word; only assert the bit we own.
    header.flags |= EncFlags::ENCRYPTED.bits();
    header.iv = [0; ENC_IV_MAX];
    header.iv[..IV_SIZE].copy_from_slice(&iv);
    header.iv_len = IV_SIZE as u16;
    header.tag = [0; ENC_TAG_MAX];
    header.tag[..TAG_SIZE].copy_from_slice(&tag);
    header.tag_len = TAG_SIZE as u16;
    header.write_to(header_bytes);

    trace!("image at {:#x} re-encrypted", entry.offset);
    Ok(())
}
