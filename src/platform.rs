//! Platform collaborators the monitors consume but do not implement.
//!
//! Everything a real device wires up in silicon or lower-layer firmware
//! (entropy, key material, decompression, boot strapping) enters through
//! one of these traits, which keeps the monitors testable against
//! in-memory substitutes.

use crate::crypto::KEY_SIZE;

/// Error from a lower driver, carrying the raw return code so it can be
/// surfaced to the peer in a NACK-with-code.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[error("driver error (rc {0})")]
pub struct DeviceError(pub i32);

/// Hardware true-random source. One word of entropy per call.
pub trait Trng {
    fn read_word(&mut self) -> u32;
}

/// Which of the two binding keys the keystore should produce.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BindingKey {
    /// Shared secret key (SSK): the bring-up key firmware was encrypted
    /// with when it left the signing tooling.
    Shared,
    /// Binding secret symmetric key (BSSK): unique to this device, what
    /// firmware at rest is re-encrypted with.
    DeviceUnique,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[error("key unavailable")]
pub struct KeyError;

/// Produces binding key material into a caller-provided (scoped, wiped)
/// buffer.
pub trait Keystore {
    fn binding_key(&mut self, which: BindingKey, key: &mut [u8; KEY_SIZE]) -> Result<(), KeyError>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[error("decompression failed")]
pub struct DecompressError;

/// Stream decompressor (gzip on the original hardware).
///
/// `input` holds the compressed image, `work` is scratch the implementation
/// may clobber freely, `out` receives the decompressed bytes. Returns the
/// number of bytes produced, which must not exceed `out.len()`; `input`
/// must be left untouched either way.
pub trait Decompressor {
    fn decompress(
        &mut self,
        input: &[u8],
        work: &mut [u8],
        out: &mut [u8],
    ) -> Result<usize, DecompressError>;
}

/// Boot-strap override hook used by the first-stage monitor.
pub trait StrapOverride {
    fn set_strapping(&mut self, value: u8);
}
