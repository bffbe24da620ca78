//! Wipe-on-drop storage for short-lived secrets.
//!
//! Key material and fuse payloads pass through fixed scratch buffers that
//! outlive any single command. Rather than trusting every handler to wipe
//! them on every return path, the storage is only reachable through a scope
//! guard: dropping the guard zeroizes the storage, so early error returns
//! wipe exactly like the success path does.

use core::ops::{Deref, DerefMut};

use zeroize::Zeroize;

/// Zeroizable backing storage, owned by a long-lived object (a monitor).
pub struct Secret<const N: usize> {
    bytes: [u8; N],
}

impl<const N: usize> Secret<N> {
    pub const fn new() -> Self {
        Self { bytes: [0; N] }
    }

    /// Borrow the storage for one operation. The returned guard wipes it
    /// when dropped.
    pub fn scope(&mut self) -> SecretScope<'_, N> {
        SecretScope { secret: self }
    }

    /// True when no secret material is left behind.
    pub fn is_wiped(&self) -> bool {
        self.bytes.iter().all(|b| *b == 0)
    }
}

impl<const N: usize> Default for Secret<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> Drop for Secret<N> {
    fn drop(&mut self) {
        self.bytes.zeroize()
    }
}

/// Scoped view of a [`Secret`]'s storage.
pub struct SecretScope<'a, const N: usize> {
    secret: &'a mut Secret<N>,
}

impl<const N: usize> Deref for SecretScope<'_, N> {
    type Target = [u8; N];

    fn deref(&self) -> &[u8; N] {
        &self.secret.bytes
    }
}

impl<const N: usize> DerefMut for SecretScope<'_, N> {
    fn deref_mut(&mut self) -> &mut [u8; N] {
        &mut self.secret.bytes
    }
}

impl<const N: usize> Drop for SecretScope<'_, N> {
    fn drop(&mut self) {
        self.secret.bytes.zeroize()
    }
}
