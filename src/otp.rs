//! OTP fuse provisioning.
//!
//! The monitor exposes two write paths into the one-time-programmable
//! fuses: a direct write of caller-supplied bytes, and a randomized fill
//! for device secrets, where the value never leaves the device. The
//! randomized path only runs against a field that still reads back as all
//! zero; anything else is refused before a single word of entropy is
//! drawn. Scratch holding fuse values goes through [`crate::secret`]
//! scopes, so it is wiped on every exit path.

use log::trace;

use crate::platform::{DeviceError, Trng};
use crate::secret::SecretScope;
use crate::util::div_round_up;

/// Size of the fuse space addressable through the monitor.
pub const OTP_MEM_SIZE: usize = 8192;
/// Upper bound (exclusive) on a single write payload.
pub const MAX_OTP_DATA: usize = 1024;
/// Upper bound (exclusive) on a single read.
pub const MAX_OTP_READ: usize = 256;

/// The platform's fuse driver.
///
/// Platforms with an OTP emulation layer serve `read_bytes` through it;
/// `read_bytes_raw` always reports the physical fuses.
pub trait Otp {
    fn read_bytes(&mut self, offset: usize, out: &mut [u8]) -> Result<(), DeviceError>;
    fn read_bytes_raw(&mut self, offset: usize, out: &mut [u8]) -> Result<(), DeviceError>;
    fn write_bytes(&mut self, offset: usize, data: &[u8]) -> Result<(), DeviceError>;
}

/// Write-once precondition for the randomized fill.
pub fn all_zero(data: &[u8]) -> bool {
    data.iter().all(|b| *b == 0)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("OTP program failed")]
    ProgramFailed,
    #[error("Unable to read OTP data")]
    ReadbackFailed,
    #[error("OTP data already non-zero")]
    AlreadyProgrammed,
    #[error("OTP program random failed")]
    ProgramRandomFailed,
}

/// Program a caller-supplied value at `offset`.
pub fn program(otp: &mut dyn Otp, offset: usize, data: &[u8]) -> Result<(), Error> {
    trace!("programming {} OTP bytes at {}", data.len(), offset);
    otp.write_bytes(offset, data).map_err(|_| Error::ProgramFailed)
}

/// Fill `length` fuse bytes at `offset` with hardware entropy.
///
/// The field is read back raw first and must be all zero; the fresh value
/// is drawn one TRNG word at a time into `data` and programmed. Both
/// scratch scopes are wiped by their drops, whichever way this returns.
pub fn program_random(
    otp: &mut dyn Otp,
    trng: &mut dyn Trng,
    offset: usize,
    length: usize,
    data: &mut SecretScope<'_, MAX_OTP_DATA>,
    readback: &mut SecretScope<'_, MAX_OTP_DATA>,
) -> Result<(), Error> {
    debug_assert!(length > 0 && length < MAX_OTP_DATA);

    otp.read_bytes_raw(offset, &mut readback[..length])
        .map_err(|_| Error::ReadbackFailed)?;
    if !all_zero(&readback[..length]) {
        return Err(Error::AlreadyProgrammed);
    }

    for word in 0..div_round_up(length, 4) {
        data[4 * word..4 * word + 4].copy_from_slice(&trng.read_word().to_le_bytes());
    }

    trace!("programming {} random OTP bytes at {}", length, offset);
    otp.write_bytes(offset, &data[..length])
        .map_err(|_| Error::ProgramRandomFailed)
}
