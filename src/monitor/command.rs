//! Wire command vocabulary shared by the bootstrap and update monitors.
//!
//! One ASCII byte per command, inherited from the original serial
//! protocol. Each monitor dispatches over an exhaustive match and answers
//! "Unknown command" for codes outside its own table.

use core::convert::TryFrom;
use core::fmt;

use serde::{Deserialize, Serialize};

#[repr(u8)]
#[derive(
    Clone,
    Copy,
    Debug,
    Deserialize,
    Eq,
    Hash,
    enum_iterator::Sequence,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum Command {
    /// End the session and resume the interrupted boot flow.
    Reset = b'e',
    /// End a bootstrap session without executing anything.
    Continue = b'C',
    Version = b'V',
    /// Receive a payload into the staging buffer (code region for the
    /// bootstrap monitor).
    Send = b'S',
    /// Record a boot-strapping override.
    Strap = b'O',
    /// Mark the received image as authenticated.
    Auth = b'U',
    /// Hand off to the received image.
    Exec = b'E',
    /// Commit the staged bytes raw to a target device.
    WriteImage = b'I',
    /// Commit the staged bytes as a FIP, redundantly where possible.
    WriteFip = b'W',
    /// Re-bind the staged FIP to this device.
    Bind = b'B',
    OtpData = b'P',
    OtpRandom = b'R',
    OtpReadCooked = b'L',
    OtpReadRaw = b'l',
}

impl From<Command> for u8 {
    fn from(command: Command) -> u8 {
        command as u8
    }
}

impl TryFrom<u8> for Command {
    type Error = u8;
    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        use Command::*;
        Ok(match byte {
            b'e' => Reset,
            b'C' => Continue,
            b'V' => Version,
            b'S' => Send,
            b'O' => Strap,
            b'U' => Auth,
            b'E' => Exec,
            b'I' => WriteImage,
            b'W' => WriteFip,
            b'B' => Bind,
            b'P' => OtpData,
            b'R' => OtpRandom,
            b'L' => OtpReadCooked,
            b'l' => OtpReadRaw,
            _ => return Err(byte),
        })
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use Command::*;
        f.write_str(match self {
            Reset => "reset",
            Continue => "continue",
            Version => "version",
            Send => "send",
            Strap => "strap",
            Auth => "auth",
            Exec => "exec",
            WriteImage => "write-image",
            WriteFip => "write-fip",
            Bind => "bind",
            OtpData => "otp-data",
            OtpRandom => "otp-random",
            OtpReadCooked => "otp-read-cooked",
            OtpReadRaw => "otp-read-raw",
        })
    }
}
