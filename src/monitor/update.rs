//! The field-update monitor.
//!
//! Runs in the update boot stage while a host tool drives the session:
//! stage an image, optionally bind it to this device, provision OTP,
//! commit to flash, reset. One request is served at a time; every failure
//! is answered with a diagnostic on the same wire, and the session ends
//! only on the reset command.

use log::{info, trace, LevelFilter};

use super::Command;
use crate::bind;
use crate::commit::{self, FipCommitError, Storage, TargetDevice};
use crate::crypto::{ImageCipher, KEY_SIZE};
use crate::fip;
use crate::otp::{self, Otp, MAX_OTP_DATA, MAX_OTP_READ, OTP_MEM_SIZE};
use crate::platform::{Decompressor, DeviceError, Keystore, Trng};
use crate::secret::Secret;
use crate::staging::Staging;
use crate::transport::{Request, Transport};

/// Everything the update monitor borrows from the platform for one
/// session. All drivers are exclusive for the session's duration; the
/// protocol is strictly single-threaded.
pub struct UpdateEnv<'a> {
    pub transport: &'a mut dyn Transport,
    pub storage: &'a mut dyn Storage,
    pub otp: &'a mut dyn Otp,
    pub keystore: &'a mut dyn Keystore,
    pub cipher: &'a mut dyn ImageCipher,
    pub trng: &'a mut dyn Trng,
    pub decompressor: &'a mut dyn Decompressor,
    /// Reported verbatim by the version command.
    pub version: &'a str,
}

enum OtpRead {
    Cooked,
    Raw,
}

pub struct UpdateMonitor<'a> {
    env: UpdateEnv<'a>,
    staging: Staging<'a>,
    key: Secret<KEY_SIZE>,
    otp_data: Secret<MAX_OTP_DATA>,
    otp_shadow: Secret<MAX_OTP_DATA>,
}

impl<'a> UpdateMonitor<'a> {
    pub fn new(env: UpdateEnv<'a>, staging: Staging<'a>) -> Self {
        Self {
            env,
            staging,
            key: Secret::new(),
            otp_data: Secret::new(),
            otp_shadow: Secret::new(),
        }
    }

    /// Serve requests until the peer sends reset.
    ///
    /// Log output is clamped to errors for the whole session so chatter
    /// cannot interleave with protocol frames on a shared console; the
    /// previous level is restored on exit.
    pub fn run(&mut self) {
        info!("*** ENTERING UPDATE MONITOR ***");
        let saved = log::max_level();
        log::set_max_level(LevelFilter::Error);

        loop {
            let Some(request) = self.env.transport.next_request() else {
                self.env.transport.nack("Garbled command");
                continue;
            };
            let command = match Command::try_from(request.code) {
                Ok(command) => command,
                Err(code) => {
                    trace!("unknown command code {:#04x}", code);
                    self.env.transport.nack("Unknown command");
                    continue;
                }
            };
            match command {
                Command::Reset => {
                    self.env.transport.ack();
                    break;
                }
                Command::Version => self.version(),
                Command::Send => self.load(&request),
                Command::WriteImage => self.write_image(&request),
                Command::WriteFip => self.write_fip(&request),
                Command::Bind => self.bind(),
                Command::OtpData => self.otp_write(&request),
                Command::OtpRandom => self.otp_write_random(&request),
                Command::OtpReadCooked => self.otp_read(&request, OtpRead::Cooked),
                Command::OtpReadRaw => self.otp_read(&request, OtpRead::Raw),
                // Bootstrap-stage commands, not served here.
                Command::Continue | Command::Strap | Command::Auth | Command::Exec => {
                    self.env.transport.nack("Unknown command")
                }
            }
        }

        log::set_max_level(saved);
        info!("*** EXITING UPDATE MONITOR ***");
    }

    fn version(&mut self) {
        trace!("handle read version");
        self.env.transport.ack_data(self.env.version.as_bytes());
    }

    /// Receive `arg0` bytes into the staging buffer, then undo gzip if the
    /// payload looks like it. A previously staged image is forgotten even
    /// when the new length is rejected.
    fn load(&mut self, request: &Request) {
        trace!("handle load data");
        self.staging.clear();

        let length = request.arg0 as usize;
        if length == 0 || length > self.staging.capacity() {
            self.env.transport.nack("Length Error");
            return;
        }

        // Go ahead, receive data
        self.env.transport.ack();
        if !self.staging.receive(self.env.transport, length) {
            // Short delivery: nothing staged, no reply. The peer sees the
            // data phase stall and starts over.
            return;
        }

        self.staging.maybe_decompress(self.env.decompressor);
    }

    fn write_image(&mut self, request: &Request) {
        trace!("handle write image");

        if self.staging.is_empty() {
            self.env.transport.nack("Flash Image not loaded");
            return;
        }
        let Ok(target) = TargetDevice::try_from(request.arg0) else {
            self.env.transport.nack("Unsupported target device");
            return;
        };

        let Ok(volume) = self.env.storage.open(target) else {
            self.env.transport.nack("Image write failed");
            return;
        };
        if commit::write_raw(volume, self.staging.data()).is_err() {
            self.env.transport.nack("Image write failed");
        } else {
            self.env.transport.ack();
        }
    }

    fn write_fip(&mut self, request: &Request) {
        trace!("handle write FIP");

        if self.staging.is_empty() {
            self.env.transport.nack("FIP Image not loaded");
            return;
        }
        let Ok(target) = TargetDevice::try_from(request.arg0) else {
            self.env.transport.nack("Unsupported target device");
            return;
        };
        if !fip::valid_header(self.staging.data()) {
            self.env.transport.nack("Data is not a valid FIP");
            return;
        }

        info!("Write FIP {} bytes to {}", self.staging.len(), target);

        let Ok(volume) = self.env.storage.open(target) else {
            self.env.transport.nack(&FipCommitError::WriteFailed.to_string());
            return;
        };
        match commit::write_fip(volume, self.staging.data()) {
            Ok(()) => self.env.transport.ack(),
            Err(err) => self.env.transport.nack(&err.to_string()),
        }
    }

    fn bind(&mut self) {
        trace!("handle bind");

        // Staged lengths can never exceed capacity, so the length check
        // reduces to "is anything staged".
        if self.staging.is_empty() {
            self.env.transport.nack("Image not loaded, length error");
            return;
        }

        match bind::rebind_fip(
            self.staging.data_mut(),
            self.env.keystore,
            self.env.cipher,
            self.env.trng,
            &mut self.key,
        ) {
            Ok(()) => self.env.transport.ack(),
            Err(err) => self.env.transport.nack(&err.to_string()),
        }
    }

    fn otp_write(&mut self, request: &Request) {
        trace!("handle OTP data");

        let length = request.len as usize;
        let mut data = self.otp_data.scope();
        if !(length > 0 && length < MAX_OTP_DATA)
            || !self.env.transport.recv_crc_payload(&mut data[..length])
        {
            self.env.transport.nack("OTP rx data failed or illegal data size");
            return;
        }

        match otp::program(self.env.otp, request.arg0 as usize, &data[..length]) {
            Ok(()) => self.env.transport.ack_arg(request.arg0),
            Err(err) => self.env.transport.nack(&err.to_string()),
        }
    }

    /// Fill an OTP field with hardware entropy. The payload is a 4-byte
    /// big-endian length; the offset travels in `arg0`.
    fn otp_write_random(&mut self, request: &Request) {
        trace!("handle OTP random");

        let mut payload = [0u8; 4];
        if request.len as usize != payload.len()
            || !self.env.transport.recv_crc_payload(&mut payload)
        {
            self.env.transport.nack("OTP random data illegal req length");
            return;
        }
        let length = u32::from_be_bytes(payload) as usize;
        if !(length > 0 && length < MAX_OTP_DATA) {
            self.env.transport.nack("OTP random data illegal length");
            return;
        }

        let mut data = self.otp_data.scope();
        let mut readback = self.otp_shadow.scope();
        match otp::program_random(
            self.env.otp,
            self.env.trng,
            request.arg0 as usize,
            length,
            &mut data,
            &mut readback,
        ) {
            Ok(()) => self.env.transport.ack_arg(request.arg0),
            Err(err) => self.env.transport.nack(&err.to_string()),
        }
    }

    fn otp_read(&mut self, request: &Request, kind: OtpRead) {
        trace!("handle OTP read");

        let mut payload = [0u8; 4];
        if request.len as usize != payload.len()
            || !self.env.transport.recv_crc_payload(&mut payload)
        {
            // No reply; the peer sees the request go unanswered.
            trace!("dropping malformed OTP read request");
            return;
        }
        let length = u32::from_be_bytes(payload) as usize;
        let offset = request.arg0 as usize;
        if !(length > 0 && length < MAX_OTP_READ && offset + length <= OTP_MEM_SIZE) {
            self.env.transport.nack("OTP read illegal length");
            return;
        }

        let mut data = [0u8; MAX_OTP_READ];
        let result = match kind {
            OtpRead::Cooked => self.env.otp.read_bytes(offset, &mut data[..length]),
            OtpRead::Raw => self.env.otp.read_bytes_raw(offset, &mut data[..length]),
        };
        match result {
            Ok(()) => self.env.transport.ack_data(&data[..length]),
            Err(DeviceError(rc)) => self.env.transport.nack_with_code("OTP read fails", rc),
        }
    }
}
