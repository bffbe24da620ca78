//! The first-stage bootstrap monitor.
//!
//! A strapped-down sibling of the update monitor that runs in the earliest
//! boot stage: it can report its version, receive a next-stage code image
//! into a bounded region, record a strap override and hand off to the
//! received image. The library cannot literally jump to code, so the
//! session's outcome is returned to the caller as a [`BootstrapExit`].

use log::{info, trace};

use super::Command;
use crate::platform::StrapOverride;
use crate::staging::Staging;
use crate::transport::{Request, Transport};

/// How a bootstrap session ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BootstrapExit {
    /// Resume the normal boot flow.
    Continue,
    /// Hand off to the received image, left in the caller's code region.
    Execute { length: usize, authenticated: bool },
}

pub struct BootstrapEnv<'a> {
    pub transport: &'a mut dyn Transport,
    pub strap: &'a mut dyn StrapOverride,
    pub version: &'a str,
}

pub struct BootstrapMonitor<'a> {
    env: BootstrapEnv<'a>,
    code: Staging<'a>,
    authenticated: bool,
}

impl<'a> BootstrapMonitor<'a> {
    pub fn new(env: BootstrapEnv<'a>, code: Staging<'a>) -> Self {
        Self {
            env,
            code,
            authenticated: false,
        }
    }

    /// Serve requests until the peer tells us to continue booting or to
    /// execute a received image.
    pub fn run(&mut self) -> BootstrapExit {
        info!("*** ENTERING BOOTSTRAP MONITOR ***");

        let exit = loop {
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
                Command::Continue => break BootstrapExit::Continue,
                Command::Version => self.version(),
                Command::Send => self.send(&request),
                Command::Strap => self.strap(&request),
                Command::Auth => self.auth(),
                Command::Exec => {
                    if let Some(exit) = self.exec() {
                        break exit;
                    }
                }
                // Update-stage commands, not served here.
                Command::Reset
                | Command::WriteImage
                | Command::WriteFip
                | Command::Bind
                | Command::OtpData
                | Command::OtpRandom
                | Command::OtpReadCooked
                | Command::OtpReadRaw => self.env.transport.nack("Unknown command"),
            }
        };

        info!("*** EXITING BOOTSTRAP MONITOR ***");
        exit
    }

    fn version(&mut self) {
        trace!("handle read version");
        self.env.transport.ack_data(self.env.version.as_bytes());
    }

    /// Receive `arg0` bytes of next-stage code. Whatever was received
    /// before is forgotten, along with its authenticated mark.
    fn send(&mut self, request: &Request) {
        trace!("handle send data");

        let length = request.arg0 as usize;
        if length == 0 || length > self.code.capacity() {
            self.env.transport.nack("Length Error");
            return;
        }

        // Go ahead, receive data
        self.env.transport.ack();
        self.authenticated = false;
        if self.code.receive(self.env.transport, length) {
            trace!("received {} code bytes", self.code.len());
        }
    }

    fn strap(&mut self, request: &Request) {
        trace!("handle strap override");
        self.env.transport.ack();
        self.env.strap.set_strapping(request.arg0 as u8);
    }

    fn auth(&mut self) {
        trace!("handle authenticate");
        self.env.transport.ack();
        self.authenticated = true;
    }

    fn exec(&mut self) -> Option<BootstrapExit> {
        trace!("handle execute");

        if !self.code.is_empty() {
            self.env.transport.ack();
            return Some(BootstrapExit::Execute {
                length: self.code.len(),
                authenticated: self.authenticated,
            });
        }
        self.env.transport.nack("Nothing to execute");
        None
    }
}
