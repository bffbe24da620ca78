//! Request/response model over a framed serial link.
//!
//! Framing itself (start-of-frame, hex fields, checksum trailer) lives in
//! the link driver behind [`Transport`]; the monitors only see parsed
//! requests and hand back structured responses.

use log::trace;

/// One parsed request frame: a command code and the two numeric arguments
/// every frame carries. What `arg0` and `len` mean is up to the command
/// (field offset and payload length, device selector, strap value, ...).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Request {
    pub code: u8,
    pub arg0: u32,
    pub len: u32,
}

impl Request {
    pub fn new(code: u8, arg0: u32, len: u32) -> Self {
        Self { code, arg0, len }
    }
}

/// Reply to one request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Response<'a> {
    Ack { arg0: u32 },
    AckData { arg0: u32, data: &'a [u8] },
    Nack { msg: &'a str },
    NackWithCode { msg: &'a str, code: i32 },
}

/// The monitor's side of the wire.
pub trait Transport {
    /// Next request frame. `None` for a frame that arrived garbled (framing
    /// or checksum failure); the monitors answer those with a NACK and keep
    /// serving.
    fn next_request(&mut self) -> Option<Request>;

    /// Pull the next chunk of a data phase into `buf`, returning the number
    /// of bytes delivered. Zero means the sender went quiet.
    fn recv_chunk(&mut self, buf: &mut [u8]) -> usize;

    /// Receive one complete payload into `buf`, exactly filling it. False
    /// when the payload was short or failed its checksum.
    fn recv_crc_payload(&mut self, buf: &mut [u8]) -> bool;

    /// Send one response frame.
    fn send(&mut self, response: Response<'_>);

    fn ack(&mut self) {
        self.send(Response::Ack { arg0: 0 })
    }

    fn ack_arg(&mut self, arg0: u32) {
        self.send(Response::Ack { arg0 })
    }

    fn ack_data(&mut self, data: &[u8]) {
        self.send(Response::AckData { arg0: 0, data })
    }

    fn nack(&mut self, msg: &str) {
        trace!("sending NACK: {}", msg);
        self.send(Response::Nack { msg })
    }

    fn nack_with_code(&mut self, msg: &str, code: i32) {
        trace!("sending NACK: {} (rc {})", msg, code);
        self.send(Response::NackWithCode { msg, code })
    }
}
