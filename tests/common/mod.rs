//! Shared fixtures for the monitor tests: a scripted wire, in-memory
//! stand-ins for the platform drivers, and a FIP builder.
//!
//! Each test binary compiles its own copy and uses its own subset.
#![allow(dead_code)]

use std::collections::VecDeque;

use crc::{Crc, CRC_32_ISCSI};
use uuid::Uuid;

use bootmon::commit::{
    BlockDevice, NorFlash, Partition, PartitionTable, Storage, TargetDevice, Volume, BLOCK_SIZE,
    FW_BACKUP_PARTITION, FW_PARTITION,
};
use bootmon::crypto::{Aes256GcmCipher, ImageCipher, IV_SIZE, KEY_SIZE, TAG_SIZE};
use bootmon::fip::{
    self, EncFlags, EncHeader, TocEntry, TocHeader, ENC_ALGO_AES_GCM, ENC_IV_MAX, ENC_TAG_MAX,
    TOC_ALIGN, TOC_HEADER_NAME,
};
use bootmon::otp::{Otp, OTP_MEM_SIZE};
use bootmon::platform::{
    BindingKey, DecompressError, Decompressor, DeviceError, KeyError, Keystore, StrapOverride,
    Trng,
};
use bootmon::util::align_up;
use bootmon::{Command, Request, Response, Staging, StagingParams, Transport, UpdateEnv, UpdateMonitor};

/// Version string the test monitors report.
pub const VERSION: &str = "bootmon test build";

/// Shared bring-up key served by [`FixedKeystore`].
pub const SSK: [u8; KEY_SIZE] = [0x11; KEY_SIZE];
/// Device-unique key served by [`FixedKeystore`].
pub const BSSK: [u8; KEY_SIZE] = [0x22; KEY_SIZE];

/// Staging arena the update-monitor rig runs with.
pub const ARENA_SIZE: usize = 2048;

/// Checksum the link driver applies to framed payloads.
pub const CRC: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);

/// Frame `payload` the way the link driver would: payload, then the CRC
/// trailer in little-endian.
pub fn crc_frame(payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::from(payload);
    frame.extend_from_slice(&CRC.checksum(payload).to_le_bytes());
    frame
}

/// Owned mirror of [`Response`], so captured replies outlive the borrowed
/// buffers they were sent with.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OwnedResponse {
    Ack { arg0: u32 },
    AckData { arg0: u32, data: Vec<u8> },
    Nack { msg: String },
    NackWithCode { msg: String, code: i32 },
}

impl From<Response<'_>> for OwnedResponse {
    fn from(response: Response<'_>) -> Self {
        match response {
            Response::Ack { arg0 } => Self::Ack { arg0 },
            Response::AckData { arg0, data } => Self::AckData {
                arg0,
                data: data.to_vec(),
            },
            Response::Nack { msg } => Self::Nack {
                msg: msg.to_string(),
            },
            Response::NackWithCode { msg, code } => Self::NackWithCode {
                msg: msg.to_string(),
                code,
            },
        }
    }
}

pub fn ack() -> OwnedResponse {
    OwnedResponse::Ack { arg0: 0 }
}

pub fn ack_arg(arg0: u32) -> OwnedResponse {
    OwnedResponse::Ack { arg0 }
}

pub fn ack_data(data: &[u8]) -> OwnedResponse {
    OwnedResponse::AckData {
        arg0: 0,
        data: data.to_vec(),
    }
}

pub fn nack(msg: &str) -> OwnedResponse {
    OwnedResponse::Nack {
        msg: msg.to_string(),
    }
}

pub fn nack_code(msg: &str, code: i32) -> OwnedResponse {
    OwnedResponse::NackWithCode {
        msg: msg.to_string(),
        code,
    }
}

/// Drives a monitor from a canned script and captures every reply.
///
/// `requests` feeds the command loop (a `None` plays back as a garbled
/// frame). Each element of `streams` is one data phase; an empty element
/// scripts a sender that goes quiet. `crc_frames` holds the checksummed
/// payloads in arrival order. The script must end in a session-ending
/// command (reset, continue, exec): running dry panics the test instead
/// of spinning the dispatch loop forever.
pub struct ScriptedTransport {
    requests: VecDeque<Option<Request>>,
    streams: VecDeque<Vec<u8>>,
    crc_frames: VecDeque<Vec<u8>>,
    pub responses: Vec<OwnedResponse>,
    /// Number of `recv_chunk` calls made, data phases or not.
    pub chunk_pulls: usize,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self {
            requests: VecDeque::new(),
            streams: VecDeque::new(),
            crc_frames: VecDeque::new(),
            responses: Vec::new(),
            chunk_pulls: 0,
        }
    }

    pub fn request(&mut self, command: Command, arg0: u32, len: u32) {
        self.requests
            .push_back(Some(Request::new(command.into(), arg0, len)));
    }

    /// A frame carrying a code outside the command vocabulary.
    pub fn raw_request(&mut self, code: u8, arg0: u32, len: u32) {
        self.requests.push_back(Some(Request::new(code, arg0, len)));
    }

    /// A frame that fails framing or checksum in the link driver.
    pub fn garbled(&mut self) {
        self.requests.push_back(None);
    }

    /// Script one data phase delivering `bytes`.
    pub fn stream(&mut self, bytes: &[u8]) {
        self.streams.push_back(bytes.to_vec());
    }

    /// Script a checksummed payload that passes the CRC check.
    pub fn crc_payload(&mut self, payload: &[u8]) {
        self.crc_frames.push_back(crc_frame(payload));
    }

    /// Script a checksummed payload with a corrupted trailer.
    pub fn bad_crc_payload(&mut self, payload: &[u8]) {
        let mut frame = crc_frame(payload);
        let last = frame.len() - 1;
        frame[last] ^= 0xff;
        self.crc_frames.push_back(frame);
    }
}

impl Transport for ScriptedTransport {
    fn next_request(&mut self) -> Option<Request> {
        self.requests
            .pop_front()
            .expect("transport script ran out of requests")
    }

    fn recv_chunk(&mut self, buf: &mut [u8]) -> usize {
        self.chunk_pulls += 1;
        let Some(stream) = self.streams.front_mut() else {
            return 0;
        };
        let n = stream.len().min(buf.len());
        buf[..n].copy_from_slice(&stream[..n]);
        stream.drain(..n);
        if stream.is_empty() {
            self.streams.pop_front();
        }
        n
    }

    fn recv_crc_payload(&mut self, buf: &mut [u8]) -> bool {
        let Some(frame) = self.crc_frames.pop_front() else {
            return false;
        };
        if frame.len() != buf.len() + 4 {
            return false;
        }
        let (payload, trailer) = frame.split_at(buf.len());
        let expected = u32::from_le_bytes(trailer.try_into().unwrap());
        if CRC.checksum(payload) != expected {
            return false;
        }
        buf.copy_from_slice(payload);
        true
    }

    fn send(&mut self, response: Response<'_>) {
        self.responses.push(response.into());
    }
}

/// Fuse array with an optional emulation shadow. Cooked reads serve the
/// shadow when present; raw reads and the pre-program readback always see
/// the physical fuses. Writes OR into the fuses, like real OTP.
pub struct MemOtp {
    pub fuses: Vec<u8>,
    pub emulated: Option<Vec<u8>>,
    pub fail_read: bool,
    pub fail_write: bool,
}

impl MemOtp {
    pub fn new() -> Self {
        Self {
            fuses: vec![0; OTP_MEM_SIZE],
            emulated: None,
            fail_read: false,
            fail_write: false,
        }
    }
}

impl Otp for MemOtp {
    fn read_bytes(&mut self, offset: usize, out: &mut [u8]) -> Result<(), DeviceError> {
        if self.fail_read {
            return Err(DeviceError(-5));
        }
        let src = self.emulated.as_deref().unwrap_or(&self.fuses);
        out.copy_from_slice(&src[offset..offset + out.len()]);
        Ok(())
    }

    fn read_bytes_raw(&mut self, offset: usize, out: &mut [u8]) -> Result<(), DeviceError> {
        if self.fail_read {
            return Err(DeviceError(-5));
        }
        out.copy_from_slice(&self.fuses[offset..offset + out.len()]);
        Ok(())
    }

    fn write_bytes(&mut self, offset: usize, data: &[u8]) -> Result<(), DeviceError> {
        if self.fail_write {
            return Err(DeviceError(-5));
        }
        for (fuse, b) in self.fuses[offset..offset + data.len()].iter_mut().zip(data) {
            *fuse |= b;
        }
        Ok(())
    }
}

/// Deterministic entropy: 1, 2, 3, ... Draws are counted.
pub struct SeqTrng {
    pub next: u32,
    pub draws: usize,
}

impl SeqTrng {
    pub fn new() -> Self {
        Self { next: 0, draws: 0 }
    }
}

impl Trng for SeqTrng {
    fn read_word(&mut self) -> u32 {
        self.draws += 1;
        self.next = self.next.wrapping_add(1);
        self.next
    }
}

/// Serves [`SSK`] and [`BSSK`], with per-key failure switches.
pub struct FixedKeystore {
    pub fail_shared: bool,
    pub fail_unique: bool,
}

impl FixedKeystore {
    pub fn new() -> Self {
        Self {
            fail_shared: false,
            fail_unique: false,
        }
    }
}

impl Keystore for FixedKeystore {
    fn binding_key(&mut self, which: BindingKey, key: &mut [u8; KEY_SIZE]) -> Result<(), KeyError> {
        let (fail, fill) = match which {
            BindingKey::Shared => (self.fail_shared, SSK),
            BindingKey::DeviceUnique => (self.fail_unique, BSSK),
        };
        if fail {
            return Err(KeyError);
        }
        *key = fill;
        Ok(())
    }
}

/// Stands in for the gzip engine: emits a canned output and counts calls.
pub struct StubGunzip {
    pub output: Vec<u8>,
    pub fail: bool,
    pub calls: usize,
}

impl StubGunzip {
    pub fn new() -> Self {
        Self {
            output: Vec::new(),
            fail: false,
            calls: 0,
        }
    }
}

impl Decompressor for StubGunzip {
    fn decompress(
        &mut self,
        _input: &[u8],
        _work: &mut [u8],
        out: &mut [u8],
    ) -> Result<usize, DecompressError> {
        self.calls += 1;
        if self.fail {
            return Err(DecompressError);
        }
        out[..self.output.len()].copy_from_slice(&self.output);
        Ok(self.output.len())
    }
}

pub struct MemBlocks {
    pub data: Vec<u8>,
    pub writes: Vec<u64>,
    pub fail_lba: Option<u64>,
}

impl MemBlocks {
    pub fn new(blocks: usize) -> Self {
        Self {
            data: vec![0xff; blocks * BLOCK_SIZE],
            writes: Vec::new(),
            fail_lba: None,
        }
    }
}

impl BlockDevice for MemBlocks {
    fn write_block(&mut self, lba: u64, block: &[u8]) -> Result<(), DeviceError> {
        assert_eq!(block.len(), BLOCK_SIZE);
        if self.fail_lba == Some(lba) {
            return Err(DeviceError(-5));
        }
        let start = lba as usize * BLOCK_SIZE;
        self.data[start..start + BLOCK_SIZE].copy_from_slice(block);
        self.writes.push(lba);
        Ok(())
    }
}

pub struct Parts(pub Vec<(&'static str, Partition)>);

impl PartitionTable for Parts {
    fn find(&self, name: &str) -> Option<Partition> {
        self.0.iter().find(|(n, _)| *n == name).map(|(_, p)| *p)
    }
}

pub struct MemNor {
    pub data: Vec<u8>,
    pub fail: bool,
}

impl MemNor {
    pub fn new(size: usize) -> Self {
        Self {
            data: vec![0xff; size],
            fail: false,
        }
    }
}

impl NorFlash for MemNor {
    fn write(&mut self, offset: u64, data: &[u8]) -> Result<(), DeviceError> {
        if self.fail {
            return Err(DeviceError(-5));
        }
        let start = offset as usize;
        self.data[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }
}

/// Number of blocks each firmware partition spans on the test media.
pub const PART_BLOCKS: usize = 8;

fn firmware_partitions() -> Parts {
    Parts(vec![
        (
            FW_PARTITION,
            Partition {
                start: 0,
                length: (PART_BLOCKS * BLOCK_SIZE) as u64,
            },
        ),
        (
            FW_BACKUP_PARTITION,
            Partition {
                start: (PART_BLOCKS * BLOCK_SIZE) as u64,
                length: (PART_BLOCKS * BLOCK_SIZE) as u64,
            },
        ),
    ])
}

/// The platform's media: eMMC and SD with the redundant firmware
/// partition pair, and a raw NOR.
pub struct TestStorage {
    pub emmc: MemBlocks,
    pub emmc_parts: Parts,
    pub sd: MemBlocks,
    pub sd_parts: Parts,
    pub nor: MemNor,
    /// Fail `open` for this selector, as an io-init failure would.
    pub fail_open: Option<TargetDevice>,
}

impl TestStorage {
    pub fn new() -> Self {
        Self {
            emmc: MemBlocks::new(2 * PART_BLOCKS),
            emmc_parts: firmware_partitions(),
            sd: MemBlocks::new(2 * PART_BLOCKS),
            sd_parts: firmware_partitions(),
            nor: MemNor::new(2 * PART_BLOCKS * BLOCK_SIZE),
            fail_open: None,
        }
    }

    /// Byte offset of the backup firmware partition on the block media.
    pub fn backup_start() -> usize {
        PART_BLOCKS * BLOCK_SIZE
    }
}

impl Storage for TestStorage {
    fn open(&mut self, target: TargetDevice) -> Result<Volume<'_>, DeviceError> {
        if self.fail_open == Some(target) {
            return Err(DeviceError(-19));
        }
        Ok(match target {
            TargetDevice::Emmc => Volume::Block {
                dev: &mut self.emmc,
                partitions: &self.emmc_parts,
            },
            TargetDevice::Qspi => Volume::Nor(&mut self.nor),
            TargetDevice::Sd => Volume::Block {
                dev: &mut self.sd,
                partitions: &self.sd_parts,
            },
        })
    }
}

/// Records strap overrides handed down by the bootstrap monitor.
pub struct StrapLog {
    pub values: Vec<u8>,
}

impl StrapLog {
    pub fn new() -> Self {
        Self { values: Vec::new() }
    }
}

impl StrapOverride for StrapLog {
    fn set_strapping(&mut self, value: u8) {
        self.values.push(value);
    }
}

/// One scripted update-monitor session against in-memory drivers.
pub struct Rig {
    pub wire: ScriptedTransport,
    pub storage: TestStorage,
    pub otp: MemOtp,
    pub keystore: FixedKeystore,
    pub cipher: Aes256GcmCipher,
    pub trng: SeqTrng,
    pub gunzip: StubGunzip,
}

impl Rig {
    pub fn new() -> Self {
        Self {
            wire: ScriptedTransport::new(),
            storage: TestStorage::new(),
            otp: MemOtp::new(),
            keystore: FixedKeystore::new(),
            cipher: Aes256GcmCipher,
            trng: SeqTrng::new(),
            gunzip: StubGunzip::new(),
        }
    }

    /// Run the scripted session to completion. The arena is sized so
    /// capacity checks are reachable, with carve parameters to match.
    pub fn run(&mut self) {
        let mut arena = vec![0u8; ARENA_SIZE];
        let staging = Staging::with_params(
            &mut arena,
            StagingParams {
                work_align: 16,
                work_len: 64,
            },
        );
        let env = UpdateEnv {
            transport: &mut self.wire,
            storage: &mut self.storage,
            otp: &mut self.otp,
            keystore: &mut self.keystore,
            cipher: &mut self.cipher,
            trng: &mut self.trng,
            decompressor: &mut self.gunzip,
            version: VERSION,
        };
        UpdateMonitor::new(env, staging).run();
    }
}

/// Builds FIP images for the tests: plain and pre-bound (SSK-encrypted)
/// slots, laid out the way the packaging tool lays them out.
pub struct FipBuilder {
    serial: u32,
    parts: Vec<(Uuid, Vec<u8>)>,
}

impl FipBuilder {
    pub fn new() -> Self {
        Self {
            serial: 0x1234,
            parts: Vec::new(),
        }
    }

    /// Recognizable uuid for a builder slot tag.
    pub fn uuid(tag: u8) -> Uuid {
        let mut raw = [0u8; 16];
        raw[0] = tag;
        raw[15] = tag;
        Uuid::from_bytes(raw)
    }

    /// Add a slot holding `payload` as-is.
    pub fn plain(mut self, tag: u8, payload: &[u8]) -> Self {
        self.parts.push((Self::uuid(tag), payload.to_vec()));
        self
    }

    /// Add a slot holding `plaintext` encrypted under `key`: encryption
    /// header first, ciphertext after it.
    pub fn encrypted(
        mut self,
        tag: u8,
        plaintext: &[u8],
        key: &[u8; KEY_SIZE],
        iv: &[u8; IV_SIZE],
    ) -> Self {
        let mut payload = plaintext.to_vec();
        let mut tag_bytes = [0u8; TAG_SIZE];
        Aes256GcmCipher
            .encrypt(key, iv, &mut payload, &mut tag_bytes)
            .unwrap();

        let mut header = EncHeader {
            dec_algo: ENC_ALGO_AES_GCM,
            flags: EncFlags::ENCRYPTED.bits(),
            iv_len: IV_SIZE as u16,
            tag_len: TAG_SIZE as u16,
            iv: [0; ENC_IV_MAX],
            tag: [0; ENC_TAG_MAX],
        };
        header.iv[..IV_SIZE].copy_from_slice(iv);
        header.tag[..TAG_SIZE].copy_from_slice(&tag_bytes);

        let mut slot = Vec::from(header.to_bytes());
        slot.extend_from_slice(&payload);
        self.parts.push((Self::uuid(tag), slot));
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let toc_size = TocHeader::SIZE + (self.parts.len() + 1) * TocEntry::SIZE;
        let header = TocHeader {
            name: TOC_HEADER_NAME,
            serial_number: self.serial,
            flags: 0,
        };

        let mut image = Vec::from(header.to_bytes());
        let mut data = Vec::new();
        let mut offset = align_up(toc_size, TOC_ALIGN);
        for (uuid, payload) in &self.parts {
            let entry = TocEntry {
                uuid: *uuid,
                offset: offset as u64,
                size: payload.len() as u64,
                flags: 0,
            };
            image.extend_from_slice(&entry.to_bytes());
            data.resize(offset - toc_size, 0);
            data.extend_from_slice(payload);
            offset = align_up(offset + payload.len(), TOC_ALIGN);
        }
        let terminator = TocEntry {
            uuid: Uuid::nil(),
            offset: 0,
            size: 0,
            flags: 0,
        };
        image.extend_from_slice(&terminator.to_bytes());
        image.extend_from_slice(&data);
        image
    }
}

/// Byte range of the slot `tag` landed at in a built (or committed) image.
pub fn slot_of(image: &[u8], tag: u8) -> std::ops::Range<usize> {
    let entries = fip::entries(image).expect("image no longer parses as a FIP");
    let entry = entries
        .iter()
        .find(|e| e.uuid == FipBuilder::uuid(tag))
        .expect("no slot with that tag");
    entry.offset as usize..(entry.offset + entry.size) as usize
}

/// Decrypt one bound slot with `key`, returning the plaintext.
pub fn unbind_slot(slot: &[u8], key: &[u8; KEY_SIZE]) -> Vec<u8> {
    let (_, header) = EncHeader::parse(slot).expect("slot has no encryption header");
    let mut payload = slot[EncHeader::SIZE..].to_vec();
    Aes256GcmCipher
        .decrypt(
            key,
            &header.iv[..header.iv_len as usize],
            &mut payload,
            &header.tag[..header.tag_len as usize],
        )
        .unwrap_or_else(|_| {
            panic!(
                "slot does not decrypt under {} (iv {})",
                hex::encode(key),
                hex::encode(&header.iv[..header.iv_len as usize])
            )
        });
    payload
}
