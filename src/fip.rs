//! Firmware Image Package (FIP) container structures.
//!
//! A FIP is a flat archive: a 16-byte table-of-contents header, a run of
//! 40-byte entries, then the image payloads the entries point at. The entry
//! list ends with an all-nil-uuid terminator, and every payload offset is
//! 4-byte aligned (the packaging tool's `FIP_ALIGN`). An encrypted image
//! carries its own 44-byte header in front of the ciphertext inside its
//! slot: magic, algorithm id, status flags, then IV and tag with explicit
//! lengths. All fields are little-endian.

use nom::{
    combinator::verify,
    multi::fill,
    number::complete::{le_u16, le_u32, le_u64, u8},
};
use serde::Serialize;
use uuid::Uuid;

/// ToC header magic ("name" field).
pub const TOC_HEADER_NAME: u32 = 0xAA64_0001;
/// Encrypted-image header magic.
pub const ENC_HEADER_MAGIC: u32 = 0xAA64_0002;
/// Required alignment of every entry's payload offset.
pub const TOC_ALIGN: usize = 4;

/// Algorithm id in the encryption header; AES-GCM is the only one defined.
pub const ENC_ALGO_AES_GCM: u16 = 0;
/// Capacity of the IV field in the encryption header.
pub const ENC_IV_MAX: usize = 16;
/// Capacity of the tag field in the encryption header.
pub const ENC_TAG_MAX: usize = 16;

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("Header check of FIP failed")]
    BadHeader,
    #[error("FIP does not have a ToC terminator entry")]
    NoTerminator,
    #[error("FIP needs to be produced with FIP_ALIGN")]
    Unaligned,
    #[error("FIP ToC extends beyond loaded image")]
    TocOutOfRange,
    #[error("FIP image entry extends beyond loaded image")]
    EntryOutOfRange,
}

/// Table-of-contents header at offset 0.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct TocHeader {
    pub name: u32,
    pub serial_number: u32,
    pub flags: u64,
}

impl TocHeader {
    pub const SIZE: usize = 16;

    pub fn parse(i: &[u8]) -> nom::IResult<&[u8], Self, ()> {
        let (i, name) = le_u32(i)?;
        let (i, serial_number) = le_u32(i)?;
        let (i, flags) = le_u64(i)?;
        Ok((
            i,
            Self {
                name,
                serial_number,
                flags,
            },
        ))
    }

    /// The check the monitor applies before trusting staged data as a FIP:
    /// right magic, non-zero serial number.
    pub fn is_valid(&self) -> bool {
        self.name == TOC_HEADER_NAME && self.serial_number != 0
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out[0..4].copy_from_slice(&self.name.to_le_bytes());
        out[4..8].copy_from_slice(&self.serial_number.to_le_bytes());
        out[8..16].copy_from_slice(&self.flags.to_le_bytes());
        out
    }
}

/// One table-of-contents entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct TocEntry {
    pub uuid: Uuid,
    /// Payload offset from the start of the FIP.
    pub offset: u64,
    pub size: u64,
    pub flags: u64,
}

impl TocEntry {
    pub const SIZE: usize = 40;

    pub fn parse(i: &[u8]) -> nom::IResult<&[u8], Self, ()> {
        let mut raw = [0u8; 16];
        let (i, ()) = fill(u8, &mut raw)(i)?;
        let (i, offset) = le_u64(i)?;
        let (i, size) = le_u64(i)?;
        let (i, flags) = le_u64(i)?;
        Ok((
            i,
            Self {
                uuid: Uuid::from_bytes(raw),
                offset,
                size,
                flags,
            },
        ))
    }

    /// The all-nil uuid ends the table.
    pub fn is_terminator(&self) -> bool {
        self.uuid.is_nil()
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out[0..16].copy_from_slice(self.uuid.as_bytes());
        out[16..24].copy_from_slice(&self.offset.to_le_bytes());
        out[24..32].copy_from_slice(&self.size.to_le_bytes());
        out[32..40].copy_from_slice(&self.flags.to_le_bytes());
        out
    }
}

bitflags::bitflags! {
    /// Status flags of the encryption header.
    pub struct EncFlags: u16 {
        const ENCRYPTED = 1 << 0;
    }
}

/// Per-image encryption header, in front of the ciphertext inside a slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EncHeader {
    pub dec_algo: u16,
    /// Raw flags word. [`EncFlags`] names the defined bits; undefined bits
    /// are carried through a rewrite untouched.
    pub flags: u16,
    pub iv_len: u16,
    pub tag_len: u16,
    pub iv: [u8; ENC_IV_MAX],
    pub tag: [u8; ENC_TAG_MAX],
}

impl EncHeader {
    pub const SIZE: usize = 44;

    /// Cheap probe: does this slot start with the encryption magic?
    pub fn sniff(i: &[u8]) -> bool {
        i.len() >= 4 && i[..4] == ENC_HEADER_MAGIC.to_le_bytes()
    }

    pub fn parse(i: &[u8]) -> nom::IResult<&[u8], Self, ()> {
        let literal_u32 = |x: u32| verify(le_u32, move |y| *y == x);
        let (i, _magic) = literal_u32(ENC_HEADER_MAGIC)(i)?;
        let (i, dec_algo) = le_u16(i)?;
        let (i, flags) = le_u16(i)?;
        let (i, iv_len) = le_u16(i)?;
        let (i, tag_len) = le_u16(i)?;
        let mut iv = [0u8; ENC_IV_MAX];
        let (i, ()) = fill(u8, &mut iv)(i)?;
        let mut tag = [0u8; ENC_TAG_MAX];
        let (i, ()) = fill(u8, &mut tag)(i)?;
        Ok((
            i,
            Self {
                dec_algo,
                flags,
                iv_len,
                tag_len,
                iv,
                tag,
            },
        ))
    }

    pub fn is_encrypted(&self) -> bool {
        EncFlags::from_bits_truncate(self.flags).contains(EncFlags::ENCRYPTED)
    }

    /// Serialize into the front of an image slot. `out` must hold at least
    /// [`Self::SIZE`] bytes.
    pub fn write_to(&self, out: &mut [u8]) {
        out[0..4].copy_from_slice(&ENC_HEADER_MAGIC.to_le_bytes());
        out[4..6].copy_from_slice(&self.dec_algo.to_le_bytes());
        out[6..8].copy_from_slice(&self.flags.to_le_bytes());
        out[8..10].copy_from_slice(&self.iv_len.to_le_bytes());
        out[10..12].copy_from_slice(&self.tag_len.to_le_bytes());
        out[12..28].copy_from_slice(&self.iv);
        out[28..44].copy_from_slice(&self.tag);
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        self.write_to(&mut out);
        out
    }
}

/// Does `image` begin with a plausible FIP?
pub fn valid_header(image: &[u8]) -> bool {
    matches!(TocHeader::parse(image), Ok((_, header)) if header.is_valid())
}

/// Parse and validate the full table of contents of a staged FIP.
///
/// Walks entries from right after the header up to the first payload
/// (entry 0's offset bounds the table), stopping at the terminator. Every
/// entry must be aligned per [`TOC_ALIGN`] and lie within `image`; the
/// terminator must be present. Returns the entries without the terminator.
pub fn entries(image: &[u8]) -> Result<Vec<TocEntry>, Error> {
    let (_, header) = TocHeader::parse(image).map_err(|_| Error::BadHeader)?;
    if !header.is_valid() {
        return Err(Error::BadHeader);
    }

    let first = entry_at(image, TocHeader::SIZE)?;
    let toc_end = first.offset as usize;

    let mut entries = Vec::new();
    let mut offset = TocHeader::SIZE;
    let mut terminated = false;
    while offset < toc_end {
        let entry = entry_at(image, offset)?;
        if entry.is_terminator() {
            terminated = true;
            break;
        }
        if entry.offset as usize % TOC_ALIGN != 0 {
            return Err(Error::Unaligned);
        }
        let end = entry.offset.checked_add(entry.size).ok_or(Error::EntryOutOfRange)?;
        if end > image.len() as u64 {
            return Err(Error::EntryOutOfRange);
        }
        entries.push(entry);
        offset += TocEntry::SIZE;
    }
    if !terminated {
        return Err(Error::NoTerminator);
    }
    Ok(entries)
}

fn entry_at(image: &[u8], offset: usize) -> Result<TocEntry, Error> {
    let bytes = image
        .get(offset..offset + TocEntry::SIZE)
        .ok_or(Error::TocOutOfRange)?;
    let (_, entry) = TocEntry::parse(bytes).map_err(|_| Error::TocOutOfRange)?;
    Ok(entry)
}
