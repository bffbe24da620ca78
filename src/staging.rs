//! Staged-image arena.
//!
//! Every payload lands at the base of one reserved memory region (a DDR
//! carve-out on the device); `len` tracks how much of it holds the current
//! image. A compressed upload is expanded in place: scratch and output
//! areas are carved out of the same arena past the received bytes, and the
//! result is moved back down to the base.

use log::{error, info, trace};

use crate::platform::Decompressor;
use crate::transport::Transport;
use crate::util::align_up;

/// Gzip stream magic; its presence at the base triggers decompression.
pub const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Carve parameters for in-place decompression. The defaults suit a
/// DDR-sized arena; tests running on small arenas shrink them.
#[derive(Clone, Copy, Debug)]
pub struct StagingParams {
    /// Alignment of the scratch area placed after the received image.
    pub work_align: usize,
    /// Size of the scratch area handed to the decompressor.
    pub work_len: usize,
}

impl Default for StagingParams {
    fn default() -> Self {
        Self {
            work_align: 1 << 20,
            work_len: 16 << 20,
        }
    }
}

pub struct Staging<'a> {
    arena: &'a mut [u8],
    len: usize,
    params: StagingParams,
}

impl<'a> Staging<'a> {
    pub fn new(arena: &'a mut [u8]) -> Self {
        Self::with_params(arena, StagingParams::default())
    }

    pub fn with_params(arena: &'a mut [u8], params: StagingParams) -> Self {
        Self {
            arena,
            len: 0,
            params,
        }
    }

    pub fn capacity(&self) -> usize {
        self.arena.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn clear(&mut self) {
        self.len = 0;
    }

    /// The staged image.
    pub fn data(&self) -> &[u8] {
        &self.arena[..self.len]
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.arena[..self.len]
    }

    /// Pull `length` bytes from the transport's data phase into the arena
    /// base. On short delivery the staged length stays zero and the peer
    /// sees the monitor go quiet rather than a NACK.
    ///
    /// `length` must have been validated against [`Self::capacity`].
    pub fn receive(&mut self, transport: &mut dyn Transport, length: usize) -> bool {
        debug_assert!(length <= self.capacity());
        self.len = 0;
        let mut offset = 0;
        while offset < length {
            let n = transport.recv_chunk(&mut self.arena[offset..length]);
            if n == 0 {
                break;
            }
            offset += n;
        }
        if offset != length {
            error!("RxData error: got {} bytes, requested {}", offset, length);
            return false;
        }
        self.len = length;
        trace!("Received {} bytes", length);
        true
    }

    /// Expand a gzip'd image in place. Anything without the magic is left
    /// alone, as is the staged image on any failure.
    pub fn maybe_decompress(&mut self, decompressor: &mut dyn Decompressor) {
        if self.len < GZIP_MAGIC.len() || self.arena[..GZIP_MAGIC.len()] != GZIP_MAGIC {
            return;
        }
        let in_len = self.len;
        let work_offset = align_up(in_len, self.params.work_align);
        let Some(out_offset) = work_offset.checked_add(self.params.work_len) else {
            error!("No arena room to decompress image");
            return;
        };
        if out_offset >= self.capacity() {
            error!("No arena room to decompress image");
            return;
        }

        info!("Compressed image detected, uncompressing");
        let (head, rest) = self.arena.split_at_mut(work_offset);
        let (work, out) = rest.split_at_mut(self.params.work_len);
        match decompressor.decompress(&head[..in_len], work, out) {
            Ok(out_len) if out_len <= out.len() => {
                self.arena.copy_within(out_offset..out_offset + out_len, 0);
                self.len = out_len;
                info!("Uncompressed data: {} bytes", out_len);
            }
            Ok(out_len) => {
                error!("Decompressor overran its output area ({} bytes)", out_len);
            }
            Err(e) => {
                error!("Uncompress error: {}", e);
            }
        }
    }
}
