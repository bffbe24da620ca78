//! Committing a staged image to boot media.
//!
//! eMMC and SD go through a block driver that only promises single-block
//! writes, so everything is fed to it one block at a time. The FIP commit
//! writes the redundant pair of firmware partitions independently and
//! reports an aggregate verdict; losing one partition is survivable, that
//! is what the backup exists for. QSPI NOR has no partitions and no
//! redundancy: one write at offset zero, hard failure.

use core::fmt;

use log::{trace, warn};

use crate::platform::DeviceError;

/// Block size of the eMMC/SD drivers.
pub const BLOCK_SIZE: usize = 512;

/// Primary firmware partition name.
pub const FW_PARTITION: &str = "fip";
/// Backup firmware partition name.
pub const FW_BACKUP_PARTITION: &str = "fip.bak";

/// Destination selector carried in the write commands' argument.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TargetDevice {
    Emmc,
    Qspi,
    Sd,
}

impl TryFrom<u32> for TargetDevice {
    type Error = u32;

    fn try_from(value: u32) -> Result<Self, u32> {
        use TargetDevice::*;
        Ok(match value {
            0 => Emmc,
            1 => Qspi,
            2 => Sd,
            _ => return Err(value),
        })
    }
}

impl fmt::Display for TargetDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetDevice::Emmc => f.write_str("eMMC"),
            TargetDevice::Qspi => f.write_str("QSPI NOR"),
            TargetDevice::Sd => f.write_str("SD card"),
        }
    }
}

/// Block storage. `block` is always exactly [`BLOCK_SIZE`] bytes;
/// multi-block bursts are deliberately not part of the contract because
/// the lower drivers only implement single-block writes.
pub trait BlockDevice {
    fn write_block(&mut self, lba: u64, block: &[u8]) -> Result<(), DeviceError>;
}

/// Raw NOR flash, byte-addressed.
pub trait NorFlash {
    fn write(&mut self, offset: u64, data: &[u8]) -> Result<(), DeviceError>;
}

/// A named region of a block medium, in bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Partition {
    pub start: u64,
    pub length: u64,
}

pub trait PartitionTable {
    fn find(&self, name: &str) -> Option<Partition>;
}

/// Media resolved from a selector.
pub enum Volume<'a> {
    Block {
        dev: &'a mut dyn BlockDevice,
        partitions: &'a dyn PartitionTable,
    },
    Nor(&'a mut dyn NorFlash),
}

/// Resolves a [`TargetDevice`] to its media, bringing the device up if
/// needed (the platform's io-init step).
pub trait Storage {
    fn open(&mut self, target: TargetDevice) -> Result<Volume<'_>, DeviceError>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("partition {0} not found")]
    PartitionNotFound(&'static str),
    #[error("partition {0} too small for image")]
    PartitionTooSmall(&'static str),
    #[error(transparent)]
    Device(#[from] DeviceError),
}

/// Aggregate verdict of the redundant FIP commit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum FipCommitError {
    #[error("One partition failed to update: {0}")]
    OnePartition(Error),
    #[error("Both partitions failed to update")]
    BothPartitions,
    #[error("Write FIP failed")]
    WriteFailed,
}

/// Write `data` at `offset`, one block per driver call; a trailing partial
/// block is zero-padded.
pub fn write_blocks(dev: &mut dyn BlockDevice, offset: u64, data: &[u8]) -> Result<(), Error> {
    debug_assert_eq!(offset % BLOCK_SIZE as u64, 0);
    let mut lba = offset / BLOCK_SIZE as u64;
    let mut chunks = data.chunks_exact(BLOCK_SIZE);
    for block in chunks.by_ref() {
        dev.write_block(lba, block)?;
        lba += 1;
    }
    let tail = chunks.remainder();
    if !tail.is_empty() {
        let mut block = [0u8; BLOCK_SIZE];
        block[..tail.len()].copy_from_slice(tail);
        dev.write_block(lba, &block)?;
    }
    Ok(())
}

/// Commit a raw image at the start of the volume.
pub fn write_raw(volume: Volume<'_>, data: &[u8]) -> Result<(), Error> {
    match volume {
        Volume::Block { dev, .. } => write_blocks(dev, 0, data),
        Volume::Nor(nor) => Ok(nor.write(0, data)?),
    }
}

/// Update one named partition, capacity-checked.
pub fn update_partition(
    dev: &mut dyn BlockDevice,
    partitions: &dyn PartitionTable,
    name: &'static str,
    data: &[u8],
) -> Result<(), Error> {
    let Some(partition) = partitions.find(name) else {
        warn!("Partition {} not found", name);
        return Err(Error::PartitionNotFound(name));
    };
    if data.len() as u64 > partition.length {
        warn!(
            "Partition {} only can hold {} bytes, {} uploaded",
            name,
            partition.length,
            data.len()
        );
        return Err(Error::PartitionTooSmall(name));
    }
    trace!(
        "Writing {} bytes to partition {} at {:#x}",
        data.len(),
        name,
        partition.start
    );
    write_blocks(dev, partition.start, data)
}

/// Commit a FIP: the redundant partition pair on block media, one raw
/// write on NOR.
pub fn write_fip(volume: Volume<'_>, data: &[u8]) -> Result<(), FipCommitError> {
    match volume {
        Volume::Block { dev, partitions } => {
            let primary = update_partition(&mut *dev, partitions, FW_PARTITION, data);
            let backup = update_partition(&mut *dev, partitions, FW_BACKUP_PARTITION, data);
            match (primary, backup) {
                (Ok(()), Ok(())) => Ok(()),
                (Err(e), Ok(())) | (Ok(()), Err(e)) => Err(FipCommitError::OnePartition(e)),
                (Err(p), Err(b)) => {
                    warn!("FIP update failed on both partitions: {}; {}", p, b);
                    Err(FipCommitError::BothPartitions)
                }
            }
        }
        Volume::Nor(nor) => nor.write(0, data).map_err(|e| {
            warn!("FIP write to NOR failed: {}", e);
            FipCommitError::WriteFailed
        }),
    }
}
