//! On-disk superblock and the derived block layout.
//!
//! Disk layout:
//! ```text
//! [ superblock | BAM | IAM | inode table | data region ]
//! ```
//! mkfs computes the superblock and the rest of the layout follows from it.

use static_assertions::const_assert_eq;
use std::mem::size_of;

use crate::error::{Error, Result};

/// Must be `Superblock::magic`.
pub const SFS_MAGIC: u32 = 0x2015_0825;

/// Root directory inode number.
pub const ROOT_INO: u32 = 1;

/// Sentinel returned by bitmap allocation on failure; also `SFS_BAD_INO`.
/// Slot/block 0 is never a valid allocation result.
pub const INVALID_NO: u32 = 0;

/// Bytes reserved for a directory entry's name field.
pub const NAME_LEN: usize = 60;

/// Usable bytes in a name (the last byte of the field is always NUL).
pub const NAME_MAX: usize = NAME_LEN - 1;

/// Maximum link count the format supports.
pub const LINK_MAX: u16 = 32000;

/// Encoded on-disk size of the superblock record.
pub const SUPERBLOCK_SIZE: usize = 4 * 7;

/// The reference block size used by the `mkfs` CLI. Any power-of-two block
/// size large enough to hold the superblock is structurally valid.
pub const DEFAULT_BLOCK_SIZE: u32 = 4096;

/// On-disk and in-memory superblock. All multi-byte fields are little-endian
/// on disk; in memory they are plain host-endian integers produced by the
/// encoding layer below.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Superblock {
    pub magic: u32,
    pub block_size: u32,
    pub bam_blocks: u32,
    pub iam_blocks: u32,
    pub inode_blocks: u32,
    pub n_blocks: u32,
    pub n_inodes: u32,
}

impl Superblock {
    /// Computes a fresh layout for a device of `n_blocks` blocks of
    /// `block_size` bytes, reserving roughly 25% of capacity for inodes, the
    /// same proportions `mkfs` uses.
    pub fn compute(block_size: u32, n_blocks: u32) -> Result<Self> {
        if block_size == 0 || !block_size.is_multiple_of(512) {
            return Err(Error::InvalidArg(format!(
                "unsupported block size {block_size}"
            )));
        }
        let bits_per_block = 8 * block_size;
        let inodes_per_block = block_size / INODE_SIZE as u32;
        if inodes_per_block == 0 {
            return Err(Error::InvalidArg(
                "block size too small to hold one inode".into(),
            ));
        }

        let bam_blocks = div_round_up(n_blocks, bits_per_block);
        let inode_blocks = div_round_up(n_blocks / 4, inodes_per_block);
        let n_inodes = inode_blocks * inodes_per_block;
        let iam_blocks = div_round_up(n_inodes, bits_per_block);

        let sb = Superblock {
            magic: SFS_MAGIC,
            block_size,
            bam_blocks,
            iam_blocks,
            inode_blocks,
            n_blocks,
            n_inodes,
        };
        if sb.data_block_start() >= n_blocks {
            return Err(Error::InvalidArg("device too small for layout".into()));
        }
        Ok(sb)
    }

    /// First block of the inode table.
    pub fn inode_list_start(&self) -> u32 {
        1 + self.bam_blocks + self.iam_blocks
    }

    /// First block of the data region; one past the last metadata block.
    pub fn data_block_start(&self) -> u32 {
        self.inode_list_start() + self.inode_blocks
    }

    /// Inodes packed per inode-table block.
    pub fn inodes_per_block(&self) -> u32 {
        self.block_size / INODE_SIZE as u32
    }

    /// Bits addressable by a single bitmap block.
    pub fn bits_per_block(&self) -> u32 {
        8 * self.block_size
    }

    /// Directory entries packed per data block.
    pub fn dir_entries_per_block(&self) -> u32 {
        self.block_size / crate::dirent::DIRENT_SIZE as u32
    }

    /// Block of the inode table holding inode number `ino`.
    pub fn inode_block(&self, ino: u32) -> u32 {
        self.inode_list_start() + ino / self.inodes_per_block()
    }

    /// Byte offset within that block of inode number `ino`.
    pub fn inode_offset(&self, ino: u32) -> usize {
        (ino % self.inodes_per_block()) as usize * INODE_SIZE
    }

    pub fn encode(&self) -> [u8; SUPERBLOCK_SIZE] {
        let mut buf = [0u8; SUPERBLOCK_SIZE];
        buf[0..4].copy_from_slice(&self.magic.to_le_bytes());
        buf[4..8].copy_from_slice(&self.block_size.to_le_bytes());
        buf[8..12].copy_from_slice(&self.bam_blocks.to_le_bytes());
        buf[12..16].copy_from_slice(&self.iam_blocks.to_le_bytes());
        buf[16..20].copy_from_slice(&self.inode_blocks.to_le_bytes());
        buf[20..24].copy_from_slice(&self.n_blocks.to_le_bytes());
        buf[24..28].copy_from_slice(&self.n_inodes.to_le_bytes());
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < SUPERBLOCK_SIZE {
            return Err(Error::InvalidArg("truncated superblock".into()));
        }
        let u32_at = |off: usize| u32::from_le_bytes(buf[off..off + 4].try_into().unwrap());
        let sb = Superblock {
            magic: u32_at(0),
            block_size: u32_at(4),
            bam_blocks: u32_at(8),
            iam_blocks: u32_at(12),
            inode_blocks: u32_at(16),
            n_blocks: u32_at(20),
            n_inodes: u32_at(24),
        };
        if sb.magic != SFS_MAGIC {
            return Err(Error::InvalidArg(format!(
                "bad magic number {:#x}",
                sb.magic
            )));
        }
        Ok(sb)
    }
}

fn div_round_up(a: u32, b: u32) -> u32 {
    a.div_ceil(b)
}

/// On-disk size of one inode record, computed from its field widths.
pub const INODE_SIZE: usize = 2 + 2 + 4 + 4 + 4 + 4 + 4 + 4 + 4 * 9;
const_assert_eq!(INODE_SIZE, 64);
const_assert_eq!(size_of::<u32>(), 4);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_bytes() {
        let sb = Superblock::compute(DEFAULT_BLOCK_SIZE, 16384).unwrap();
        let decoded = Superblock::decode(&sb.encode()).unwrap();
        assert_eq!(sb, decoded);
    }

    #[test]
    fn matches_reference_64mib_layout() {
        // block size 4096, image 64 MiB = 16384 blocks
        let sb = Superblock::compute(DEFAULT_BLOCK_SIZE, 16384).unwrap();
        assert_eq!(sb.bam_blocks, 1);
        assert_eq!(sb.iam_blocks, 1);
        assert_eq!(sb.inode_blocks, 64);
        assert_eq!(sb.n_inodes, 4096);
        assert_eq!(sb.data_block_start(), 67);
    }

    #[test]
    fn rejects_bad_magic() {
        let mut buf = [0u8; SUPERBLOCK_SIZE];
        buf[0..4].copy_from_slice(&0xdead_beefu32.to_le_bytes());
        assert!(Superblock::decode(&buf).is_err());
    }
}
