//! The formatter: lays out a fresh filesystem image. Shared by the `mkfs`
//! binary and anything embedding the crate that wants to format an image
//! in place (tests, loopback tooling).

use log::info;

use crate::bitmap::Bitmap;
use crate::device::{BlockCache, BlockDevice};
use crate::dirent::DirEntry;
use crate::error::Result;
use crate::inode::{make_mode, Dinode, FileKind, Perm, N_BLKADDR};
use crate::layout::{Superblock, ROOT_INO};

/// Formats `device`, which must already be at least `n_blocks` blocks
/// long, writing a superblock, zeroed bitmaps with the metadata region
/// pre-marked allocated, a zeroed inode table, and a root directory
/// containing `.` and `..`. Every block is staged through a `BlockCache`
/// and flushed once at the end, rather than issuing one I/O per write.
pub fn format(device: &mut impl BlockDevice, n_blocks: u32) -> Result<Superblock> {
    let sb = Superblock::compute(device.block_size(), n_blocks)?;
    info!(
        "formatting: {} blocks, {} inodes, data starts at block {}",
        sb.n_blocks,
        sb.n_inodes,
        sb.data_block_start()
    );

    let mut device = BlockCache::new(device);

    let block_size = sb.block_size as usize;
    let zero = vec![0u8; block_size];

    let mut sb_buf = zero.clone();
    sb_buf[..crate::layout::SUPERBLOCK_SIZE].copy_from_slice(&sb.encode());
    device.write_block(0, &sb_buf)?;

    // Reserve the metadata region plus the root directory's own first data
    // block (written below), so the allocator never hands it out again.
    let bits_per_block = sb.bits_per_block() as usize;
    let mut bam = Bitmap::new(bits_per_block);
    bam.set(0, sb.data_block_start() as usize + 1);
    device.write_block(1, &bam.to_bytes(block_size))?;
    for i in 1..sb.bam_blocks {
        device.write_block(1 + i, &Bitmap::new(bits_per_block).to_bytes(block_size))?;
    }

    let mut iam = Bitmap::new(bits_per_block);
    iam.set(0, ROOT_INO as usize + 1); // reserve inode 0 and the root inode
    device.write_block(1 + sb.bam_blocks, &iam.to_bytes(block_size))?;
    for i in 1..sb.iam_blocks {
        device.write_block(1 + sb.bam_blocks + i, &Bitmap::new(bits_per_block).to_bytes(block_size))?;
    }

    for i in 0..sb.inode_blocks {
        device.write_block(sb.inode_list_start() + i, &zero)?;
    }

    let root_data_block = sb.data_block_start();
    let mut root_dinode = Dinode::FREE;
    root_dinode.mode = make_mode(FileKind::Directory, Perm::default());
    root_dinode.nlink = 2;
    root_dinode.size = 2 * crate::dirent::DIRENT_SIZE as u32;
    let mut blkaddr = [0u32; N_BLKADDR];
    blkaddr[0] = root_data_block;
    root_dinode.blkaddr = blkaddr;

    let block = sb.inode_block(ROOT_INO);
    let offset = sb.inode_offset(ROOT_INO);
    let mut buf = zero.clone();
    device.read_block(block, &mut buf)?;
    buf[offset..offset + crate::layout::INODE_SIZE].copy_from_slice(&root_dinode.encode());
    device.write_block(block, &buf)?;

    let mut root_page = zero.clone();
    let dot = DirEntry::new(".", ROOT_INO)?;
    let dotdot = DirEntry::new("..", ROOT_INO)?;
    root_page[0..crate::dirent::DIRENT_SIZE].copy_from_slice(&dot.encode());
    root_page[crate::dirent::DIRENT_SIZE..2 * crate::dirent::DIRENT_SIZE].copy_from_slice(&dotdot.encode());
    device.write_block(root_data_block, &root_page)?;

    device.sync()?;
    Ok(sb)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::MemDevice;

    #[test]
    fn format_produces_mountable_image() {
        let mut dev = MemDevice::new(4096, 16384);
        let sb = format(&mut dev, 16384).unwrap();
        assert_eq!(sb.data_block_start(), 67);

        let mut buf = vec![0u8; 4096];
        dev.read_block(0, &mut buf).unwrap();
        let decoded = Superblock::decode(&buf).unwrap();
        assert_eq!(decoded, sb);
    }

    #[test]
    fn root_directory_has_dot_and_dotdot() {
        let mut dev = MemDevice::new(4096, 16384);
        let sb = format(&mut dev, 16384).unwrap();
        let mut buf = vec![0u8; 4096];
        dev.read_block(sb.data_block_start(), &mut buf).unwrap();
        let dot = DirEntry::decode(&buf[0..64]);
        let dotdot = DirEntry::decode(&buf[64..128]);
        assert_eq!(dot.name(), ".");
        assert_eq!(dot.inode, ROOT_INO);
        assert_eq!(dotdot.name(), "..");
        assert_eq!(dotdot.inode, ROOT_INO);
    }

    #[test]
    fn rejects_tiny_device() {
        let mut dev = MemDevice::new(4096, 4);
        assert!(format(&mut dev, 4).is_err());
    }
}
