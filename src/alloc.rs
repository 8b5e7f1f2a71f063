//! The block and inode bitmap allocators. Both bitmaps and their rotating
//! cursors are protected by a single process-wide `Mutex`: holding
//! intervals are strictly bounded to test-and-set-a-bit, update cursor,
//! mark dirty — no I/O runs while the lock is held.

use std::sync::Mutex;

use log::warn;

use crate::bitmap::Bitmap;
use crate::device::BlockDevice;
use crate::error::{Error, Result};
use crate::layout::{Superblock, INVALID_NO};

struct BitmapChain {
    blocks: Vec<Bitmap>,
    dirty: Vec<bool>,
    last_idx: usize,
}

impl BitmapChain {
    fn load(dev: &mut impl BlockDevice, first_block: u32, n_blocks: u32, bits_per_block: u32) -> Result<Self> {
        let mut blocks = Vec::with_capacity(n_blocks as usize);
        let mut buf = vec![0u8; dev.block_size() as usize];
        for i in 0..n_blocks {
            dev.read_block(first_block + i, &mut buf)?;
            blocks.push(Bitmap::from_bytes(&buf, bits_per_block as usize));
        }
        Ok(BitmapChain {
            dirty: vec![false; blocks.len()],
            blocks,
            last_idx: 0,
        })
    }

    /// Rotating first-fit search: starting at `last_idx`, scan each buffer
    /// (bounded to `valid_bits(i)`) for the first zero bit. On a full sweep
    /// back to the origin, fail with `NoSpace`.
    fn allocate(&mut self, valid_bits: impl Fn(usize) -> usize) -> Result<u32> {
        let n = self.blocks.len();
        if n == 0 {
            return Err(Error::NoSpace);
        }
        let mut idx = self.last_idx;
        loop {
            let bits = valid_bits(idx);
            let bit = self.blocks[idx].alloc_region(bits, 0, 1);
            if bit != INVALID_NO {
                self.dirty[idx] = true;
                self.last_idx = idx;
                let bits_per_block = self.blocks[idx].len();
                return Ok((idx * bits_per_block) as u32 + bit);
            }
            idx = (idx + 1) % n;
            if idx == self.last_idx {
                return Err(Error::NoSpace);
            }
        }
    }

    fn free(&mut self, idx: usize, bit: usize) {
        if idx >= self.blocks.len() {
            warn!("free: nonexistent bitmap buffer {idx}");
            return;
        }
        if !self.blocks[idx].free_region(bit, 1) {
            warn!("free: bit {bit} in buffer {idx} already cleared");
        }
        self.dirty[idx] = true;
    }

    fn count_free(&self, limit: usize) -> u32 {
        let bits_per_block = if self.blocks.is_empty() {
            0
        } else {
            self.blocks[0].len()
        };
        let mut remaining = limit;
        let mut total = 0u32;
        for bm in &self.blocks {
            let take = remaining.min(bits_per_block);
            total += bm.count_free(take);
            remaining = remaining.saturating_sub(take);
        }
        total
    }

    fn flush(&mut self, dev: &mut impl BlockDevice, first_block: u32) -> Result<()> {
        let block_size = dev.block_size() as usize;
        for (i, bm) in self.blocks.iter().enumerate() {
            if self.dirty[i] {
                dev.write_block(first_block + i as u32, &bm.to_bytes(block_size))?;
                self.dirty[i] = false;
            }
        }
        Ok(())
    }
}

struct AllocState {
    bam: BitmapChain,
    iam: BitmapChain,
}

/// Owns both bitmaps and the single mutex that guards every mutation of
/// either one, per the concurrency model.
pub struct Allocators {
    sb: Superblock,
    state: Mutex<AllocState>,
}

impl Allocators {
    pub fn load(dev: &mut impl BlockDevice, sb: Superblock) -> Result<Self> {
        let bits_per_block = sb.bits_per_block();
        let bam = BitmapChain::load(dev, 1, sb.bam_blocks, bits_per_block)?;
        let iam = BitmapChain::load(dev, 1 + sb.bam_blocks, sb.iam_blocks, bits_per_block)?;
        Ok(Allocators {
            sb,
            state: Mutex::new(AllocState { bam, iam }),
        })
    }

    /// Allocates a data block; the caller is responsible for zeroing it.
    pub fn allocate_block(&self) -> Result<u32> {
        let sb = &self.sb;
        let mut state = self.state.lock().unwrap();
        let bits_per_block = sb.bits_per_block() as usize;
        state.bam.allocate(|idx| {
            ((sb.n_blocks as usize).saturating_sub(idx * bits_per_block)).min(bits_per_block)
        })
    }

    pub fn free_block(&self, block: u32) {
        let sb = &self.sb;
        if block < sb.data_block_start() || block >= sb.n_blocks {
            warn!("free_block: block {block} not in data zone");
            return;
        }
        let bits_per_block = sb.bits_per_block();
        let idx = (block / bits_per_block) as usize;
        let bit = (block % bits_per_block) as usize;
        let mut state = self.state.lock().unwrap();
        state.bam.free(idx, bit);
    }

    /// Allocates an inode number in `[1, n_inodes)`; index 0 is permanently
    /// reserved and is never returned.
    pub fn allocate_inode(&self) -> Result<u32> {
        let sb = &self.sb;
        let bits_per_block = sb.bits_per_block() as usize;
        let mut state = self.state.lock().unwrap();
        state.iam.allocate(|idx| {
            ((sb.n_inodes as usize).saturating_sub(idx * bits_per_block)).min(bits_per_block)
        })
    }

    pub fn free_inode(&self, ino: u32) {
        let sb = &self.sb;
        if ino < 1 || ino >= sb.n_inodes {
            warn!("free_inode: inode {ino} out of range");
            return;
        }
        let bits_per_block = sb.bits_per_block();
        let idx = (ino / bits_per_block) as usize;
        let bit = (ino % bits_per_block) as usize;
        let mut state = self.state.lock().unwrap();
        state.iam.free(idx, bit);
    }

    pub fn count_free_blocks(&self) -> u32 {
        let sb = &self.sb;
        self.state.lock().unwrap().bam.count_free(sb.n_blocks as usize)
    }

    pub fn count_free_inodes(&self) -> u32 {
        let sb = &self.sb;
        self.state.lock().unwrap().iam.count_free(sb.n_inodes as usize)
    }

    pub fn flush(&self, dev: &mut impl BlockDevice) -> Result<()> {
        let sb = &self.sb;
        let mut state = self.state.lock().unwrap();
        state.bam.flush(dev, 1)?;
        state.iam.flush(dev, 1 + sb.bam_blocks)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::MemDevice;

    fn make(n_blocks: u32) -> (Allocators, MemDevice, Superblock) {
        let mut dev = MemDevice::new(4096, n_blocks);
        let sb = Superblock::compute(4096, n_blocks).unwrap();
        // mimic mkfs: pre-mark metadata region / reserved inode.
        let mut bam_bits = Bitmap::new(sb.bits_per_block() as usize);
        bam_bits.set(0, sb.data_block_start() as usize);
        dev.write_block(1, &bam_bits.to_bytes(4096)).unwrap();
        let mut iam_bits = Bitmap::new(sb.bits_per_block() as usize);
        iam_bits.set(0, 1);
        dev.write_block(1 + sb.bam_blocks, &iam_bits.to_bytes(4096))
            .unwrap();
        let allocs = Allocators::load(&mut dev, sb).unwrap();
        (allocs, dev, sb)
    }

    #[test]
    fn allocate_and_free_block_round_trips_free_count() {
        let (allocs, _dev, sb) = make(16384);
        let before = allocs.count_free_blocks();
        let b = allocs.allocate_block().unwrap();
        assert!(b >= sb.data_block_start());
        assert_eq!(allocs.count_free_blocks(), before - 1);
        allocs.free_block(b);
        assert_eq!(allocs.count_free_blocks(), before);
    }

    #[test]
    fn rejects_block_outside_data_zone() {
        let (allocs, _dev, _sb) = make(16384);
        let before = allocs.count_free_blocks();
        allocs.free_block(0);
        assert_eq!(allocs.count_free_blocks(), before);
    }

    #[test]
    fn count_free_blocks_and_inodes_match_a_fresh_layout() {
        let (allocs, _dev, sb) = make(16384);
        assert_eq!(allocs.count_free_blocks(), sb.n_blocks - sb.data_block_start());
        assert_eq!(allocs.count_free_inodes(), sb.n_inodes - 1);
    }

    #[test]
    fn allocate_inode_never_returns_zero() {
        let (allocs, _dev, _sb) = make(16384);
        for _ in 0..10 {
            let ino = allocs.allocate_inode().unwrap();
            assert_ne!(ino, 0);
        }
    }

    #[test]
    fn exhausting_blocks_reports_no_space() {
        let (allocs, _dev, _sb) = make(1040); // small image, few data blocks
        let mut allocated = Vec::new();
        loop {
            match allocs.allocate_block() {
                Ok(b) => allocated.push(b),
                Err(Error::NoSpace) => break,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert!(!allocated.is_empty());
        assert_eq!(allocs.count_free_blocks(), 0);
    }
}

