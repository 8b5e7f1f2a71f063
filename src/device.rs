//! Block device abstraction: fixed-size block read/write over a seekable
//! backing store, plus a write-back cache used by the formatter and reusable
//! at mount time.

use std::collections::{HashMap, VecDeque};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};

use log::debug;

/// Any seekable, fixed-block-size backing store. Implemented for real files
/// via `FileDevice` and for an in-memory `Vec<u8>` for tests.
pub trait BlockDevice: Send + Sync {
    fn block_size(&self) -> u32;
    fn read_block(&mut self, block: u32, buf: &mut [u8]) -> std::io::Result<()>;
    fn write_block(&mut self, block: u32, buf: &[u8]) -> std::io::Result<()>;
}

/// A `BlockDevice` backed by a regular file (or any `File`-like handle),
/// addressed by block number.
pub struct FileDevice {
    file: File,
    block_size: u32,
}

impl FileDevice {
    pub fn new(file: File, block_size: u32) -> Self {
        FileDevice { file, block_size }
    }

    pub fn len_blocks(&mut self) -> std::io::Result<u32> {
        let len = self.file.metadata()?.len();
        Ok((len / self.block_size as u64) as u32)
    }
}

impl BlockDevice for FileDevice {
    fn block_size(&self) -> u32 {
        self.block_size
    }

    fn read_block(&mut self, block: u32, buf: &mut [u8]) -> std::io::Result<()> {
        self.file
            .seek(SeekFrom::Start(block as u64 * self.block_size as u64))?;
        self.file.read_exact(buf)
    }

    fn write_block(&mut self, block: u32, buf: &[u8]) -> std::io::Result<()> {
        self.file
            .seek(SeekFrom::Start(block as u64 * self.block_size as u64))?;
        self.file.write_all(buf)
    }
}

/// An in-memory block device, handy for tests and for the mkfs unit tests
/// that don't want to touch the filesystem.
pub struct MemDevice {
    blocks: Vec<u8>,
    block_size: u32,
}

impl MemDevice {
    pub fn new(block_size: u32, n_blocks: u32) -> Self {
        MemDevice {
            blocks: vec![0u8; block_size as usize * n_blocks as usize],
            block_size,
        }
    }
}

impl BlockDevice for MemDevice {
    fn block_size(&self) -> u32 {
        self.block_size
    }

    fn read_block(&mut self, block: u32, buf: &mut [u8]) -> std::io::Result<()> {
        let start = block as usize * self.block_size as usize;
        buf.copy_from_slice(&self.blocks[start..start + buf.len()]);
        Ok(())
    }

    fn write_block(&mut self, block: u32, buf: &[u8]) -> std::io::Result<()> {
        let start = block as usize * self.block_size as usize;
        self.blocks[start..start + buf.len()].copy_from_slice(buf);
        Ok(())
    }
}

/// Number of distinct blocks a `BlockCache` keeps resident at once, mirroring
/// the teacher's fixed-size `Bcache` buffer pool (`NBUF`) rather than letting
/// a long-lived mount grow the cache without bound.
const CACHE_CAPACITY: usize = 1024;

/// A write-back cache keyed by block number. Reads populate the cache; a
/// block marked dirty is only written to the underlying device on `sync` or
/// eviction. Used both by the offline formatter, where every block is
/// touched at most once or twice and batching the writes avoids thrashing
/// the backing file, and by a mounted `Filesystem` for the lifetime of the
/// mount, where `CACHE_CAPACITY` bounds how many blocks stay resident.
pub struct BlockCache<D: BlockDevice> {
    dev: Option<D>,
    entries: HashMap<u32, (Vec<u8>, bool)>,
    order: VecDeque<u32>,
}

impl<D: BlockDevice> BlockCache<D> {
    pub fn new(dev: D) -> Self {
        BlockCache {
            dev: Some(dev),
            entries: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    fn dev_mut(&mut self) -> &mut D {
        self.dev.as_mut().expect("device taken")
    }

    pub fn block_size(&self) -> u32 {
        self.dev.as_ref().expect("device taken").block_size()
    }

    /// Evicts the oldest resident block to stay under `CACHE_CAPACITY`,
    /// flushing it first if dirty. No-op once `block` is already resident,
    /// since that slot won't grow the map.
    fn make_room(&mut self, block: u32) -> std::io::Result<()> {
        if self.entries.contains_key(&block) || self.entries.len() < CACHE_CAPACITY {
            return Ok(());
        }
        while let Some(victim) = self.order.pop_front() {
            let Some((data, dirty)) = self.entries.remove(&victim) else {
                continue;
            };
            if dirty {
                self.dev_mut().write_block(victim, &data)?;
            }
            break;
        }
        Ok(())
    }

    pub fn read(&mut self, block: u32) -> std::io::Result<Vec<u8>> {
        if let Some((data, _)) = self.entries.get(&block) {
            return Ok(data.clone());
        }
        let mut buf = vec![0u8; self.block_size() as usize];
        self.dev_mut().read_block(block, &mut buf)?;
        self.make_room(block)?;
        self.entries.insert(block, (buf.clone(), false));
        self.order.push_back(block);
        Ok(buf)
    }

    /// Stages a write; does not touch the backing store until `sync` or
    /// eviction.
    pub fn write(&mut self, block: u32, data: Vec<u8>) -> std::io::Result<()> {
        self.make_room(block)?;
        if !self.entries.contains_key(&block) {
            self.order.push_back(block);
        }
        self.entries.insert(block, (data, true));
        Ok(())
    }

    /// Flushes every dirty entry to the backing device, in ascending block
    /// order so sequential writers see monotonic I/O.
    pub fn sync(&mut self) -> std::io::Result<()> {
        let mut dirty: Vec<u32> = self
            .entries
            .iter()
            .filter(|(_, (_, dirty))| *dirty)
            .map(|(&b, _)| b)
            .collect();
        dirty.sort_unstable();
        for block in dirty {
            let data = self.entries.get(&block).unwrap().0.clone();
            self.dev_mut().write_block(block, &data)?;
            self.entries.get_mut(&block).unwrap().1 = false;
        }
        debug!("block cache synced");
        Ok(())
    }

    pub fn into_inner(mut self) -> D {
        let _ = self.sync();
        self.dev.take().expect("device taken")
    }
}

impl<D: BlockDevice> Drop for BlockCache<D> {
    fn drop(&mut self) {
        if self.dev.is_some() && self.entries.values().any(|(_, dirty)| *dirty) {
            let _ = self.sync();
        }
    }
}

impl<D: BlockDevice> BlockDevice for BlockCache<D> {
    fn block_size(&self) -> u32 {
        BlockCache::block_size(self)
    }

    fn read_block(&mut self, block: u32, buf: &mut [u8]) -> std::io::Result<()> {
        buf.copy_from_slice(&self.read(block)?);
        Ok(())
    }

    fn write_block(&mut self, block: u32, buf: &[u8]) -> std::io::Result<()> {
        self.write(block, buf.to_vec())
    }
}

/// Lets a cache be built on top of a borrowed device, so a caller that only
/// has `&mut impl BlockDevice` (e.g. `format`'s signature) can still wrap it.
impl<T: BlockDevice + ?Sized> BlockDevice for &mut T {
    fn block_size(&self) -> u32 {
        (**self).block_size()
    }

    fn read_block(&mut self, block: u32, buf: &mut [u8]) -> std::io::Result<()> {
        (**self).read_block(block, buf)
    }

    fn write_block(&mut self, block: u32, buf: &[u8]) -> std::io::Result<()> {
        (**self).write_block(block, buf)
    }
}
