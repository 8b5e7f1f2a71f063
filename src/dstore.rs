//! The directory store: a directory's content is a flat sequence of
//! fixed-size pages (one page == one data block), each holding an array of
//! 64-byte `DirEntry` records. Deletion tombstones a slot in place; slots
//! are never compacted, and `add_link` always prefers reusing a tombstone
//! over growing the directory.

use std::sync::{Arc, Mutex};

use crate::device::BlockDevice;
use crate::dirent::{DirEntry, DIRENT_SIZE};
use crate::error::{Error, Result};
use crate::istore::{bmap, InodeData};
use crate::layout::Superblock;
use crate::alloc::Allocators;

/// Location of one directory slot: which page (data block) and which
/// entry index within it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    pub page: u32,
    pub index: u32,
}

pub struct DirStore {
    sb: Superblock,
}

impl DirStore {
    pub fn new(sb: Superblock) -> Self {
        DirStore { sb }
    }

    fn entries_per_page(&self) -> u32 {
        self.sb.dir_entries_per_block()
    }

    fn n_pages(&self, data: &InodeData) -> u32 {
        let block_size = self.sb.block_size;
        data.size.div_ceil(block_size)
    }

    fn read_page(&self, dev: &Mutex<impl BlockDevice>, data: &mut InodeData, allocs: &Allocators, page: u32) -> Result<Vec<u8>> {
        let block_size = self.sb.block_size as usize;
        match bmap(dev, allocs, data, page as u64, false)? {
            Some(block) => {
                let mut buf = vec![0u8; block_size];
                dev.lock().unwrap().read_block(block, &mut buf)?;
                Ok(buf)
            }
            None => Ok(vec![0u8; block_size]),
        }
    }

    fn write_page(&self, dev: &Mutex<impl BlockDevice>, allocs: &Allocators, data: &mut InodeData, page: u32, buf: &[u8]) -> Result<()> {
        let block = bmap(dev, allocs, data, page as u64, true)?.expect("alloc=true always yields a block");
        dev.lock().unwrap().write_block(block, buf)?;
        let end = (page + 1) * self.sb.block_size;
        if end > data.size {
            data.size = end;
        }
        Ok(())
    }

    fn slot_entry(&self, page_buf: &[u8], index: u32) -> DirEntry {
        let off = index as usize * DIRENT_SIZE;
        DirEntry::decode(&page_buf[off..off + DIRENT_SIZE])
    }

    /// Scans every page/slot for a name match.
    pub fn find(
        &self,
        dev: &Mutex<impl BlockDevice>,
        allocs: &Allocators,
        dir: &Arc<Mutex<InodeData>>,
        name: &str,
    ) -> Result<Option<(Slot, DirEntry)>> {
        let mut data = dir.lock().unwrap();
        let pages = self.n_pages(&data);
        let per_page = self.entries_per_page();
        for page in 0..pages {
            let buf = self.read_page(dev, &mut data, allocs, page)?;
            for index in 0..per_page {
                let entry = self.slot_entry(&buf, index);
                if !entry.is_free() && entry.name_matches(name) {
                    return Ok(Some((Slot { page, index }, entry)));
                }
            }
        }
        Ok(None)
    }

    pub fn inode_by_name(
        &self,
        dev: &Mutex<impl BlockDevice>,
        allocs: &Allocators,
        dir: &Arc<Mutex<InodeData>>,
        name: &str,
    ) -> Result<u32> {
        match self.find(dev, allocs, dir, name)? {
            Some((_, entry)) => Ok(entry.inode),
            None => Err(Error::NotFound),
        }
    }

    /// Adds `name -> inode`. Reuses the first free tombstone slot found in
    /// an existing page; only grows the directory by one page when no
    /// tombstone is free.
    pub fn add_link(
        &self,
        dev: &Mutex<impl BlockDevice>,
        allocs: &Allocators,
        dir: &Arc<Mutex<InodeData>>,
        name: &str,
        inode: u32,
    ) -> Result<()> {
        if self.find(dev, allocs, dir, name)?.is_some() {
            return Err(Error::Exists);
        }
        let entry = DirEntry::new(name, inode)?;
        let mut data = dir.lock().unwrap();
        let pages = self.n_pages(&data);
        let per_page = self.entries_per_page();

        for page in 0..pages {
            let mut buf = self.read_page(dev, &mut data, allocs, page)?;
            for index in 0..per_page {
                if self.slot_entry(&buf, index).is_free() {
                    let off = index as usize * DIRENT_SIZE;
                    buf[off..off + DIRENT_SIZE].copy_from_slice(&entry.encode());
                    self.write_page(dev, allocs, &mut data, page, &buf)?;
                    data.touch_mtime();
                    return Ok(());
                }
            }
        }

        let mut buf = vec![0u8; self.sb.block_size as usize];
        buf[0..DIRENT_SIZE].copy_from_slice(&entry.encode());
        self.write_page(dev, allocs, &mut data, pages, &buf)?;
        data.touch_mtime();
        Ok(())
    }

    /// Tombstones the slot at `at`; the slot is never reclaimed by
    /// shrinking the directory, only by a later `add_link`.
    pub fn delete_entry(
        &self,
        dev: &Mutex<impl BlockDevice>,
        allocs: &Allocators,
        dir: &Arc<Mutex<InodeData>>,
        at: Slot,
    ) -> Result<()> {
        let mut data = dir.lock().unwrap();
        let mut buf = self.read_page(dev, &mut data, allocs, at.page)?;
        let off = at.index as usize * DIRENT_SIZE;
        buf[off..off + DIRENT_SIZE].copy_from_slice(&DirEntry::EMPTY.encode());
        self.write_page(dev, allocs, &mut data, at.page, &buf)?;
        data.touch_mtime();
        Ok(())
    }

    /// Writes the initial `.` and `..` entries of a freshly created
    /// directory. `newdir` must be empty (size 0) on entry.
    pub fn make_empty(
        &self,
        dev: &Mutex<impl BlockDevice>,
        allocs: &Allocators,
        newdir: &Arc<Mutex<InodeData>>,
        parent_ino: u32,
    ) -> Result<()> {
        let self_ino = newdir.lock().unwrap().ino;
        let mut buf = vec![0u8; self.sb.block_size as usize];
        let dot = DirEntry::new(".", self_ino)?;
        let dotdot = DirEntry::new("..", parent_ino)?;
        buf[0..DIRENT_SIZE].copy_from_slice(&dot.encode());
        buf[DIRENT_SIZE..2 * DIRENT_SIZE].copy_from_slice(&dotdot.encode());
        let mut data = newdir.lock().unwrap();
        self.write_page(dev, allocs, &mut data, 0, &buf)
    }

    /// True when every slot but `.` and `..` is free (or a tombstone).
    pub fn empty(&self, dev: &Mutex<impl BlockDevice>, allocs: &Allocators, dir: &Arc<Mutex<InodeData>>) -> Result<bool> {
        let mut data = dir.lock().unwrap();
        let pages = self.n_pages(&data);
        let per_page = self.entries_per_page();
        for page in 0..pages {
            let buf = self.read_page(dev, &mut data, allocs, page)?;
            for index in 0..per_page {
                let entry = self.slot_entry(&buf, index);
                if entry.is_free() {
                    continue;
                }
                if page == 0 && (index == 0 || index == 1) {
                    continue; // `.` and `..`
                }
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// The inode number the `..` entry currently points at.
    pub fn dotdot(&self, dev: &Mutex<impl BlockDevice>, allocs: &Allocators, dir: &Arc<Mutex<InodeData>>) -> Result<u32> {
        let mut data = dir.lock().unwrap();
        let buf = self.read_page(dev, &mut data, allocs, 0)?;
        Ok(self.slot_entry(&buf, 1).inode)
    }

    /// Rewrites the `..` entry's target in place, used by `rename` when a
    /// directory moves to a new parent. An explicit targeted write rather
    /// than a delete-then-insert, so the entry's page/slot never changes.
    pub fn set_dotdot(&self, dev: &Mutex<impl BlockDevice>, allocs: &Allocators, dir: &Arc<Mutex<InodeData>>, new_parent: u32) -> Result<()> {
        let mut data = dir.lock().unwrap();
        let mut buf = self.read_page(dev, &mut data, allocs, 0)?;
        let self_ino = data.ino;
        let dot = DirEntry::new(".", self_ino)?;
        let dotdot = DirEntry::new("..", new_parent)?;
        buf[0..DIRENT_SIZE].copy_from_slice(&dot.encode());
        buf[DIRENT_SIZE..2 * DIRENT_SIZE].copy_from_slice(&dotdot.encode());
        self.write_page(dev, allocs, &mut data, 0, &buf)
    }

    /// Rewrites the entry at `at` in place, used by `rename` to overwrite
    /// an existing destination slot with the moved entry's inode.
    pub fn set_link(&self, dev: &Mutex<impl BlockDevice>, allocs: &Allocators, dir: &Arc<Mutex<InodeData>>, at: Slot, name: &str, inode: u32) -> Result<()> {
        let mut data = dir.lock().unwrap();
        let mut buf = self.read_page(dev, &mut data, allocs, at.page)?;
        let entry = DirEntry::new(name, inode)?;
        let off = at.index as usize * DIRENT_SIZE;
        buf[off..off + DIRENT_SIZE].copy_from_slice(&entry.encode());
        self.write_page(dev, allocs, &mut data, at.page, &buf)?;
        data.touch_mtime();
        Ok(())
    }

    /// One step of directory iteration. `cursor` is an absolute slot index
    /// (persistable across calls, e.g. as a `readdir` offset); entries with
    /// `inode == 0` (free or tombstoned) are skipped silently. Returns the
    /// next live `(name, inode)` pair together with the cursor to resume
    /// from on the next call, or `None` once every slot up to `size` has
    /// been visited.
    pub fn iterate(
        &self,
        dev: &Mutex<impl BlockDevice>,
        allocs: &Allocators,
        dir: &Arc<Mutex<InodeData>>,
        cursor: u32,
    ) -> Result<Option<(u32, String, u32)>> {
        let mut data = dir.lock().unwrap();
        let pages = self.n_pages(&data);
        let per_page = self.entries_per_page();
        let total = pages * per_page;
        let mut pos = cursor;
        while pos < total {
            let page = pos / per_page;
            let index = pos % per_page;
            let buf = self.read_page(dev, &mut data, allocs, page)?;
            let entry = self.slot_entry(&buf, index);
            pos += 1;
            if !entry.is_free() {
                return Ok(Some((pos, entry.name().to_string(), entry.inode)));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::MemDevice;
    use crate::inode::{FileKind, Perm, N_BLKADDR};

    fn setup() -> (Superblock, Mutex<MemDevice>, Allocators) {
        let mut dev = MemDevice::new(4096, 16384);
        let sb = Superblock::compute(4096, 16384).unwrap();
        let mut bam = crate::bitmap::Bitmap::new(sb.bits_per_block() as usize);
        bam.set(0, sb.data_block_start() as usize);
        dev.write_block(1, &bam.to_bytes(4096)).unwrap();
        let mut iam = crate::bitmap::Bitmap::new(sb.bits_per_block() as usize);
        iam.set(0, 2);
        dev.write_block(1 + sb.bam_blocks, &iam.to_bytes(4096)).unwrap();
        let allocs = Allocators::load(&mut dev, sb).unwrap();
        (sb, Mutex::new(dev), allocs)
    }

    fn new_dir(ino: u32) -> Arc<Mutex<InodeData>> {
        Arc::new(Mutex::new(InodeData {
            ino,
            kind: FileKind::Directory,
            perm: Perm::default(),
            nlink: 2,
            uid: 0,
            gid: 0,
            size: 0,
            atime: 0,
            mtime: 0,
            ctime: 0,
            blkaddr: [0; N_BLKADDR],
        }))
    }

    #[test]
    fn make_empty_then_find_dot_entries() {
        let (sb, dev, allocs) = setup();
        let store = DirStore::new(sb);
        let dir = new_dir(1);
        store.make_empty(&dev, &allocs, &dir, 1).unwrap();
        assert!(store.empty(&dev, &allocs, &dir).unwrap());
        assert_eq!(store.dotdot(&dev, &allocs, &dir).unwrap(), 1);
    }

    #[test]
    fn add_find_delete_and_reuse_slot() {
        let (sb, dev, allocs) = setup();
        let store = DirStore::new(sb);
        let dir = new_dir(1);
        store.make_empty(&dev, &allocs, &dir, 1).unwrap();
        store.add_link(&dev, &allocs, &dir, "foo", 5).unwrap();
        assert!(!store.empty(&dev, &allocs, &dir).unwrap());
        assert_eq!(store.inode_by_name(&dev, &allocs, &dir, "foo").unwrap(), 5);

        let (slot, _) = store.find(&dev, &allocs, &dir, "foo").unwrap().unwrap();
        store.delete_entry(&dev, &allocs, &dir, slot).unwrap();
        assert!(store.find(&dev, &allocs, &dir, "foo").unwrap().is_none());
        assert!(store.empty(&dev, &allocs, &dir).unwrap());

        store.add_link(&dev, &allocs, &dir, "bar", 6).unwrap();
        let (slot2, _) = store.find(&dev, &allocs, &dir, "bar").unwrap().unwrap();
        assert_eq!(slot2, slot, "tombstoned slot should be reused before growing");
    }

    #[test]
    fn duplicate_name_is_rejected() {
        let (sb, dev, allocs) = setup();
        let store = DirStore::new(sb);
        let dir = new_dir(1);
        store.make_empty(&dev, &allocs, &dir, 1).unwrap();
        store.add_link(&dev, &allocs, &dir, "foo", 5).unwrap();
        assert!(matches!(
            store.add_link(&dev, &allocs, &dir, "foo", 6),
            Err(Error::Exists)
        ));
    }

    #[test]
    fn rename_rewrites_dotdot_in_place() {
        let (sb, dev, allocs) = setup();
        let store = DirStore::new(sb);
        let dir = new_dir(1);
        store.make_empty(&dev, &allocs, &dir, 1).unwrap();
        store.set_dotdot(&dev, &allocs, &dir, 42).unwrap();
        assert_eq!(store.dotdot(&dev, &allocs, &dir).unwrap(), 42);
    }

    #[test]
    fn iterate_yields_live_entries_in_order_and_skips_tombstones() {
        let (sb, dev, allocs) = setup();
        let store = DirStore::new(sb);
        let dir = new_dir(1);
        store.make_empty(&dev, &allocs, &dir, 1).unwrap();
        store.add_link(&dev, &allocs, &dir, "foo", 5).unwrap();
        store.add_link(&dev, &allocs, &dir, "bar", 6).unwrap();
        let (slot, _) = store.find(&dev, &allocs, &dir, "foo").unwrap().unwrap();
        store.delete_entry(&dev, &allocs, &dir, slot).unwrap();

        let mut seen = Vec::new();
        let mut cursor = 0;
        while let Some((next, name, inode)) = store.iterate(&dev, &allocs, &dir, cursor).unwrap() {
            seen.push((name, inode));
            cursor = next;
        }
        assert_eq!(
            seen,
            vec![
                (".".to_string(), 1),
                ("..".to_string(), 1),
                ("bar".to_string(), 6),
            ]
        );
        assert!(store.iterate(&dev, &allocs, &dir, cursor).unwrap().is_none());
    }

    #[test]
    fn iterate_resumes_from_a_saved_cursor() {
        let (sb, dev, allocs) = setup();
        let store = DirStore::new(sb);
        let dir = new_dir(1);
        store.make_empty(&dev, &allocs, &dir, 1).unwrap();
        store.add_link(&dev, &allocs, &dir, "foo", 5).unwrap();

        let (cursor, name, inode) = store.iterate(&dev, &allocs, &dir, 0).unwrap().unwrap();
        assert_eq!((name.as_str(), inode), (".", 1));
        let (cursor, name, inode) = store.iterate(&dev, &allocs, &dir, cursor).unwrap().unwrap();
        assert_eq!((name.as_str(), inode), ("..", 1));
        let (_, name, inode) = store.iterate(&dev, &allocs, &dir, cursor).unwrap().unwrap();
        assert_eq!((name.as_str(), inode), ("foo", 5));
    }
}
