//! Namespace operations: the directory-tree-level API (`create`, `mkdir`,
//! `unlink`, `rename`, ...) built on top of the inode store and directory
//! store. Each multi-step mutation that can fail partway rolls back via
//! `scopeguard`, the same pattern the host kernel module's equivalent
//! layer uses for its allocate-then-link sequences.

use std::sync::{Arc, Mutex};

use log::debug;
use scopeguard::guard;

use crate::alloc::Allocators;
use crate::device::{BlockCache, BlockDevice};
use crate::dstore::DirStore;
use crate::error::{Error, Result};
use crate::inode::{FileKind, Perm, N_DIRECT};
use crate::istore::{bmap, InodeData, InodeStore};
use crate::layout::{Superblock, ROOT_INO};

#[derive(Debug, Clone)]
pub struct Attr {
    pub ino: u32,
    pub kind: FileKind,
    pub perm: Perm,
    pub nlink: u16,
    pub uid: u32,
    pub gid: u32,
    pub size: u32,
    pub atime: u32,
    pub mtime: u32,
    pub ctime: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct Statfs {
    pub block_size: u32,
    pub n_blocks: u32,
    pub free_blocks: u32,
    pub n_inodes: u32,
    pub free_inodes: u32,
    pub name_max: u32,
}

fn attr_of(data: &InodeData) -> Attr {
    Attr {
        ino: data.ino,
        kind: data.kind,
        perm: data.perm,
        nlink: data.nlink,
        uid: data.uid,
        gid: data.gid,
        size: data.size,
        atime: data.atime,
        mtime: data.mtime,
        ctime: data.ctime,
    }
}

/// Top-level filesystem handle: owns the device, the superblock, both
/// allocators, and the inode/directory stores built on top of them. The
/// device is wrapped in a `BlockCache` so repeated reads of hot blocks
/// (the superblock, bitmap words, recently touched inodes) don't round-trip
/// to the backing store, and writes batch until an explicit `flush`.
pub struct Filesystem<D: BlockDevice> {
    dev: Mutex<BlockCache<D>>,
    sb: Superblock,
    allocs: Allocators,
    istore: InodeStore,
    dstore: DirStore,
}

impl<D: BlockDevice> Filesystem<D> {
    pub fn mount(dev: D) -> Result<Self> {
        let mut dev = BlockCache::new(dev);
        let mut buf = vec![0u8; 512.max(dev.block_size() as usize)];
        dev.read_block(0, &mut buf[..dev.block_size() as usize])?;
        let sb = Superblock::decode(&buf).map_err(|e| {
            log::warn!("mount: {e}");
            e
        })?;
        let allocs = Allocators::load(&mut dev, sb)?;
        Ok(Filesystem {
            dev: Mutex::new(dev),
            sb,
            allocs,
            istore: InodeStore::new(sb),
            dstore: DirStore::new(sb),
        })
    }

    pub fn root_ino(&self) -> u32 {
        ROOT_INO
    }

    pub fn lookup(&self, parent: u32, name: &str) -> Result<u32> {
        let dir = self.istore.get(&self.dev, parent)?;
        self.require_dir(&dir)?;
        self.dstore.inode_by_name(&self.dev, &self.allocs, &dir, name)
    }

    /// One step of directory listing: returns the next live `(name, inode)`
    /// entry at or after `cursor`, and the cursor to pass back in to
    /// continue, or `None` once the directory is exhausted. Stateless across
    /// calls other than the cursor value, so callers can interleave other
    /// filesystem operations between steps.
    pub fn readdir(&self, ino: u32, cursor: u32) -> Result<Option<(u32, String, u32)>> {
        let dir = self.istore.get(&self.dev, ino)?;
        self.require_dir(&dir)?;
        self.dstore.iterate(&self.dev, &self.allocs, &dir, cursor)
    }

    pub fn getattr(&self, ino: u32) -> Result<Attr> {
        let inode = self.istore.get(&self.dev, ino)?;
        let attr = attr_of(&inode.lock().unwrap());
        Ok(attr)
    }

    pub fn statfs(&self) -> Statfs {
        Statfs {
            block_size: self.sb.block_size,
            n_blocks: self.sb.n_blocks,
            free_blocks: self.allocs.count_free_blocks(),
            n_inodes: self.sb.n_inodes,
            free_inodes: self.allocs.count_free_inodes(),
            name_max: crate::layout::NAME_MAX as u32,
        }
    }

    fn require_dir(&self, inode: &Arc<Mutex<InodeData>>) -> Result<()> {
        if inode.lock().unwrap().kind != FileKind::Directory {
            return Err(Error::NotDir);
        }
        Ok(())
    }

    /// Allocates a fresh inode, links it into `parent` under `name`, and
    /// rolls the inode back (frees it) if the link step fails — the name
    /// already existing is the common failure.
    fn create_and_link(
        &self,
        parent: u32,
        name: &str,
        kind: FileKind,
        perm: Perm,
        uid: u32,
        gid: u32,
    ) -> Result<Arc<Mutex<InodeData>>> {
        let dir = self.istore.get(&self.dev, parent)?;
        self.require_dir(&dir)?;
        if self.dstore.find(&self.dev, &self.allocs, &dir, name)?.is_some() {
            return Err(Error::Exists);
        }

        let inode = self.istore.new_inode(&self.dev, &self.allocs, kind, perm, uid, gid)?;
        let inode = guard(inode, |h| {
            h.lock().unwrap().nlink = 0;
            let _ = self.istore.evict(&self.dev, &self.allocs, h);
        });
        inode.lock().unwrap().nlink = 1;
        self.istore.sync(&self.dev, &inode)?;

        self.dstore.add_link(&self.dev, &self.allocs, &dir, name, inode.lock().unwrap().ino)?;
        debug!("create_and_link: {name} -> inode {}", inode.lock().unwrap().ino);
        Ok(scopeguard::ScopeGuard::into_inner(inode))
    }

    pub fn create(&self, parent: u32, name: &str, perm: Perm, uid: u32, gid: u32) -> Result<Attr> {
        let inode = self.create_and_link(parent, name, FileKind::Regular, perm, uid, gid)?;
        let attr = attr_of(&inode.lock().unwrap());
        Ok(attr)
    }

    /// `dev` is the encoded device id for `FileKind::CharDevice`/`BlockDevice`
    /// nodes (stored in `blkaddr[0]`); it is ignored for other kinds.
    #[allow(clippy::too_many_arguments)]
    pub fn mknod(
        &self,
        parent: u32,
        name: &str,
        kind: FileKind,
        perm: Perm,
        uid: u32,
        gid: u32,
        dev: u32,
    ) -> Result<Attr> {
        if kind == FileKind::Directory {
            return Err(Error::InvalidArg("mknod cannot create directories".into()));
        }
        let is_device = matches!(kind, FileKind::CharDevice | FileKind::BlockDevice);
        if is_device && dev == 0 {
            return Err(Error::InvalidArg("bad device id".into()));
        }
        let inode = self.create_and_link(parent, name, kind, perm, uid, gid)?;
        if is_device {
            inode.lock().unwrap().blkaddr[0] = dev;
            self.istore.sync(&self.dev, &inode)?;
        }
        let attr = attr_of(&inode.lock().unwrap());
        Ok(attr)
    }

    /// Returns the encoded device id for a `CharDevice`/`BlockDevice` inode.
    pub fn device_id(&self, ino: u32) -> Result<u32> {
        let inode = self.istore.get(&self.dev, ino)?;
        let data = inode.lock().unwrap();
        if !matches!(data.kind, FileKind::CharDevice | FileKind::BlockDevice) {
            return Err(Error::InvalidArg("not a device node".into()));
        }
        Ok(data.blkaddr[0])
    }

    pub fn symlink(&self, parent: u32, name: &str, target: &str, uid: u32, gid: u32) -> Result<Attr> {
        let bytes = target.as_bytes();
        if bytes.len() as u32 > self.sb.block_size {
            return Err(Error::NameTooLong);
        }
        let inode = self.create_and_link(parent, name, FileKind::Symlink, Perm::default(), uid, gid)?;
        let mut data = inode.lock().unwrap();
        let block = bmap(&self.dev, &self.allocs, &mut data, 0, true)?.expect("alloc=true");
        let mut buf = vec![0u8; self.sb.block_size as usize];
        buf[..bytes.len()].copy_from_slice(bytes);
        self.dev.lock().unwrap().write_block(block, &buf)?;
        data.size = bytes.len() as u32;
        drop(data);
        self.istore.sync(&self.dev, &inode)?;
        let attr = attr_of(&inode.lock().unwrap());
        Ok(attr)
    }

    pub fn read_symlink(&self, ino: u32) -> Result<String> {
        let inode = self.istore.get(&self.dev, ino)?;
        let mut data = inode.lock().unwrap();
        if data.kind != FileKind::Symlink {
            return Err(Error::InvalidArg("not a symlink".into()));
        }
        let size = data.size as usize;
        let block = bmap(&self.dev, &self.allocs, &mut data, 0, false)?;
        let mut out = vec![0u8; size];
        if let Some(block) = block {
            let mut buf = vec![0u8; self.sb.block_size as usize];
            self.dev.lock().unwrap().read_block(block, &mut buf)?;
            out.copy_from_slice(&buf[..size]);
        }
        Ok(String::from_utf8_lossy(&out).into_owned())
    }

    /// Creates a hard link: `name` in `parent` gains a new directory entry
    /// pointing at `target`, whose `nlink` is bumped. Directories cannot be
    /// hard-linked.
    pub fn link(&self, parent: u32, name: &str, target: u32) -> Result<()> {
        let target_inode = self.istore.get(&self.dev, target)?;
        {
            let data = target_inode.lock().unwrap();
            if data.kind == FileKind::Directory {
                return Err(Error::IsDir);
            }
            if data.nlink >= crate::layout::LINK_MAX {
                return Err(Error::InvalidArg("link count would exceed LINK_MAX".into()));
            }
        }
        let dir = self.istore.get(&self.dev, parent)?;
        self.require_dir(&dir)?;

        target_inode.lock().unwrap().nlink += 1;
        self.istore.sync(&self.dev, &target_inode)?;

        if let Err(e) = self.dstore.add_link(&self.dev, &self.allocs, &dir, name, target) {
            target_inode.lock().unwrap().nlink -= 1;
            let _ = self.istore.sync(&self.dev, &target_inode);
            return Err(e);
        }
        Ok(())
    }

    /// Removes `name` from `parent`. Directories must be empty.
    pub fn unlink(&self, parent: u32, name: &str) -> Result<()> {
        if name == "." || name == ".." {
            return Err(Error::InvalidArg("cannot unlink . or ..".into()));
        }
        let dir = self.istore.get(&self.dev, parent)?;
        self.require_dir(&dir)?;
        let (slot, entry) = self
            .dstore
            .find(&self.dev, &self.allocs, &dir, name)?
            .ok_or(Error::NotFound)?;

        let target = self.istore.get(&self.dev, entry.inode)?;
        {
            let data = target.lock().unwrap();
            if data.kind == FileKind::Directory && !self.dstore.empty(&self.dev, &self.allocs, &target)? {
                return Err(Error::NotEmpty);
            }
        }

        self.dstore.delete_entry(&self.dev, &self.allocs, &dir, slot)?;

        let is_dir = target.lock().unwrap().kind == FileKind::Directory;
        if is_dir {
            let mut pdata = dir.lock().unwrap();
            pdata.nlink -= 1;
            self.istore.sync(&self.dev, &dir)?;
        }

        target.lock().unwrap().nlink -= 1;
        self.istore.evict(&self.dev, &self.allocs, target)
    }

    /// Creates an empty subdirectory. Rolls the new inode back if linking
    /// it into the parent fails.
    pub fn mkdir(&self, parent: u32, name: &str, perm: Perm, uid: u32, gid: u32) -> Result<Attr> {
        let parent_dir = self.istore.get(&self.dev, parent)?;
        self.require_dir(&parent_dir)?;
        if self.dstore.find(&self.dev, &self.allocs, &parent_dir, name)?.is_some() {
            return Err(Error::Exists);
        }

        let inode = self.istore.new_inode(&self.dev, &self.allocs, FileKind::Directory, perm, uid, gid)?;
        let inode = guard(inode, |h| {
            h.lock().unwrap().nlink = 0;
            let _ = self.istore.evict(&self.dev, &self.allocs, h);
        });
        inode.lock().unwrap().nlink = 2;
        self.istore.sync(&self.dev, &inode)?;
        self.dstore.make_empty(&self.dev, &self.allocs, &inode, parent)?;

        self.dstore
            .add_link(&self.dev, &self.allocs, &parent_dir, name, inode.lock().unwrap().ino)?;
        parent_dir.lock().unwrap().nlink += 1;
        self.istore.sync(&self.dev, &parent_dir)?;

        let inode = scopeguard::ScopeGuard::into_inner(inode);
        let attr = attr_of(&inode.lock().unwrap());
        Ok(attr)
    }

    /// Removes an empty subdirectory.
    pub fn rmdir(&self, parent: u32, name: &str) -> Result<()> {
        if name == "." || name == ".." {
            return Err(Error::InvalidArg("cannot remove . or ..".into()));
        }
        let parent_dir = self.istore.get(&self.dev, parent)?;
        self.require_dir(&parent_dir)?;
        let (slot, entry) = self
            .dstore
            .find(&self.dev, &self.allocs, &parent_dir, name)?
            .ok_or(Error::NotFound)?;

        let target = self.istore.get(&self.dev, entry.inode)?;
        self.require_dir(&target)?;
        if !self.dstore.empty(&self.dev, &self.allocs, &target)? {
            return Err(Error::NotEmpty);
        }

        self.dstore.delete_entry(&self.dev, &self.allocs, &parent_dir, slot)?;
        parent_dir.lock().unwrap().nlink -= 1;
        self.istore.sync(&self.dev, &parent_dir)?;

        target.lock().unwrap().nlink = 0;
        self.istore.evict(&self.dev, &self.allocs, target)
    }

    /// Moves `old_name` from `old_parent` to `new_name` under `new_parent`.
    /// A directory being moved to a different parent has its `..` entry
    /// rewritten in place to point at the new parent.
    pub fn rename(&self, old_parent: u32, old_name: &str, new_parent: u32, new_name: &str) -> Result<()> {
        if old_name == "." || old_name == ".." || new_name == "." || new_name == ".." {
            return Err(Error::InvalidArg("cannot rename . or ..".into()));
        }
        let src_dir = self.istore.get(&self.dev, old_parent)?;
        self.require_dir(&src_dir)?;
        let (src_slot, src_entry) = self
            .dstore
            .find(&self.dev, &self.allocs, &src_dir, old_name)?
            .ok_or(Error::NotFound)?;
        let moving = self.istore.get(&self.dev, src_entry.inode)?;
        let moving_is_dir = moving.lock().unwrap().kind == FileKind::Directory;
        // A directory's `..` only moves when it actually changes parent;
        // renaming within the same directory never touches nlink.
        let crosses_parents = moving_is_dir && old_parent != new_parent;

        let dst_dir = self.istore.get(&self.dev, new_parent)?;
        self.require_dir(&dst_dir)?;

        if let Some((dst_slot, dst_entry)) = self.dstore.find(&self.dev, &self.allocs, &dst_dir, new_name)? {
            if dst_entry.inode == src_entry.inode {
                return Ok(());
            }
            let existing = self.istore.get(&self.dev, dst_entry.inode)?;
            let existing_is_dir = existing.lock().unwrap().kind == FileKind::Directory;
            if existing_is_dir {
                if !self.dstore.empty(&self.dev, &self.allocs, &existing)? {
                    return Err(Error::NotEmpty);
                }
                if !moving_is_dir {
                    return Err(Error::IsDir);
                }
            } else if moving_is_dir {
                return Err(Error::NotDir);
            }
            self.dstore
                .set_link(&self.dev, &self.allocs, &dst_dir, dst_slot, new_name, src_entry.inode)?;
            // Losing `existing`'s `..` costs `dst_dir` one link; if the
            // moved directory's `..` also lands here (crossing parents)
            // that gain cancels it, so only apply the loss when it doesn't.
            if existing_is_dir && !crosses_parents {
                dst_dir.lock().unwrap().nlink -= 1;
                self.istore.sync(&self.dev, &dst_dir)?;
            }
            let remaining = {
                let mut d = existing.lock().unwrap();
                if existing_is_dir {
                    d.nlink = 0;
                } else {
                    d.nlink -= 1;
                }
                d.nlink
            };
            if remaining == 0 {
                self.istore.evict(&self.dev, &self.allocs, existing)?;
            } else {
                self.istore.sync(&self.dev, &existing)?;
            }
        } else {
            self.dstore
                .add_link(&self.dev, &self.allocs, &dst_dir, new_name, src_entry.inode)?;
            if crosses_parents {
                dst_dir.lock().unwrap().nlink += 1;
                self.istore.sync(&self.dev, &dst_dir)?;
            }
        }

        self.dstore.delete_entry(&self.dev, &self.allocs, &src_dir, src_slot)?;
        if crosses_parents {
            self.dstore.set_dotdot(&self.dev, &self.allocs, &moving, new_parent)?;
            src_dir.lock().unwrap().nlink -= 1;
            self.istore.sync(&self.dev, &src_dir)?;
        }
        Ok(())
    }

    pub fn flush(&self) -> Result<()> {
        let mut dev = self.dev.lock().unwrap();
        self.allocs.flush(&mut *dev)?;
        dev.sync()?;
        Ok(())
    }
}

/// Names a block addressing limit check used by `symlink`; kept here
/// rather than in `istore` since only the namespace layer writes whole
/// small payloads in a single block.
const _: () = assert!(N_DIRECT > 0);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::MemDevice;
    use crate::mkfs::format;

    fn make_fs() -> Filesystem<MemDevice> {
        let mut dev = MemDevice::new(4096, 16384);
        format(&mut dev, 16384).unwrap();
        Filesystem::mount(dev).unwrap()
    }

    #[test]
    fn root_exists_and_is_a_directory() {
        let fs = make_fs();
        let attr = fs.getattr(fs.root_ino()).unwrap();
        assert_eq!(attr.kind, FileKind::Directory);
        assert_eq!(attr.size, 128);
    }

    #[test]
    fn create_then_lookup_then_unlink() {
        let fs = make_fs();
        let root = fs.root_ino();
        let attr = fs.create(root, "hello.txt", Perm::default(), 0, 0).unwrap();
        assert_eq!(fs.lookup(root, "hello.txt").unwrap(), attr.ino);
        fs.unlink(root, "hello.txt").unwrap();
        assert!(matches!(fs.lookup(root, "hello.txt"), Err(Error::NotFound)));
    }

    #[test]
    fn mkdir_then_rmdir_restores_parent_nlink() {
        let fs = make_fs();
        let root = fs.root_ino();
        let before = fs.getattr(root).unwrap().nlink;
        let child = fs.mkdir(root, "sub", Perm::default(), 0, 0).unwrap();
        assert_eq!(fs.getattr(root).unwrap().nlink, before + 1);
        assert_eq!(child.nlink, 2);
        fs.rmdir(root, "sub").unwrap();
        assert_eq!(fs.getattr(root).unwrap().nlink, before);
        assert!(matches!(fs.lookup(root, "sub"), Err(Error::NotFound)));
    }

    #[test]
    fn rmdir_refuses_nonempty_directory() {
        let fs = make_fs();
        let root = fs.root_ino();
        let child = fs.mkdir(root, "sub", Perm::default(), 0, 0).unwrap();
        fs.create(child.ino, "f", Perm::default(), 0, 0).unwrap();
        assert!(matches!(fs.rmdir(root, "sub"), Err(Error::NotEmpty)));
    }

    #[test]
    fn rename_across_directories_updates_dotdot() {
        let fs = make_fs();
        let root = fs.root_ino();
        let a = fs.mkdir(root, "a", Perm::default(), 0, 0).unwrap();
        let b = fs.mkdir(root, "b", Perm::default(), 0, 0).unwrap();
        let moved = fs.mkdir(a.ino, "child", Perm::default(), 0, 0).unwrap();

        fs.rename(a.ino, "child", b.ino, "child").unwrap();
        assert!(matches!(fs.lookup(a.ino, "child"), Err(Error::NotFound)));
        assert_eq!(fs.lookup(b.ino, "child").unwrap(), moved.ino);

        let moved_inode = fs.istore.get(&fs.dev, moved.ino).unwrap();
        assert_eq!(fs.dstore.dotdot(&fs.dev, &fs.allocs, &moved_inode).unwrap(), b.ino);
        assert_eq!(fs.getattr(a.ino).unwrap().nlink, 2);
        assert_eq!(fs.getattr(b.ino).unwrap().nlink, 3);
    }

    #[test]
    fn hard_link_bumps_nlink_and_survives_one_unlink() {
        let fs = make_fs();
        let root = fs.root_ino();
        let f = fs.create(root, "orig", Perm::default(), 0, 0).unwrap();
        fs.link(root, "alias", f.ino).unwrap();
        assert_eq!(fs.getattr(f.ino).unwrap().nlink, 2);
        fs.unlink(root, "orig").unwrap();
        assert_eq!(fs.lookup(root, "alias").unwrap(), f.ino);
        assert_eq!(fs.getattr(f.ino).unwrap().nlink, 1);
    }

    #[test]
    fn link_refuses_directories() {
        let fs = make_fs();
        let root = fs.root_ino();
        let dir = fs.mkdir(root, "d", Perm::default(), 0, 0).unwrap();
        assert!(matches!(fs.link(root, "alias", dir.ino), Err(Error::IsDir)));
    }

    #[test]
    fn symlink_round_trips_target() {
        let fs = make_fs();
        let root = fs.root_ino();
        let link = fs.symlink(root, "l", "/some/target", 0, 0).unwrap();
        assert_eq!(fs.read_symlink(link.ino).unwrap(), "/some/target");
    }

    #[test]
    fn mknod_stores_and_returns_device_id() {
        let fs = make_fs();
        let root = fs.root_ino();
        let node = fs
            .mknod(root, "null", FileKind::CharDevice, Perm::default(), 0, 0, 0x0103)
            .unwrap();
        assert_eq!(fs.device_id(node.ino).unwrap(), 0x0103);
    }

    #[test]
    fn mknod_rejects_zero_device_id() {
        let fs = make_fs();
        let root = fs.root_ino();
        assert!(matches!(
            fs.mknod(root, "bad", FileKind::CharDevice, Perm::default(), 0, 0, 0),
            Err(Error::InvalidArg(_))
        ));
    }

    #[test]
    fn mknod_can_create_regular_files() {
        let fs = make_fs();
        let root = fs.root_ino();
        let attr = fs
            .mknod(root, "f", FileKind::Regular, Perm::default(), 0, 0, 0)
            .unwrap();
        assert_eq!(attr.kind, FileKind::Regular);
        assert!(matches!(fs.device_id(attr.ino), Err(Error::InvalidArg(_))));
    }

    #[test]
    fn readdir_lists_entries_across_calls() {
        let fs = make_fs();
        let root = fs.root_ino();
        fs.create(root, "a", Perm::default(), 0, 0).unwrap();
        fs.create(root, "b", Perm::default(), 0, 0).unwrap();

        let mut names = Vec::new();
        let mut cursor = 0;
        while let Some((next, name, _inode)) = fs.readdir(root, cursor).unwrap() {
            names.push(name);
            cursor = next;
        }
        assert_eq!(names, vec![".", "..", "a", "b"]);
    }

    /// Renaming onto an existing plain file must drop the destination's
    /// link count by one, not zero it outright: other hard links to that
    /// inode must keep working afterward.
    #[test]
    fn rename_over_existing_file_preserves_its_other_hard_links() {
        let fs = make_fs();
        let root = fs.root_ino();
        let a = fs.create(root, "a", Perm::default(), 0, 0).unwrap();
        fs.link(root, "b", a.ino).unwrap();
        assert_eq!(fs.getattr(a.ino).unwrap().nlink, 2);
        let c = fs.create(root, "c", Perm::default(), 0, 0).unwrap();

        fs.rename(root, "c", root, "b").unwrap();

        assert_eq!(fs.lookup(root, "b").unwrap(), c.ino);
        assert_eq!(fs.lookup(root, "a").unwrap(), a.ino);
        assert_eq!(fs.getattr(a.ino).unwrap().nlink, 1);
    }

    /// Renaming a directory onto an existing empty directory in a
    /// different parent must leave the destination parent's nlink
    /// unchanged: losing the replaced directory's `..` and gaining the
    /// moved directory's `..` cancel out.
    #[test]
    fn rename_directory_over_existing_directory_preserves_dst_parent_nlink() {
        let fs = make_fs();
        let root = fs.root_ino();
        let a = fs.mkdir(root, "a", Perm::default(), 0, 0).unwrap();
        let b = fs.mkdir(root, "b", Perm::default(), 0, 0).unwrap();
        fs.mkdir(a.ino, "child", Perm::default(), 0, 0).unwrap();
        fs.mkdir(b.ino, "dst", Perm::default(), 0, 0).unwrap();
        assert_eq!(fs.getattr(b.ino).unwrap().nlink, 3);

        fs.rename(a.ino, "child", b.ino, "dst").unwrap();

        assert_eq!(fs.getattr(b.ino).unwrap().nlink, 3);
        assert!(matches!(fs.lookup(a.ino, "child"), Err(Error::NotFound)));
    }

    /// Renaming a directory onto an existing empty directory within the
    /// *same* parent must drop that parent's nlink by one: the replaced
    /// directory's `..` is gone and the moved directory's `..` already
    /// pointed here, so there is no offsetting gain.
    #[test]
    fn rename_directory_over_existing_directory_same_parent_drops_nlink() {
        let fs = make_fs();
        let root = fs.root_ino();
        fs.mkdir(root, "child", Perm::default(), 0, 0).unwrap();
        fs.mkdir(root, "dst", Perm::default(), 0, 0).unwrap();
        let before = fs.getattr(root).unwrap().nlink;

        fs.rename(root, "child", root, "dst").unwrap();

        assert_eq!(fs.getattr(root).unwrap().nlink, before - 1);
    }

    /// Renaming a directory to a fresh name within the same parent (no
    /// existing destination) must not touch that parent's nlink at all.
    #[test]
    fn rename_directory_same_parent_no_overwrite_leaves_nlink_unchanged() {
        let fs = make_fs();
        let root = fs.root_ino();
        fs.mkdir(root, "child", Perm::default(), 0, 0).unwrap();
        let before = fs.getattr(root).unwrap().nlink;

        fs.rename(root, "child", root, "renamed").unwrap();

        assert_eq!(fs.getattr(root).unwrap().nlink, before);
    }
}
