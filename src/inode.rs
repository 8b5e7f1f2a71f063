//! On-disk inode encoding and the in-memory inode record.
//!
//! An inode is 64 bytes on disk: mode, nlink, uid, gid, size, three
//! timestamps, and a 9-slot block-address map (6 direct + single + double +
//! triple indirect).

use bitflags::bitflags;

use crate::error::{Error, Result};
use crate::layout::INODE_SIZE;

bitflags! {
    /// Permission bits, the low 12 bits of `mode` (the POSIX `S_I*` bits).
    pub struct Perm: u16 {
        const SETUID = 0o4000;
        const SETGID = 0o2000;
        const STICKY = 0o1000;
        const RWXU   = 0o0700;
        const RWXG   = 0o0070;
        const RWXO   = 0o0007;
    }
}

impl Default for Perm {
    fn default() -> Self {
        Perm::from_bits_truncate(0o755)
    }
}

const S_IFMT: u16 = 0o170000;
const S_IFDIR: u16 = 0o040000;
const S_IFREG: u16 = 0o100000;
const S_IFLNK: u16 = 0o120000;
const S_IFCHR: u16 = 0o020000;
const S_IFBLK: u16 = 0o060000;

/// File kind, i.e. the `S_IFMT` bits of `mode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Regular,
    Directory,
    Symlink,
    CharDevice,
    BlockDevice,
}

impl FileKind {
    fn ifmt(self) -> u16 {
        match self {
            FileKind::Regular => S_IFREG,
            FileKind::Directory => S_IFDIR,
            FileKind::Symlink => S_IFLNK,
            FileKind::CharDevice => S_IFCHR,
            FileKind::BlockDevice => S_IFBLK,
        }
    }

    pub fn is_special(self) -> bool {
        matches!(self, FileKind::CharDevice | FileKind::BlockDevice)
    }

    pub fn from_mode(mode: u16) -> Result<Self> {
        Ok(match mode & S_IFMT {
            S_IFDIR => FileKind::Directory,
            S_IFREG => FileKind::Regular,
            S_IFLNK => FileKind::Symlink,
            S_IFCHR => FileKind::CharDevice,
            S_IFBLK => FileKind::BlockDevice,
            other => return Err(Error::InvalidArg(format!("unknown inode mode bits {other:#o}"))),
        })
    }
}

pub fn make_mode(kind: FileKind, perm: Perm) -> u16 {
    kind.ifmt() | perm.bits()
}

/// Number of block-address slots: 6 direct, 1 single-indirect, 1
/// double-indirect, 1 triple-indirect.
pub const N_BLKADDR: usize = 9;
pub const N_DIRECT: usize = 6;
pub const IDX_SINGLE: usize = 6;
pub const IDX_DOUBLE: usize = 7;
pub const IDX_TRIPLE: usize = 8;

/// The on-disk inode record, decoded into host-endian fields.
#[derive(Debug, Clone, Copy)]
pub struct Dinode {
    pub mode: u16,
    pub nlink: u16,
    pub uid: u32,
    pub gid: u32,
    pub size: u32,
    pub atime: u32,
    pub mtime: u32,
    pub ctime: u32,
    pub blkaddr: [u32; N_BLKADDR],
}

impl Dinode {
    pub const FREE: Dinode = Dinode {
        mode: 0,
        nlink: 0,
        uid: 0,
        gid: 0,
        size: 0,
        atime: 0,
        mtime: 0,
        ctime: 0,
        blkaddr: [0; N_BLKADDR],
    };

    pub fn encode(&self) -> [u8; INODE_SIZE] {
        let mut buf = [0u8; INODE_SIZE];
        buf[0..2].copy_from_slice(&self.mode.to_le_bytes());
        buf[2..4].copy_from_slice(&self.nlink.to_le_bytes());
        buf[4..8].copy_from_slice(&self.uid.to_le_bytes());
        buf[8..12].copy_from_slice(&self.gid.to_le_bytes());
        buf[12..16].copy_from_slice(&self.size.to_le_bytes());
        buf[16..20].copy_from_slice(&self.atime.to_le_bytes());
        buf[20..24].copy_from_slice(&self.mtime.to_le_bytes());
        buf[24..28].copy_from_slice(&self.ctime.to_le_bytes());
        for (i, addr) in self.blkaddr.iter().enumerate() {
            let off = 28 + i * 4;
            buf[off..off + 4].copy_from_slice(&addr.to_le_bytes());
        }
        buf
    }

    pub fn decode(buf: &[u8]) -> Self {
        let u16_at = |off: usize| u16::from_le_bytes(buf[off..off + 2].try_into().unwrap());
        let u32_at = |off: usize| u32::from_le_bytes(buf[off..off + 4].try_into().unwrap());
        let mut blkaddr = [0u32; N_BLKADDR];
        for (i, addr) in blkaddr.iter_mut().enumerate() {
            *addr = u32_at(28 + i * 4);
        }
        Dinode {
            mode: u16_at(0),
            nlink: u16_at(2),
            uid: u32_at(4),
            gid: u32_at(8),
            size: u32_at(12),
            atime: u32_at(16),
            mtime: u32_at(20),
            ctime: u32_at(24),
            blkaddr,
        }
    }
}
