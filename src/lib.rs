//! A simple on-disk filesystem: fixed-width little-endian superblock,
//! inode, and directory-entry encoding; bitmap-backed block and inode
//! allocators behind a single coarse mutex; an inode store with a
//! 6-direct + single/double/triple-indirect block map; a fixed-slot
//! directory store; and the namespace operations built on top of them.

pub mod alloc;
pub mod bitmap;
pub mod device;
pub mod dirent;
pub mod dstore;
pub mod error;
pub mod inode;
pub mod istore;
pub mod layout;
pub mod mkfs;
pub mod namespace;

pub use device::{BlockDevice, FileDevice, MemDevice};
pub use error::{Error, Result};
pub use inode::{FileKind, Perm};
pub use layout::{Superblock, DEFAULT_BLOCK_SIZE, LINK_MAX, NAME_MAX, SFS_MAGIC};
pub use mkfs::format;
pub use namespace::{Attr, Filesystem, Statfs};
