//! Directory entry encoding: a fixed 64-byte record `(name[60], inode)`.

use crate::error::{Error, Result};
use crate::layout::NAME_MAX;

pub const DIRENT_SIZE: usize = 64;

#[derive(Clone, Copy)]
pub struct DirEntry {
    name: [u8; 60],
    pub inode: u32,
}

impl DirEntry {
    pub const EMPTY: DirEntry = DirEntry {
        name: [0u8; 60],
        inode: 0,
    };

    pub fn new(name: &str, inode: u32) -> Result<Self> {
        let bytes = name.as_bytes();
        if bytes.len() > NAME_MAX {
            return Err(Error::NameTooLong);
        }
        let mut buf = [0u8; 60];
        buf[..bytes.len()].copy_from_slice(bytes);
        Ok(DirEntry { name: buf, inode })
    }

    pub fn is_free(&self) -> bool {
        self.inode == 0
    }

    /// Name terminated at the first NUL within the 60-byte slot; never
    /// contains an embedded NUL.
    pub fn name(&self) -> &str {
        let len = self.name.iter().position(|&b| b == 0).unwrap_or(60);
        std::str::from_utf8(&self.name[..len]).unwrap_or("")
    }

    pub fn name_matches(&self, other: &str) -> bool {
        self.name() == other
    }

    pub fn encode(&self) -> [u8; DIRENT_SIZE] {
        let mut buf = [0u8; DIRENT_SIZE];
        buf[0..60].copy_from_slice(&self.name);
        buf[60..64].copy_from_slice(&self.inode.to_le_bytes());
        buf
    }

    pub fn decode(buf: &[u8]) -> Self {
        let mut name = [0u8; 60];
        name.copy_from_slice(&buf[0..60]);
        let inode = u32::from_le_bytes(buf[60..64].try_into().unwrap());
        DirEntry { name, inode }
    }
}
