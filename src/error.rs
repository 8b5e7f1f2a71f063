//! Error kinds produced by the filesystem, per the error-handling design.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// An allocator ran a full sweep of its bitmap and found nothing free.
    #[error("no space left on device")]
    NoSpace,

    /// In-memory object allocation failed (open-inode table, page buffers, ...).
    #[error("out of memory")]
    NoMem,

    /// The backing store failed a read or write.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A name exceeds the 59 usable bytes of a directory entry.
    #[error("name too long")]
    NameTooLong,

    /// `add_link` found an exact name match already present.
    #[error("entry already exists")]
    Exists,

    /// `rmdir`/`rename` target a non-empty directory.
    #[error("directory not empty")]
    NotEmpty,

    /// `find`/`unlink`/`rename` source is missing.
    #[error("no such file or directory")]
    NotFound,

    /// Bad device id, malformed superblock, or unsupported block size.
    #[error("invalid argument: {0}")]
    InvalidArg(String),

    /// The target of `link`/`rmdir` is a directory where one is not allowed.
    #[error("is a directory")]
    IsDir,

    /// The target of an operation expecting a directory is not one.
    #[error("not a directory")]
    NotDir,
}

pub type Result<T> = std::result::Result<T, Error>;
