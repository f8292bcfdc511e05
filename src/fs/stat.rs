use super::{InodeType, Perm};

/// Snapshot of an inode's metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stat {
    /// Inode number
    pub ino: u32,

    /// Type of file
    pub typ: InodeType,

    /// Permission bits
    pub perm: Perm,

    /// Number of links to file
    pub nlink: u32,

    /// Size of file in bytes
    pub size: u32,

    /// Blocks backing the file
    pub blocks: u32,
}
