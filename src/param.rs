/// Maximum number of tasks.
pub const NTASK: usize = 64;

/// Open descriptors per system.
pub const NFD: usize = 64;

/// Epoll instances per system.
pub const NEPOLL: usize = 16;

/// Monitored descriptors per epoll instance.
pub const NEPOLLITEM: usize = 128;

/// Maximum number of inodes.
pub const NINODE: usize = 256;

/// Blocks in the file store, including the reserved block 0.
pub const NBLOCK: usize = 1024;

/// File store block size.
pub const BSIZE: usize = 512;

/// Direct block pointers per inode.
pub const NDIRECT: usize = 10;

/// Maximum file name length.
pub const MAXNAME: usize = 64;

/// Page size of the bump allocator.
pub const PGSIZE: usize = 4096;

/// Pages owned by the kernel page region.
pub const NPAGE: usize = 64;

/// Bytes backing the free-list heap.
pub const HEAPSIZE: usize = 1 << 20;

/// Node pool size of each file store B-tree.
pub const FSTREECAP: usize = 512;

/// Receive ring of a serial port.
pub const UARTRXBUF: usize = 128;

/// Transmit ring of a serial port.
pub const UARTTXBUF: usize = 32;
