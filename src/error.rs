//! Kernel error values.
//!
//! Every recoverable failure in the core is reported as a `KernelError`.
//! Errors never unwind; the caller decides whether to retry or escalate.
//! The only fatal condition in the core is page-region exhaustion, which
//! panics in `kalloc`.

use snafu::Snafu;

pub type Result<T> = core::result::Result<T, KernelError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Snafu)]
pub enum KernelError {
    /// A fixed table has no unused slot left.
    #[snafu(display("no free slot"))]
    NoSlot,

    /// A node or item pool was exhausted.
    #[snafu(display("out of memory"))]
    NoMem,

    /// The key or name is not present.
    #[snafu(display("not found"))]
    NotFound,

    /// The key or name is already present.
    #[snafu(display("already exists"))]
    Exists,

    /// Two distinct file names hash to the same name-tree key.
    #[snafu(display("name hash collision"))]
    HashCollision,

    /// The handle does not refer to a live epoll instance.
    #[snafu(display("invalid epoll handle"))]
    InvalidHandle,

    /// The number does not refer to a live descriptor.
    #[snafu(display("invalid file descriptor"))]
    InvalidFd,

    /// Unknown control operation code.
    #[snafu(display("invalid operation"))]
    InvalidOp,

    /// The wait call was given no room to report events.
    #[snafu(display("invalid maxevents"))]
    InvalidMaxevents,

    /// An argument is out of range or missing.
    #[snafu(display("invalid argument"))]
    InvalidArg,

    /// The file name exceeds the fixed name length.
    #[snafu(display("file name too long"))]
    NameTooLong,
}
