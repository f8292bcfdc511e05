//! ferrite: the machine-independent core of a small teaching kernel.
//!
//! The crate builds four tightly coupled pieces on top of a pair of
//! fixed-region allocators: an intrusive red-black tree, an order-5
//! B-tree, a completely fair scheduler keyed by virtual runtime, an
//! epoll-style readiness facility, and a B-tree-indexed inode file
//! store. Scheduling is single-CPU and cooperative; the platform layer
//! owns boot, traps, and the memory-mapped serial registers, and drives
//! this core through [`kernel::Kernel`].
#![cfg_attr(not(test), no_std)]
//
// Lints.
#![deny(anonymous_parameters)]
#![deny(keyword_idents)]
#![deny(macro_use_extern_crate)]
#![deny(non_ascii_idents)]
#![deny(rust_2018_idioms)]
#![deny(trivial_numeric_casts)]
#![deny(unused_import_braces)]

pub mod console;
pub mod ds;
pub mod epoll;
pub mod error;
pub mod file;
pub mod fs;
pub mod heap;
pub mod kalloc;
pub mod kernel;
pub mod param;
pub mod proc;
pub mod uart;
pub mod util;
