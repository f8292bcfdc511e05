//! Ordered-container toolkits shared by the kernel subsystems.

pub mod btree;
pub mod rbtree;
