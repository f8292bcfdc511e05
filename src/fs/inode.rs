//! Inodes.
//!
//! An inode describes a single file: type, size, permission bits, link
//! count, and the block pointers holding its content. Only the ten
//! direct pointers participate in reads and writes; the indirect and
//! double-indirect pointers are declared for the on-disk shape but never
//! traversed. Block id 0 means "no block here".
//!
//! The file name lives in the inode as well, which lets the name index
//! detect when two different names hash to the same key.

use arrayvec::ArrayString;
use bitflags::bitflags;

use super::FileStore;
use crate::error::{KernelError, Result};
use crate::kprintln;
use crate::param::{BSIZE, MAXNAME, NDIRECT, NINODE};

bitflags! {
    /// Permission bits.
    pub struct Perm: u32 {
        const READ  = 0x4;
        const WRITE = 0x2;
        const EXEC  = 0x1;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InodeType {
    Free,
    File,
    Dir,
}

pub struct Inode {
    pub inum: u32,
    pub typ: InodeType,
    /// File size in bytes
    pub size: u32,
    pub perm: Perm,
    pub nlink: u32,
    /// Blocks currently backing the file
    pub block_count: u32,
    pub addr_direct: [u32; NDIRECT],
    pub addr_indirect: u32,
    pub addr_double_indirect: u32,
    pub name: ArrayString<MAXNAME>,
    pub in_use: bool,
}

impl Inode {
    pub const INIT: Inode = Inode {
        inum: 0,
        typ: InodeType::Free,
        size: 0,
        perm: Perm::empty(),
        nlink: 0,
        block_count: 0,
        addr_direct: [0; NDIRECT],
        addr_indirect: 0,
        addr_double_indirect: 0,
        name: ArrayString::new_const(),
        in_use: false,
    };
}

impl FileStore {
    /// Claims the first free inode, initializes it, and indexes it in
    /// the inode tree.
    pub fn inode_alloc(&mut self, typ: InodeType) -> Result<u32> {
        let inum = match self.inode_bitmap.find_free(0, NINODE) {
            Some(inum) => inum as u32,
            None => {
                kprintln!("fs: no free inodes");
                return Err(KernelError::NoSlot);
            }
        };

        self.inode_bitmap.set(inum as usize);
        let inode = &mut self.inodes[inum as usize];
        *inode = Inode::INIT;
        inode.inum = inum;
        inode.typ = typ;
        inode.perm = Perm::READ | Perm::WRITE;
        inode.nlink = 1;
        inode.in_use = true;

        if let Err(err) = self.inode_tree.insert(inum, inum) {
            self.inode_bitmap.clear(inum as usize);
            self.inodes[inum as usize] = Inode::INIT;
            return Err(err);
        }
        self.free_inodes -= 1;
        Ok(inum)
    }

    /// Releases an inode: every non-zero direct block goes back to the
    /// pool, the index entry disappears, and the slot opens up.
    pub fn inode_free(&mut self, inum: u32) {
        if inum as usize >= NINODE || !self.inodes[inum as usize].in_use {
            return;
        }

        for i in 0..NDIRECT {
            let block = self.inodes[inum as usize].addr_direct[i];
            if block != 0 {
                self.block_free(block);
            }
        }

        if self.inode_tree.remove(inum).is_err() {
            kprintln!("fs: inode {} missing from index", inum);
        }
        self.inode_bitmap.clear(inum as usize);
        self.inodes[inum as usize] = Inode::INIT;
        self.free_inodes += 1;
    }

    /// Inode by number, resolved through the inode tree.
    pub fn inode_get(&self, inum: u32) -> Option<&Inode> {
        let slot = self.inode_tree.get(inum)?;
        Some(&self.inodes[slot as usize])
    }

    /// Reads up to `buf.len()` bytes starting at `offset`, clamped to
    /// the file size. Stops early at the direct-block boundary or at a
    /// hole.
    pub fn inode_read(&self, inum: u32, buf: &mut [u8], offset: u32) -> usize {
        let slot = match self.inode_tree.get(inum) {
            Some(slot) => slot as usize,
            None => return 0,
        };
        let size = self.inodes[slot].size;
        if offset >= size {
            return 0;
        }
        let mut remaining = buf.len().min((size - offset) as usize);
        let mut done = 0;

        while remaining > 0 {
            let pos = offset as usize + done;
            let block_idx = pos / BSIZE;
            let block_off = pos % BSIZE;
            let n = (BSIZE - block_off).min(remaining);

            if block_idx >= NDIRECT {
                break;
            }
            let block = self.inodes[slot].addr_direct[block_idx];
            if block == 0 {
                break;
            }
            let base = block as usize * BSIZE + block_off;
            buf[done..done + n].copy_from_slice(&self.blocks[base..base + n]);
            done += n;
            remaining -= n;
        }
        done
    }

    /// Writes `data` starting at `offset`, allocating direct blocks on
    /// demand. Stops at the first shortfall: a block index past the
    /// direct range, or an exhausted block pool. The size grows to cover
    /// whatever was written.
    pub fn inode_write(&mut self, inum: u32, data: &[u8], offset: u32) -> usize {
        let slot = match self.inode_tree.get(inum) {
            Some(slot) => slot as usize,
            None => return 0,
        };
        let mut done = 0;

        while done < data.len() {
            let pos = offset as usize + done;
            let block_idx = pos / BSIZE;
            let block_off = pos % BSIZE;
            let n = (BSIZE - block_off).min(data.len() - done);

            if block_idx >= NDIRECT {
                break;
            }
            if self.inodes[slot].addr_direct[block_idx] == 0 {
                let block = self.block_alloc();
                if block == 0 {
                    break;
                }
                self.inodes[slot].addr_direct[block_idx] = block;
                self.inodes[slot].block_count += 1;
            }
            let block = self.inodes[slot].addr_direct[block_idx];
            let base = block as usize * BSIZE + block_off;
            self.blocks[base..base + n].copy_from_slice(&data[done..done + n]);
            done += n;
        }

        let end = offset as usize + done;
        if end > self.inodes[slot].size as usize {
            self.inodes[slot].size = end as u32;
        }
        done
    }

    /// Shrinks a file to `new_size`, freeing the direct blocks past the
    /// new end. Growing through truncate is refused without change.
    pub fn inode_truncate(&mut self, inum: u32, new_size: u32) -> Result<()> {
        let slot = match self.inode_tree.get(inum) {
            Some(slot) => slot as usize,
            None => return Err(KernelError::NotFound),
        };
        if new_size >= self.inodes[slot].size {
            return Ok(());
        }

        let keep = (new_size as usize + BSIZE - 1) / BSIZE;
        for i in keep..NDIRECT {
            let block = self.inodes[slot].addr_direct[i];
            if block != 0 {
                self.block_free(block);
                self.inodes[slot].addr_direct[i] = 0;
            }
        }
        let inode = &mut self.inodes[slot];
        inode.size = new_size;
        inode.block_count = keep as u32;
        Ok(())
    }
}
