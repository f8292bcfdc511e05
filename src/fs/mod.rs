//! The inode file store.
//!
//! Everything lives in RAM: a fixed inode table, a block arena, and two
//! allocation bitmaps. Two B-trees index it all, one from inode number
//! to table slot and one from the hash of a file name to the inode
//! carrying that name. Block 0 is reserved so that a zero block pointer
//! can mean "no block".
//!
//! Names are hashed with djb2, which is not collision free. The name
//! itself is therefore stored in the inode: creation under a colliding
//! hash is refused outright, and lookups verify the stored name before
//! trusting the index.

mod inode;
mod stat;

pub use inode::{Inode, InodeType, Perm};
pub use stat::Stat;

use static_assertions::const_assert;

use crate::ds::btree::BTree;
use crate::error::{KernelError, Result};
use crate::param::{BSIZE, FSTREECAP, MAXNAME, NBLOCK, NINODE};
use crate::{kprintln, ok_or};
use crate::util::bitmap::Bitmap;

const_assert!(NBLOCK % 32 == 0);
const_assert!(NINODE % 32 == 0);

/// djb2 over the bytes of a name.
pub fn hash_name(name: &str) -> u32 {
    let mut hash: u32 = 5381;
    for &byte in name.as_bytes() {
        hash = hash.wrapping_mul(33).wrapping_add(byte as u32);
    }
    hash
}

pub struct FileStore {
    inode_tree: BTree<u32, FSTREECAP>,
    name_tree: BTree<u32, FSTREECAP>,
    inodes: [Inode; NINODE],
    blocks: [u8; NBLOCK * BSIZE],
    block_bitmap: Bitmap<{ NBLOCK / 32 }>,
    inode_bitmap: Bitmap<{ NINODE / 32 }>,
    free_inodes: u32,
    free_blocks: u32,
}

impl FileStore {
    pub const fn new() -> Self {
        Self {
            inode_tree: BTree::new(),
            name_tree: BTree::new(),
            inodes: [Inode::INIT; NINODE],
            blocks: [0; NBLOCK * BSIZE],
            block_bitmap: Bitmap::new(),
            inode_bitmap: Bitmap::new(),
            free_inodes: NINODE as u32,
            free_blocks: NBLOCK as u32,
        }
    }

    pub fn init(&mut self) {
        kprintln!("fs: {} inodes, {} blocks of {} bytes", NINODE, NBLOCK, BSIZE);
    }

    pub fn free_inodes(&self) -> u32 {
        self.free_inodes
    }

    pub fn free_blocks(&self) -> u32 {
        self.free_blocks
    }

    /// Claims and zero-fills the first free block at id 1 or above.
    /// Returns 0 when the pool is empty.
    pub fn block_alloc(&mut self) -> u32 {
        let block = match self.block_bitmap.find_free(1, NBLOCK) {
            Some(block) => block,
            None => return 0,
        };
        self.block_bitmap.set(block);
        self.free_blocks -= 1;
        self.blocks[block * BSIZE..(block + 1) * BSIZE].fill(0);
        block as u32
    }

    /// Returns a block to the pool; id 0 and out-of-range ids are
    /// ignored.
    pub fn block_free(&mut self, block: u32) {
        let block = block as usize;
        if block == 0 || block >= NBLOCK {
            return;
        }
        self.block_bitmap.clear(block);
        self.free_blocks += 1;
    }

    pub fn block_allocated(&self, block: u32) -> bool {
        (block as usize) < NBLOCK && self.block_bitmap.test(block as usize)
    }

    /// Content of a live block; id 0 has no content.
    pub fn block_slice(&self, block: u32) -> Option<&[u8]> {
        let block = block as usize;
        if block == 0 || block >= NBLOCK {
            return None;
        }
        Some(&self.blocks[block * BSIZE..(block + 1) * BSIZE])
    }

    /// Creates `name` with the given type and returns its inode number.
    pub fn create(&mut self, name: &str, typ: InodeType) -> Result<u32> {
        if name.len() > MAXNAME {
            kprintln!("fs: name too long ({} bytes)", name.len());
            return Err(KernelError::NameTooLong);
        }

        let hash = hash_name(name);
        if let Some(slot) = self.name_tree.get(hash) {
            if self.inodes[slot as usize].name.as_str() == name {
                kprintln!("fs: '{}' already exists", name);
                return Err(KernelError::Exists);
            }
            kprintln!(
                "fs: '{}' collides with '{}'",
                name,
                self.inodes[slot as usize].name.as_str()
            );
            return Err(KernelError::HashCollision);
        }

        let inum = self.inode_alloc(typ)?;
        let _ = self.inodes[inum as usize].name.try_push_str(name);
        if let Err(err) = self.name_tree.insert(hash, inum) {
            self.inode_free(inum);
            return Err(err);
        }

        kprintln!("fs: created '{}' as inode {}", name, inum);
        Ok(inum)
    }

    /// Resolves `name` to its inode number.
    pub fn open(&self, name: &str) -> Result<u32> {
        let hash = hash_name(name);
        let slot = match self.name_tree.get(hash) {
            Some(slot) => slot,
            None => return Err(KernelError::NotFound),
        };
        if self.inodes[slot as usize].name.as_str() != name {
            return Err(KernelError::NotFound);
        }
        Ok(slot)
    }

    /// Reads from the start of `name` into `buf`.
    pub fn read(&self, name: &str, buf: &mut [u8]) -> Result<usize> {
        let inum = ok_or!(self.open(name), err, {
            kprintln!("fs: read: '{}' not found", name);
            return Err(err);
        });
        Ok(self.inode_read(inum, buf, 0))
    }

    /// Writes `data` at the start of `name`.
    pub fn write(&mut self, name: &str, data: &[u8]) -> Result<usize> {
        let inum = ok_or!(self.open(name), err, {
            kprintln!("fs: write: '{}' not found", name);
            return Err(err);
        });
        Ok(self.inode_write(inum, data, 0))
    }

    /// Removes `name` and releases its inode and blocks.
    pub fn unlink(&mut self, name: &str) -> Result<()> {
        let inum = ok_or!(self.open(name), err, {
            kprintln!("fs: unlink: '{}' not found", name);
            return Err(err);
        });
        self.name_tree.remove(hash_name(name))?;
        self.inode_free(inum);
        kprintln!("fs: deleted '{}'", name);
        Ok(())
    }

    /// Metadata of `name`.
    pub fn stat(&self, name: &str) -> Result<Stat> {
        let inum = self.open(name)?;
        let inode = match self.inode_get(inum) {
            Some(inode) => inode,
            None => return Err(KernelError::NotFound),
        };
        Ok(Stat {
            ino: inode.inum,
            typ: inode.typ,
            perm: inode.perm,
            nlink: inode.nlink,
            size: inode.size,
            blocks: inode.block_count,
        })
    }

    /// Visits every file, in name-hash order.
    pub fn list<F: FnMut(&Inode)>(&self, visit: &mut F) {
        self.name_tree.traverse(&mut |_hash, slot| {
            let inode = &self.inodes[slot as usize];
            if inode.in_use {
                visit(inode);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::param::NDIRECT;

    // djb2("adapmdpw") == djb2("test.txt"); see the collision policy.
    const COLLIDER: &str = "adapmdpw";

    fn store() -> Box<FileStore> {
        let mut fs = Box::new(FileStore::new());
        fs.init();
        fs
    }

    /// Bitmap bit set iff some inode's direct slot references the block,
    /// for every block but the reserved one.
    fn assert_bitmap_matches_inodes(fs: &FileStore) {
        let mut referenced = vec![false; NBLOCK];
        for inode in fs.inodes.iter().filter(|inode| inode.in_use) {
            for &block in &inode.addr_direct {
                if block != 0 {
                    assert!(!referenced[block as usize], "block shared");
                    referenced[block as usize] = true;
                }
            }
        }
        assert!(!fs.block_bitmap.test(0), "reserved block allocated");
        for block in 1..NBLOCK {
            assert_eq!(fs.block_bitmap.test(block), referenced[block]);
        }
        let used: u32 = referenced.iter().map(|&r| r as u32).sum();
        assert_eq!(fs.free_blocks + used, NBLOCK as u32);
    }

    #[test]
    fn write_read_round_trip() {
        let mut fs = store();
        fs.create("test.txt", InodeType::File).unwrap();
        let payload = b"The quick brown fox jumps over the lazy dog..";
        assert_eq!(payload.len(), 45);
        let message = &payload[..42];

        assert_eq!(fs.write("test.txt", message).unwrap(), 42);
        let mut buf = [0u8; 42];
        assert_eq!(fs.read("test.txt", &mut buf).unwrap(), 42);
        assert_eq!(&buf[..], message);

        let stat = fs.stat("test.txt").unwrap();
        assert_eq!(stat.size, 42);
        assert_eq!(stat.blocks, 1);
        assert_eq!(stat.typ, InodeType::File);
        assert_eq!(stat.nlink, 1);
        assert!(stat.perm.contains(Perm::READ | Perm::WRITE));
        assert_bitmap_matches_inodes(&fs);
    }

    #[test]
    fn name_collision_policy() {
        let mut fs = store();
        assert_eq!(hash_name("test.txt"), hash_name(COLLIDER));

        fs.create("test.txt", InodeType::File).unwrap();
        assert_eq!(
            fs.create("test.txt", InodeType::File),
            Err(KernelError::Exists)
        );
        assert_eq!(
            fs.create(COLLIDER, InodeType::File),
            Err(KernelError::HashCollision)
        );
        // Lookups under the colliding name must not alias the original.
        assert_eq!(fs.open(COLLIDER), Err(KernelError::NotFound));
        assert!(fs.open("test.txt").is_ok());
    }

    #[test]
    fn long_names_are_rejected() {
        let mut fs = store();
        let name64 = "n".repeat(64);
        let name65 = "n".repeat(65);
        assert!(fs.create(&name64, InodeType::File).is_ok());
        assert_eq!(
            fs.create(&name65, InodeType::File),
            Err(KernelError::NameTooLong)
        );
    }

    #[test]
    fn writes_stop_at_the_direct_boundary() {
        let mut fs = store();
        let inum = fs.create("big.bin", InodeType::File).unwrap();

        let data = vec![0x5au8; NDIRECT * BSIZE + 300];
        let written = fs.inode_write(inum, &data, 0);
        assert_eq!(written, NDIRECT * BSIZE);

        let stat = fs.stat("big.bin").unwrap();
        assert_eq!(stat.size as usize, NDIRECT * BSIZE);
        assert_eq!(stat.blocks as usize, NDIRECT);

        // Reads clamp to the file size and stop at the same boundary.
        let mut buf = vec![0u8; NDIRECT * BSIZE + 300];
        assert_eq!(fs.inode_read(inum, &mut buf, 0), NDIRECT * BSIZE);
        assert_bitmap_matches_inodes(&fs);
    }

    #[test]
    fn offset_io_and_holes() {
        let mut fs = store();
        let inum = fs.create("sparse.bin", InodeType::File).unwrap();

        // Write into the third block only; earlier slots stay holes.
        let written = fs.inode_write(inum, b"deep", 2 * BSIZE as u32 + 10);
        assert_eq!(written, 4);
        let inode = fs.inode_get(inum).unwrap();
        assert_eq!(inode.block_count, 1);
        assert_eq!(inode.addr_direct[0], 0);
        assert_eq!(inode.size as usize, 2 * BSIZE + 14);

        // A read that starts inside the hole ends at the hole.
        let mut buf = [0u8; 16];
        assert_eq!(fs.inode_read(inum, &mut buf, 100), 0);
        assert_eq!(fs.inode_read(inum, &mut buf, 2 * BSIZE as u32 + 10), 4);
        assert_eq!(&buf[..4], b"deep");

        // Freeing the inode releases the lone block despite the holes.
        fs.unlink("sparse.bin").unwrap();
        assert_eq!(fs.free_blocks(), NBLOCK as u32);
        assert_bitmap_matches_inodes(&fs);
    }

    #[test]
    fn truncate_shrinks_but_never_grows() {
        let mut fs = store();
        let inum = fs.create("t.bin", InodeType::File).unwrap();
        let data = vec![7u8; 3 * BSIZE];
        assert_eq!(fs.inode_write(inum, &data, 0), 3 * BSIZE);

        // Growth is a no-op.
        fs.inode_truncate(inum, 4 * BSIZE as u32).unwrap();
        assert_eq!(fs.inode_get(inum).unwrap().size as usize, 3 * BSIZE);

        // Shrink to a size inside block 0: blocks 1 and 2 go away.
        fs.inode_truncate(inum, 100).unwrap();
        let inode = fs.inode_get(inum).unwrap();
        assert_eq!(inode.size, 100);
        assert_eq!(inode.block_count, 1);
        assert_bitmap_matches_inodes(&fs);

        fs.inode_truncate(inum, 0).unwrap();
        assert_eq!(fs.inode_get(inum).unwrap().block_count, 0);
        assert_bitmap_matches_inodes(&fs);

        assert_eq!(
            fs.inode_truncate(999, 0),
            Err(KernelError::NotFound)
        );
    }

    #[test]
    fn block_pool_exhaustion_returns_zero() {
        let mut fs = store();
        let mut allocated = 0;
        loop {
            let block = fs.block_alloc();
            if block == 0 {
                break;
            }
            assert!(block as usize >= 1);
            allocated += 1;
        }
        // Block 0 is reserved, everything else was handed out once.
        assert_eq!(allocated, NBLOCK - 1);
        assert_eq!(fs.free_blocks(), 1);

        fs.block_free(17);
        assert_eq!(fs.block_alloc(), 17);
        // Out-of-range and reserved ids are ignored.
        fs.block_free(0);
        fs.block_free(NBLOCK as u32 + 5);
        assert_eq!(fs.free_blocks(), 1);
    }

    #[test]
    fn inode_pool_exhaustion_and_reuse() {
        let mut fs = store();
        let mut names = Vec::new();
        for i in 0..NINODE {
            let name = format!("file{:03}", i);
            fs.create(&name, InodeType::File).unwrap();
            names.push(name);
        }
        assert_eq!(fs.free_inodes(), 0);
        assert_eq!(
            fs.create("one-too-many", InodeType::File),
            Err(KernelError::NoSlot)
        );

        fs.unlink(&names[100]).unwrap();
        assert_eq!(fs.free_inodes(), 1);
        let inum = fs.create("replacement", InodeType::File).unwrap();
        assert_eq!(inum, 100);
    }

    #[test]
    fn unlink_then_open_fails() {
        let mut fs = store();
        fs.create("gone.txt", InodeType::File).unwrap();
        fs.write("gone.txt", b"bytes").unwrap();
        fs.unlink("gone.txt").unwrap();
        assert_eq!(fs.open("gone.txt"), Err(KernelError::NotFound));
        assert_eq!(fs.unlink("gone.txt"), Err(KernelError::NotFound));
        assert_eq!(fs.free_inodes(), NINODE as u32);
        assert_eq!(fs.free_blocks(), NBLOCK as u32);
    }

    #[test]
    fn list_visits_every_file() {
        let mut fs = store();
        for name in ["a.txt", "b.txt", "c.txt"] {
            fs.create(name, InodeType::File).unwrap();
        }
        fs.write("b.txt", b"bb").unwrap();

        let mut seen = Vec::new();
        fs.list(&mut |inode| seen.push((inode.name.as_str().to_string(), inode.size)));
        seen.sort();
        assert_eq!(
            seen,
            vec![
                ("a.txt".to_string(), 0),
                ("b.txt".to_string(), 2),
                ("c.txt".to_string(), 0)
            ]
        );
    }

    #[test]
    fn directories_are_files_too() {
        let mut fs = store();
        let inum = fs.create("etc", InodeType::Dir).unwrap();
        assert_eq!(fs.stat("etc").unwrap().typ, InodeType::Dir);
        assert_eq!(fs.inode_get(inum).unwrap().typ, InodeType::Dir);
    }
}
