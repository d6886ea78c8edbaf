//! Mount, format, and unmount: the entry points that bind a block device
//! to a live `Mount`.
//!
//! Grounded on `mkfs/src/ext2.rs::Ext2Factory::create` (region layout,
//! bitmap zero-fill, root inode stamp) and `utils/src/disk.rs`'s device
//! size query, which `FileBlockDevice::size_in_sectors` already wraps.

use crate::bitmap::Bitmap;
use crate::block::{BlockDevice, BlockIo, BLOCK_SIZE};
use crate::codec::{Superblock, DIRECT_BLOCKS, MAGIC, SUPERBLOCK_SIZE};
use crate::error::{FsError, FsResult};
use crate::tree::{Dentry, DentryRef};

/// A live, mounted filesystem: the superblock, both bitmaps, and the root
/// of the in-memory directory tree, all bound to one block device.
pub struct Mount<D> {
    pub(crate) io: BlockIo<D>,
    pub(crate) sb: Superblock,
    pub(crate) inode_bitmap: Bitmap,
    pub(crate) data_bitmap: Bitmap,
    pub(crate) root: DentryRef,
}

impl<D: BlockDevice> Mount<D> {
    pub fn root_ino(&self) -> u32 {
        self.sb.root_ino
    }

    pub fn root(&self) -> DentryRef {
        self.root.clone()
    }

    #[cfg(test)]
    pub fn inode_bit_set_for_test(&self, ino: u32) -> bool {
        self.inode_bitmap.is_set_test(ino as usize)
    }

    /// Opens `dev`, reading the superblock at offset 0. Formats a fresh
    /// layout if the magic doesn't match, otherwise loads the existing
    /// one.
    pub fn open_device(dev: D) -> FsResult<Self> {
        let mut io = BlockIo::new(dev);
        let raw = io.read(0, SUPERBLOCK_SIZE)?;
        let buf: [u8; SUPERBLOCK_SIZE] = raw.try_into().unwrap();
        let sb = Superblock::decode(&buf);
        if sb.magic != MAGIC {
            Self::format(io.into_inner())
        } else {
            Self::load(io, sb)
        }
    }

    /// Lays out a brand-new filesystem on `dev` and mounts it.
    pub fn format(dev: D) -> FsResult<Self> {
        let mut io = BlockIo::new(dev);
        let total_blocks = (io.device_mut().size_in_sectors()?
            / (BLOCK_SIZE / crate::block::SECTOR_SIZE) as u64) as u32;
        if total_blocks < 4 {
            return Err(FsError::NoSpace);
        }

        let available = total_blocks - 3;
        let inode_blks = (available / 49).max(1);
        let ibmap_start = 1;
        let dbmap_start = 2;
        let inode_table_start = 3;
        let data_start = 3 + inode_blks;
        let data_blocks = total_blocks.saturating_sub(data_start);
        let inode_count = inode_blks * 8;

        let sb = Superblock {
            magic: MAGIC,
            block_size: BLOCK_SIZE as u32,
            total_blocks,
            inode_count,
            inodes_per_block: 8,
            ibmap_start,
            ibmap_blocks: 1,
            dbmap_start,
            dbmap_blocks: 1,
            inode_table_start,
            inode_table_blocks: inode_blks,
            data_start,
            data_blocks,
            root_ino: 0,
        };

        let inode_bitmap = Bitmap::zeroed(ibmap_start, sb.ibmap_blocks);
        let data_bitmap = Bitmap::zeroed(dbmap_start, sb.dbmap_blocks);

        let mut mount = Self {
            io,
            sb,
            inode_bitmap,
            data_bitmap,
            root: Dentry::new(String::new(), 0, crate::codec::FileType::Directory),
        };

        let root_inode = mount.alloc_inode(true, 0o755)?;
        debug_assert_eq!(root_inode.ino, mount.sb.root_ino);
        mount.root.borrow_mut().inode = Some(root_inode);
        mount.root.borrow_mut().ino = mount.sb.root_ino;

        mount.io.write(0, &mount.sb.encode())?;
        let root = mount.root.clone();
        mount.sync_dentry(&root)?;
        mount.io.sync()?;
        Ok(mount)
    }

    fn load(mut io: BlockIo<D>, sb: Superblock) -> FsResult<Self> {
        let inode_bitmap = Bitmap::load(&mut io, sb.ibmap_start, sb.ibmap_blocks)?;
        let data_bitmap = Bitmap::load(&mut io, sb.dbmap_start, sb.dbmap_blocks)?;
        let root = Dentry::new(String::new(), sb.root_ino, crate::codec::FileType::Directory);
        let mut mount = Self {
            io,
            sb,
            inode_bitmap,
            data_bitmap,
            root,
        };
        let root = mount.root.clone();
        mount.ensure_loaded(&root)?;
        Ok(mount)
    }

    /// Writes the tree, both bitmaps, and the superblock back to disk and
    /// syncs the device, without giving up ownership. Used both by
    /// `unmount` and by a FUSE host's `destroy` hook, which cannot take
    /// `self` by value.
    pub fn flush(&mut self) -> FsResult<()> {
        let root = self.root.clone();
        self.sync_dentry(&root)?;
        self.io.write(0, &self.sb.encode())?;
        self.inode_bitmap.persist(&mut self.io)?;
        self.data_bitmap.persist(&mut self.io)?;
        self.io.sync()?;
        Ok(())
    }

    /// Flushes and returns the underlying device.
    pub fn unmount(mut self) -> FsResult<D> {
        self.flush()?;
        Ok(self.io.into_inner())
    }
}

#[allow(dead_code)]
const _: usize = DIRECT_BLOCKS;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::MemBlockDevice;

    fn dev(blocks: usize) -> MemBlockDevice {
        MemBlockDevice::new(blocks * BLOCK_SIZE)
    }

    #[test]
    fn format_lays_out_sane_regions() {
        let mount = Mount::format(dev(4096)).unwrap();
        assert_eq!(mount.sb.magic, MAGIC);
        assert_eq!(mount.sb.root_ino, 0);
        assert!(mount.sb.data_start > mount.sb.inode_table_start);
        assert_eq!(mount.sb.inode_count, mount.sb.inode_table_blocks * 8);
    }

    #[test]
    fn format_then_unmount_then_reopen_has_empty_root() {
        let mount = Mount::format(dev(4096)).unwrap();
        let dev = mount.unmount().unwrap();
        let mut reopened = Mount::open_device(dev).unwrap();
        assert_eq!(reopened.sb.magic, MAGIC);
        let root = reopened.root();
        reopened.ensure_loaded(&root).unwrap();
        assert!(root.borrow().children.is_empty());
    }

    #[test]
    fn undersized_device_rejected() {
        assert!(matches!(Mount::format(dev(2)), Err(FsError::NoSpace)));
    }
}
