//! The in-memory inode cache: lazy load from disk and recursive sync
//! back to directory blocks.
//!
//! Grounded on `original_source/src/utils.cpp`'s `alloc_inode` /
//! `alloc_data_block` (first-fit + stamp-then-persist) and
//! `include/types.h`'s `myfs_inode`/`myfs_inode_d` pair (the split between
//! the in-memory and on-disk inode shapes this module bridges).

use std::rc::Rc;

use crate::block::{BlockDevice, BLOCK_SIZE};
use crate::codec::{DirectBlocks, DiskDirent, DiskInode, FileType, DIRECT_BLOCKS, DIRENT_SIZE};
use crate::error::{FsError, FsResult};
use crate::mount::Mount;
use crate::tree::{Dentry, DentryRef};

/// The in-memory mirror of an on-disk inode, plus nothing else: the
/// dentry back-pointer and child list live on `Dentry`, not here, so the
/// inode itself owns no dentry (per the specification's ownership rule).
#[derive(Debug, Clone)]
pub struct MemInode {
    pub ino: u32,
    pub mode: u32,
    pub size: u32,
    pub atime: u32,
    pub mtime: u32,
    pub ctime: u32,
    pub uid: u16,
    pub gid: u16,
    pub link_count: u16,
    pub block: DirectBlocks,
}

impl MemInode {
    pub fn is_dir(&self) -> bool {
        self.mode & libc::S_IFMT as u32 == libc::S_IFDIR as u32
    }

    fn to_disk(&self) -> DiskInode {
        DiskInode {
            ino: self.ino,
            mode: self.mode,
            size: self.size,
            atime: self.atime,
            mtime: self.mtime,
            ctime: self.ctime,
            uid: self.uid,
            gid: self.gid,
            link_count: self.link_count,
            block: self.block,
        }
    }

    fn from_disk(d: &DiskInode) -> Self {
        Self {
            ino: d.ino,
            mode: d.mode,
            size: d.size,
            atime: d.atime,
            mtime: d.mtime,
            ctime: d.ctime,
            uid: d.uid,
            gid: d.gid,
            link_count: d.link_count,
            block: d.block,
        }
    }
}

/// A decoded child descriptor produced while loading a directory's inode.
pub struct ChildDesc {
    pub name: String,
    pub ino: u32,
    pub file_type: FileType,
}

impl<D: BlockDevice> Mount<D> {
    /// Computes the byte offset of inode `ino` within the inode table.
    pub(crate) fn inode_offset(&self, ino: u32) -> u64 {
        let per_block = self.sb.inodes_per_block as u64;
        let table_start = self.sb.inode_table_start as u64 * BLOCK_SIZE as u64;
        let block_off = (ino as u64 / per_block) * BLOCK_SIZE as u64;
        let in_block_off = (ino as u64 % per_block) * crate::codec::INODE_SIZE as u64;
        table_start + block_off + in_block_off
    }

    /// Reads inode `ino` from disk. If it names a directory, also decodes
    /// every populated directory block into child descriptors; callers
    /// turn those into fresh, un-loaded child dentries (lazy fan-out, per
    /// the specification: a child's own inode is loaded only when
    /// resolution or `getattr` later reaches it).
    pub fn read_inode(&mut self, ino: u32) -> FsResult<(MemInode, Vec<ChildDesc>)> {
        let off = self.inode_offset(ino);
        let raw = self.io.read(off, crate::codec::INODE_SIZE)?;
        let buf: [u8; crate::codec::INODE_SIZE] = raw.try_into().unwrap();
        let inode = MemInode::from_disk(&DiskInode::decode(&buf));

        let mut children = Vec::new();
        if inode.is_dir() {
            for &blk in inode.block.iter() {
                if blk == 0 {
                    continue;
                }
                let raw = self.io.read(blk as u64 * BLOCK_SIZE as u64, BLOCK_SIZE)?;
                for slot in raw.chunks(DIRENT_SIZE) {
                    if slot.len() < DIRENT_SIZE {
                        break;
                    }
                    let slot_buf: [u8; DIRENT_SIZE] = slot.try_into().unwrap();
                    if let Some(entry) = DiskDirent::decode(&slot_buf)? {
                        children.push(ChildDesc {
                            name: entry.name,
                            ino: entry.ino,
                            file_type: entry.file_type,
                        });
                    }
                }
            }
        }
        Ok((inode, children))
    }

    /// Ensures `dentry`'s inode is loaded, populating its children list
    /// (un-loaded) if it turns out to be a directory. No-op if already
    /// loaded.
    pub fn ensure_loaded(&mut self, dentry: &DentryRef) -> FsResult<()> {
        if dentry.borrow().inode.is_some() {
            return Ok(());
        }
        let ino = dentry.borrow().ino;
        let (inode, children) = self.read_inode(ino)?;
        for child in children {
            let child_ref = Dentry::new(child.name.clone(), child.ino, child.file_type);
            child_ref.borrow_mut().parent = Some(Rc::downgrade(dentry));
            dentry.borrow_mut().children.insert(child.name, child_ref);
        }
        dentry.borrow_mut().inode = Some(inode);
        Ok(())
    }

    /// Allocates a fresh inode bit, builds a zeroed in-memory inode
    /// stamped with the current time, and returns it. Does not link it
    /// into any dentry.
    pub fn alloc_inode(&mut self, is_dir: bool, mode_bits: u32) -> FsResult<MemInode> {
        let ino = self.inode_bitmap.alloc(self.sb.inode_count as usize, &mut self.io)? as u32;
        let now = crate::util::now_secs();
        let mode = if is_dir {
            libc::S_IFDIR as u32 | mode_bits
        } else {
            libc::S_IFREG as u32 | mode_bits
        };
        Ok(MemInode {
            ino,
            mode,
            size: 0,
            atime: now,
            mtime: now,
            ctime: now,
            uid: 0,
            gid: 0,
            link_count: 1,
            block: [0; DIRECT_BLOCKS],
        })
    }

    /// Releases inode `ino`'s bitmap bit.
    pub fn release_inode(&mut self, ino: u32) -> FsResult<()> {
        self.inode_bitmap.release(ino as usize, &mut self.io)
    }

    /// Allocates a data block: sets the bit, persists the bitmap, zeroes
    /// the new block on disk, and returns its absolute block number.
    pub fn alloc_data_block(&mut self) -> FsResult<u32> {
        let limit = (self.sb.total_blocks - self.sb.data_start) as usize;
        let idx = self.data_bitmap.alloc(limit, &mut self.io)?;
        let abs = self.sb.data_start + idx as u32;
        self.io.write(abs as u64 * BLOCK_SIZE as u64, &[0u8; BLOCK_SIZE])?;
        Ok(abs)
    }

    /// Releases data block `abs`'s bitmap bit. Contents are left as-is.
    pub fn free_data_block(&mut self, abs: u32) -> FsResult<()> {
        let idx = (abs - self.sb.data_start) as usize;
        self.data_bitmap.release(idx, &mut self.io)
    }

    /// Encodes and writes `dentry`'s inode record to the inode table.
    fn write_inode_record(&mut self, dentry: &DentryRef) -> FsResult<()> {
        let (ino, disk) = {
            let d = dentry.borrow();
            let inode = d.inode.as_ref().expect("sync_dentry requires a loaded inode");
            (inode.ino, inode.to_disk())
        };
        let off = self.inode_offset(ino);
        self.io.write(off, &disk.encode())?;
        Ok(())
    }

    /// Recursively writes `dentry`'s subtree back to disk: directory
    /// children are packed into (possibly newly allocated) direct blocks,
    /// `size` is set to the number of populated blocks times the block
    /// size, and loaded children are synced in turn. Un-loaded children
    /// are packed into the listing by name/inode/type but not recursed
    /// into, since their on-disk state was never touched.
    pub fn sync_dentry(&mut self, dentry: &DentryRef) -> FsResult<()> {
        let is_dir = dentry.borrow().inode.as_ref().map(|i| i.is_dir()).unwrap_or(false);
        if is_dir {
            let entries: Vec<(String, u32, FileType)> = dentry
                .borrow()
                .children
                .values()
                .map(|c| {
                    let c = c.borrow();
                    let file_type = c
                        .inode
                        .as_ref()
                        .map(|i| FileType::from_mode(i.mode))
                        .unwrap_or(c.file_type);
                    (c.name.clone(), c.ino, file_type)
                })
                .collect();

            let per_block = DiskDirent::PER_BLOCK;
            let mut chunks = entries.chunks(per_block);
            let mut blocks_used = 0u32;
            for k in 0..DIRECT_BLOCKS {
                let Some(chunk) = chunks.next() else {
                    break;
                };
                let existing = dentry.borrow().inode.as_ref().unwrap().block[k];
                let blk = if existing == 0 {
                    let new_blk = self.alloc_data_block()?;
                    dentry.borrow_mut().inode.as_mut().unwrap().block[k] = new_blk;
                    new_blk
                } else {
                    existing
                };
                let mut buf = [0u8; BLOCK_SIZE];
                for (slot, (name, ino, file_type)) in chunk.iter().enumerate() {
                    let dirent = DiskDirent {
                        ino: *ino,
                        name_len: name.len() as u8,
                        file_type: *file_type,
                        name: name.clone(),
                    };
                    let enc = dirent.encode();
                    let off = slot * DIRENT_SIZE;
                    buf[off..off + DIRENT_SIZE].copy_from_slice(&enc);
                }
                self.io.write(blk as u64 * BLOCK_SIZE as u64, &buf)?;
                blocks_used += 1;
            }
            for k in (blocks_used as usize)..DIRECT_BLOCKS {
                let stale = dentry.borrow().inode.as_ref().unwrap().block[k];
                if stale != 0 {
                    self.free_data_block(stale)?;
                    dentry.borrow_mut().inode.as_mut().unwrap().block[k] = 0;
                }
            }
            dentry.borrow_mut().inode.as_mut().unwrap().size = blocks_used * BLOCK_SIZE as u32;

            let loaded_children: Vec<DentryRef> = dentry
                .borrow()
                .children
                .values()
                .filter(|c| c.borrow().inode.is_some())
                .cloned()
                .collect();
            for child in loaded_children {
                self.sync_dentry(&child)?;
            }
        }
        self.write_inode_record(dentry)?;
        Ok(())
    }
}

#[allow(dead_code)]
fn _assert_error_reachable() -> FsError {
    FsError::InvalidArgument
}
