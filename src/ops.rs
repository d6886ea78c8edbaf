//! The fourteen filesystem operations, each resolving its path(s) first
//! and then applying the precondition/effect/error table from the
//! specification this crate implements.
//!
//! Grounded on `original_source/src/myfs.cpp`'s `fuse_*` wrapper set and
//! `original_source/src/utils.cpp`'s allocate/free helpers they call into.

use crate::block::{BlockDevice, BLOCK_SIZE};
use crate::codec::{FileType, DIRECT_BLOCKS, MAX_NAME_LEN};
use crate::error::{FsError, FsResult};
use crate::inode::MemInode;
use crate::mount::Mount;
use crate::tree::{DentryRef, Resolved};

/// Maximum file size: six direct blocks of `BLOCK_SIZE` bytes each.
pub const MAX_FILE_SIZE: u64 = (DIRECT_BLOCKS * BLOCK_SIZE) as u64;

/// A POSIX-shaped attribute snapshot, filled in by `getattr`.
#[derive(Debug, Clone, Copy)]
pub struct Attr {
    pub ino: u32,
    pub mode: u32,
    pub size: u64,
    pub blocks: u64,
    pub link_count: u16,
    pub uid: u16,
    pub gid: u16,
    pub atime: u32,
    pub mtime: u32,
    pub ctime: u32,
}

impl From<&MemInode> for Attr {
    fn from(i: &MemInode) -> Self {
        Self {
            ino: i.ino,
            mode: i.mode,
            size: i.size as u64,
            blocks: (i.size as u64).div_ceil(BLOCK_SIZE as u64),
            link_count: i.link_count,
            uid: i.uid,
            gid: i.gid,
            atime: i.atime,
            mtime: i.mtime,
            ctime: i.ctime,
        }
    }
}

/// One child entry as reported by `readdir`.
pub struct DirEntry {
    pub name: String,
    pub ino: u32,
    pub file_type: FileType,
}

/// New access/modification timestamps for `utimens`, or `None` meaning
/// "set both to now".
pub struct Timestamps {
    pub atime: Option<u32>,
    pub mtime: Option<u32>,
}

fn split_base(path: &str) -> FsResult<(&str, &str)> {
    let i = path.rfind('/').ok_or(FsError::InvalidArgument)?;
    let parent = if i > 0 { &path[..i] } else { "/" };
    let base = &path[i + 1..];
    if base.is_empty() || base.len() >= MAX_NAME_LEN {
        return Err(FsError::InvalidArgument);
    }
    Ok((parent, base))
}

impl<D: BlockDevice> Mount<D> {
    fn resolve_or_enoent(&mut self, path: &str) -> FsResult<DentryRef> {
        match self.resolve(path)? {
            Resolved::Found(d) => Ok(d),
            Resolved::NotFound => Err(FsError::NotFound),
        }
    }

    pub fn getattr(&mut self, path: &str) -> FsResult<Attr> {
        let dentry = self.resolve_or_enoent(path)?;
        self.ensure_loaded(&dentry)?;
        let attr = Attr::from(dentry.borrow().inode.as_ref().unwrap());
        Ok(attr)
    }

    pub fn readdir(&mut self, path: &str) -> FsResult<Vec<DirEntry>> {
        let dentry = self.resolve_or_enoent(path)?;
        self.ensure_loaded(&dentry)?;
        if !dentry.borrow().is_dir() {
            return Err(FsError::NotDirectory);
        }
        let entries = dentry
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
                DirEntry {
                    name: c.name.clone(),
                    ino: c.ino,
                    file_type,
                }
            })
            .collect();
        Ok(entries)
    }

    fn create_entry(&mut self, path: &str, is_dir: bool, mode_bits: u32) -> FsResult<Attr> {
        let (parent_path, base) = split_base(path)?;
        if !matches!(self.resolve(path)?, Resolved::NotFound) {
            return Err(FsError::AlreadyExists);
        }
        let parent = self.resolve_dir(parent_path)?;
        if parent.borrow().children.contains_key(base) {
            return Err(FsError::AlreadyExists);
        }
        let inode = self.alloc_inode(is_dir, mode_bits)?;
        let attr = Attr::from(&inode);
        let child = self.alloc_dentry(&parent, base.to_string(), inode);
        self.touch_mtime(&parent);
        self.sync_dentry(&parent)?;
        let _ = child;
        Ok(attr)
    }

    pub fn mkdir(&mut self, path: &str, mode_bits: u32) -> FsResult<Attr> {
        self.create_entry(path, true, mode_bits)
    }

    pub fn mknod(&mut self, path: &str, mode_bits: u32) -> FsResult<Attr> {
        self.create_entry(path, false, mode_bits)
    }

    fn touch_mtime(&mut self, dentry: &DentryRef) {
        let now = crate::util::now_secs();
        if let Some(inode) = dentry.borrow_mut().inode.as_mut() {
            inode.mtime = now;
        }
    }

    /// Reads up to `len` bytes at `off`, clamped to the file's size.
    /// Holes (an unallocated `block[k]`) read back as zeros.
    pub fn read(&mut self, path: &str, off: u64, len: usize) -> FsResult<Vec<u8>> {
        let dentry = self.resolve_or_enoent(path)?;
        self.ensure_loaded(&dentry)?;
        let (size, blocks) = {
            let d = dentry.borrow();
            let inode = d.inode.as_ref().unwrap();
            (inode.size as u64, inode.block)
        };
        if off >= size {
            return Ok(Vec::new());
        }
        let want = len.min((size - off) as usize);
        let mut out = Vec::with_capacity(want);
        let mut pos = off;
        while (pos - off) < want as u64 {
            let block_idx = (pos / BLOCK_SIZE as u64) as usize;
            if block_idx >= DIRECT_BLOCKS {
                break;
            }
            let in_block = (pos % BLOCK_SIZE as u64) as usize;
            let chunk = (BLOCK_SIZE - in_block).min(want - (pos - off) as usize);
            let blk = blocks[block_idx];
            if blk == 0 {
                out.extend(std::iter::repeat(0u8).take(chunk));
            } else {
                let data = self.io.read(blk as u64 * BLOCK_SIZE as u64 + in_block as u64, chunk)?;
                out.extend_from_slice(&data);
            }
            pos += chunk as u64;
        }
        Ok(out)
    }

    /// Writes `data` at `off`, allocating blocks as needed. Rejects
    /// writes that would exceed the maximum file size.
    pub fn write(&mut self, path: &str, off: u64, data: &[u8]) -> FsResult<usize> {
        let dentry = self.resolve_or_enoent(path)?;
        self.ensure_loaded(&dentry)?;
        if dentry.borrow().is_dir() {
            return Err(FsError::IsDirectory);
        }
        if off + data.len() as u64 > MAX_FILE_SIZE {
            return Err(FsError::NoSpace);
        }

        let mut pos = off;
        let mut written = 0usize;
        while written < data.len() {
            let block_idx = (pos / BLOCK_SIZE as u64) as usize;
            let in_block = (pos % BLOCK_SIZE as u64) as usize;
            let chunk = (BLOCK_SIZE - in_block).min(data.len() - written);

            let existing = dentry.borrow().inode.as_ref().unwrap().block[block_idx];
            let blk = if existing == 0 {
                let new_blk = self.alloc_data_block()?;
                dentry.borrow_mut().inode.as_mut().unwrap().block[block_idx] = new_blk;
                new_blk
            } else {
                existing
            };

            self.io.write(
                blk as u64 * BLOCK_SIZE as u64 + in_block as u64,
                &data[written..written + chunk],
            )?;
            written += chunk;
            pos += chunk as u64;
        }

        let now = crate::util::now_secs();
        {
            let mut d = dentry.borrow_mut();
            let inode = d.inode.as_mut().unwrap();
            inode.size = inode.size.max((off + data.len() as u64) as u32);
            inode.mtime = now;
        }
        self.sync_dentry(&dentry)?;
        Ok(written)
    }

    pub fn utimens(&mut self, path: &str, ts: Timestamps) -> FsResult<()> {
        let dentry = self.resolve_or_enoent(path)?;
        self.ensure_loaded(&dentry)?;
        let now = crate::util::now_secs();
        {
            let mut d = dentry.borrow_mut();
            let inode = d.inode.as_mut().unwrap();
            inode.atime = ts.atime.unwrap_or(now);
            inode.mtime = ts.mtime.unwrap_or(now);
        }
        self.sync_dentry(&dentry)?;
        Ok(())
    }

    pub fn truncate(&mut self, path: &str, n: u32) -> FsResult<()> {
        if n as u64 > MAX_FILE_SIZE {
            return Err(FsError::InvalidArgument);
        }
        let dentry = self.resolve_or_enoent(path)?;
        self.ensure_loaded(&dentry)?;
        if dentry.borrow().is_dir() {
            return Err(FsError::IsDirectory);
        }
        let keep_blocks = (n as u64).div_ceil(BLOCK_SIZE as u64) as usize;
        let to_free: Vec<u32> = {
            let d = dentry.borrow();
            let inode = d.inode.as_ref().unwrap();
            inode.block[keep_blocks..]
                .iter()
                .copied()
                .filter(|&b| b != 0)
                .collect()
        };
        for blk in to_free {
            self.free_data_block(blk)?;
        }
        {
            let mut d = dentry.borrow_mut();
            let inode = d.inode.as_mut().unwrap();
            for slot in &mut inode.block[keep_blocks..] {
                *slot = 0;
            }
            inode.size = n;
            inode.mtime = crate::util::now_secs();
        }
        self.sync_dentry(&dentry)?;
        Ok(())
    }

    pub fn unlink(&mut self, path: &str) -> FsResult<()> {
        let (parent_path, base) = split_base(path)?;
        let dentry = self.resolve_or_enoent(path)?;
        self.ensure_loaded(&dentry)?;
        if dentry.borrow().is_dir() {
            return Err(FsError::IsDirectory);
        }
        let blocks: Vec<u32> = dentry
            .borrow()
            .inode
            .as_ref()
            .unwrap()
            .block
            .iter()
            .copied()
            .filter(|&b| b != 0)
            .collect();
        for blk in blocks {
            self.free_data_block(blk)?;
        }
        let ino = dentry.borrow().ino;
        self.release_inode(ino)?;
        let parent = self.resolve_dir(parent_path)?;
        self.delete_dentry(&parent, base);
        self.touch_mtime(&parent);
        self.sync_dentry(&parent)?;
        Ok(())
    }

    pub fn rmdir(&mut self, path: &str) -> FsResult<()> {
        let (parent_path, base) = split_base(path)?;
        let dentry = self.resolve_or_enoent(path)?;
        self.ensure_loaded(&dentry)?;
        if !dentry.borrow().is_dir() {
            return Err(FsError::NotDirectory);
        }
        if !dentry.borrow().children.is_empty() {
            return Err(FsError::NotEmpty);
        }
        let blocks: Vec<u32> = dentry
            .borrow()
            .inode
            .as_ref()
            .unwrap()
            .block
            .iter()
            .copied()
            .filter(|&b| b != 0)
            .collect();
        for blk in blocks {
            self.free_data_block(blk)?;
        }
        let ino = dentry.borrow().ino;
        self.release_inode(ino)?;
        let parent = self.resolve_dir(parent_path)?;
        self.delete_dentry(&parent, base);
        self.touch_mtime(&parent);
        self.sync_dentry(&parent)?;
        Ok(())
    }

    pub fn rename(&mut self, from: &str, to: &str) -> FsResult<()> {
        let (from_parent_path, from_base) = split_base(from)?;
        let (to_parent_path, to_base) = split_base(to)?;

        let source = self.resolve_or_enoent(from)?;
        self.ensure_loaded(&source)?;

        if let Resolved::Found(existing) = self.resolve(to)? {
            self.ensure_loaded(&existing)?;
            let same_kind = existing.borrow().is_dir() == source.borrow().is_dir();
            if !same_kind {
                return Err(FsError::AlreadyExists);
            }
            if existing.borrow().is_dir() {
                self.rmdir(to)?;
            } else {
                self.unlink(to)?;
            }
        }

        let from_parent = self.resolve_dir(from_parent_path)?;
        let to_parent = self.resolve_dir(to_parent_path)?;

        self.delete_dentry(&from_parent, from_base);
        source.borrow_mut().name = to_base.to_string();
        to_parent
            .borrow_mut()
            .children
            .insert(to_base.to_string(), source.clone());
        source.borrow_mut().parent = Some(std::rc::Rc::downgrade(&to_parent));
        if let Some(inode) = to_parent.borrow_mut().inode.as_mut() {
            inode.size += crate::codec::DIRENT_SIZE as u32;
        }

        self.touch_mtime(&from_parent);
        self.touch_mtime(&to_parent);
        self.sync_dentry(&from_parent)?;
        if !std::rc::Rc::ptr_eq(&from_parent, &to_parent) {
            self.sync_dentry(&to_parent)?;
        }
        Ok(())
    }

    pub fn open(&mut self, path: &str) -> FsResult<()> {
        self.resolve_or_enoent(path).map(|_| ())
    }

    pub fn opendir(&mut self, path: &str) -> FsResult<()> {
        self.resolve_or_enoent(path).map(|_| ())
    }

    pub fn access(&mut self, path: &str) -> FsResult<()> {
        self.resolve_or_enoent(path).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::MemBlockDevice;

    fn fresh() -> Mount<MemBlockDevice> {
        Mount::format(MemBlockDevice::new(4096 * BLOCK_SIZE)).unwrap()
    }

    #[test]
    fn mkdir_then_readdir_shows_child() {
        let mut m = fresh();
        m.mkdir("/dir", 0o755).unwrap();
        let entries = m.readdir("/").unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "dir");
        assert_eq!(entries[0].file_type, FileType::Directory);
    }

    #[test]
    fn write_then_read_roundtrips() {
        let mut m = fresh();
        m.mknod("/f", 0o644).unwrap();
        m.write("/f", 10, b"hello").unwrap();
        let out = m.read("/f", 10, 5).unwrap();
        assert_eq!(out, b"hello");
    }

    #[test]
    fn read_hole_returns_zeros() {
        let mut m = fresh();
        m.mknod("/f", 0o644).unwrap();
        m.write("/f", 2000, b"x").unwrap();
        let out = m.read("/f", 0, 10).unwrap();
        assert_eq!(out, vec![0u8; 10]);
    }

    #[test]
    fn write_beyond_max_size_rejected() {
        let mut m = fresh();
        m.mknod("/f", 0o644).unwrap();
        let data = vec![0u8; 1];
        assert!(matches!(
            m.write("/f", MAX_FILE_SIZE, &data),
            Err(FsError::NoSpace)
        ));
    }

    #[test]
    fn mkdir_duplicate_rejected() {
        let mut m = fresh();
        m.mkdir("/dir", 0o755).unwrap();
        assert!(matches!(m.mkdir("/dir", 0o755), Err(FsError::AlreadyExists)));
    }

    #[test]
    fn unlink_then_getattr_enoent_and_bit_cleared() {
        let mut m = fresh();
        m.mknod("/f", 0o644).unwrap();
        let ino = m.getattr("/f").unwrap().ino;
        m.unlink("/f").unwrap();
        assert!(matches!(m.getattr("/f"), Err(FsError::NotFound)));
        assert!(!m.inode_bit_set_for_test(ino));
    }

    #[test]
    fn rmdir_nonempty_rejected() {
        let mut m = fresh();
        m.mkdir("/dir", 0o755).unwrap();
        m.mknod("/dir/f", 0o644).unwrap();
        assert!(matches!(m.rmdir("/dir"), Err(FsError::NotEmpty)));
    }

    #[test]
    fn rename_moves_entry_between_directories() {
        let mut m = fresh();
        m.mkdir("/a", 0o755).unwrap();
        m.mkdir("/b", 0o755).unwrap();
        m.mknod("/a/f", 0o644).unwrap();
        m.rename("/a/f", "/b/f").unwrap();
        assert!(matches!(m.getattr("/a/f"), Err(FsError::NotFound)));
        assert!(m.getattr("/b/f").is_ok());
    }

    #[test]
    fn full_lifecycle_matches_seed_scenario() {
        let mut m = fresh();
        m.mkdir("/dir", 0o755).unwrap();
        m.mknod("/dir/f", 0o644).unwrap();
        m.unlink("/dir/f").unwrap();
        m.rmdir("/dir").unwrap();
        let entries = m.readdir("/").unwrap();
        assert!(entries.is_empty());
        assert!(m.inode_bit_set_for_test(0));
        for i in 1..8 {
            assert!(!m.inode_bit_set_for_test(i));
        }
    }
}
