//! The in-memory directory tree and path resolver.
//!
//! The specification describes a dentry that owns its children and holds
//! a non-owning back-pointer to its parent, with the "next sibling"
//! pointer left to the implementation. A `HashMap<String, DentryRef>`
//! keyed by name is used here in place of a sibling-linked list: it gives
//! the same ownership shape without the self-referential pointers a
//! sibling list would need in safe Rust, and the specification fixes no
//! iteration order for directory listings, so the substitution is free.
//!
//! Grounded on `original_source/src/utils.cpp`'s `alloc_dentry` /
//! `lookup` (parent-size bump on insertion, name-to-ino resolution).

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use crate::block::BlockDevice;
use crate::codec::{FileType, DIRENT_SIZE};
use crate::error::{FsError, FsResult};
use crate::inode::MemInode;
use crate::mount::Mount;

pub type DentryRef = Rc<RefCell<Dentry>>;

/// A single entry in the in-memory directory tree.
pub struct Dentry {
    pub name: String,
    pub ino: u32,
    /// The type tag as last seen in the parent's directory listing. Once
    /// `inode` is loaded, `FileType::from_mode(inode.mode)` is
    /// authoritative instead.
    pub file_type: FileType,
    pub parent: Option<Weak<RefCell<Dentry>>>,
    pub children: HashMap<String, DentryRef>,
    pub inode: Option<MemInode>,
}

impl Dentry {
    pub fn new(name: String, ino: u32, file_type: FileType) -> DentryRef {
        Rc::new(RefCell::new(Dentry {
            name,
            ino,
            file_type,
            parent: None,
            children: HashMap::new(),
            inode: None,
        }))
    }

    pub fn is_dir(&self) -> bool {
        match &self.inode {
            Some(inode) => inode.is_dir(),
            None => self.file_type == FileType::Directory,
        }
    }
}

/// The outcome of resolving a path against the tree.
pub enum Resolved {
    Found(DentryRef),
    NotFound,
}

impl<D: BlockDevice> Mount<D> {
    /// Resolves an absolute path to its dentry, loading inodes lazily
    /// along the way. The root itself resolves for `"/"`.
    pub fn resolve(&mut self, path: &str) -> FsResult<Resolved> {
        if path == "/" {
            return Ok(Resolved::Found(self.root.clone()));
        }
        let segs: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let mut current = self.root.clone();
        for seg in segs {
            self.ensure_loaded(&current)?;
            if !current.borrow().is_dir() {
                return Ok(Resolved::NotFound);
            }
            let next = current.borrow().children.get(seg).cloned();
            match next {
                Some(child) => current = child,
                None => return Ok(Resolved::NotFound),
            }
        }
        Ok(Resolved::Found(current))
    }

    /// Resolves `path` and requires it to name a directory, loading its
    /// inode if needed.
    pub fn resolve_dir(&mut self, path: &str) -> FsResult<DentryRef> {
        let dentry = match self.resolve(path)? {
            Resolved::Found(d) => d,
            Resolved::NotFound => return Err(FsError::NotFound),
        };
        self.ensure_loaded(&dentry)?;
        if !dentry.borrow().is_dir() {
            return Err(FsError::NotDirectory);
        }
        Ok(dentry)
    }

    /// Links a freshly allocated inode into `parent` under `name`,
    /// bumping `parent`'s in-memory size by one directory-entry record
    /// (an interim value, superseded by the exact block count the next
    /// time `sync_dentry` runs). Returns the new child dentry.
    pub fn alloc_dentry(&mut self, parent: &DentryRef, name: String, inode: MemInode) -> DentryRef {
        let file_type = FileType::from_mode(inode.mode);
        let ino = inode.ino;
        let child = Dentry::new(name.clone(), ino, file_type);
        child.borrow_mut().inode = Some(inode);
        child.borrow_mut().parent = Some(Rc::downgrade(parent));
        parent.borrow_mut().children.insert(name, child.clone());
        if let Some(p_inode) = parent.borrow_mut().inode.as_mut() {
            p_inode.size += DIRENT_SIZE as u32;
        }
        child
    }

    /// Unlinks `name` from `parent`'s children, returning the removed
    /// dentry if present.
    pub fn delete_dentry(&mut self, parent: &DentryRef, name: &str) -> Option<DentryRef> {
        let removed = parent.borrow_mut().children.remove(name);
        if removed.is_some() {
            if let Some(p_inode) = parent.borrow_mut().inode.as_mut() {
                p_inode.size = p_inode.size.saturating_sub(DIRENT_SIZE as u32);
            }
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::MemBlockDevice;
    use crate::mount::Mount;

    fn fresh_mount() -> Mount<MemBlockDevice> {
        let dev = MemBlockDevice::new(1024 * 1024);
        Mount::format(dev).unwrap()
    }

    #[test]
    fn root_resolves() {
        let mut mount = fresh_mount();
        match mount.resolve("/").unwrap() {
            Resolved::Found(d) => assert_eq!(d.borrow().ino, mount.root_ino()),
            Resolved::NotFound => panic!("root must resolve"),
        }
    }

    #[test]
    fn resolve_dir_rejects_regular_file() {
        let mut mount = fresh_mount();
        mount.mknod("/f", 0o644).unwrap();
        assert!(matches!(mount.resolve_dir("/f"), Err(FsError::NotDirectory)));
    }

    #[test]
    fn resolve_missing_child_not_found() {
        let mut mount = fresh_mount();
        assert!(matches!(mount.resolve("/nope").unwrap(), Resolved::NotFound));
    }
}
