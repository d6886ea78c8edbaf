//! Translation layer binding the core engine to `fuser`'s low-level,
//! inode-number-keyed `Filesystem` trait.
//!
//! The core engine (see [`crate::ops`]) is path-based, matching
//! `original_source/src/myfs.cpp`'s high-level `fuse_operations` wrappers
//! (`fuse_getattr(path, ...)`, etc). `fuser` only exposes the low-level
//! ABI, addressed by inode number, so this module's only job is bridging
//! that gap: it keeps no filesystem logic of its own, just an ino→path
//! registry built up as the kernel looks entries up, and a lookup-count
//! per the `forget` contract.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use fuser::{
    FileAttr, FileType as FuseFileType, Filesystem, KernelConfig, ReplyAttr, ReplyData,
    ReplyDirectory, ReplyEmpty, ReplyEntry, ReplyOpen, ReplyWrite, Request, TimeOrNow,
};
use libc::c_int;

use crate::block::FileBlockDevice;
use crate::codec::FileType as CoreFileType;
use crate::error::FsError;
use crate::mount::Mount;
use crate::ops::Timestamps;

const TTL: Duration = Duration::from_secs(1);

fn secs_to_system_time(secs: u32) -> SystemTime {
    UNIX_EPOCH + Duration::from_secs(secs as u64)
}

fn system_time_to_secs(t: SystemTime) -> u32 {
    t.duration_since(UNIX_EPOCH).map(|d| d.as_secs() as u32).unwrap_or(0)
}

fn core_kind_to_fuse(k: CoreFileType) -> FuseFileType {
    match k {
        CoreFileType::Directory => FuseFileType::Directory,
        CoreFileType::Regular => FuseFileType::RegularFile,
        CoreFileType::Symlink => FuseFileType::Symlink,
    }
}

/// `Ext2Fuse` owns the mounted engine plus the ino↔path registry `fuser`'s
/// ABI requires; every method below resolves `ino` to a path, calls the
/// matching `Mount` operation, and translates the result or the
/// `FsError` back into a `fuser` reply.
pub struct Ext2Fuse {
    mount: Mount<FileBlockDevice>,
    paths: HashMap<u64, PathBuf>,
    lookups: HashMap<u64, u64>,
}

impl Ext2Fuse {
    pub fn new(mount: Mount<FileBlockDevice>) -> Self {
        let mut paths = HashMap::new();
        paths.insert(1, PathBuf::from("/"));
        Self {
            mount,
            paths,
            lookups: HashMap::new(),
        }
    }

    pub fn into_mount(self) -> Mount<FileBlockDevice> {
        self.mount
    }

    fn ino_to_path(&self, ino: u64) -> PathBuf {
        self.paths.get(&ino).cloned().unwrap_or_else(|| PathBuf::from("/"))
    }

    fn path_to_ino(&mut self, path: &Path) -> u64 {
        for (&ino, p) in &self.paths {
            if p == path {
                return ino;
            }
        }
        let ino = (self.mount.getattr(&path.to_string_lossy()).map(|a| a.ino).unwrap_or(0) as u64) + 1;
        self.paths.insert(ino, path.to_path_buf());
        ino
    }

    fn remember(&mut self, ino: u64) {
        *self.lookups.entry(ino).or_insert(0) += 1;
    }

    fn to_file_attr(ino: u64, attr: &crate::ops::Attr) -> FileAttr {
        FileAttr {
            ino,
            size: attr.size,
            blocks: attr.blocks,
            atime: secs_to_system_time(attr.atime),
            mtime: secs_to_system_time(attr.mtime),
            ctime: secs_to_system_time(attr.ctime),
            crtime: UNIX_EPOCH,
            kind: core_kind_to_fuse(CoreFileType::from_mode(attr.mode)),
            perm: (attr.mode & 0o7777) as u16,
            nlink: attr.link_count as u32,
            uid: attr.uid as u32,
            gid: attr.gid as u32,
            rdev: 0,
            blksize: crate::block::BLOCK_SIZE as u32,
            flags: 0,
        }
    }

    fn join(parent: &Path, name: &OsStr) -> PathBuf {
        if parent == Path::new("/") {
            PathBuf::from("/").join(name)
        } else {
            parent.join(name)
        }
    }
}

impl Filesystem for Ext2Fuse {
    fn init(&mut self, _req: &Request<'_>, _config: &mut KernelConfig) -> Result<(), c_int> {
        Ok(())
    }

    fn destroy(&mut self) {
        if let Err(e) = self.mount.flush() {
            log::error!("unmount flush failed: {e}");
        }
    }

    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let path = Self::join(&self.ino_to_path(parent), name);
        match self.mount.getattr(&path.to_string_lossy()) {
            Ok(attr) => {
                let ino = attr.ino as u64 + 1;
                self.paths.insert(ino, path);
                self.remember(ino);
                reply.entry(&TTL, &Self::to_file_attr(ino, &attr), 0);
            }
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn forget(&mut self, _req: &Request<'_>, ino: u64, nlookup: u64) {
        if let Some(count) = self.lookups.get_mut(&ino) {
            *count = count.saturating_sub(nlookup);
            if *count == 0 {
                self.lookups.remove(&ino);
                self.paths.remove(&ino);
            }
        }
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, reply: ReplyAttr) {
        let path = self.ino_to_path(ino);
        match self.mount.getattr(&path.to_string_lossy()) {
            Ok(attr) => reply.attr(&TTL, &Self::to_file_attr(ino, &attr)),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn setattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _mode: Option<u32>,
        _uid: Option<u32>,
        _gid: Option<u32>,
        size: Option<u64>,
        atime: Option<TimeOrNow>,
        mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        let path = self.ino_to_path(ino);
        let path_str = path.to_string_lossy().into_owned();

        if let Some(n) = size {
            if n > crate::ops::MAX_FILE_SIZE {
                reply.error(libc::EINVAL);
                return;
            }
            if let Err(e) = self.mount.truncate(&path_str, n as u32) {
                reply.error(e.to_errno());
                return;
            }
        }
        if atime.is_some() || mtime.is_some() {
            let to_secs = |t: TimeOrNow| match t {
                TimeOrNow::SpecificTime(t) => system_time_to_secs(t),
                TimeOrNow::Now => crate::util::now_secs(),
            };
            let ts = Timestamps {
                atime: atime.map(to_secs),
                mtime: mtime.map(to_secs),
            };
            if let Err(e) = self.mount.utimens(&path_str, ts) {
                reply.error(e.to_errno());
                return;
            }
        }
        match self.mount.getattr(&path_str) {
            Ok(attr) => reply.attr(&TTL, &Self::to_file_attr(ino, &attr)),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn mknod(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        _rdev: u32,
        reply: ReplyEntry,
    ) {
        let path = Self::join(&self.ino_to_path(parent), name);
        match self.mount.mknod(&path.to_string_lossy(), mode & 0o7777) {
            Ok(attr) => {
                let ino = attr.ino as u64 + 1;
                self.paths.insert(ino, path);
                self.remember(ino);
                reply.entry(&TTL, &Self::to_file_attr(ino, &attr), 0);
            }
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn mkdir(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        reply: ReplyEntry,
    ) {
        let path = Self::join(&self.ino_to_path(parent), name);
        match self.mount.mkdir(&path.to_string_lossy(), mode & 0o7777) {
            Ok(attr) => {
                let ino = attr.ino as u64 + 1;
                self.paths.insert(ino, path);
                self.remember(ino);
                reply.entry(&TTL, &Self::to_file_attr(ino, &attr), 0);
            }
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn unlink(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let path = Self::join(&self.ino_to_path(parent), name);
        match self.mount.unlink(&path.to_string_lossy()) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn rmdir(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let path = Self::join(&self.ino_to_path(parent), name);
        match self.mount.rmdir(&path.to_string_lossy()) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn rename(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        _flags: u32,
        reply: ReplyEmpty,
    ) {
        let from = Self::join(&self.ino_to_path(parent), name);
        let to = Self::join(&self.ino_to_path(newparent), newname);
        match self.mount.rename(&from.to_string_lossy(), &to.to_string_lossy()) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, _flags: i32, reply: ReplyOpen) {
        let path = self.ino_to_path(ino);
        match self.mount.open(&path.to_string_lossy()) {
            Ok(()) => reply.opened(0, 0),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn opendir(&mut self, _req: &Request<'_>, ino: u64, _flags: i32, reply: ReplyOpen) {
        let path = self.ino_to_path(ino);
        match self.mount.opendir(&path.to_string_lossy()) {
            Ok(()) => reply.opened(0, 0),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn access(&mut self, _req: &Request<'_>, ino: u64, _mask: i32, reply: ReplyEmpty) {
        let path = self.ino_to_path(ino);
        match self.mount.access(&path.to_string_lossy()) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        let path = self.ino_to_path(ino);
        match self.mount.read(&path.to_string_lossy(), offset.max(0) as u64, size as usize) {
            Ok(data) => reply.data(&data),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn write(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        let path = self.ino_to_path(ino);
        match self.mount.write(&path.to_string_lossy(), offset.max(0) as u64, data) {
            Ok(n) => reply.written(n as u32),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn readdir(&mut self, _req: &Request<'_>, ino: u64, _fh: u64, offset: i64, mut reply: ReplyDirectory) {
        let path = self.ino_to_path(ino);
        let entries = match self.mount.readdir(&path.to_string_lossy()) {
            Ok(e) => e,
            Err(e) => {
                reply.error(e.to_errno());
                return;
            }
        };

        let mut synthetic = vec![(ino, FuseFileType::Directory, ".".to_string())];
        synthetic.push((1, FuseFileType::Directory, "..".to_string()));
        let listing: Vec<_> = synthetic
            .into_iter()
            .chain(entries.into_iter().map(|e| {
                let child_path = Self::join(&path, OsStr::new(&e.name));
                let child_ino = self.path_to_ino(&child_path);
                (child_ino, core_kind_to_fuse(e.file_type), e.name)
            }))
            .collect();

        for (i, (child_ino, kind, name)) in listing.into_iter().enumerate().skip(offset as usize) {
            if reply.add(child_ino, (i + 1) as i64, kind, &name) {
                break;
            }
        }
        reply.ok();
    }
}

#[allow(dead_code)]
fn _assert_error_reachable() -> FsError {
    FsError::InvalidArgument
}
