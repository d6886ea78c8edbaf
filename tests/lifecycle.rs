//! Full mount → operate → unmount → remount round trips, exercising the
//! seed scenarios and universal invariants this crate is built against.
//!
//! Uses `tempfile` for a real file-backed device, matching
//! `realchonk-fuse-ufs`'s integration-test setup for the same kind of
//! on-disk filesystem.

use ext2fsd::block::FileBlockDevice;
use ext2fsd::mount::Mount;
use std::io::{Seek, SeekFrom};

fn backing_file(blocks: usize) -> tempfile::NamedTempFile {
    let mut f = tempfile::NamedTempFile::new().unwrap();
    f.as_file_mut().set_len((blocks * 1024) as u64).unwrap();
    f.as_file_mut().seek(SeekFrom::Start(0)).unwrap();
    f
}

#[test]
fn format_unmount_remount_preserves_empty_root() {
    let file = backing_file(4096);
    let dev = FileBlockDevice::open(file.path()).unwrap();
    let mount = Mount::format(dev).unwrap();
    let dev = mount.unmount().unwrap();
    drop(dev);

    let dev = FileBlockDevice::open(file.path()).unwrap();
    let mut mount = Mount::open_device(dev).unwrap();
    let entries = mount.readdir("/").unwrap();
    assert!(entries.is_empty());
}

#[test]
fn write_unmount_remount_read_roundtrips() {
    let file = backing_file(4096);
    let dev = FileBlockDevice::open(file.path()).unwrap();
    let mut mount = Mount::format(dev).unwrap();
    mount.mknod("/greeting", 0o644).unwrap();
    mount.write("/greeting", 0, b"hello, disk").unwrap();
    let dev = mount.unmount().unwrap();
    drop(dev);

    let dev = FileBlockDevice::open(file.path()).unwrap();
    let mut mount = Mount::open_device(dev).unwrap();
    let data = mount.read("/greeting", 0, 11).unwrap();
    assert_eq!(&data, b"hello, disk");
}

#[test]
fn directory_tree_survives_remount() {
    let file = backing_file(4096);
    let dev = FileBlockDevice::open(file.path()).unwrap();
    let mut mount = Mount::format(dev).unwrap();
    mount.mkdir("/home", 0o755).unwrap();
    mount.mkdir("/home/user", 0o755).unwrap();
    mount.mknod("/home/user/notes.txt", 0o644).unwrap();
    mount.write("/home/user/notes.txt", 0, b"remember the milk").unwrap();
    let dev = mount.unmount().unwrap();
    drop(dev);

    let dev = FileBlockDevice::open(file.path()).unwrap();
    let mut mount = Mount::open_device(dev).unwrap();
    let home = mount.readdir("/").unwrap();
    assert_eq!(home.len(), 1);
    assert_eq!(home[0].name, "home");
    let user_dir = mount.readdir("/home").unwrap();
    assert_eq!(user_dir.len(), 1);
    assert_eq!(user_dir[0].name, "user");
    let data = mount.read("/home/user/notes.txt", 0, 18).unwrap();
    assert_eq!(&data, b"remember the milk");
}

#[test]
fn unlink_rmdir_leaves_only_root_inode_allocated() {
    let file = backing_file(4096);
    let dev = FileBlockDevice::open(file.path()).unwrap();
    let mut mount = Mount::format(dev).unwrap();
    mount.mkdir("/dir", 0o755).unwrap();
    mount.mknod("/dir/f", 0o644).unwrap();
    mount.unlink("/dir/f").unwrap();
    mount.rmdir("/dir").unwrap();
    assert!(mount.readdir("/").unwrap().is_empty());

    let dev = mount.unmount().unwrap();
    drop(dev);
    let dev = FileBlockDevice::open(file.path()).unwrap();
    let mut mount = Mount::open_device(dev).unwrap();
    assert!(mount.readdir("/").unwrap().is_empty());
}

#[test]
fn six_block_file_fills_to_capacity_then_rejects_growth() {
    let file = backing_file(4096);
    let dev = FileBlockDevice::open(file.path()).unwrap();
    let mut mount = Mount::format(dev).unwrap();
    mount.mknod("/big", 0o644).unwrap();

    let max = ext2fsd::ops::MAX_FILE_SIZE as usize;
    let payload = vec![0x5au8; max];
    mount.write("/big", 0, &payload).unwrap();
    assert_eq!(mount.getattr("/big").unwrap().size, max as u64);

    let overflow = [0u8; 1];
    assert!(mount.write("/big", max as u64, &overflow).is_err());
}
