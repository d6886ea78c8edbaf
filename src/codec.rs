//! Fixed-size binary encode/decode for the three on-disk record types.
//!
//! The teacher's `mkfs/src/ext2.rs` reinterprets `#[repr(C, packed)]`
//! structs as raw byte slices directly. That's sound there because the
//! structs are written once and never read back as live references, but
//! this crate keeps inode/dentry records alive as ordinary owned structs,
//! so fields are encoded/decoded one at a time in an explicit byte order
//! instead, avoiding unaligned-reference UB.

use crate::error::{FsError, FsResult};

/// On-disk size of the superblock record.
pub const SUPERBLOCK_SIZE: usize = 1024;
/// On-disk size of an inode record.
pub const INODE_SIZE: usize = 128;
/// On-disk size of a directory-entry record.
pub const DIRENT_SIZE: usize = 136;
/// Maximum file name length, including the NUL terminator, per the spec.
pub const MAX_NAME_LEN: usize = 128;
/// Number of direct block pointers per inode.
pub const DIRECT_BLOCKS: usize = 6;
/// The filesystem's magic number.
pub const MAGIC: u32 = 0x5241_5453;

/// An inode's direct block pointers.
pub type DirectBlocks = [u32; DIRECT_BLOCKS];

const _: () = assert!(SUPERBLOCK_SIZE == 1024);
const _: () = assert!(INODE_SIZE == 128);
const _: () = assert!(DIRENT_SIZE <= 1024 && 1024 / DIRENT_SIZE >= 1);

/// File-type tag stored in a directory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Regular = 0,
    Directory = 1,
    Symlink = 2,
}

impl FileType {
    pub fn from_code(code: u8) -> FsResult<Self> {
        match code {
            0 => Ok(Self::Regular),
            1 => Ok(Self::Directory),
            2 => Ok(Self::Symlink),
            _ => Err(FsError::InvalidArgument),
        }
    }

    /// Derives the tag from a POSIX `st_mode` value.
    pub fn from_mode(mode: u32) -> Self {
        if mode & libc::S_IFMT as u32 == libc::S_IFDIR as u32 {
            Self::Directory
        } else if mode & libc::S_IFMT as u32 == libc::S_IFLNK as u32 {
            Self::Symlink
        } else {
            Self::Regular
        }
    }
}

/// The on-disk superblock: one block at offset 0.
#[derive(Debug, Clone, Copy)]
pub struct Superblock {
    pub magic: u32,
    pub block_size: u32,
    pub total_blocks: u32,
    pub inode_count: u32,
    pub inodes_per_block: u32,
    pub ibmap_start: u32,
    pub ibmap_blocks: u32,
    pub dbmap_start: u32,
    pub dbmap_blocks: u32,
    pub inode_table_start: u32,
    pub inode_table_blocks: u32,
    pub data_start: u32,
    pub data_blocks: u32,
    pub root_ino: u32,
}

impl Superblock {
    pub fn encode(&self) -> [u8; SUPERBLOCK_SIZE] {
        let mut buf = [0u8; SUPERBLOCK_SIZE];
        let fields = [
            self.magic,
            self.block_size,
            self.total_blocks,
            self.inode_count,
            self.inodes_per_block,
            self.ibmap_start,
            self.ibmap_blocks,
            self.dbmap_start,
            self.dbmap_blocks,
            self.inode_table_start,
            self.inode_table_blocks,
            self.data_start,
            self.data_blocks,
            self.root_ino,
        ];
        for (i, f) in fields.iter().enumerate() {
            buf[i * 4..i * 4 + 4].copy_from_slice(&f.to_le_bytes());
        }
        buf
    }

    pub fn decode(buf: &[u8; SUPERBLOCK_SIZE]) -> Self {
        let u32_at = |i: usize| u32::from_le_bytes(buf[i * 4..i * 4 + 4].try_into().unwrap());
        Self {
            magic: u32_at(0),
            block_size: u32_at(1),
            total_blocks: u32_at(2),
            inode_count: u32_at(3),
            inodes_per_block: u32_at(4),
            ibmap_start: u32_at(5),
            ibmap_blocks: u32_at(6),
            dbmap_start: u32_at(7),
            dbmap_blocks: u32_at(8),
            inode_table_start: u32_at(9),
            inode_table_blocks: u32_at(10),
            data_start: u32_at(11),
            data_blocks: u32_at(12),
            root_ino: u32_at(13),
        }
    }
}

/// The on-disk inode record: 128 bytes.
#[derive(Debug, Clone, Copy)]
pub struct DiskInode {
    pub ino: u32,
    pub mode: u32,
    pub size: u32,
    pub atime: u32,
    pub mtime: u32,
    pub ctime: u32,
    pub uid: u16,
    pub gid: u16,
    pub link_count: u16,
    pub block: [u32; DIRECT_BLOCKS],
}

impl DiskInode {
    pub fn encode(&self) -> [u8; INODE_SIZE] {
        let mut buf = [0u8; INODE_SIZE];
        buf[0..4].copy_from_slice(&self.ino.to_le_bytes());
        buf[4..8].copy_from_slice(&self.mode.to_le_bytes());
        buf[8..12].copy_from_slice(&self.size.to_le_bytes());
        buf[12..16].copy_from_slice(&self.atime.to_le_bytes());
        buf[16..20].copy_from_slice(&self.mtime.to_le_bytes());
        buf[20..24].copy_from_slice(&self.ctime.to_le_bytes());
        buf[24..26].copy_from_slice(&self.uid.to_le_bytes());
        buf[26..28].copy_from_slice(&self.gid.to_le_bytes());
        buf[28..30].copy_from_slice(&self.link_count.to_le_bytes());
        for (i, blk) in self.block.iter().enumerate() {
            let off = 32 + i * 4;
            buf[off..off + 4].copy_from_slice(&blk.to_le_bytes());
        }
        buf
    }

    pub fn decode(buf: &[u8; INODE_SIZE]) -> Self {
        let u32_at = |off: usize| u32::from_le_bytes(buf[off..off + 4].try_into().unwrap());
        let u16_at = |off: usize| u16::from_le_bytes(buf[off..off + 2].try_into().unwrap());
        let mut block = [0u32; DIRECT_BLOCKS];
        for (i, b) in block.iter_mut().enumerate() {
            *b = u32_at(32 + i * 4);
        }
        Self {
            ino: u32_at(0),
            mode: u32_at(4),
            size: u32_at(8),
            atime: u32_at(12),
            mtime: u32_at(16),
            ctime: u32_at(20),
            uid: u16_at(24),
            gid: u16_at(26),
            link_count: u16_at(28),
            block,
        }
    }
}

/// The on-disk directory-entry record: 136 bytes, packed fixed-width into
/// directory data blocks.
#[derive(Debug, Clone)]
pub struct DiskDirent {
    pub ino: u32,
    pub name_len: u8,
    pub file_type: FileType,
    pub name: String,
}

impl DiskDirent {
    /// Number of entry slots a single data block holds.
    pub const PER_BLOCK: usize = crate::block::BLOCK_SIZE / DIRENT_SIZE;

    pub fn encode(&self) -> [u8; DIRENT_SIZE] {
        let mut buf = [0u8; DIRENT_SIZE];
        buf[0..4].copy_from_slice(&self.ino.to_le_bytes());
        buf[4..6].copy_from_slice(&(DIRENT_SIZE as u16).to_le_bytes());
        buf[6] = self.name_len;
        buf[7] = self.file_type as u8;
        let name_bytes = self.name.as_bytes();
        let len = name_bytes.len().min(MAX_NAME_LEN - 1);
        buf[8..8 + len].copy_from_slice(&name_bytes[..len]);
        buf
    }

    /// Decodes a slot. Returns `None` if the slot is free (name begins
    /// with a zero byte).
    pub fn decode(buf: &[u8; DIRENT_SIZE]) -> FsResult<Option<Self>> {
        if buf[8] == 0 {
            return Ok(None);
        }
        let ino = u32::from_le_bytes(buf[0..4].try_into().unwrap());
        let name_len = buf[6];
        let file_type = FileType::from_code(buf[7])?;
        let name_slice = &buf[8..8 + MAX_NAME_LEN - 1];
        let nul = name_slice.iter().position(|&b| b == 0).unwrap_or(name_slice.len());
        let name = String::from_utf8_lossy(&name_slice[..nul]).into_owned();
        Ok(Some(Self {
            ino,
            name_len,
            file_type,
            name,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn superblock_roundtrip() {
        let sb = Superblock {
            magic: MAGIC,
            block_size: 1024,
            total_blocks: 8192,
            inode_count: 128,
            inodes_per_block: 8,
            ibmap_start: 1,
            ibmap_blocks: 1,
            dbmap_start: 2,
            dbmap_blocks: 1,
            inode_table_start: 3,
            inode_table_blocks: 16,
            data_start: 19,
            data_blocks: 8173,
            root_ino: 0,
        };
        let encoded = sb.encode();
        assert_eq!(encoded.len(), SUPERBLOCK_SIZE);
        let decoded = Superblock::decode(&encoded);
        assert_eq!(decoded.magic, MAGIC);
        assert_eq!(decoded.data_start, 19);
        assert_eq!(decoded.root_ino, 0);
    }

    #[test]
    fn inode_roundtrip() {
        let inode = DiskInode {
            ino: 5,
            mode: libc::S_IFREG as u32 | 0o644,
            size: 4096,
            atime: 10,
            mtime: 20,
            ctime: 30,
            uid: 1000,
            gid: 1000,
            link_count: 1,
            block: [10, 11, 0, 0, 0, 0],
        };
        let encoded = inode.encode();
        assert_eq!(encoded.len(), INODE_SIZE);
        let decoded = DiskInode::decode(&encoded);
        assert_eq!(decoded.ino, 5);
        assert_eq!(decoded.size, 4096);
        assert_eq!(decoded.block, [10, 11, 0, 0, 0, 0]);
    }

    #[test]
    fn dirent_roundtrip() {
        let d = DiskDirent {
            ino: 7,
            name_len: 4,
            file_type: FileType::Directory,
            name: "home".to_string(),
        };
        let encoded = d.encode();
        assert_eq!(encoded.len(), DIRENT_SIZE);
        let decoded = DiskDirent::decode(&encoded).unwrap().unwrap();
        assert_eq!(decoded.ino, 7);
        assert_eq!(decoded.name, "home");
        assert_eq!(decoded.file_type, FileType::Directory);
    }

    #[test]
    fn dirent_free_slot_decodes_to_none() {
        let buf = [0u8; DIRENT_SIZE];
        assert!(DiskDirent::decode(&buf).unwrap().is_none());
    }

    #[test]
    fn entries_per_block_is_at_least_one() {
        assert!(DiskDirent::PER_BLOCK >= 1);
    }
}
