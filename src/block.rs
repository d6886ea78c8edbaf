//! The block device boundary and the byte-range I/O shim over it.
//!
//! Grounded on `utils::disk::get_disk_size`'s `BLKGETSIZE64` ioctl pattern
//! and `mkfs`'s direct `File` seek/read/write calls, generalized behind a
//! trait so the engine can be driven by an in-memory backend under test.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::os::fd::AsRawFd;
use std::os::unix::fs::FileTypeExt;
use std::path::Path;

/// The driver's fixed transfer granularity.
pub const SECTOR_SIZE: usize = 512;
/// The filesystem's logical block size.
pub const BLOCK_SIZE: usize = 1024;

/// ioctl macro: Command (mirrors `utils::disk::ior!`).
macro_rules! ioc {
    ($a:expr, $b:expr, $c:expr, $d:expr) => {
        (($a) << 30) | (($b) << 8) | ($c) | (($d) << 16)
    };
}

/// ioctl macro: Read command.
macro_rules! ior {
    ($a:expr, $b:expr, $c:ty) => {
        ioc!(2, $a, $b, std::mem::size_of::<$c>() as std::ffi::c_long)
    };
}

/// ioctl command: Get size of disk in number of sectors.
const BLKGETSIZE64: std::ffi::c_long = ior!(0x12, 114, u64);

/// The external block-device driver, exposed as a trait boundary.
///
/// `open`/`close`/argument parsing are the host's responsibility (outside
/// this crate's scope); what remains is the transfer surface itself:
/// fixed-size sector reads/writes, a device-size query, and a sync point.
pub trait BlockDevice {
    /// Reads exactly one sector (`SECTOR_SIZE` bytes).
    fn read_sector(&mut self, sector: u64, buf: &mut [u8; SECTOR_SIZE]) -> io::Result<()>;
    /// Writes exactly one sector.
    fn write_sector(&mut self, sector: u64, buf: &[u8; SECTOR_SIZE]) -> io::Result<()>;
    /// Returns the device size in sectors (the `REQ_DEVICE_SIZE` ioctl).
    fn size_in_sectors(&mut self) -> io::Result<u64>;
    /// Flushes any pending writes (called once, at unmount).
    fn sync(&mut self) -> io::Result<()>;
}

/// A `BlockDevice` backed by a real file or block device node.
pub struct FileBlockDevice {
    file: File,
}

impl FileBlockDevice {
    /// Opens `path` for read/write use as the backing device.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Ok(Self { file })
    }
}

impl BlockDevice for FileBlockDevice {
    fn read_sector(&mut self, sector: u64, buf: &mut [u8; SECTOR_SIZE]) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(sector * SECTOR_SIZE as u64))?;
        self.file.read_exact(buf)
    }

    fn write_sector(&mut self, sector: u64, buf: &[u8; SECTOR_SIZE]) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(sector * SECTOR_SIZE as u64))?;
        self.file.write_all(buf)
    }

    fn size_in_sectors(&mut self) -> io::Result<u64> {
        let metadata = self.file.metadata()?;
        let file_type = metadata.file_type();
        if file_type.is_block_device() || file_type.is_char_device() {
            let mut size: u64 = 0;
            let ret = unsafe { libc::ioctl(self.file.as_raw_fd(), BLKGETSIZE64 as _, &mut size) };
            if ret < 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(size / SECTOR_SIZE as u64)
        } else {
            Ok(metadata.len() / SECTOR_SIZE as u64)
        }
    }

    fn sync(&mut self) -> io::Result<()> {
        self.file.sync_all()
    }
}

/// An in-memory `BlockDevice`, used by unit and integration tests so the
/// engine can run without a real device or FUSE mount.
pub struct MemBlockDevice {
    data: Vec<u8>,
}

impl MemBlockDevice {
    /// Creates a device image of `len_bytes`, zero-filled.
    pub fn new(len_bytes: usize) -> Self {
        Self {
            data: vec![0u8; len_bytes],
        }
    }
}

impl BlockDevice for MemBlockDevice {
    fn read_sector(&mut self, sector: u64, buf: &mut [u8; SECTOR_SIZE]) -> io::Result<()> {
        let off = sector as usize * SECTOR_SIZE;
        buf.copy_from_slice(&self.data[off..off + SECTOR_SIZE]);
        Ok(())
    }

    fn write_sector(&mut self, sector: u64, buf: &[u8; SECTOR_SIZE]) -> io::Result<()> {
        let off = sector as usize * SECTOR_SIZE;
        self.data[off..off + SECTOR_SIZE].copy_from_slice(buf);
        Ok(())
    }

    fn size_in_sectors(&mut self) -> io::Result<u64> {
        Ok((self.data.len() / SECTOR_SIZE) as u64)
    }

    fn sync(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Translates arbitrary byte-range reads/writes into aligned
/// `SECTOR_SIZE`-granularity driver transfers via read-modify-write.
pub struct BlockIo<D> {
    dev: D,
}

impl<D: BlockDevice> BlockIo<D> {
    pub fn new(dev: D) -> Self {
        Self { dev }
    }

    pub fn into_inner(self) -> D {
        self.dev
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.dev
    }

    fn floor_sector(off: u64) -> u64 {
        off / SECTOR_SIZE as u64
    }

    fn ceil_sector(off: u64) -> u64 {
        off.div_ceil(SECTOR_SIZE as u64)
    }

    /// Reads `len` bytes at byte offset `offset` through a staging buffer
    /// spanning the enclosing aligned sector range.
    pub fn read(&mut self, offset: u64, len: usize) -> io::Result<Vec<u8>> {
        let first = Self::floor_sector(offset);
        let last = Self::ceil_sector(offset + len as u64);
        let mut staging = vec![0u8; ((last - first) * SECTOR_SIZE as u64) as usize];
        for (i, chunk) in staging.chunks_mut(SECTOR_SIZE).enumerate() {
            let buf: &mut [u8; SECTOR_SIZE] = chunk.try_into().unwrap();
            self.dev.read_sector(first + i as u64, buf)?;
        }
        let bias = (offset - first * SECTOR_SIZE as u64) as usize;
        Ok(staging[bias..bias + len].to_vec())
    }

    /// Writes `data` at byte offset `offset`, reading the enclosing aligned
    /// sector range first, overlaying `data`, then writing the whole range
    /// back.
    pub fn write(&mut self, offset: u64, data: &[u8]) -> io::Result<()> {
        let first = Self::floor_sector(offset);
        let last = Self::ceil_sector(offset + data.len() as u64);
        let mut staging = vec![0u8; ((last - first) * SECTOR_SIZE as u64) as usize];
        for (i, chunk) in staging.chunks_mut(SECTOR_SIZE).enumerate() {
            let buf: &mut [u8; SECTOR_SIZE] = chunk.try_into().unwrap();
            self.dev.read_sector(first + i as u64, buf)?;
        }
        let bias = (offset - first * SECTOR_SIZE as u64) as usize;
        staging[bias..bias + data.len()].copy_from_slice(data);
        for (i, chunk) in staging.chunks(SECTOR_SIZE).enumerate() {
            let buf: &[u8; SECTOR_SIZE] = chunk.try_into().unwrap();
            self.dev.write_sector(first + i as u64, buf)?;
        }
        Ok(())
    }

    pub fn sync(&mut self) -> io::Result<()> {
        self.dev.sync()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unaligned_write_then_read_roundtrip() {
        let mut io = BlockIo::new(MemBlockDevice::new(4096));
        io.write(100, b"hello world").unwrap();
        let out = io.read(100, 11).unwrap();
        assert_eq!(&out, b"hello world");
    }

    #[test]
    fn read_modify_write_preserves_neighbors() {
        let mut io = BlockIo::new(MemBlockDevice::new(4096));
        io.write(0, &[0xffu8; 600]).unwrap();
        io.write(10, b"mid").unwrap();
        let out = io.read(0, 600).unwrap();
        assert_eq!(&out[10..13], b"mid");
        assert_eq!(out[0], 0xff);
        assert_eq!(out[599], 0xff);
    }

    #[test]
    fn spans_multiple_sectors() {
        let mut io = BlockIo::new(MemBlockDevice::new(4096));
        let data: Vec<u8> = (0..1200u32).map(|i| (i % 251) as u8).collect();
        io.write(50, &data).unwrap();
        let out = io.read(50, data.len()).unwrap();
        assert_eq!(out, data);
    }
}
