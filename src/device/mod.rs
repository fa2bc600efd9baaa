//! Aligned IO handle for raw block devices and regular files
//!
//! Every benchmark worker opens its own [`DeviceHandle`]. The handle is opened
//! with `O_DIRECT` so the page cache cannot absorb reads or writes and the
//! measured latency is the device's own.
//!
//! # Alignment
//!
//! With direct IO the kernel rejects transfers whose buffer address, length or
//! offset are not multiples of the logical sector size. Callers guarantee
//! this: offsets come from [`crate::distribution::OffsetGenerator`] (always a
//! multiple of the block size) and buffers from
//! [`crate::util::buffer::AlignedBuffer`]. The handle only checks it in debug
//! builds.
//!
//! # Errors
//!
//! Open failures are classified into [`BenchError::AccessDenied`],
//! [`BenchError::DeviceNotFound`] and [`BenchError::DeviceBusy`] so the caller
//! can tell a missing privilege from a typo in the path or a mounted disk.

mod block;

use crate::error::BenchError;
use crate::util::buffer::SECTOR_ALIGNMENT;
use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom};
use std::os::unix::fs::{FileExt, FileTypeExt, OpenOptionsExt};
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Whether a handle may be written to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    Read,
    ReadWrite,
}

/// An open device or file prepared for positioned, aligned IO
#[derive(Debug)]
pub struct DeviceHandle {
    file: File,
    path: PathBuf,
    mode: AccessMode,
    direct: bool,
}

impl DeviceHandle {
    /// Open `path` for benchmarking
    ///
    /// `direct` selects `O_DIRECT`. It is on for every real benchmark; tests
    /// turn it off because tmpfs and some overlay filesystems refuse it.
    ///
    /// Block devices opened for writing also get `O_EXCL`, which the kernel
    /// turns into `EBUSY` while the device is mounted or claimed elsewhere.
    pub fn open(path: &Path, mode: AccessMode, direct: bool) -> Result<Self, BenchError> {
        let mut options = OpenOptions::new();
        options.read(true);
        options.write(mode == AccessMode::ReadWrite);

        let mut custom_flags = 0;
        if direct {
            custom_flags |= libc::O_DIRECT;
        }
        if mode == AccessMode::ReadWrite && is_block_device(path) {
            custom_flags |= libc::O_EXCL;
        }
        if custom_flags != 0 {
            options.custom_flags(custom_flags);
        }

        let file = options
            .open(path)
            .map_err(|e| BenchError::from_open_error(path, e))?;

        debug!(path = %path.display(), ?mode, direct, "opened device handle");

        Ok(Self {
            file,
            path: path.to_path_buf(),
            mode,
            direct,
        })
    }

    /// Capacity in bytes
    ///
    /// Regular files report their length from metadata. Block devices are
    /// asked via `BLKGETSIZE64`; anything else falls back to seeking to the
    /// end of the handle.
    pub fn size(&self) -> Result<u64, BenchError> {
        let metadata = self.file.metadata().map_err(|e| self.io_error(e))?;
        if metadata.is_file() {
            return Ok(metadata.len());
        }

        if metadata.file_type().is_block_device() {
            match block::device_size(self.fd()) {
                Ok(size) => return Ok(size),
                Err(e) => debug!(path = %self.path.display(), error = %e, "BLKGETSIZE64 failed, seeking to end"),
            }
        }

        let mut file = &self.file;
        let size = file.seek(SeekFrom::End(0)).map_err(|e| self.io_error(e))?;
        file.seek(SeekFrom::Start(0)).map_err(|e| self.io_error(e))?;
        Ok(size)
    }

    /// Positioned read into `buf`, returning the bytes read
    pub fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize, BenchError> {
        self.debug_check_alignment(offset, buf.as_ptr(), buf.len());
        self.file.read_at(buf, offset).map_err(|e| self.io_error(e))
    }

    /// Positioned write from `buf`, returning the bytes written
    pub fn write_at(&self, offset: u64, buf: &[u8]) -> Result<usize, BenchError> {
        debug_assert_eq!(self.mode, AccessMode::ReadWrite, "write on a read-only handle");
        self.debug_check_alignment(offset, buf.as_ptr(), buf.len());
        self.file.write_at(buf, offset).map_err(|e| self.io_error(e))
    }

    #[inline]
    pub fn fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mode(&self) -> AccessMode {
        self.mode
    }

    pub fn is_direct(&self) -> bool {
        self.direct
    }

    fn io_error(&self, source: std::io::Error) -> BenchError {
        BenchError::Io {
            path: self.path.clone(),
            source,
        }
    }

    #[inline]
    fn debug_check_alignment(&self, offset: u64, ptr: *const u8, len: usize) {
        if self.direct {
            debug_assert_eq!(offset % SECTOR_ALIGNMENT as u64, 0, "unaligned offset {}", offset);
            debug_assert_eq!(ptr as usize % SECTOR_ALIGNMENT, 0, "unaligned buffer address");
            debug_assert_eq!(len % SECTOR_ALIGNMENT, 0, "unaligned length {}", len);
        }
    }
}

fn is_block_device(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|m| m.file_type().is_block_device())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn temp_file(dir: &TempDir, name: &str, len: u64) -> PathBuf {
        let path = dir.path().join(name);
        let file = File::create(&path).unwrap();
        file.set_len(len).unwrap();
        path
    }

    #[test]
    fn test_open_missing_device() {
        let dir = TempDir::new().unwrap();
        let err = DeviceHandle::open(&dir.path().join("nope"), AccessMode::Read, false).unwrap_err();
        assert!(matches!(err, BenchError::DeviceNotFound { .. }));
    }

    #[test]
    fn test_size_of_regular_file() {
        let dir = TempDir::new().unwrap();
        let path = temp_file(&dir, "dev.img", 1024 * 1024);

        let handle = DeviceHandle::open(&path, AccessMode::Read, false).unwrap();
        assert_eq!(handle.size().unwrap(), 1024 * 1024);
        assert_eq!(handle.mode(), AccessMode::Read);
        assert!(!handle.is_direct());
        assert_eq!(handle.path(), path.as_path());
    }

    #[test]
    fn test_positioned_write_then_read() {
        let dir = TempDir::new().unwrap();
        let path = temp_file(&dir, "dev.img", 64 * 1024);

        let handle = DeviceHandle::open(&path, AccessMode::ReadWrite, false).unwrap();
        let data = vec![0xA5u8; 4096];
        assert_eq!(handle.write_at(8192, &data).unwrap(), 4096);

        let mut back = vec![0u8; 4096];
        assert_eq!(handle.read_at(8192, &mut back).unwrap(), 4096);
        assert_eq!(back, data);

        // Untouched region stays zero
        handle.read_at(0, &mut back).unwrap();
        assert!(back.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_write_on_read_only_handle_fails() {
        let dir = TempDir::new().unwrap();
        let path = temp_file(&dir, "dev.img", 8192);

        let handle = DeviceHandle::open(&path, AccessMode::Read, false).unwrap();
        let mut file = &handle.file;
        // Bypass the debug assertion and go straight to the kernel
        assert!(std::io::Write::write(&mut file, &[1u8; 16]).is_err());
    }
}
