//! Block device geometry queries

use std::io;
use std::os::unix::io::RawFd;

/// ioctl request code for the size of a block device in bytes
#[cfg(target_os = "linux")]
const BLKGETSIZE64: libc::c_ulong = 0x80081272;

/// Capacity of the block device behind `fd`
#[cfg(target_os = "linux")]
pub(super) fn device_size(fd: RawFd) -> io::Result<u64> {
    let mut size: u64 = 0;
    // SAFETY: BLKGETSIZE64 writes a single u64 through the pointer.
    let result = unsafe { libc::ioctl(fd, BLKGETSIZE64 as _, &mut size) };
    if result < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(size)
}

#[cfg(not(target_os = "linux"))]
pub(super) fn device_size(_fd: RawFd) -> io::Result<u64> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "block device size query not supported on this platform",
    ))
}
