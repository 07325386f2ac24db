//! Raw control-protocol request numbers for the per-CPU ring files.
//!
//! These mirror the kernel's stable relay-channel ioctls: reserve the oldest
//! unread sub-buffer, read its size, and release it back to the producer.
//! The request numbers are fixed by the kernel ABI, not chosen here.

use std::os::unix::io::RawFd;

use nix::{ioctl_read, ioctl_write_ptr};

const RELAY_IOC_MAGIC: u8 = 0xF5;

ioctl_read!(relay_get_sb, RELAY_IOC_MAGIC, 0x00, u32);
ioctl_write_ptr!(relay_put_sb, RELAY_IOC_MAGIC, 0x01, u32);
ioctl_read!(relay_get_n_sb, RELAY_IOC_MAGIC, 0x02, u32);
ioctl_read!(relay_get_sb_size, RELAY_IOC_MAGIC, 0x03, u32);
ioctl_read!(relay_get_max_sb_size, RELAY_IOC_MAGIC, 0x04, u32);

/// Reserves the oldest unread sub-buffer. Returns its cookie.
///
/// # Errors
///
/// Fails benignly (`EAGAIN`-class) when no sub-buffer is currently
/// available; callers must treat that as "no work done", not an error to
/// propagate.
pub fn reserve(fd: RawFd) -> nix::Result<u32> {
    let mut cookie: u32 = 0;
    unsafe { relay_get_sb(fd, &mut cookie) }?;
    Ok(cookie)
}

/// Surrenders `cookie` back to the ring. Must be called exactly once per
/// successful [`reserve`], even if the copy step failed.
pub fn release(fd: RawFd, cookie: u32) -> nix::Result<()> {
    unsafe { relay_put_sb(fd, &cookie) }?;
    Ok(())
}

/// Reads the byte length of the currently reserved sub-buffer.
pub fn sub_buffer_size(fd: RawFd) -> nix::Result<u32> {
    let mut len: u32 = 0;
    unsafe { relay_get_sb_size(fd, &mut len) }?;
    Ok(len)
}

/// Reads static geometry: sub-buffer count and maximum sub-buffer size.
pub fn geometry(fd: RawFd) -> nix::Result<(u32, u32)> {
    let mut n_sb: u32 = 0;
    let mut max_sb_size: u32 = 0;
    unsafe { relay_get_n_sb(fd, &mut n_sb) }?;
    unsafe { relay_get_max_sb_size(fd, &mut max_sb_size) }?;
    Ok((n_sb, max_sb_size))
}
