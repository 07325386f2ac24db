//! Reference [`Sink`] that mirrors a trace tree onto the local file system.
//!
//! Every sub-buffer is moved from a ring file to its destination file through
//! a thread-local pipe via `splice(2)`, so the bytes never cross into user
//! space. `sync_file_range`/`posix_fadvise` hints bound how much of the
//! destination stays dirty in the page cache during a long-running trace.

use std::cell::Cell;
use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI32, Ordering};

use nix::fcntl::{posix_fadvise, splice, PosixFadviseAdvice, SpliceFFlags};
use nix::unistd::{close, pipe};

use consumer_core::{RingPair, Sink};

thread_local! {
    static THREAD_PIPE: Cell<Option<(RawFd, RawFd)>> = Cell::new(None);
}

struct ChannelFile {
    fd: AtomicI32,
}

impl ChannelFile {
    fn new(file: File) -> Self {
        let fd = AtomicI32::new(file.as_raw_fd());
        // The fd is kept open by leaking `file`'s ownership into the raw
        // value above; `drop_fd` below is the only place it is closed.
        std::mem::forget(file);
        Self { fd }
    }

    fn raw(&self) -> RawFd {
        self.fd.load(Ordering::Relaxed)
    }
}

impl Drop for ChannelFile {
    fn drop(&mut self) {
        let fd = self.fd.load(Ordering::Relaxed);
        if fd >= 0 {
            let _ = close(fd);
        }
    }
}

/// Mirrors channel output under `trace_root`, one file per ring, preserving
/// the relative directory structure discovered by the engine.
pub struct FsSink {
    trace_root: PathBuf,
    append_mode: bool,
}

impl FsSink {
    pub fn new(trace_root: impl Into<PathBuf>, append_mode: bool) -> Self {
        Self {
            trace_root: trace_root.into(),
            append_mode,
        }
    }

    fn destination_path(&self, relative_path: &str) -> PathBuf {
        self.trace_root.join(relative_path)
    }

    fn destination_dir(&self, relative_folder_path: &str) -> PathBuf {
        if relative_folder_path.is_empty() {
            self.trace_root.clone()
        } else {
            self.trace_root.join(relative_folder_path)
        }
    }
}

impl Sink for FsSink {
    fn on_new_channels_folder(&self, relative_path: &str) -> io::Result<()> {
        let dir = self.destination_dir(relative_path);
        match std::fs::create_dir(&dir) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => Ok(()),
            Err(err) => Err(err),
        }
    }

    fn on_open_channel(&self, pair: &RingPair, relative_path: &str) -> io::Result<()> {
        let path = self.destination_path(relative_path);
        let file = open_destination(&path, self.append_mode)?;
        pair.set_user_data(Box::new(ChannelFile::new(file)));
        Ok(())
    }

    fn on_read_subbuffer(&self, pair: &RingPair, len: u32) -> io::Result<()> {
        let out_fd = pair.with_user_data(|data| {
            data.and_then(|d| d.downcast_ref::<ChannelFile>()).map(ChannelFile::raw)
        });
        let Some(out_fd) = out_fd else {
            return Err(io::Error::new(io::ErrorKind::NotFound, "channel has no destination fd"));
        };

        let (read_fd, write_fd) = THREAD_PIPE.with(|cell| cell.get()).ok_or_else(|| {
            io::Error::new(io::ErrorKind::Other, "no thread-local pipe for this worker")
        })?;

        let orig_offset = pair.offset();
        let mut remaining = len as usize;
        // Mirrors the original implementation's per-sub-buffer `off_t offset
        // = 0`: the reserved sub-buffer is always read from its own start,
        // so the channel fd's actual file position is never consulted or
        // advanced by this splice.
        let mut in_offset: libc::loff_t = 0;
        while remaining > 0 {
            let moved = splice(
                pair.raw_fd(),
                Some(&mut in_offset),
                write_fd,
                None,
                remaining,
                SpliceFFlags::SPLICE_F_MOVE | SpliceFFlags::SPLICE_F_MORE,
            )
            .map_err(io::Error::from)?;
            if moved == 0 {
                break;
            }
            let moved = splice(
                read_fd,
                None,
                out_fd,
                None,
                moved,
                SpliceFFlags::SPLICE_F_MOVE | SpliceFFlags::SPLICE_F_MORE,
            )
            .map_err(io::Error::from)?;

            sync_file_range_write(out_fd, pair.offset(), moved as i64);
            pair.add_offset(moved as i64);
            remaining -= moved;
        }

        if orig_offset >= i64::from(pair.max_sb_size()) && pair.max_sb_size() > 0 {
            let window_start = orig_offset - i64::from(pair.max_sb_size());
            sync_file_range_wait(out_fd, window_start, i64::from(pair.max_sb_size()));
            let _ = posix_fadvise(
                out_fd,
                window_start,
                i64::from(pair.max_sb_size()),
                PosixFadviseAdvice::POSIX_FADV_DONTNEED,
            );
        }

        Ok(())
    }

    fn on_close_channel(&self, pair: &RingPair) {
        // Drops the boxed `ChannelFile` here, closing the destination fd
        // through its `Drop` impl, rather than waiting for the pair's last
        // `Arc` to go away.
        drop(pair.take_user_data());
    }

    fn on_new_thread(&self, _thread_num: usize) {
        match pipe() {
            Ok((read_fd, write_fd)) => {
                THREAD_PIPE.with(|cell| cell.set(Some((read_fd.as_raw_fd(), write_fd.as_raw_fd()))));
                std::mem::forget(read_fd);
                std::mem::forget(write_fd);
            }
            Err(err) => log::error!("failed to create splice pipe: {err}"),
        }
    }

    fn on_close_thread(&self, _thread_num: usize) {
        if let Some((read_fd, write_fd)) = THREAD_PIPE.with(|cell| cell.take()) {
            let _ = close(read_fd);
            let _ = close(write_fd);
        }
    }

    fn on_trace_end(&self) {}
}

fn open_destination(path: &Path, append_mode: bool) -> io::Result<File> {
    match std::fs::metadata(path) {
        Ok(_) => {
            if append_mode {
                OpenOptions::new().write(true).open(path)
            } else {
                Err(io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    format!("{} exists, cannot open; try append mode", path.display()),
                ))
            }
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(0o777)
            .open(path),
        Err(err) => Err(err),
    }
}

fn sync_file_range_write(fd: RawFd, offset: i64, len: i64) {
    unsafe {
        libc::sync_file_range(fd, offset, len, libc::SYNC_FILE_RANGE_WRITE as u32);
    }
}

fn sync_file_range_wait(fd: RawFd, offset: i64, len: i64) {
    unsafe {
        libc::sync_file_range(
            fd,
            offset,
            len,
            (libc::SYNC_FILE_RANGE_WAIT_BEFORE
                | libc::SYNC_FILE_RANGE_WRITE
                | libc::SYNC_FILE_RANGE_WAIT_AFTER) as u32,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refuses_to_overwrite_without_append_mode() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cpu0");
        std::fs::write(&path, b"existing").unwrap();

        let err = open_destination(&path, false).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);
    }

    #[test]
    fn append_mode_opens_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cpu0");
        std::fs::write(&path, b"existing").unwrap();

        let file = open_destination(&path, true).unwrap();
        drop(file);
    }

    #[test]
    fn creates_new_file_exclusively() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cpu0");

        let file = open_destination(&path, false).unwrap();
        drop(file);
        assert!(path.exists());
    }

    #[test]
    fn on_new_channels_folder_tolerates_existing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FsSink::new(dir.path(), false);
        sink.on_new_channels_folder("").unwrap();
        sink.on_new_channels_folder("").unwrap();
    }
}
