use std::io;
use std::os::unix::io::RawFd;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use inotify::{Inotify, WatchMask};
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use std::os::fd::AsRawFd;

/// Opaque handle to one registered watch, abstracted over the backend so the
/// registry does not need to know whether inotify is actually available.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchId {
    Inotify(inotify::WatchDescriptor),
    Null(u64),
}

/// One `create` event surfaced by a hot-plug watcher.
#[derive(Debug)]
pub struct HotplugEvent {
    pub watch: WatchId,
    pub new_name: String,
}

/// Abstraction over "give me a single readable descriptor that fires when a
/// new file appears under any watched directory".
///
/// The scheduler multiplexes this descriptor alongside every ring fd in one
/// `poll(2)` call; a watcher that cannot provide one (because the facility
/// is unavailable) reports `None` from [`HotplugWatcher::raw_fd`] and the
/// scheduler simply never selects it, degrading to "initial scan only".
pub trait HotplugWatcher: Send + Sync {
    /// The descriptor to include in the multiplexed wait, or `None` if this
    /// backend cannot report hot-plug events at all.
    fn raw_fd(&self) -> Option<RawFd>;

    /// Starts watching `absolute_dir` for file creation.
    fn add_watch(&self, absolute_dir: &Path) -> io::Result<WatchId>;

    /// Drains every event currently pending on [`HotplugWatcher::raw_fd`].
    fn read_events(&self) -> io::Result<Vec<HotplugEvent>>;
}

/// inotify-backed watcher: the default on Linux.
pub struct InotifyWatcher {
    raw_fd: RawFd,
    inner: Mutex<Inotify>,
}

impl InotifyWatcher {
    pub fn new() -> io::Result<Self> {
        let inotify = Inotify::init()?;
        let raw_fd = inotify.as_raw_fd();

        let flags = fcntl(raw_fd, FcntlArg::F_GETFL).map_err(io::Error::from)?;
        let flags = OFlag::from_bits_truncate(flags) | OFlag::O_NONBLOCK;
        fcntl(raw_fd, FcntlArg::F_SETFL(flags)).map_err(io::Error::from)?;

        Ok(Self {
            raw_fd,
            inner: Mutex::new(inotify),
        })
    }
}

impl HotplugWatcher for InotifyWatcher {
    fn raw_fd(&self) -> Option<RawFd> {
        Some(self.raw_fd)
    }

    fn add_watch(&self, absolute_dir: &Path) -> io::Result<WatchId> {
        let mut inotify = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let wd = inotify.watches().add(absolute_dir, WatchMask::CREATE)?;
        Ok(WatchId::Inotify(wd))
    }

    fn read_events(&self) -> io::Result<Vec<HotplugEvent>> {
        let mut inotify = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let mut buffer = [0u8; 4096];
        match inotify.read_events(&mut buffer) {
            Ok(events) => Ok(events
                .filter_map(|event| {
                    event.name.map(|name| HotplugEvent {
                        watch: WatchId::Inotify(event.wd.clone()),
                        new_name: name.to_string_lossy().into_owned(),
                    })
                })
                .collect()),
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => Ok(Vec::new()),
            Err(err) => Err(err),
        }
    }
}

/// No-op watcher used when the OS notification facility is unavailable.
///
/// The engine still compiles and runs: the initial discovery scan is treated
/// as complete and final, and no runtime CPU hot-plug is tracked.
#[derive(Default)]
pub struct NullHotplugWatcher {
    next_id: AtomicU64,
}

impl HotplugWatcher for NullHotplugWatcher {
    fn raw_fd(&self) -> Option<RawFd> {
        None
    }

    fn add_watch(&self, _absolute_dir: &Path) -> io::Result<WatchId> {
        Ok(WatchId::Null(self.next_id.fetch_add(1, Ordering::Relaxed)))
    }

    fn read_events(&self) -> io::Result<Vec<HotplugEvent>> {
        Ok(Vec::new())
    }
}
