use std::any::Any;
use std::fs::File;
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};
use std::sync::{Mutex, TryLockError};

/// One per-CPU ring's file handle, geometry, and sink-private state.
///
/// Created once by the discovery walker or the hot-plug watcher and then
/// owned by the channel registry for the life of the trace. The handle is
/// never reopened and the geometry (`n_sb`, `max_sb_size`) is fixed at
/// registration time, before the pair becomes visible to any worker other
/// than the one that registered it — see [`crate::registry::ChannelRegistry`].
///
/// `drain_lock` is the mutex that must be held across the full
/// reserve/size/copy/release sequence in [`crate::protocol`]; it guards
/// nothing but the drain *protocol*, since the kernel already serializes
/// access to the fd itself.
#[derive(Debug)]
pub struct RingPair {
    fd: Mutex<Option<File>>,
    /// Cached at construction so `raw_fd` stays lock-free on the hot poll
    /// path; only valid while `fd` has not been [`RingPair::close`]d.
    raw_fd: RawFd,
    /// Path of this channel relative to the trace root, for logging and for
    /// the sink's `relative_path` arguments.
    pub relative_path: String,
    n_sb: AtomicU32,
    max_sb_size: AtomicU32,
    drain_lock: Mutex<()>,
    offset: AtomicI64,
    user_data: Mutex<Option<Box<dyn Any + Send>>>,
    warned: AtomicBool,
}

impl RingPair {
    /// Wraps an already-opened, read-only, non-blocking ring file.
    ///
    /// Geometry starts at zero and must be filled in with
    /// [`RingPair::set_geometry`] before the pair is handed to any worker
    /// other than the caller.
    pub fn new(fd: File, relative_path: String) -> Self {
        let raw_fd = fd.as_raw_fd();
        Self {
            fd: Mutex::new(Some(fd)),
            raw_fd,
            relative_path,
            n_sb: AtomicU32::new(0),
            max_sb_size: AtomicU32::new(0),
            drain_lock: Mutex::new(()),
            offset: AtomicI64::new(0),
            user_data: Mutex::new(None),
            warned: AtomicBool::new(false),
        }
    }

    /// Invalid once [`RingPair::close`] has run; callers only do that at
    /// teardown, after every worker that could poll this fd has returned.
    pub fn raw_fd(&self) -> RawFd {
        self.raw_fd
    }

    /// Closes the ring's read handle. Idempotent. Called during teardown,
    /// before `Sink::on_close_channel`, so the sink's documented contract —
    /// that the channel's read handle has already been closed — holds.
    pub fn close(&self) {
        drop(self.fd.lock().unwrap_or_else(|e| e.into_inner()).take());
    }

    /// Sets the static geometry fetched once at registration.
    pub fn set_geometry(&self, n_sb: u32, max_sb_size: u32) {
        self.n_sb.store(n_sb, Ordering::Relaxed);
        self.max_sb_size.store(max_sb_size, Ordering::Relaxed);
    }

    pub fn n_sb(&self) -> u32 {
        self.n_sb.load(Ordering::Relaxed)
    }

    pub fn max_sb_size(&self) -> u32 {
        self.max_sb_size.load(Ordering::Relaxed)
    }

    pub fn offset(&self) -> i64 {
        self.offset.load(Ordering::Relaxed)
    }

    /// Advances the output offset. Called by a [`crate::sink::Sink`]
    /// implementation from inside `on_read_subbuffer`, while the caller
    /// holds `drain_lock`.
    pub fn add_offset(&self, delta: i64) {
        self.offset.fetch_add(delta, Ordering::Relaxed);
    }

    /// Stores sink-owned, per-pair state (e.g. an output file descriptor).
    pub fn set_user_data(&self, value: Box<dyn Any + Send>) {
        *self.user_data.lock().unwrap_or_else(|e| e.into_inner()) = Some(value);
    }

    /// Runs `f` with the sink-owned per-pair state, if any has been set.
    pub fn with_user_data<R>(&self, f: impl FnOnce(Option<&(dyn Any + Send)>) -> R) -> R {
        let guard = self.user_data.lock().unwrap_or_else(|e| e.into_inner());
        f(guard.as_deref())
    }

    /// Takes the sink-owned per-pair state, leaving `None` behind. Intended
    /// for `Sink::on_close_channel`, so the state's `Drop` (e.g. an output
    /// file descriptor) runs at teardown rather than whenever the pair's
    /// last `Arc` happens to go away.
    pub fn take_user_data(&self) -> Option<Box<dyn Any + Send>> {
        self.user_data.lock().unwrap_or_else(|e| e.into_inner()).take()
    }

    /// Reports whether this is the first warning-worthy condition since the
    /// last successful drain, flipping the flag if so. Lets callers log a
    /// sustained failure once instead of once per poll iteration.
    pub(crate) fn warn_once(&self) -> bool {
        !self.warned.swap(true, Ordering::Relaxed)
    }

    /// Clears the warned flag after a successful drain, so the next distinct
    /// failure logs again.
    pub(crate) fn clear_warned(&self) {
        self.warned.store(false, Ordering::Relaxed);
    }

    /// Attempts to acquire the drain lock without blocking.
    ///
    /// Returns `None` if another worker is already draining this ring;
    /// the scheduler moves on to the next ready entry rather than waiting.
    pub(crate) fn try_drain_lock(&self) -> Option<DrainGuard<'_>> {
        match self.drain_lock.try_lock() {
            Ok(guard) => Some(DrainGuard(guard)),
            Err(TryLockError::WouldBlock) => None,
            Err(TryLockError::Poisoned(poisoned)) => Some(DrainGuard(poisoned.into_inner())),
        }
    }
}

/// RAII guard held across one full reserve/size/copy/release sequence.
pub(crate) struct DrainGuard<'a>(std::sync::MutexGuard<'a, ()>);
