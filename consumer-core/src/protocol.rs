use nix::errno::Errno;

use crate::error::ConsumerError;
use crate::ioctl;
use crate::pair::RingPair;
use crate::sink::Sink;

/// Outcome of one attempted sub-buffer drain, reported to the scheduler for
/// logging; none of these terminate the worker on their own.
#[derive(Debug, PartialEq, Eq)]
pub enum DrainOutcome {
    /// A sub-buffer was reserved, copied, and released.
    Drained { len: u32 },
    /// Reserve failed benignly: nothing was available. Not an error.
    NothingAvailable,
}

/// Performs the reserve / size / copy / release sequence on `pair`, with its
/// drain lock already held by the caller.
///
/// Releasing is unconditional once a reserve has succeeded: even when the
/// sink's copy step fails, the cookie is surrendered so the ring stays live.
/// A release-time `EFAULT` or `EIO` is logged and treated as recoverable —
/// neither escalates the ring to hung-up, matching modern producers where
/// both paths are effectively vestigial.
pub fn drain_one(
    index: usize,
    pair: &RingPair,
    sink: &dyn Sink,
) -> Result<DrainOutcome, ConsumerError> {
    let fd = pair.raw_fd();

    let cookie = match ioctl::reserve(fd) {
        Ok(cookie) => cookie,
        Err(Errno::EAGAIN) => return Ok(DrainOutcome::NothingAvailable),
        Err(err) => {
            return Err(ConsumerError::TransientDrain {
                index,
                source: err.into(),
            })
        }
    };

    let len = match ioctl::sub_buffer_size(fd) {
        Ok(len) => len,
        Err(err) => {
            // The reservation is still outstanding: release it before giving up,
            // otherwise the ring is permanently leaked.
            release_or_log(index, pair, cookie);
            return Err(ConsumerError::TransientDrain {
                index,
                source: err.into(),
            });
        }
    };

    if let Err(err) = sink.on_read_subbuffer(pair, len) {
        if pair.warn_once() {
            log::warn!("ring {index} ({}): sink copy failed: {err}", pair.relative_path);
        }
    } else {
        pair.clear_warned();
    }

    release_or_log(index, pair, cookie);
    Ok(DrainOutcome::Drained { len })
}

fn release_or_log(index: usize, pair: &RingPair, cookie: u32) {
    match ioctl::release(pair.raw_fd(), cookie) {
        Ok(()) => {}
        Err(Errno::EFAULT) if pair.warn_once() => {
            log::error!("ring {index}: address fault releasing sub-buffer cookie {cookie}");
        }
        Err(Errno::EIO) if pair.warn_once() => {
            log::error!(
                "ring {index}: producer overwrote sub-buffer cookie {cookie} before release"
            );
        }
        Err(err) if pair.warn_once() => {
            log::warn!("ring {index}: error releasing sub-buffer cookie {cookie}: {err}");
        }
        Err(_) => {}
    }
}

/// Fetches and stores the static geometry (`n_sb`, `max_sb_size`) for one
/// newly-registered pair.
pub fn init_geometry(index: usize, pair: &RingPair) -> Result<(), ConsumerError> {
    let (n_sb, max_sb_size) =
        ioctl::geometry(pair.raw_fd()).map_err(|source| ConsumerError::Geometry {
            path: pair.relative_path.clone().into(),
            source: source.into(),
        })?;
    pair.set_geometry(n_sb, max_sb_size);
    log::debug!("ring {index} ({}): n_sb={n_sb} max_sb_size={max_sb_size}", pair.relative_path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::Sink;
    use std::fs::File;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSink {
        reads: AtomicUsize,
    }

    impl Sink for CountingSink {
        fn on_new_channels_folder(&self, _: &str) -> std::io::Result<()> {
            Ok(())
        }
        fn on_open_channel(&self, _: &RingPair, _: &str) -> std::io::Result<()> {
            Ok(())
        }
        fn on_read_subbuffer(&self, pair: &RingPair, len: u32) -> std::io::Result<()> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            pair.add_offset(i64::from(len));
            Ok(())
        }
        fn on_close_channel(&self, _: &RingPair) {}
        fn on_new_thread(&self, _: usize) {}
        fn on_close_thread(&self, _: usize) {}
        fn on_trace_end(&self) {}
    }

    #[test]
    fn drain_on_non_ring_fd_reports_transient_error() {
        // /dev/null does not implement the relay ioctls, so reserve() must
        // surface as a transient drain error rather than panicking.
        let fd = File::open("/dev/null").unwrap();
        let pair = RingPair::new(fd, "cpu0".to_string());
        let sink = CountingSink {
            reads: AtomicUsize::new(0),
        };

        let result = drain_one(0, &pair, &sink);
        assert!(result.is_err());
        assert_eq!(sink.reads.load(Ordering::SeqCst), 0);
    }
}
