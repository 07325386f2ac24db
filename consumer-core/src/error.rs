use std::io;
use std::path::PathBuf;

/// Error taxonomy returned by the consumer engine's fallible entry points.
///
/// Variants split along the same line the engine itself does: some are fatal
/// to the whole trace instance (returned from [`crate::TraceInstance::start`]),
/// others are per-ring or per-sub-buffer conditions that a worker logs and
/// recovers from without ever reaching a caller. The recoverable variants
/// still live on this enum so callers that *do* want to observe them (tests,
/// metrics) can match on a single type.
#[derive(Debug, thiserror::Error)]
pub enum ConsumerError {
    /// The trace root could not be opened at all.
    #[error("cannot open trace root {path}: {source}")]
    NoEntry { path: PathBuf, source: io::Error },

    /// The root opened, but no ring survived the mode filter.
    #[error("no channel found under {path} matching the configured mode")]
    NoChannel { path: PathBuf },

    /// A ring failed one of the static geometry queries at registration.
    #[error("failed to read geometry for ring {path}: {source}")]
    Geometry { path: PathBuf, source: io::Error },

    /// The sink rejected a newly opened channel.
    #[error("sink refused channel {path}")]
    SinkOpenFailed { path: PathBuf },

    /// Reserve/size/release failed in a way that is expected under contention.
    #[error("transient drain failure on ring {index}: {source}")]
    TransientDrain { index: usize, source: io::Error },

    /// The producer closed its side of one ring.
    #[error("ring {index} hung up")]
    RingHangup { index: usize },

    /// Every ring being polled by a worker has hung up.
    #[error("all rings hung up")]
    AllHangup,

    /// `poll(2)` itself failed for a reason other than `EINTR`.
    #[error("poll failed: {source}")]
    PollFailed { source: io::Error },

    /// The OS refused to spawn a worker thread.
    #[error("failed to spawn worker {index}: {source}")]
    WorkerSpawn { index: usize, source: io::Error },

    /// The supplied configuration failed validation before startup began.
    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },
}

pub type Result<T> = std::result::Result<T, ConsumerError>;
